use std::collections::HashSet;

use crate::table::{AbundanceTable, PairedVisitMatrix, UnifiedMatrix};

/// Restricts two visit matrices to the subjects present in both. Both
/// outputs keep `a`'s subject order; an empty intersection leaves only the
/// key column.
pub fn extract_paired(
    a: &UnifiedMatrix,
    b: &UnifiedMatrix,
) -> (PairedVisitMatrix, PairedVisitMatrix) {
    let in_b: HashSet<&str> = b.subjects().iter().map(String::as_str).collect();
    let shared: Vec<String> = a
        .subjects()
        .iter()
        .filter(|subject| in_b.contains(subject.as_str()))
        .cloned()
        .collect();

    (select_subjects(a, &shared), select_subjects(b, &shared))
}

fn select_subjects(matrix: &UnifiedMatrix, subjects: &[String]) -> PairedVisitMatrix {
    let columns: Vec<usize> = subjects
        .iter()
        .filter_map(|subject| matrix.subject_index(subject))
        .collect();
    let values = matrix
        .rows()
        .iter()
        .map(|row| columns.iter().map(|col| row[*col]).collect())
        .collect();
    AbundanceTable::from_parts(matrix.labels().to_vec(), subjects.to_vec(), values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(subjects: &[&str], value: f64) -> UnifiedMatrix {
        AbundanceTable::new(
            vec!["A".to_string(), "B".to_string()],
            subjects.iter().map(|s| s.to_string()).collect(),
            vec![vec![value; subjects.len()]; 2],
        )
        .unwrap()
    }

    #[test]
    fn keeps_intersection_in_first_visit_order() {
        let a = matrix(&["S3", "S1", "S2"], 0.1);
        let b = matrix(&["S1", "S4", "S3"], 0.2);
        let (pa, pb) = extract_paired(&a, &b);

        assert_eq!(pa.subjects(), ["S3", "S1"]);
        assert_eq!(pb.subjects(), ["S3", "S1"]);
        assert_eq!(pa.value("A", "S1"), Some(0.1));
        assert_eq!(pb.value("A", "S1"), Some(0.2));
        assert_eq!(pa.labels(), a.labels());
    }

    #[test]
    fn disjoint_visits_keep_key_column_only() {
        let a = matrix(&["S1"], 0.1);
        let b = matrix(&["S2"], 0.2);
        let (pa, pb) = extract_paired(&a, &b);
        assert_eq!(pa.n_subjects(), 0);
        assert_eq!(pb.n_subjects(), 0);
        assert_eq!(pa.n_features(), 2);
        assert_eq!(pa.to_tsv().unwrap(), b"subject_id\nA\nB\n");
    }
}
