use std::collections::HashMap;

use crate::table::{AbundanceTable, NormalizedTable, UnifiedMatrix};
use crate::vocabulary::TaxonomyVocabulary;

/// Left-joins `table` onto `vocabulary`: one row per vocabulary label in
/// vocabulary order, zero-filled where the visit did not observe the label.
/// Labels outside the vocabulary are dropped; a repeated label keeps its
/// first row.
pub fn unify(vocabulary: &TaxonomyVocabulary, table: &NormalizedTable) -> UnifiedMatrix {
    let mut by_label: HashMap<&str, &Vec<f64>> = HashMap::with_capacity(table.n_features());
    for (label, row) in table.labels().iter().zip(table.rows()) {
        by_label.entry(label.as_str()).or_insert(row);
    }

    let width = table.n_subjects();
    let values = vocabulary
        .labels()
        .iter()
        .map(|label| match by_label.get(label.as_str()) {
            Some(row) => (*row).clone(),
            None => vec![0.0; width],
        })
        .collect();

    AbundanceTable::from_parts(
        vocabulary.labels().to_vec(),
        table.subjects().to_vec(),
        values,
    )
}
