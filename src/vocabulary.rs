use std::collections::BTreeSet;
use std::fs;

use camino::Utf8Path;

use crate::error::OtuError;
use crate::table::NormalizedTable;

/// Sorted, deduplicated set of every taxonomy label seen in one
/// (body site, classifier) group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyVocabulary {
    labels: Vec<String>,
}

impl TaxonomyVocabulary {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = labels.into_iter().map(Into::into).collect();
        Self {
            labels: set.into_iter().collect(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels
            .binary_search_by(|candidate| candidate.as_str().cmp(label))
            .is_ok()
    }

    /// Reads a vocabulary file: one label per line, no header.
    pub fn read(path: &Utf8Path) -> Result<Self, OtuError> {
        if !path.as_std_path().exists() {
            return Err(OtuError::MissingVocabulary(path.to_path_buf()));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| OtuError::Filesystem(format!("read {path}: {err}")))?;
        Ok(Self::from_labels(
            content.lines().filter(|line| !line.is_empty()),
        ))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for label in &self.labels {
            out.push_str(label);
            out.push('\n');
        }
        out.into_bytes()
    }
}

/// Collects the key column of every table into one vocabulary. The result
/// does not depend on the order of `tables`.
pub fn collect_vocabulary<'a, I>(tables: I) -> TaxonomyVocabulary
where
    I: IntoIterator<Item = &'a NormalizedTable>,
{
    TaxonomyVocabulary::from_labels(
        tables
            .into_iter()
            .flat_map(|table| table.labels().iter().cloned()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::AbundanceTable;

    fn table(labels: &[&str]) -> NormalizedTable {
        AbundanceTable::new(
            labels.iter().map(|label| label.to_string()).collect(),
            vec!["S1".to_string()],
            labels.iter().map(|_| vec![0.5]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn union_is_sorted() {
        let visit1 = table(&["B", "A"]);
        let visit2 = table(&["C", "B"]);
        let vocabulary = collect_vocabulary([&visit1, &visit2]);
        assert_eq!(vocabulary.labels(), ["A", "B", "C"]);
    }

    #[test]
    fn order_of_tables_is_irrelevant() {
        let visit1 = table(&["k__Bacteria|p__Firmicutes", "k__Bacteria"]);
        let visit2 = table(&["k__Archaea", "k__Bacteria"]);
        assert_eq!(
            collect_vocabulary([&visit1, &visit2]),
            collect_vocabulary([&visit2, &visit1])
        );
    }

    #[test]
    fn file_codec_is_one_label_per_line() {
        let vocabulary = TaxonomyVocabulary::from_labels(["b", "a", "a"]);
        assert_eq!(vocabulary.to_bytes(), b"a\nb\n");
        assert!(vocabulary.contains("b"));
        assert!(!vocabulary.contains("c"));
    }
}
