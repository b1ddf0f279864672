//! Relative abundances from raw classifier counts.
//!
//! Each subject column is divided by that subject's value in the first data
//! row (the totals row). The totals row and the `total` column are dropped
//! and taxonomy labels are sanitized into `|`-separated hierarchies.

use tracing::warn;

use crate::domain::{ZeroTotalPolicy, sanitize_taxonomy};
use crate::error::OtuError;
use crate::table::{AbundanceTable, NormalizedTable, RawSummaryTable, TOTAL_COLUMN};

/// Most decimal places rounding can keep; an `f64` carries about 15
/// significant decimal digits.
pub const MAX_PRECISION: u32 = 15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub zero_total: ZeroTotalPolicy,
    /// Decimal places to round abundances to, at most [`MAX_PRECISION`];
    /// `None` keeps full precision.
    pub precision: Option<u32>,
}

pub fn normalize(
    raw: &RawSummaryTable,
    options: NormalizeOptions,
) -> Result<NormalizedTable, OtuError> {
    let totals = raw.rows().first().ok_or_else(|| OtuError::EmptyTable {
        path: raw.source().to_string(),
    })?;

    let mut kept = Vec::new();
    for (idx, column) in raw.columns().iter().enumerate() {
        if column == TOTAL_COLUMN {
            continue;
        }
        if totals[idx] == 0.0 {
            match options.zero_total {
                ZeroTotalPolicy::Propagate => {
                    warn!(
                        source = raw.source(),
                        subject = column.as_str(),
                        "zero total count, abundances will be non-finite"
                    );
                }
                ZeroTotalPolicy::SkipSubject => {
                    warn!(
                        source = raw.source(),
                        subject = column.as_str(),
                        "zero total count, dropping subject"
                    );
                    continue;
                }
                ZeroTotalPolicy::Error => {
                    return Err(OtuError::ZeroTotal {
                        path: raw.source().to_string(),
                        subject: column.clone(),
                    });
                }
            }
        }
        kept.push(idx);
    }

    let scale = options
        .precision
        .map(|digits| 10f64.powi(digits.min(MAX_PRECISION) as i32));
    let subjects = kept.iter().map(|idx| raw.columns()[*idx].clone()).collect();
    let mut labels = Vec::with_capacity(raw.rows().len() - 1);
    let mut values = Vec::with_capacity(raw.rows().len() - 1);
    for (taxonomy, row) in raw.taxonomy()[1..].iter().zip(&raw.rows()[1..]) {
        let label = sanitize_taxonomy(taxonomy);
        if label.is_empty() {
            warn!(
                source = raw.source(),
                taxonomy = taxonomy.as_str(),
                "empty taxonomy label, dropping row"
            );
            continue;
        }
        labels.push(label);
        values.push(
            kept.iter()
                .map(|idx| {
                    let abundance = row[*idx] / totals[*idx];
                    match scale {
                        Some(scale) if abundance.is_finite() => (abundance * scale).round() / scale,
                        _ => abundance,
                    }
                })
                .collect(),
        );
    }

    Ok(AbundanceTable::from_parts(labels, subjects, values))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn raw(text: &str) -> RawSummaryTable {
        RawSummaryTable::from_reader("raw", text.as_bytes()).unwrap()
    }

    #[test]
    fn divides_by_totals_row() {
        let table = raw("taxonomy\tS1\tS2\ttotal\n\
                         total\t100\t50\t150\n\
                         k__Bacteria\t100\t50\t150\n\
                         k__Bacteria|p__Firmicutes\t30\t10\t40\n");
        let normalized = normalize(&table, NormalizeOptions::default()).unwrap();

        assert_eq!(normalized.subjects(), ["S1", "S2"]);
        assert_eq!(normalized.labels(), ["k__Bacteria", "k__Bacteria|p__Firmicutes"]);
        assert_eq!(normalized.value("k__Bacteria|p__Firmicutes", "S1"), Some(0.3));
        assert_eq!(normalized.value("k__Bacteria|p__Firmicutes", "S2"), Some(0.2));
        assert_eq!(normalized.value("k__Bacteria", "S1"), Some(1.0));
    }

    #[test]
    fn sanitizes_labels() {
        let table = raw("taxonomy\tS1\ttotal\n\
                         Root\t4\t4\n\
                         \"Bacteria;Firmicutes;\"\t1\t1\n");
        let normalized = normalize(&table, NormalizeOptions::default()).unwrap();
        assert_eq!(normalized.labels(), ["Bacteria|Firmicutes"]);
        assert_eq!(normalized.value("Bacteria|Firmicutes", "S1"), Some(0.25));
    }

    #[test]
    fn empty_labels_are_dropped() {
        let table = raw("taxonomy\tS1\ttotal\n\
                         Root\t4\t4\n\
                         ;\t1\t1\n\
                         \"\"\t1\t1\n\
                         Bacteria;\t2\t2\n");
        let normalized = normalize(&table, NormalizeOptions::default()).unwrap();
        assert_eq!(normalized.labels(), ["Bacteria"]);
        assert_eq!(normalized.rows(), [vec![0.5]]);
    }

    #[test]
    fn totals_row_only_gives_empty_table() {
        let table = raw("taxonomy\tS1\ttotal\ntotal\t4\t4\n");
        let normalized = normalize(&table, NormalizeOptions::default()).unwrap();
        assert_eq!(normalized.n_features(), 0);
        assert_eq!(normalized.subjects(), ["S1"]);
    }

    const ZERO_TOTAL: &str = "taxonomy\tS1\tS2\ttotal\n\
                              total\t10\t0\t10\n\
                              A\t5\t0\t5\n\
                              B\t5\t1\t6\n";

    #[test]
    fn zero_total_propagates_by_default() {
        let normalized = normalize(&raw(ZERO_TOTAL), NormalizeOptions::default()).unwrap();
        assert!(normalized.value("A", "S2").unwrap().is_nan());
        assert_eq!(normalized.value("B", "S2"), Some(f64::INFINITY));
        assert_eq!(normalized.value("A", "S1"), Some(0.5));
    }

    #[test]
    fn zero_total_skip_subject() {
        let options = NormalizeOptions {
            zero_total: ZeroTotalPolicy::SkipSubject,
            precision: None,
        };
        let normalized = normalize(&raw(ZERO_TOTAL), options).unwrap();
        assert_eq!(normalized.subjects(), ["S1"]);
    }

    #[test]
    fn zero_total_error() {
        let options = NormalizeOptions {
            zero_total: ZeroTotalPolicy::Error,
            precision: None,
        };
        let err = normalize(&raw(ZERO_TOTAL), options).unwrap_err();
        assert_matches!(err, OtuError::ZeroTotal { subject, .. } if subject == "S2");
    }

    #[test]
    fn rounds_to_precision() {
        let table = raw("taxonomy\tS1\ttotal\ntotal\t3\t3\nA\t1\t1\n");
        let options = NormalizeOptions {
            zero_total: ZeroTotalPolicy::Propagate,
            precision: Some(3),
        };
        let normalized = normalize(&table, options).unwrap();
        assert_eq!(normalized.value("A", "S1"), Some(0.333));
    }

    #[test]
    fn oversized_precision_keeps_values_finite() {
        let table = raw("taxonomy\tS1\ttotal\ntotal\t4\t4\nA\t1\t1\nB\t0\t0\n");
        let options = NormalizeOptions {
            zero_total: ZeroTotalPolicy::Propagate,
            precision: Some(400),
        };
        let normalized = normalize(&table, options).unwrap();
        assert_eq!(normalized.value("A", "S1"), Some(0.25));
        assert_eq!(normalized.value("B", "S1"), Some(0.0));

        let options = NormalizeOptions {
            precision: Some(u32::MAX),
            ..options
        };
        let normalized = normalize(&table, options).unwrap();
        assert_eq!(normalized.value("A", "S1"), Some(0.25));
    }
}
