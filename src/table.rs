//! Tab-separated abundance tables and their codecs.
//!
//! Two shapes flow through the pipeline: the raw classifier summary (counts,
//! `taxonomy` + subjects + `total`) and the abundance table (`subject_id`
//! holding taxonomy labels + one `f64` column per subject). The latter backs
//! the normalized, unified and paired matrices alike.

use std::fs;
use std::io::Read;

use camino::Utf8Path;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};

use crate::error::OtuError;

pub const TAXONOMY_COLUMN: &str = "taxonomy";
pub const TOTAL_COLUMN: &str = "total";
pub const KEY_COLUMN: &str = "subject_id";

/// Classifier summary as read from disk: one row per taxon, one numeric
/// column per subject plus `total`. Row 0 holds the per-column totals.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSummaryTable {
    source: String,
    taxonomy: Vec<String>,
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl RawSummaryTable {
    pub fn read(path: &Utf8Path) -> Result<Self, OtuError> {
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| OtuError::Filesystem(format!("open {path}: {err}")))?;
        Self::from_reader(path.as_str(), file)
    }

    /// Parses a summary table. `source` names the table in errors.
    pub fn from_reader<R: Read>(source: &str, reader: R) -> Result<Self, OtuError> {
        let (header, records) = read_records(source, reader)?;

        let taxonomy_idx = column_index(source, &header, TAXONOMY_COLUMN)?;
        column_index(source, &header, TOTAL_COLUMN)?;

        let numeric: Vec<usize> = (0..header.len()).filter(|idx| *idx != taxonomy_idx).collect();
        let columns = numeric.iter().map(|idx| header[*idx].clone()).collect();

        let mut taxonomy = Vec::with_capacity(records.len());
        let mut rows = Vec::with_capacity(records.len());
        for (line, record) in records {
            check_width(source, line, header.len(), &record)?;
            taxonomy.push(record[taxonomy_idx].to_string());
            let row = numeric
                .iter()
                .map(|idx| parse_count(source, line, &header[*idx], &record[*idx]))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(OtuError::EmptyTable {
                path: source.to_string(),
            });
        }

        Ok(Self {
            source: source.to_string(),
            taxonomy,
            columns,
            rows,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Raw taxonomy strings, row-aligned with [`Self::rows`].
    pub fn taxonomy(&self) -> &[String] {
        &self.taxonomy
    }

    /// Numeric column headers: subjects and `total`, in file order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }
}

/// Taxon-by-subject table of relative abundances keyed by `subject_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct AbundanceTable {
    labels: Vec<String>,
    subjects: Vec<String>,
    values: Vec<Vec<f64>>,
}

/// Per-visit relative abundances straight out of normalization.
pub type NormalizedTable = AbundanceTable;
/// A normalized table re-indexed onto a group's full taxonomy vocabulary.
pub type UnifiedMatrix = AbundanceTable;
/// A unified matrix restricted to subjects present in both paired visits.
pub type PairedVisitMatrix = AbundanceTable;

impl AbundanceTable {
    pub fn new(
        labels: Vec<String>,
        subjects: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self, OtuError> {
        if labels.len() != values.len() {
            return Err(OtuError::ShapeMismatch {
                labels: labels.len(),
                rows: values.len(),
            });
        }
        if let Some((row, ragged)) = values
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != subjects.len())
        {
            return Err(OtuError::RaggedRow {
                path: "<memory>".to_string(),
                row,
                expected: subjects.len(),
                actual: ragged.len(),
            });
        }
        Ok(Self {
            labels,
            subjects,
            values,
        })
    }

    pub(crate) fn from_parts(
        labels: Vec<String>,
        subjects: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Self {
        debug_assert_eq!(labels.len(), values.len());
        Self {
            labels,
            subjects,
            values,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.values
    }

    pub fn n_features(&self) -> usize {
        self.labels.len()
    }

    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    pub fn row_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|candidate| candidate == label)
    }

    pub fn subject_index(&self, subject: &str) -> Option<usize> {
        self.subjects.iter().position(|candidate| candidate == subject)
    }

    pub fn value(&self, label: &str, subject: &str) -> Option<f64> {
        let row = self.row_index(label)?;
        let col = self.subject_index(subject)?;
        Some(self.values[row][col])
    }

    pub fn read(path: &Utf8Path) -> Result<Self, OtuError> {
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| OtuError::Filesystem(format!("open {path}: {err}")))?;
        Self::from_reader(path.as_str(), file)
    }

    pub fn from_reader<R: Read>(source: &str, reader: R) -> Result<Self, OtuError> {
        let (header, records) = read_records(source, reader)?;
        if header.first().map(String::as_str) != Some(KEY_COLUMN) {
            return Err(OtuError::MissingColumn {
                path: source.to_string(),
                column: KEY_COLUMN.to_string(),
            });
        }

        let subjects = header[1..].to_vec();
        let mut labels = Vec::with_capacity(records.len());
        let mut values = Vec::with_capacity(records.len());
        for (line, record) in records {
            check_width(source, line, header.len(), &record)?;
            labels.push(record[0].to_string());
            let row = (1..header.len())
                .map(|idx| parse_cell(source, line, &header[idx], &record[idx]))
                .collect::<Result<Vec<_>, _>>()?;
            values.push(row);
        }

        Ok(Self {
            labels,
            subjects,
            values,
        })
    }

    /// Serializes as tab-separated text, `subject_id` first.
    pub fn to_tsv(&self) -> Result<Vec<u8>, OtuError> {
        let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
        let header = std::iter::once(KEY_COLUMN).chain(self.subjects.iter().map(String::as_str));
        writer
            .write_record(header)
            .map_err(|err| OtuError::csv("<tsv>", err))?;
        for (label, row) in self.labels.iter().zip(&self.values) {
            let record = std::iter::once(label.clone()).chain(row.iter().map(|v| format_value(*v)));
            writer
                .write_record(record)
                .map_err(|err| OtuError::csv("<tsv>", err))?;
        }
        writer
            .into_inner()
            .map_err(|err| OtuError::Filesystem(err.to_string()))
    }
}

/// Formats an abundance the way downstream tools expect: integral values
/// keep a `.0`, non-finite values are `NaN`, `inf` and `-inf`.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "inf" } else { "-inf" };
        text.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn read_records<R: Read>(
    source: &str,
    reader: R,
) -> Result<(Vec<String>, Vec<(u64, StringRecord)>), OtuError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let header: Vec<String> = reader
        .headers()
        .map_err(|err| OtuError::csv(source, err))?
        .iter()
        .map(|field| field.trim().to_string())
        .collect();
    if header.iter().all(String::is_empty) {
        return Err(OtuError::EmptyTable {
            path: source.to_string(),
        });
    }

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| OtuError::csv(source, err))?;
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        if record.len() == 1 && record[0].trim().is_empty() {
            continue;
        }
        records.push((line, record));
    }
    Ok((header, records))
}

fn column_index(source: &str, header: &[String], column: &str) -> Result<usize, OtuError> {
    header
        .iter()
        .position(|name| name == column)
        .ok_or_else(|| OtuError::MissingColumn {
            path: source.to_string(),
            column: column.to_string(),
        })
}

fn check_width(
    source: &str,
    line: u64,
    expected: usize,
    record: &StringRecord,
) -> Result<(), OtuError> {
    if record.len() != expected {
        return Err(OtuError::RaggedRow {
            path: source.to_string(),
            row: line as usize,
            expected,
            actual: record.len(),
        });
    }
    Ok(())
}

/// Counts in a classifier summary: finite and non-negative.
fn parse_count(source: &str, line: u64, column: &str, value: &str) -> Result<f64, OtuError> {
    let count = parse_cell(source, line, column, value)?;
    if !count.is_finite() || count < 0.0 {
        return Err(OtuError::MalformedCell {
            path: source.to_string(),
            row: line as usize,
            column: column.to_string(),
            value: value.to_string(),
        });
    }
    Ok(count)
}

fn parse_cell(source: &str, line: u64, column: &str, value: &str) -> Result<f64, OtuError> {
    value.trim().parse::<f64>().map_err(|_| OtuError::MalformedCell {
        path: source.to_string(),
        row: line as usize,
        column: column.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const RAW: &str = "taxonomy\tS1\tS2\ttotal\n\
                       total\t100\t50\t150\n\
                       k__Bacteria\t100\t50\t150\n";

    #[test]
    fn reads_raw_summary() {
        let table = RawSummaryTable::from_reader("raw", RAW.as_bytes()).unwrap();
        assert_eq!(table.columns(), ["S1", "S2", "total"]);
        assert_eq!(table.taxonomy(), ["total", "k__Bacteria"]);
        assert_eq!(table.rows()[0], vec![100.0, 50.0, 150.0]);
    }

    #[test]
    fn raw_summary_requires_total() {
        let err = RawSummaryTable::from_reader("raw", "taxonomy\tS1\nx\t1\n".as_bytes()).unwrap_err();
        assert_matches!(err, OtuError::MissingColumn { column, .. } if column == "total");
    }

    #[test]
    fn malformed_cell_is_reported() {
        let input = "taxonomy\tS1\ttotal\ntotal\t10\t10\nA\tn/a\t3\n";
        let err = RawSummaryTable::from_reader("raw", input.as_bytes()).unwrap_err();
        assert_matches!(
            err,
            OtuError::MalformedCell { row: 3, column, value, .. } if column == "S1" && value == "n/a"
        );
    }

    #[test]
    fn negative_and_non_finite_counts_are_rejected() {
        let negative = "taxonomy\tS1\ttotal\ntotal\t-10\t5\nA\t-3\t1\n";
        let err = RawSummaryTable::from_reader("raw", negative.as_bytes()).unwrap_err();
        assert_matches!(
            err,
            OtuError::MalformedCell { row: 2, column, value, .. } if column == "S1" && value == "-10"
        );

        for cell in ["NaN", "inf", "-inf"] {
            let input = format!("taxonomy\tS1\ttotal\ntotal\t10\t10\nA\t{cell}\t1\n");
            let err = RawSummaryTable::from_reader("raw", input.as_bytes()).unwrap_err();
            assert_matches!(err, OtuError::MalformedCell { row: 3, value, .. } if value == cell);
        }
    }

    #[test]
    fn label_and_row_counts_must_agree() {
        let err = AbundanceTable::new(
            vec!["A".to_string(), "B".to_string()],
            vec!["S1".to_string()],
            vec![vec![0.5]],
        )
        .unwrap_err();
        assert_matches!(err, OtuError::ShapeMismatch { labels: 2, rows: 1 });
        assert_eq!(err.to_string(), "2 taxonomy labels for 1 value rows");
    }

    #[test]
    fn ragged_row_is_reported() {
        let input = "taxonomy\tS1\ttotal\ntotal\t10\n";
        let err = RawSummaryTable::from_reader("raw", input.as_bytes()).unwrap_err();
        assert_matches!(err, OtuError::RaggedRow { expected: 3, actual: 2, .. });
    }

    #[test]
    fn header_only_summary_is_empty() {
        let err = RawSummaryTable::from_reader("raw", "taxonomy\tS1\ttotal\n".as_bytes()).unwrap_err();
        assert_matches!(err, OtuError::EmptyTable { .. });
    }

    #[test]
    fn abundance_table_round_trips_text() {
        let text = "subject_id\tS1\tS2\nA\t0.3\t0.0\nB\tNaN\t1.0\n";
        let table = AbundanceTable::from_reader("t", text.as_bytes()).unwrap();
        assert!(table.value("B", "S1").unwrap().is_nan());
        assert_eq!(String::from_utf8(table.to_tsv().unwrap()).unwrap(), text);
    }

    #[test]
    fn format_values() {
        assert_eq!(format_value(0.0), "0.0");
        assert_eq!(format_value(0.2), "0.2");
        assert_eq!(format_value(f64::INFINITY), "inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_value(1.0 / 3.0), "0.3333333333333333");
    }
}
