//! Portal manifest handling: merges the download manifest with the sample
//! metadata manifest and splits the result into one download list and one
//! metadata sheet per body site, study and visit.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use csv::{ReaderBuilder, WriterBuilder};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::OtuError;
use crate::layout::{list_dirs, list_files, write_atomic};

static METADATA_MANIFEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^hmp_manifest_metadata_.*\.tsv$").expect("metadata manifest pattern")
});

static DOWNLOAD_MANIFEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^hmp_manifest_.*\.tsv$").expect("download manifest pattern"));

pub const MERGED_FILE: &str = "total_info.tsv";

const SAMPLE_ID: &str = "sample_id";
const SUBJECT_ID: &str = "subject_id";
const BODY_SITE: &str = "sample_body_site";
const STUDY: &str = "study_full_name";
const VISIT_NUMBER: &str = "visit_number";

const DOWNLOAD_COLUMNS: [&str; 6] = ["file_id", "md5", "size", "urls", SAMPLE_ID, SUBJECT_ID];
const METADATA_COLUMNS: [&str; 5] = [SAMPLE_ID, BODY_SITE, STUDY, VISIT_NUMBER, SUBJECT_ID];

const IBDMDB_STUDY: &str = "Inflammatory Bowel Disease Multi-omics Database (IBDMDB)";

/// A tab-separated table kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn read(path: &Utf8Path) -> Result<Self, OtuError> {
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| OtuError::Filesystem(format!("open {path}: {err}")))?;
        Self::from_reader(path.as_str(), file)
    }

    pub fn from_reader<R: Read>(source: &str, reader: R) -> Result<Self, OtuError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(reader);
        let header: Vec<String> = reader
            .headers()
            .map_err(|err| OtuError::csv(source, err))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| OtuError::csv(source, err))?;
            if record.len() != header.len() {
                return Err(OtuError::RaggedRow {
                    path: source.to_string(),
                    row: record.position().map(|pos| pos.line() as usize).unwrap_or_default(),
                    expected: header.len(),
                    actual: record.len(),
                });
            }
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { header, rows })
    }

    pub fn column(&self, source: &str, name: &str) -> Result<usize, OtuError> {
        self.header
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| OtuError::MissingColumn {
                path: source.to_string(),
                column: name.to_string(),
            })
    }

    /// Projects rows onto `columns`, in that order.
    pub fn select(&self, source: &str, columns: &[&str]) -> Result<TextTable, OtuError> {
        let indices = columns
            .iter()
            .map(|name| self.column(source, name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TextTable {
            header: columns.iter().map(|name| name.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|idx| row[*idx].clone()).collect())
                .collect(),
        })
    }

    pub fn to_tsv(&self) -> Result<Vec<u8>, OtuError> {
        let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
        writer
            .write_record(&self.header)
            .map_err(|err| OtuError::csv("<tsv>", err))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| OtuError::csv("<tsv>", err))?;
        }
        writer
            .into_inner()
            .map_err(|err| OtuError::Filesystem(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPaths {
    pub metadata: Utf8PathBuf,
    pub download: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareReport {
    pub merged_path: String,
    pub merged_rows: usize,
    pub body_sites: Vec<String>,
    pub files: Vec<String>,
}

/// Searches `dir` recursively for `hmp_manifest_metadata_*.tsv` and the
/// matching `hmp_manifest_*.tsv` download list.
pub fn find_manifests(dir: &Utf8Path) -> Result<ManifestPaths, OtuError> {
    let mut metadata = None;
    let mut download = None;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for file in list_files(&current)? {
            let Some(name) = file.file_name() else {
                continue;
            };
            if METADATA_MANIFEST.is_match(name) {
                metadata = Some(file.clone());
            } else if DOWNLOAD_MANIFEST.is_match(name) {
                download = Some(file.clone());
            }
        }
        stack.extend(list_dirs(&current)?);
    }

    let metadata = metadata.ok_or_else(|| OtuError::MissingManifest {
        dir: dir.to_path_buf(),
        pattern: "hmp_manifest_metadata_*.tsv".to_string(),
    })?;
    let download = download.ok_or_else(|| OtuError::MissingManifest {
        dir: dir.to_path_buf(),
        pattern: "hmp_manifest_*.tsv".to_string(),
    })?;
    debug!(metadata = metadata.as_str(), download = download.as_str(), "found manifests");
    Ok(ManifestPaths { metadata, download })
}

/// Inner-joins metadata (deduplicated) with the download manifest on
/// `sample_id`, one output row per download row, `subject_id` first.
/// Download columns already present in the metadata are not repeated.
pub fn merge(metadata: &TextTable, download: &TextTable) -> Result<TextTable, OtuError> {
    let meta_sample = metadata.column("metadata manifest", SAMPLE_ID)?;
    let meta_subject = metadata.column("metadata manifest", SUBJECT_ID)?;
    let download_sample = download.column("download manifest", SAMPLE_ID)?;

    let mut seen = HashSet::new();
    let mut samples = HashSet::new();
    let mut unique_rows: Vec<&Vec<String>> = Vec::new();
    for row in &metadata.rows {
        if !seen.insert(row) {
            continue;
        }
        if !samples.insert(row[meta_sample].as_str()) {
            return Err(OtuError::DuplicateSample(row[meta_sample].clone()));
        }
        unique_rows.push(row);
    }

    let extra: Vec<usize> = (0..download.header.len())
        .filter(|idx| !metadata.header.contains(&download.header[*idx]))
        .collect();
    let meta_order: Vec<usize> = std::iter::once(meta_subject)
        .chain((0..metadata.header.len()).filter(|idx| *idx != meta_subject))
        .collect();

    let header = meta_order
        .iter()
        .map(|idx| metadata.header[*idx].clone())
        .chain(extra.iter().map(|idx| download.header[*idx].clone()))
        .collect();

    let mut downloads_by_sample: HashMap<&str, Vec<&Vec<String>>> = HashMap::new();
    for row in &download.rows {
        downloads_by_sample
            .entry(row[download_sample].as_str())
            .or_default()
            .push(row);
    }

    let mut rows = Vec::new();
    for meta in unique_rows {
        let Some(matches) = downloads_by_sample.get(meta[meta_sample].as_str()) else {
            continue;
        };
        for file in matches {
            rows.push(
                meta_order
                    .iter()
                    .map(|idx| meta[*idx].clone())
                    .chain(extra.iter().map(|idx| file[*idx].clone()))
                    .collect(),
            );
        }
    }

    Ok(TextTable { header, rows })
}

/// Writes per body site, study and visit (`visit_number <= max_visit`)
/// download lists under `download/` and metadata sheets under `metadata/`.
pub fn partition(
    merged: &TextTable,
    output_root: &Utf8Path,
    max_visit: u32,
) -> Result<Vec<Utf8PathBuf>, OtuError> {
    const SOURCE: &str = MERGED_FILE;
    let site_idx = merged.column(SOURCE, BODY_SITE)?;
    let study_idx = merged.column(SOURCE, STUDY)?;
    let visit_idx = merged.column(SOURCE, VISIT_NUMBER)?;
    let download = merged.select(SOURCE, &DOWNLOAD_COLUMNS)?;
    let metadata = merged.select(SOURCE, &METADATA_COLUMNS)?;

    let mut visits: Vec<u32> = Vec::with_capacity(merged.rows.len());
    for (row_idx, row) in merged.rows.iter().enumerate() {
        let visit = row[visit_idx]
            .trim()
            .parse::<u32>()
            .map_err(|_| OtuError::MalformedCell {
                path: SOURCE.to_string(),
                row: row_idx + 2,
                column: VISIT_NUMBER.to_string(),
                value: row[visit_idx].clone(),
            })?;
        visits.push(visit);
    }

    let units: BTreeSet<(&str, &str, u32)> = merged
        .rows
        .iter()
        .zip(&visits)
        .filter(|(_, visit)| **visit <= max_visit)
        .map(|(row, visit)| (row[site_idx].as_str(), row[study_idx].as_str(), *visit))
        .collect();

    let mut written = Vec::new();
    for (site, study, visit) in units {
        info!(body_site = site, study, visit, "writing visit files");
        let rows: Vec<usize> = (0..merged.rows.len())
            .filter(|idx| {
                let row = &merged.rows[*idx];
                row[site_idx] == site && row[study_idx] == study && visits[*idx] == visit
            })
            .collect();

        let dir_name = format!("{}_{}", site.replace(' ', "_"), study_dir_name(study));
        let download_path = output_root
            .join("download")
            .join(&dir_name)
            .join(format!("visit{visit}.tsv"));
        let metadata_path = output_root
            .join("metadata")
            .join(format!("{dir_name}_metadata"))
            .join(format!("visit{visit}_metadata.tsv"));

        write_atomic(&download_path, &subset(&download, &rows).to_tsv()?)?;
        write_atomic(&metadata_path, &subset(&metadata, &rows).to_tsv()?)?;
        written.push(download_path);
        written.push(metadata_path);
    }
    Ok(written)
}

/// Finds, merges and partitions the portal manifests in `input_dir`.
pub fn prepare(
    input_dir: &Utf8Path,
    output_root: &Utf8Path,
    max_visit: u32,
) -> Result<PrepareReport, OtuError> {
    let paths = find_manifests(input_dir)?;
    let metadata = TextTable::read(&paths.metadata)?;
    let download = TextTable::read(&paths.download)?;
    let merged = merge(&metadata, &download)?;

    let site_idx = merged.column(MERGED_FILE, BODY_SITE)?;
    let body_sites: Vec<String> = merged
        .rows
        .iter()
        .map(|row| row[site_idx].clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    info!(body_sites = ?body_sites, rows = merged.rows.len(), "merged manifests");

    let merged_path = output_root.join(MERGED_FILE);
    write_atomic(&merged_path, &merged.to_tsv()?)?;
    let files = partition(&merged, output_root, max_visit)?;

    Ok(PrepareReport {
        merged_path: merged_path.to_string(),
        merged_rows: merged.rows.len(),
        body_sites,
        files: files.into_iter().map(|path| path.to_string()).collect(),
    })
}

pub fn study_dir_name(study: &str) -> String {
    if study == IBDMDB_STUDY {
        "ibdmbd".to_string()
    } else {
        study.replace(' ', "_")
    }
}

fn subset(table: &TextTable, rows: &[usize]) -> TextTable {
    TextTable {
        header: table.header.clone(),
        rows: rows.iter().map(|idx| table.rows[*idx].clone()).collect(),
    }
}
