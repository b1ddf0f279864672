//! Stage orchestration: normalize, collect, unify, pair.
//!
//! Each stage returns a token that the next stage consumes, so a vocabulary
//! can only be collected from a finished normalization pass and matrices can
//! only be unified against collected (or reloaded) vocabularies. Failures are
//! isolated per file or per group and reported alongside the results.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::domain::{BodySite, Classifier, Visit};
use crate::error::OtuError;
use crate::layout::{Layout, StoredTable, SummaryInput, matrix_file_name, write_atomic};
use crate::normalize::normalize;
use crate::paired::extract_paired;
use crate::table::{AbundanceTable, NormalizedTable, RawSummaryTable};
use crate::unify::unify;
use crate::vocabulary::{TaxonomyVocabulary, collect_vocabulary};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupKey {
    pub body_site: BodySite,
    pub classifier: Classifier,
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.body_site, self.classifier)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub body_site: BodySite,
    pub classifier: Classifier,
    pub visit: Visit,
    pub path: String,
    pub subjects: usize,
    pub features: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub unit: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub files: Vec<FileReport>,
    pub failures: Vec<UnitFailure>,
}

impl StageReport {
    fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Self::default()
        }
    }

    fn fail(&mut self, unit: impl Into<String>, err: &OtuError) {
        let unit = unit.into();
        warn!(stage = self.stage.as_str(), unit = unit.as_str(), error = %err, "unit failed");
        self.failures.push(UnitFailure {
            unit,
            error: err.to_string(),
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VocabularyReport {
    pub body_site: BodySite,
    pub classifier: Classifier,
    pub path: String,
    pub labels: usize,
    pub visits: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub normalize: StageReport,
    pub vocabulary: Vec<VocabularyReport>,
    pub vocabulary_failures: Vec<UnitFailure>,
    pub unify: StageReport,
    pub paired: Option<StageReport>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.normalize.failures.len()
            + self.vocabulary_failures.len()
            + self.unify.failures.len()
            + self.paired.as_ref().map_or(0, |report| report.failures.len())
    }

    pub fn total(&self) -> usize {
        self.failed()
            + self.normalize.files.len()
            + self.vocabulary.len()
            + self.unify.files.len()
            + self.paired.as_ref().map_or(0, |report| report.files.len())
    }
}

/// Subject overlap of one visit with the reference visit of its group.
#[derive(Debug, Clone, Serialize)]
pub struct VisitOverlap {
    pub visit: Visit,
    pub subjects: usize,
    /// Reference subjects that were also sampled at this visit.
    pub shared: usize,
    /// Subjects of this visit absent from the reference visit.
    pub unmatched: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupOverlap {
    pub body_site: BodySite,
    pub classifier: Classifier,
    pub reference: Visit,
    pub reference_subjects: usize,
    pub visits: Vec<VisitOverlap>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OverlapReport {
    pub groups: Vec<GroupOverlap>,
    pub failures: Vec<UnitFailure>,
}

#[derive(Debug, Clone)]
pub struct VisitTable {
    pub visit: Visit,
    pub table: AbundanceTable,
}

/// Normalized tables of every visit, grouped by (body site, classifier).
#[derive(Debug, Clone)]
pub struct NormalizeStage {
    groups: BTreeMap<GroupKey, Vec<VisitTable>>,
    report: StageReport,
}

impl NormalizeStage {
    pub fn groups(&self) -> &BTreeMap<GroupKey, Vec<VisitTable>> {
        &self.groups
    }

    pub fn report(&self) -> &StageReport {
        &self.report
    }
}

#[derive(Debug, Clone)]
pub struct VocabularyGroup {
    pub vocabulary: TaxonomyVocabulary,
    pub visits: Vec<VisitTable>,
}

/// Vocabularies fixed per group, together with the tables they cover.
#[derive(Debug, Clone)]
pub struct VocabularyStage {
    groups: BTreeMap<GroupKey, VocabularyGroup>,
    reports: Vec<VocabularyReport>,
    failures: Vec<UnitFailure>,
}

impl VocabularyStage {
    pub fn groups(&self) -> &BTreeMap<GroupKey, VocabularyGroup> {
        &self.groups
    }

    pub fn reports(&self) -> &[VocabularyReport] {
        &self.reports
    }

    pub fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }
}

/// Unified matrices per group.
#[derive(Debug, Clone)]
pub struct UnifyStage {
    groups: BTreeMap<GroupKey, Vec<VisitTable>>,
    report: StageReport,
}

impl UnifyStage {
    pub fn groups(&self) -> &BTreeMap<GroupKey, Vec<VisitTable>> {
        &self.groups
    }

    pub fn report(&self) -> &StageReport {
        &self.report
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    layout: Layout,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let layout = Layout::new(config.data_dir.clone(), config.output_root.clone());
        Self { config, layout }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Runs every stage in order. Paired extraction only when `pair` is set.
    pub fn run(&self, pair: bool, sink: &dyn ProgressSink) -> Result<RunReport, OtuError> {
        let normalized = self.normalize_all(sink)?;
        let normalize_report = normalized.report().clone();
        let vocabularies = self.collect(normalized, sink);
        let unified = self.unify_all(&vocabularies, sink);
        let paired = pair.then(|| self.pair(&unified, sink));

        Ok(RunReport {
            normalize: normalize_report,
            vocabulary: vocabularies.reports,
            vocabulary_failures: vocabularies.failures,
            unify: unified.report,
            paired,
        })
    }

    /// Normalizes every selected summary under the data directory and writes
    /// the intermediate tables.
    pub fn normalize_all(&self, sink: &dyn ProgressSink) -> Result<NormalizeStage, OtuError> {
        sink.event(ProgressEvent {
            message: format!("phase=Normalize; scanning {}", self.layout.data_dir()),
            elapsed: None,
        });
        let discovery = self.layout.discover_summaries()?;
        let inputs: Vec<SummaryInput> = discovery
            .inputs
            .into_iter()
            .filter(|input| {
                self.config.selects_body_site(&input.body_site)
                    && self.config.selects_classifier(&input.classifier)
            })
            .collect();
        if inputs.is_empty() {
            info!(data_dir = self.layout.data_dir().as_str(), "no classifier summaries found");
        }

        let start = Instant::now();
        let results: Vec<_> = inputs
            .par_iter()
            .map(|input| (input, self.normalize_one(input)))
            .collect();

        let mut groups: BTreeMap<GroupKey, Vec<VisitTable>> = BTreeMap::new();
        let mut report = StageReport::new("normalize");
        for dir in discovery.unreadable {
            if self.config.selects_body_site(&dir.body_site) {
                report.fail(dir.path.as_str(), &dir.error);
            }
        }
        for (input, result) in results {
            match result {
                Ok(table) => {
                    let path = self
                        .layout
                        .intermediate_path(&input.body_site, &input.classifier, &input.visit);
                    info!(
                        source = input.path.as_str(),
                        subjects = table.n_subjects(),
                        features = table.n_features(),
                        "normalized summary"
                    );
                    report.files.push(file_report(
                        &input.body_site,
                        &input.classifier,
                        &input.visit,
                        path.as_str(),
                        &table,
                    ));
                    groups
                        .entry(group_key(&input.body_site, &input.classifier))
                        .or_default()
                        .push(VisitTable {
                            visit: input.visit.clone(),
                            table,
                        });
                }
                Err(err) => report.fail(input.path.as_str(), &err),
            }
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Normalize; {} written, {} failed",
                report.files.len(),
                report.failures.len()
            ),
            elapsed: Some(start.elapsed()),
        });
        Ok(NormalizeStage { groups, report })
    }

    /// Rebuilds a normalize token from intermediate files of an earlier run.
    pub fn load_normalized(&self, sink: &dyn ProgressSink) -> Result<NormalizeStage, OtuError> {
        sink.event(ProgressEvent {
            message: format!("phase=Load; reading {}", self.layout.intermediate_root()),
            elapsed: None,
        });
        let stored = self.selected(self.layout.list_intermediate()?);
        if stored.is_empty() {
            info!(
                dir = self.layout.intermediate_root().as_str(),
                "no intermediate tables found"
            );
        }
        let (groups, report) = load_tables(stored, "load-intermediate");
        Ok(NormalizeStage { groups, report })
    }

    /// Collects and writes one vocabulary per (body site, classifier) group.
    pub fn collect(&self, stage: NormalizeStage, sink: &dyn ProgressSink) -> VocabularyStage {
        let mut out = VocabularyStage {
            groups: BTreeMap::new(),
            reports: Vec::new(),
            failures: Vec::new(),
        };
        for (key, visits) in stage.groups {
            sink.event(ProgressEvent {
                message: format!("phase=Collect; taxonomy for {key}"),
                elapsed: None,
            });
            let vocabulary = collect_vocabulary(visits.iter().map(|visit| &visit.table));
            let path = self
                .layout
                .vocabulary_path(&key.body_site, &key.classifier);
            if let Err(err) = write_atomic(&path, &vocabulary.to_bytes()) {
                record_group_failure(&mut out.failures, &key, &err);
                continue;
            }
            info!(
                group = %key,
                labels = vocabulary.len(),
                visits = visits.len(),
                "collected taxonomy"
            );
            out.push(key, path.as_str(), vocabulary, visits);
        }
        out
    }

    /// Reads existing vocabulary files instead of collecting them. A group
    /// without one fails on its own.
    pub fn load_vocabularies(
        &self,
        stage: NormalizeStage,
        sink: &dyn ProgressSink,
    ) -> VocabularyStage {
        let mut out = VocabularyStage {
            groups: BTreeMap::new(),
            reports: Vec::new(),
            failures: Vec::new(),
        };
        for (key, visits) in stage.groups {
            sink.event(ProgressEvent {
                message: format!("phase=Load; taxonomy for {key}"),
                elapsed: None,
            });
            let path = self
                .layout
                .vocabulary_path(&key.body_site, &key.classifier);
            match TaxonomyVocabulary::read(&path) {
                Ok(vocabulary) => out.push(key, path.as_str(), vocabulary, visits),
                Err(err) => record_group_failure(&mut out.failures, &key, &err),
            }
        }
        out
    }

    /// Writes one unified matrix per visit, in parallel.
    pub fn unify_all(&self, stage: &VocabularyStage, sink: &dyn ProgressSink) -> UnifyStage {
        let start = Instant::now();
        let units: Vec<(&GroupKey, &TaxonomyVocabulary, &VisitTable)> = stage
            .groups
            .iter()
            .flat_map(|(key, group)| {
                group
                    .visits
                    .iter()
                    .map(move |visit| (key, &group.vocabulary, visit))
            })
            .collect();

        let results: Vec<_> = units
            .par_iter()
            .map(|(key, vocabulary, visit)| {
                let matrix = unify(vocabulary, &visit.table);
                let path = self
                    .layout
                    .final_path(&key.body_site, &key.classifier, &visit.visit);
                let written = matrix.to_tsv().and_then(|bytes| write_atomic(&path, &bytes));
                (*key, &visit.visit, path, written.map(|_| matrix))
            })
            .collect();

        let mut groups: BTreeMap<GroupKey, Vec<VisitTable>> = BTreeMap::new();
        let mut report = StageReport::new("unify");
        for (key, visit, path, result) in results {
            match result {
                Ok(matrix) => {
                    info!(
                        path = path.as_str(),
                        features = matrix.n_features(),
                        subjects = matrix.n_subjects(),
                        "unified matrix"
                    );
                    report.files.push(file_report(
                        &key.body_site,
                        &key.classifier,
                        visit,
                        path.as_str(),
                        &matrix,
                    ));
                    groups.entry(key.clone()).or_default().push(VisitTable {
                        visit: visit.clone(),
                        table: matrix,
                    });
                }
                Err(err) => report.fail(path.as_str(), &err),
            }
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Unify; {} written, {} failed",
                report.files.len(),
                report.failures.len()
            ),
            elapsed: Some(start.elapsed()),
        });
        UnifyStage { groups, report }
    }

    /// Rebuilds a unify token from final matrices of an earlier run.
    pub fn load_unified(&self, sink: &dyn ProgressSink) -> Result<UnifyStage, OtuError> {
        sink.event(ProgressEvent {
            message: format!("phase=Load; reading {}", self.layout.final_root()),
            elapsed: None,
        });
        let stored = self.selected(self.layout.list_final()?);
        let (groups, report) = load_tables(stored, "load-final");
        Ok(UnifyStage { groups, report })
    }

    /// Pairs the final matrices of an earlier run. Matrices that fail to load
    /// are reported as failures of this stage.
    pub fn pair_stored(&self, sink: &dyn ProgressSink) -> Result<StageReport, OtuError> {
        let unified = self.load_unified(sink)?;
        let mut report = self.pair(&unified, sink);
        let mut failures = unified.report.failures;
        failures.append(&mut report.failures);
        report.failures = failures;
        Ok(report)
    }

    /// Writes the subject intersection of the configured visit pair for each
    /// group. Groups missing either visit are skipped.
    pub fn pair(&self, stage: &UnifyStage, sink: &dyn ProgressSink) -> StageReport {
        let (first, second) = &self.config.paired_visits;
        let mut report = StageReport::new("pair");
        for (key, visits) in &stage.groups {
            let find = |wanted: &Visit| visits.iter().find(|visit| &visit.visit == wanted);
            let (Some(a), Some(b)) = (find(first), find(second)) else {
                info!(
                    group = %key,
                    first = %first,
                    second = %second,
                    "visit pair not available, skipping"
                );
                continue;
            };
            sink.event(ProgressEvent {
                message: format!("phase=Pair; {key} {first}/{second}"),
                elapsed: None,
            });

            let (paired_a, paired_b) = extract_paired(&a.table, &b.table);
            if paired_a.n_subjects() == 0 {
                warn!(group = %key, "no subjects shared between paired visits");
            }
            for (visit, matrix) in [(first, &paired_a), (second, &paired_b)] {
                let path = self.config.paired_dir.join(matrix_file_name(
                    &key.body_site,
                    &key.classifier,
                    visit,
                ));
                match matrix.to_tsv().and_then(|bytes| write_atomic(&path, &bytes)) {
                    Ok(()) => {
                        info!(
                            path = path.as_str(),
                            subjects = matrix.n_subjects(),
                            features = matrix.n_features(),
                            "paired matrix"
                        );
                        report.files.push(file_report(
                            &key.body_site,
                            &key.classifier,
                            visit,
                            path.as_str(),
                            matrix,
                        ));
                    }
                    Err(err) => report.fail(path.as_str(), &err),
                }
            }
        }
        report
    }

    /// Compares the subjects of every visit with those of `reference`, per
    /// group. Groups without the reference visit are skipped.
    pub fn overlap(&self, stage: &UnifyStage, reference: &Visit) -> Vec<GroupOverlap> {
        let mut groups = Vec::new();
        for (key, visits) in &stage.groups {
            let Some(base) = visits.iter().find(|visit| &visit.visit == reference) else {
                info!(
                    group = %key,
                    reference = %reference,
                    "reference visit not available, skipping"
                );
                continue;
            };
            let overlaps = visits
                .iter()
                .filter(|visit| &visit.visit != reference)
                .map(|visit| {
                    let (shared, _) = extract_paired(&base.table, &visit.table);
                    VisitOverlap {
                        visit: visit.visit.clone(),
                        subjects: visit.table.n_subjects(),
                        shared: shared.n_subjects(),
                        unmatched: visit.table.n_subjects().saturating_sub(shared.n_subjects()),
                    }
                })
                .collect();
            groups.push(GroupOverlap {
                body_site: key.body_site.clone(),
                classifier: key.classifier.clone(),
                reference: reference.clone(),
                reference_subjects: base.table.n_subjects(),
                visits: overlaps,
            });
        }
        groups
    }

    /// Overlap report over the final matrices of an earlier run.
    pub fn overlap_stored(
        &self,
        reference: &Visit,
        sink: &dyn ProgressSink,
    ) -> Result<OverlapReport, OtuError> {
        let unified = self.load_unified(sink)?;
        let groups = self.overlap(&unified, reference);
        Ok(OverlapReport {
            groups,
            failures: unified.report.failures,
        })
    }

    fn normalize_one(&self, input: &SummaryInput) -> Result<NormalizedTable, OtuError> {
        let raw = RawSummaryTable::read(&input.path)?;
        let table = normalize(&raw, self.config.normalize)?;
        let path = self
            .layout
            .intermediate_path(&input.body_site, &input.classifier, &input.visit);
        write_atomic(&path, &table.to_tsv()?)?;
        Ok(table)
    }

    fn selected(&self, stored: Vec<StoredTable>) -> Vec<StoredTable> {
        stored
            .into_iter()
            .filter(|table| {
                self.config.selects_body_site(&table.body_site)
                    && self.config.selects_classifier(&table.classifier)
            })
            .collect()
    }
}

impl VocabularyStage {
    fn push(
        &mut self,
        key: GroupKey,
        path: &str,
        vocabulary: TaxonomyVocabulary,
        visits: Vec<VisitTable>,
    ) {
        self.reports.push(VocabularyReport {
            body_site: key.body_site.clone(),
            classifier: key.classifier.clone(),
            path: path.to_string(),
            labels: vocabulary.len(),
            visits: visits.len(),
        });
        self.groups.insert(key, VocabularyGroup { vocabulary, visits });
    }
}

fn load_tables(
    stored: Vec<StoredTable>,
    stage: &str,
) -> (BTreeMap<GroupKey, Vec<VisitTable>>, StageReport) {
    let results: Vec<_> = stored
        .into_par_iter()
        .map(|entry| {
            let table = AbundanceTable::read(&entry.path);
            (entry, table)
        })
        .collect();

    let mut groups: BTreeMap<GroupKey, Vec<VisitTable>> = BTreeMap::new();
    let mut report = StageReport::new(stage);
    for (entry, result) in results {
        match result {
            Ok(table) => {
                report.files.push(file_report(
                    &entry.body_site,
                    &entry.classifier,
                    &entry.visit,
                    entry.path.as_str(),
                    &table,
                ));
                groups
                    .entry(group_key(&entry.body_site, &entry.classifier))
                    .or_default()
                    .push(VisitTable {
                        visit: entry.visit,
                        table,
                    });
            }
            Err(err) => report.fail(entry.path.as_str(), &err),
        }
    }
    (groups, report)
}

fn record_group_failure(failures: &mut Vec<UnitFailure>, key: &GroupKey, err: &OtuError) {
    warn!(group = %key, error = %err, "group failed");
    failures.push(UnitFailure {
        unit: key.to_string(),
        error: err.to_string(),
    });
}

fn group_key(body_site: &BodySite, classifier: &Classifier) -> GroupKey {
    GroupKey {
        body_site: body_site.clone(),
        classifier: classifier.clone(),
    }
}

fn file_report(
    body_site: &BodySite,
    classifier: &Classifier,
    visit: &Visit,
    path: &str,
    table: &AbundanceTable,
) -> FileReport {
    FileReport {
        body_site: body_site.clone(),
        classifier: classifier.clone(),
        visit: visit.clone(),
        path: path.to_string(),
        subjects: table.n_subjects(),
        features: table.n_features(),
    }
}
