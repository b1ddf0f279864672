use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum OtuError {
    #[error("invalid body site: {0}")]
    InvalidBodySite(String),

    #[error("invalid visit: {0}")]
    InvalidVisit(String),

    #[error("invalid classifier: {0}")]
    InvalidClassifier(String),

    #[error("invalid zero-total policy: {0}")]
    InvalidZeroTotalPolicy(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("{path}: missing required column `{column}`")]
    #[diagnostic(help("summary tables must be tab-separated with `taxonomy` and `total` columns"))]
    MissingColumn { path: String, column: String },

    #[error("{path}: table has no data rows")]
    EmptyTable { path: String },

    #[error("{path}: row {row} has {actual} fields, header has {expected}")]
    RaggedRow {
        path: String,
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("{labels} taxonomy labels for {rows} value rows")]
    ShapeMismatch { labels: usize, rows: usize },

    #[error("{path}: malformed numeric cell {value:?} at row {row}, column `{column}`")]
    MalformedCell {
        path: String,
        row: usize,
        column: String,
        value: String,
    },

    #[error("{path}: subject `{subject}` has a zero total count")]
    #[diagnostic(help("set `zero_total` to `propagate` or `skip-subject` to continue past empty samples"))]
    ZeroTotal { path: String, subject: String },

    #[error("taxonomy vocabulary not found: {0}")]
    MissingVocabulary(Utf8PathBuf),

    #[error("no manifest matching {pattern} under {dir}")]
    MissingManifest { dir: Utf8PathBuf, pattern: String },

    #[error("sample `{0}` appears more than once in the metadata manifest")]
    DuplicateSample(String),

    #[error("{failed} of {total} units failed")]
    #[diagnostic(help("see the log for the individual failures"))]
    PartialFailure { failed: usize, total: usize },

    #[error("csv error: {0}")]
    Csv(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl OtuError {
    pub(crate) fn csv(path: &str, err: csv::Error) -> Self {
        OtuError::Csv(format!("{path}: {err}"))
    }
}
