use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::OtuError;

static SUMMARY_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^final\.rdp(\d+)\.summary$").expect("summary file pattern"));

static CLASSIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^rdp(\d+)$").expect("classifier pattern"));

/// Anatomical sampling location; also the top-level directory name of a
/// body site's visit folders.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BodySite(String);

impl BodySite {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BodySite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BodySite {
    type Err = OtuError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !is_path_component(trimmed) {
            return Err(OtuError::InvalidBodySite(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for BodySite {
    type Error = OtuError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BodySite> for String {
    fn from(value: BodySite) -> Self {
        value.0
    }
}

/// A longitudinal sampling timepoint, e.g. `visit1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Visit(String);

impl Visit {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn number(number: u32) -> Self {
        Self(format!("visit{number}"))
    }
}

impl fmt::Display for Visit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Visit {
    type Err = OtuError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !is_path_component(trimmed) || trimmed.contains('.') {
            return Err(OtuError::InvalidVisit(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for Visit {
    type Error = OtuError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Visit> for String {
    fn from(value: Visit) -> Self {
        value.0
    }
}

/// Taxonomy reference database version used by the external classifier,
/// written as `rdp<N>` (`rdp6`, `rdp18`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Classifier(String);

impl Classifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recognizes classifier output files named `final.rdp<N>.summary`.
    pub fn from_summary_file_name(name: &str) -> Option<Self> {
        let captures = SUMMARY_FILE.captures(name)?;
        let version: u32 = captures[1].parse().ok()?;
        Some(Self(format!("rdp{version}")))
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Classifier {
    type Err = OtuError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let version = CLASSIFIER
            .captures(&normalized)
            .and_then(|captures| captures[1].parse::<u32>().ok())
            .ok_or_else(|| OtuError::InvalidClassifier(value.to_string()))?;
        Ok(Self(format!("rdp{version}")))
    }
}

impl TryFrom<String> for Classifier {
    type Error = OtuError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Classifier> for String {
    fn from(value: Classifier) -> Self {
        value.0
    }
}

/// What to do with a subject whose total count is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ZeroTotalPolicy {
    /// Keep the IEEE result of the division (NaN or infinity).
    #[default]
    Propagate,
    /// Drop the subject column from the normalized table.
    SkipSubject,
    /// Fail the whole file.
    Error,
}

impl fmt::Display for ZeroTotalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZeroTotalPolicy::Propagate => write!(f, "propagate"),
            ZeroTotalPolicy::SkipSubject => write!(f, "skip-subject"),
            ZeroTotalPolicy::Error => write!(f, "error"),
        }
    }
}

impl FromStr for ZeroTotalPolicy {
    type Err = OtuError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "propagate" => Ok(ZeroTotalPolicy::Propagate),
            "skip-subject" => Ok(ZeroTotalPolicy::SkipSubject),
            "error" => Ok(ZeroTotalPolicy::Error),
            _ => Err(OtuError::InvalidZeroTotalPolicy(value.to_string())),
        }
    }
}

/// Normalizes a classifier taxonomy string into a `|`-separated label:
/// quotes dropped, `;` replaced by `|`, trailing separators stripped.
pub fn sanitize_taxonomy(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .filter(|ch| *ch != '"')
        .map(|ch| if ch == ';' { '|' } else { ch })
        .collect();
    replaced.trim().trim_end_matches('|').trim_end().to_string()
}

fn is_path_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn sanitize_mothur_taxonomy() {
        assert_eq!(
            sanitize_taxonomy("\"Bacteria;Firmicutes;Bacilli;\""),
            "Bacteria|Firmicutes|Bacilli"
        );
        assert_eq!(sanitize_taxonomy("k__Bacteria|p__Firmicutes"), "k__Bacteria|p__Firmicutes");
        assert_eq!(sanitize_taxonomy(" Root; "), "Root");
    }

    #[test]
    fn classifier_from_summary_name() {
        assert_eq!(
            Classifier::from_summary_file_name("final.rdp6.summary"),
            Some("rdp6".parse().unwrap())
        );
        assert_eq!(
            Classifier::from_summary_file_name("final.rdp18.summary").map(|c| c.to_string()),
            Some("rdp18".to_string())
        );
        assert_eq!(Classifier::from_summary_file_name("final.rdp6.summary.gz"), None);
        assert_eq!(Classifier::from_summary_file_name("final.summary"), None);
    }

    #[test]
    fn classifier_rejects_unknown() {
        let err = "silva".parse::<Classifier>().unwrap_err();
        assert_matches!(err, OtuError::InvalidClassifier(_));
    }

    #[test]
    fn body_site_rejects_paths() {
        assert_matches!("a/b".parse::<BodySite>(), Err(OtuError::InvalidBodySite(_)));
        assert_matches!("..".parse::<BodySite>(), Err(OtuError::InvalidBodySite(_)));
        assert_eq!("vagina".parse::<BodySite>().unwrap().as_str(), "vagina");
    }
}
