use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{BodySite, Classifier, Visit, ZeroTotalPolicy};
use crate::error::OtuError;
use crate::normalize::{MAX_PRECISION, NormalizeOptions};

pub const DEFAULT_CONFIG_FILE: &str = "otu-matrix.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub output_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub paired_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub paired_visits: Option<(Visit, Visit)>,
    #[serde(default)]
    pub body_sites: Vec<BodySite>,
    #[serde(default)]
    pub classifiers: Vec<Classifier>,
    #[serde(default)]
    pub zero_total: Option<ZeroTotalPolicy>,
    #[serde(default)]
    pub precision: Option<u32>,
}

/// Settings every pipeline stage runs with. Empty `body_sites` or
/// `classifiers` select everything found on disk.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub output_root: Utf8PathBuf,
    pub paired_dir: Utf8PathBuf,
    pub paired_visits: (Visit, Visit),
    pub body_sites: Vec<BodySite>,
    pub classifiers: Vec<Classifier>,
    pub normalize: NormalizeOptions,
}

impl PipelineConfig {
    pub fn selects_body_site(&self, body_site: &BodySite) -> bool {
        self.body_sites.is_empty() || self.body_sites.contains(body_site)
    }

    pub fn selects_classifier(&self, classifier: &Classifier) -> bool {
        self.classifiers.is_empty() || self.classifiers.contains(classifier)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `otu-matrix.json` from the working directory when it
    /// exists. Without either, the defaults apply.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<PipelineConfig, OtuError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Ok(Self::resolve_config(Config::default()));
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| OtuError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| OtuError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> PipelineConfig {
        let output_root = config.output_root.unwrap_or_else(|| Utf8PathBuf::from("."));
        let paired_dir = match config.paired_dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => output_root.join(dir),
            None => output_root.join("double_visits"),
        };

        PipelineConfig {
            schema_version: config.schema_version.unwrap_or(1),
            data_dir: config
                .data_dir
                .unwrap_or_else(|| Utf8PathBuf::from("mothur_output")),
            output_root,
            paired_dir,
            paired_visits: config
                .paired_visits
                .unwrap_or_else(|| (Visit::number(1), Visit::number(2))),
            body_sites: config.body_sites,
            classifiers: config.classifiers,
            normalize: NormalizeOptions {
                zero_total: config.zero_total.unwrap_or_default(),
                precision: config.precision.map(clamp_precision),
            },
        }
    }
}

fn clamp_precision(digits: u32) -> u32 {
    if digits > MAX_PRECISION {
        warn!(precision = digits, max = MAX_PRECISION, "precision too large, clamping");
        return MAX_PRECISION;
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default());
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.data_dir, "mothur_output");
        assert_eq!(resolved.paired_dir, "./double_visits");
        assert_eq!(resolved.paired_visits.0.as_str(), "visit1");
        assert_eq!(resolved.paired_visits.1.as_str(), "visit2");
        assert_eq!(resolved.normalize.zero_total, ZeroTotalPolicy::Propagate);
        assert!(resolved.selects_body_site(&"feces".parse().unwrap()));
    }

    #[test]
    fn precision_is_clamped() {
        let resolved = ConfigLoader::resolve_config(Config {
            precision: Some(400),
            ..Config::default()
        });
        assert_eq!(resolved.normalize.precision, Some(MAX_PRECISION));

        let resolved = ConfigLoader::resolve_config(Config {
            precision: Some(6),
            ..Config::default()
        });
        assert_eq!(resolved.normalize.precision, Some(6));
    }
}
