use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::{debug, info};

use crate::domain::{BodySite, Classifier, Visit};
use crate::error::OtuError;

/// Directory and file naming shared with downstream tooling.
#[derive(Debug, Clone)]
pub struct Layout {
    data_dir: Utf8PathBuf,
    output_root: Utf8PathBuf,
}

/// A classifier summary found under `<data_dir>/<body_site>/<visit>/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SummaryInput {
    pub body_site: BodySite,
    pub classifier: Classifier,
    pub visit: Visit,
    pub path: Utf8PathBuf,
}

/// A body site or visit folder whose listing failed.
#[derive(Debug)]
pub struct UnreadableDir {
    pub body_site: BodySite,
    pub path: Utf8PathBuf,
    pub error: OtuError,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub inputs: Vec<SummaryInput>,
    pub unreadable: Vec<UnreadableDir>,
}

/// A file produced by an earlier run, located by its naming pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StoredTable {
    pub body_site: BodySite,
    pub classifier: Classifier,
    pub visit: Visit,
    pub path: Utf8PathBuf,
}

impl Layout {
    pub fn new(data_dir: Utf8PathBuf, output_root: Utf8PathBuf) -> Self {
        Self {
            data_dir,
            output_root,
        }
    }

    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn intermediate_root(&self) -> Utf8PathBuf {
        self.output_root.join("intermediate_results")
    }

    pub fn intermediate_path(
        &self,
        site: &BodySite,
        classifier: &Classifier,
        visit: &Visit,
    ) -> Utf8PathBuf {
        self.intermediate_root()
            .join(site.as_str())
            .join(classifier.as_str())
            .join(format!("intermediate-otus-{site}-{visit}.csv"))
    }

    pub fn taxonomy_root(&self) -> Utf8PathBuf {
        self.output_root.join("taxonomy")
    }

    pub fn vocabulary_path(&self, site: &BodySite, classifier: &Classifier) -> Utf8PathBuf {
        self.taxonomy_root().join(format!("{site}_{classifier}_taxonomy"))
    }

    pub fn final_root(&self) -> Utf8PathBuf {
        self.output_root.join("final_data")
    }

    pub fn final_path(
        &self,
        site: &BodySite,
        classifier: &Classifier,
        visit: &Visit,
    ) -> Utf8PathBuf {
        self.final_root()
            .join(site.as_str())
            .join(classifier.as_str())
            .join(matrix_file_name(site, classifier, visit))
    }

    /// Finds every `final.rdp<N>.summary` two levels below the data directory.
    /// Only an unreadable data directory is an error; unreadable body site or
    /// visit folders are returned in [`Discovery::unreadable`].
    pub fn discover_summaries(&self) -> Result<Discovery, OtuError> {
        Ok(discover_in(list_dirs(&self.data_dir)?))
    }

    /// Lists `intermediate_results/<site>/<classifier>/intermediate-otus-<site>-<visit>.csv`.
    pub fn list_intermediate(&self) -> Result<Vec<StoredTable>, OtuError> {
        self.list_stored(&self.intermediate_root(), |site, _, name| {
            name.strip_prefix(&format!("intermediate-otus-{site}-"))?
                .strip_suffix(".csv")
                .map(str::to_string)
        })
    }

    /// Lists `final_data/<site>/<classifier>/otus-<site>-<classifier>-<visit>.pcl`.
    pub fn list_final(&self) -> Result<Vec<StoredTable>, OtuError> {
        self.list_stored(&self.final_root(), |site, classifier, name| {
            name.strip_prefix(&format!("otus-{site}-{classifier}-"))?
                .strip_suffix(".pcl")
                .map(str::to_string)
        })
    }

    fn list_stored<F>(&self, root: &Utf8Path, visit_of: F) -> Result<Vec<StoredTable>, OtuError>
    where
        F: Fn(&BodySite, &Classifier, &str) -> Option<String>,
    {
        let mut tables = Vec::new();
        if !root.as_std_path().is_dir() {
            return Ok(tables);
        }
        for site_dir in list_dirs(root)? {
            let Some(body_site) = parse_dir_name::<BodySite>(&site_dir) else {
                continue;
            };
            for classifier_dir in list_dirs(&site_dir)? {
                let Some(classifier) = parse_dir_name::<Classifier>(&classifier_dir) else {
                    continue;
                };
                for file in list_files(&classifier_dir)? {
                    let visit = file
                        .file_name()
                        .and_then(|name| visit_of(&body_site, &classifier, name))
                        .and_then(|visit| visit.parse::<Visit>().ok());
                    match visit {
                        Some(visit) => tables.push(StoredTable {
                            body_site: body_site.clone(),
                            classifier: classifier.clone(),
                            visit,
                            path: file,
                        }),
                        None => debug!(path = file.as_str(), "skipping unrecognized file"),
                    }
                }
            }
        }
        tables.sort();
        Ok(tables)
    }
}

pub fn matrix_file_name(site: &BodySite, classifier: &Classifier, visit: &Visit) -> String {
    format!("otus-{site}-{classifier}-{visit}.pcl")
}

/// Writes `content` to a temporary file beside `path` and renames it into
/// place, so readers never observe a partially written table.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), OtuError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| OtuError::Filesystem(format!("create {parent}: {err}")))?;
    let mut temp = Builder::new()
        .prefix(".otu-matrix")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| OtuError::Filesystem(format!("tempfile in {parent}: {err}")))?;
    temp.write_all(content)
        .map_err(|err| OtuError::Filesystem(format!("write {path}: {err}")))?;
    temp.persist(path.as_std_path())
        .map_err(|err| OtuError::Filesystem(format!("persist {path}: {}", err.error)))?;
    Ok(())
}

pub(crate) fn list_dirs(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, OtuError> {
    list_entries(root, true)
}

pub(crate) fn list_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, OtuError> {
    list_entries(root, false)
}

fn list_entries(root: &Utf8Path, dirs: bool) -> Result<Vec<Utf8PathBuf>, OtuError> {
    let entries = fs::read_dir(root.as_std_path())
        .map_err(|err| OtuError::Filesystem(format!("read {root}: {err}")))?;
    let mut items = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| OtuError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_dir() != dirs {
            continue;
        }
        match Utf8PathBuf::from_path_buf(path) {
            Ok(path) => items.push(path),
            Err(path) => debug!(path = %path.display(), "skipping non-utf8 path"),
        }
    }
    items.sort();
    Ok(items)
}

fn discover_in(site_dirs: Vec<Utf8PathBuf>) -> Discovery {
    let mut discovery = Discovery::default();
    for site_dir in site_dirs {
        let Some(body_site) = parse_dir_name::<BodySite>(&site_dir) else {
            continue;
        };
        let visit_dirs = match list_dirs(&site_dir) {
            Ok(dirs) => dirs,
            Err(error) => {
                discovery.unreadable.push(UnreadableDir {
                    body_site,
                    path: site_dir,
                    error,
                });
                continue;
            }
        };
        let found = discovery.inputs.len();
        for visit_dir in visit_dirs {
            let Some(visit) = parse_dir_name::<Visit>(&visit_dir) else {
                continue;
            };
            let files = match list_files(&visit_dir) {
                Ok(files) => files,
                Err(error) => {
                    discovery.unreadable.push(UnreadableDir {
                        body_site: body_site.clone(),
                        path: visit_dir,
                        error,
                    });
                    continue;
                }
            };
            for file in files {
                let Some(name) = file.file_name() else {
                    continue;
                };
                match Classifier::from_summary_file_name(name) {
                    Some(classifier) => discovery.inputs.push(SummaryInput {
                        body_site: body_site.clone(),
                        classifier,
                        visit: visit.clone(),
                        path: file.clone(),
                    }),
                    None => debug!(path = file.as_str(), "not a classifier summary"),
                }
            }
        }
        if discovery.inputs.len() == found {
            info!(body_site = body_site.as_str(), "no visit data, skipping");
        }
    }
    discovery.inputs.sort();
    discovery
}

fn parse_dir_name<T: std::str::FromStr>(dir: &Utf8Path) -> Option<T> {
    dir.file_name().and_then(|name| name.parse().ok())
}
