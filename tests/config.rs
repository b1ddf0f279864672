use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use otu_matrix::config::{Config, ConfigLoader};
use otu_matrix::domain::ZeroTotalPolicy;
use otu_matrix::error::OtuError;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("otu-matrix.json")).unwrap();
    std::fs::write(
        path.as_std_path(),
        r#"{
            "data_dir": "mothur_output/momspi",
            "output_root": "results",
            "paired_dir": "pairs",
            "paired_visits": ["visit1", "visit3"],
            "body_sites": ["vagina"],
            "classifiers": ["rdp18"],
            "zero_total": "skip-subject",
            "precision": 9
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(&path)).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.data_dir, "mothur_output/momspi");
    assert_eq!(resolved.paired_dir, "results/pairs");
    assert_eq!(resolved.paired_visits.1.as_str(), "visit3");
    assert_eq!(resolved.normalize.zero_total, ZeroTotalPolicy::SkipSubject);
    assert_eq!(resolved.normalize.precision, Some(9));
    assert!(resolved.selects_body_site(&"vagina".parse().unwrap()));
    assert!(!resolved.selects_body_site(&"feces".parse().unwrap()));
    assert!(!resolved.selects_classifier(&"rdp6".parse().unwrap()));
}

#[test]
fn invalid_classifier_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("bad.json")).unwrap();
    std::fs::write(path.as_std_path(), r#"{ "classifiers": ["silva"] }"#).unwrap();

    let err = ConfigLoader::resolve(Some(&path)).unwrap_err();
    assert_matches!(err, OtuError::ConfigParse(_));
}

#[test]
fn missing_explicit_config_is_an_error() {
    let err = ConfigLoader::resolve(Some(camino::Utf8Path::new("/nonexistent/otu-matrix.json")))
        .unwrap_err();
    assert_matches!(err, OtuError::ConfigRead(_));
}

#[test]
fn absolute_paired_dir_is_kept() {
    let resolved = ConfigLoader::resolve_config(Config {
        paired_dir: Some(Utf8PathBuf::from("/srv/pairs")),
        ..Config::default()
    });
    assert_eq!(resolved.paired_dir, "/srv/pairs");
}
