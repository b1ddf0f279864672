use assert_matches::assert_matches;

use otu_matrix::domain::{BodySite, Classifier, Visit, ZeroTotalPolicy, sanitize_taxonomy};
use otu_matrix::error::OtuError;

#[test]
fn parse_classifier_valid() {
    let classifier: Classifier = "RDP18".parse().unwrap();
    assert_eq!(classifier.as_str(), "rdp18");
}

#[test]
fn parse_classifier_invalid() {
    let err = "rdp".parse::<Classifier>().unwrap_err();
    assert_matches!(err, OtuError::InvalidClassifier(_));
}

#[test]
fn summary_names_select_classifier() {
    let rdp6 = Classifier::from_summary_file_name("final.rdp6.summary").unwrap();
    let rdp18 = Classifier::from_summary_file_name("final.rdp18.summary").unwrap();
    assert_ne!(rdp6, rdp18);
    assert_eq!(rdp6.as_str(), "rdp6");
    assert!(Classifier::from_summary_file_name("visit1.final.summary").is_none());
}

#[test]
fn parse_visit() {
    assert_eq!(Visit::number(2), "visit2".parse::<Visit>().unwrap());
    assert_matches!("visit1.csv".parse::<Visit>(), Err(OtuError::InvalidVisit(_)));
}

#[test]
fn parse_body_site() {
    let site: BodySite = " buccal_mucosa ".parse().unwrap();
    assert_eq!(site.as_str(), "buccal_mucosa");
    assert_matches!("".parse::<BodySite>(), Err(OtuError::InvalidBodySite(_)));
}

#[test]
fn zero_total_policy_names() {
    assert_eq!("skip-subject".parse::<ZeroTotalPolicy>().unwrap(), ZeroTotalPolicy::SkipSubject);
    assert_eq!(ZeroTotalPolicy::default().to_string(), "propagate");
    assert_matches!("ignore".parse::<ZeroTotalPolicy>(), Err(OtuError::InvalidZeroTotalPolicy(_)));
}

#[test]
fn sanitize_rdp_taxonomy() {
    assert_eq!(
        sanitize_taxonomy("\"Bacteria(100);Firmicutes(100);\""),
        "Bacteria(100)|Firmicutes(100)"
    );
    assert_eq!(sanitize_taxonomy("Root"), "Root");
}
