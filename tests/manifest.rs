use std::fs;

use camino::Utf8PathBuf;

use otu_matrix::manifest::{MERGED_FILE, TextTable, prepare};

const METADATA: &str = "sample_id\tsubject_id\tsample_body_site\tvisit_number\tstudy_full_name\n\
                        s1\tp1\tvagina\t1\tMOMS PI\n\
                        s2\tp1\tvagina\t2\tMOMS PI\n\
                        s3\tp2\tbuccal mucosa\t1\tMOMS PI\n\
                        s4\tp2\tvagina\t3\tMOMS PI\n\
                        s1\tp1\tvagina\t1\tMOMS PI\n";

const DOWNLOAD: &str = "file_id\tmd5\tsize\turls\tsample_id\n\
                        f1\tm1\t10\thttp://a/f1\ts1\n\
                        f2\tm2\t20\thttp://a/f2\ts2\n\
                        f3\tm3\t30\thttp://a/f3\ts3\n\
                        f4\tm4\t40\thttp://a/f4\ts4\n";

#[test]
fn prepare_merges_and_partitions() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let portal = root.join("hmp_portal_files").join("momspi");
    fs::create_dir_all(portal.as_std_path()).unwrap();
    fs::write(portal.join("hmp_manifest_metadata_abc.tsv").as_std_path(), METADATA).unwrap();
    fs::write(portal.join("hmp_manifest_abc.tsv").as_std_path(), DOWNLOAD).unwrap();

    let out = root.join("out");
    let report = prepare(&root.join("hmp_portal_files"), &out, 2).unwrap();

    assert_eq!(report.merged_rows, 4);
    assert_eq!(report.body_sites, ["buccal mucosa", "vagina"]);
    assert_eq!(report.files.len(), 6);

    let merged = TextTable::read(&out.join(MERGED_FILE)).unwrap();
    assert_eq!(merged.header[0], "subject_id");

    let download = TextTable::read(&out.join("download/vagina_MOMS_PI/visit2.tsv")).unwrap();
    assert_eq!(
        download.header,
        ["file_id", "md5", "size", "urls", "sample_id", "subject_id"]
    );
    assert_eq!(download.rows, vec![vec!["f2", "m2", "20", "http://a/f2", "s2", "p1"]]);

    let metadata = TextTable::read(
        &out.join("metadata/buccal_mucosa_MOMS_PI_metadata/visit1_metadata.tsv"),
    )
    .unwrap();
    assert_eq!(
        metadata.header,
        ["sample_id", "sample_body_site", "study_full_name", "visit_number", "subject_id"]
    );
    assert_eq!(metadata.rows[0][1], "buccal mucosa");

    assert!(!out.join("download/vagina_MOMS_PI/visit3.tsv").as_std_path().exists());
}

#[test]
fn prepare_requires_both_manifests() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    fs::write(root.join("hmp_manifest_abc.tsv").as_std_path(), DOWNLOAD).unwrap();

    let err = prepare(&root, &root.join("out"), 2).unwrap_err();
    assert!(err.to_string().contains("hmp_manifest_metadata_"));
}
