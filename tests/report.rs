use std::path::{Path, PathBuf};

use assert_matches::assert_matches;

use oasis_fetch::error::OasisError;
use oasis_fetch::report::Report;
use oasis_fetch::xml::OneOrMany;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn multi_item_report_flattens_in_document_order() {
    let report = Report::from_path(&fixture("prc_intvl_lmp.xml")).unwrap();
    assert!(!report.is_error());

    let table = report.table().unwrap();
    assert_eq!(table.len(), 5);
    assert_eq!(
        table.columns(),
        &[
            "DATA_ITEM",
            "RESOURCE_NAME",
            "OPR_DATE",
            "INTERVAL_NUM",
            "INTERVAL_START_GMT",
            "INTERVAL_END_GMT",
            "VALUE"
        ]
    );
    let items: Vec<_> = table
        .rows()
        .iter()
        .map(|row| row.get("DATA_ITEM").unwrap())
        .collect();
    assert_eq!(
        items,
        vec!["LMP_PRC", "LMP_PRC", "LMP_CONG_PRC", "LMP_CONG_PRC", "LMP_CONG_PRC"]
    );
}

#[test]
fn single_row_report_is_normalized_to_lists() {
    let report = Report::from_path(&fixture("prc_lmp_single_row.xml")).unwrap();
    let keys = report.keys().unwrap();
    assert_eq!(keys.item, "REPORT_ITEM");
    assert_eq!(keys.data, "REPORT_DATA");

    let region = report
        .document()
        .root
        .as_element()
        .and_then(|root| root.get(&keys.payload))
        .and_then(OneOrMany::first)
        .and_then(|payload| payload.as_element())
        .and_then(|payload| payload.get(&keys.region))
        .and_then(OneOrMany::first)
        .and_then(|region| region.as_element())
        .unwrap();
    let items = region.get(&keys.item).unwrap();
    assert!(!items.is_single());
    assert_eq!(items.len(), 1);
    let rows = items
        .first()
        .and_then(|item| item.as_element())
        .and_then(|item| item.get(&keys.data))
        .unwrap();
    assert!(!rows.is_single());
    assert_eq!(rows.len(), 1);

    let table = report.table().unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.rows()[0].get("VALUE"), Some("38.02"));
}

#[test]
fn error_response_is_reported_not_raised() {
    let report = Report::from_path(&fixture("invalid_request.xml")).unwrap();
    assert!(report.is_error());
    assert!(report.table().is_none());
    assert!(report.keys().is_none());
    let error = report.service_error().unwrap();
    assert_eq!(error.code(), Some("1000"));
    assert_eq!(
        error.description(),
        Some("No data returned for the specified selection")
    );
}

#[test]
fn filter_narrows_and_is_recorded() {
    let path = fixture("prc_intvl_lmp.xml");
    let mut report = Report::from_path(&path).unwrap();
    report.filter("DATA_ITEM", &["LMP_CONG_PRC"]).unwrap();
    report.filter("INTERVAL_NUM", &["1", "3"]).unwrap();

    let table = report.table().unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(report.filters().len(), 2);
    assert_eq!(
        report.to_string(),
        format!(
            "OASISReport: {} filtered on [{{DATA_ITEM: [LMP_CONG_PRC]}}, {{INTERVAL_NUM: [1, 3]}}]",
            path.display()
        )
    );

    let reparsed = Report::parse(&report.to_xml().unwrap()).unwrap();
    assert_eq!(reparsed.table(), report.table());
}

#[test]
fn re_serialized_document_parses_to_the_same_tree() {
    let report = Report::from_path(&fixture("prc_intvl_lmp.xml")).unwrap();
    let xml = report.to_xml().unwrap();
    assert!(xml.starts_with("<?xml"));
    let reparsed = Report::parse(&xml).unwrap();
    assert_eq!(reparsed.document(), report.document());
}

#[test]
fn non_report_documents_are_unrecognized() {
    assert_matches!(
        Report::parse("<html><head/><body>Service Unavailable</body></html>"),
        Err(OasisError::UnrecognizedShape(_))
    );
    assert_matches!(
        Report::parse("not xml at all <"),
        Err(OasisError::XmlParse(_)) | Err(OasisError::UnrecognizedShape(_))
    );
}

#[test]
fn missing_file_is_a_filesystem_error() {
    assert_matches!(
        Report::from_path(&fixture("does_not_exist.xml")),
        Err(OasisError::Filesystem(_))
    );
}
