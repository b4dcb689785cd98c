mod common;

use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use oasis_fetch::catalog::Catalog;
use oasis_fetch::chunked::{CancellationToken, ChunkFailurePolicy, ChunkedFetch, RangeRequest};
use oasis_fetch::error::OasisError;
use oasis_fetch::fetch::Fetcher;
use oasis_fetch::output::JsonOutput;
use oasis_fetch::url::UrlBuilder;

use common::{RoutingTransport, error_xml, report_xml, zip_of};

const FIRST_CHUNK: &str = "startdatetime=20180101T00:00-0800&enddatetime=20180102T00:00-0800";
const SECOND_CHUNK: &str = "startdatetime=20180102T00:00-0800&enddatetime=20180103T00:00-0800";

fn first_day() -> Vec<u8> {
    zip_of(&[(
        "20180101_20180102_PRC_INTVL_LMP_RTM_20180102_v2.xml",
        report_xml(&[
            ("LMP_PRC", "2018-01-01T07:55:00-00:00", "2018-01-01T08:00:00-00:00", "30.00"),
            ("LMP_PRC", "2018-01-01T08:00:00-00:00", "2018-01-01T08:05:00-00:00", "35.07"),
            ("LMP_CONG_PRC", "2018-01-02T07:55:00-00:00", "2018-01-02T08:00:00-00:00", "0"),
        ]),
    )])
}

fn second_day() -> Vec<u8> {
    zip_of(&[
        (
            "20180102_20180103_PRC_INTVL_LMP_RTM_20180103_v2.xml",
            report_xml(&[
                ("LMP_PRC", "2018-01-02T08:00:00-00:00", "2018-01-02T08:05:00-00:00", "36.10"),
                ("LMP_PRC", "2018-01-03T07:55:00-00:00", "2018-01-03T08:00:00-00:00", "31.42"),
                ("LMP_PRC", "2018-01-03T08:00:00-00:00", "2018-01-03T08:05:00-00:00", "29.99"),
            ]),
        ),
        ("INVALID_REQUEST.xml", error_xml()),
    ])
}

fn request(destination: &std::path::Path) -> RangeRequest {
    let mut request = RangeRequest::new(
        "PRC_INTVL_LMP",
        "2018-01-01".parse().unwrap(),
        "2018-01-03".parse().unwrap(),
    );
    request.query_params = vec![
        ("version".to_string(), "2".to_string()),
        ("market_run_id".to_string(), "RTM".to_string()),
        ("node".to_string(), "LAPLMG1_7_B2".to_string()),
    ];
    request.max_attempts = 2;
    request.destination = destination.to_path_buf();
    request
}

fn builder() -> UrlBuilder {
    UrlBuilder::new(Catalog::embedded().unwrap())
}

#[test]
fn two_daily_chunks_are_stitched_and_trimmed() {
    let temp = tempfile::tempdir().unwrap();
    let transport =
        RoutingTransport::new(vec![(FIRST_CHUNK, first_day()), (SECOND_CHUNK, second_day())]);
    let fetcher = Fetcher::new(&transport).with_backoff_unit(Duration::ZERO);
    let builder = builder();

    let result = ChunkedFetch::new(&builder, &fetcher)
        .run(&request(temp.path()), &JsonOutput)
        .unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].contains(FIRST_CHUNK));
    assert!(calls[1].contains(SECOND_CHUNK));
    assert!(calls[0].ends_with("&queryname=PRC_INTVL_LMP"));

    assert_eq!(result.chunks.len(), 2);
    assert_eq!(result.chunks[0].rows, 3);
    assert_eq!(result.chunks[1].rows, 3);
    assert_eq!(result.chunks[1].error_files.len(), 1);
    assert_eq!(result.chunks[1].error_files[0].as_str(), "INVALID_REQUEST.xml");
    assert_eq!(
        result.chunks[0].files[0].as_str(),
        "20180101_20180102_PRC_INTVL_LMP_RTM_20180102_v2.xml"
    );
    assert!(result.chunks.iter().all(|chunk| !chunk.narrowed));
    assert!(result.failed_chunks.is_empty());

    assert_eq!(result.rows, 4);
    let order: Vec<_> = result
        .table
        .rows()
        .iter()
        .map(|row| {
            (
                row.get("DATA_ITEM").unwrap(),
                row.get("INTERVAL_START_GMT").unwrap(),
            )
        })
        .collect();
    assert_eq!(
        order,
        vec![
            ("LMP_CONG_PRC", "2018-01-02T07:55:00-00:00"),
            ("LMP_PRC", "2018-01-01T08:00:00-00:00"),
            ("LMP_PRC", "2018-01-02T08:00:00-00:00"),
            ("LMP_PRC", "2018-01-03T07:55:00-00:00"),
        ]
    );

    assert!(
        result
            .output_path
            .ends_with("20180101-0000_20180103-0000_PRC_INTVL_LMP.csv")
    );
    let csv = fs::read_to_string(&result.output_path).unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("DATA_ITEM,RESOURCE_NAME,INTERVAL_START_GMT,INTERVAL_END_GMT,VALUE")
    );
    assert_eq!(lines.count(), 4);
}

#[test]
fn temp_files_are_kept_on_request() {
    let temp = tempfile::tempdir().unwrap();
    let transport =
        RoutingTransport::new(vec![(FIRST_CHUNK, first_day()), (SECOND_CHUNK, second_day())]);
    let fetcher = Fetcher::new(&transport).with_backoff_unit(Duration::ZERO);
    let builder = builder();
    let mut request = request(temp.path());
    request.keep_temp_files = true;

    let result = ChunkedFetch::new(&builder, &fetcher)
        .run(&request, &JsonOutput)
        .unwrap();
    for chunk in &result.chunks {
        for file in &chunk.files {
            assert!(file.exists(), "{file} should be kept");
            assert!(file.starts_with(temp.path().canonicalize().unwrap().to_str().unwrap()));
        }
    }
}

#[test]
fn failed_chunk_aborts_by_default() {
    let temp = tempfile::tempdir().unwrap();
    let transport = RoutingTransport::new(vec![
        (FIRST_CHUNK, first_day()),
        (SECOND_CHUNK, b"<html>Service Unavailable</html>".to_vec()),
    ]);
    let fetcher = Fetcher::new(&transport).with_backoff_unit(Duration::ZERO);
    let builder = builder();

    let err = ChunkedFetch::new(&builder, &fetcher)
        .run(&request(temp.path()), &JsonOutput)
        .unwrap_err();
    assert_matches!(
        err,
        OasisError::Chunk { source, .. } if matches!(*source, OasisError::Download { attempts: 2, .. })
    );
    assert_eq!(transport.calls().len(), 3);
}

#[test]
fn failed_chunk_can_be_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let transport = RoutingTransport::new(vec![
        (FIRST_CHUNK, first_day()),
        (SECOND_CHUNK, b"<html>Service Unavailable</html>".to_vec()),
    ]);
    let fetcher = Fetcher::new(&transport).with_backoff_unit(Duration::ZERO);
    let builder = builder();
    let mut request = request(temp.path());
    request.failure_policy = ChunkFailurePolicy::Skip;

    let result = ChunkedFetch::new(&builder, &fetcher)
        .run(&request, &JsonOutput)
        .unwrap();
    assert_eq!(result.chunks.len(), 1);
    assert_eq!(result.failed_chunks.len(), 1);
    assert_eq!(
        result.failed_chunks[0].window.start.to_rfc3339(),
        "2018-01-02T00:00:00-08:00"
    );
    assert_eq!(result.rows, 2);
}

#[test]
fn short_answer_is_flagged_as_narrowed() {
    let temp = tempfile::tempdir().unwrap();
    let truncated = zip_of(&[(
        "20180102_20180103_PRC_INTVL_LMP_RTM_20180103_v2.xml",
        report_xml(&[(
            "LMP_PRC",
            "2018-01-02T08:00:00-00:00",
            "2018-01-02T09:00:00-00:00",
            "36.10",
        )]),
    )]);
    let transport =
        RoutingTransport::new(vec![(FIRST_CHUNK, first_day()), (SECOND_CHUNK, truncated)]);
    let fetcher = Fetcher::new(&transport).with_backoff_unit(Duration::ZERO);
    let builder = builder();

    let result = ChunkedFetch::new(&builder, &fetcher)
        .run(&request(temp.path()), &JsonOutput)
        .unwrap();
    assert!(!result.chunks[0].narrowed);
    assert!(result.chunks[1].narrowed);
    assert_eq!(
        result.chunks[1].honored_until.unwrap().to_rfc3339(),
        "2018-01-02T09:00:00+00:00"
    );
}

#[test]
fn cancelled_run_issues_no_requests() {
    let temp = tempfile::tempdir().unwrap();
    let transport = RoutingTransport::new(vec![(FIRST_CHUNK, first_day())]);
    let fetcher = Fetcher::new(&transport).with_backoff_unit(Duration::ZERO);
    let builder = builder();
    let token = CancellationToken::new();
    token.cancel();

    let err = ChunkedFetch::new(&builder, &fetcher)
        .with_cancellation(token)
        .run(&request(temp.path()), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, OasisError::Cancelled);
    assert!(transport.calls().is_empty());
}

#[test]
fn exhausted_deadline_stops_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let transport = RoutingTransport::new(vec![(FIRST_CHUNK, first_day())]);
    let fetcher = Fetcher::new(&transport).with_backoff_unit(Duration::ZERO);
    let builder = builder();
    let mut request = request(temp.path());
    request.deadline = Some(Duration::ZERO);

    let err = ChunkedFetch::new(&builder, &fetcher)
        .run(&request, &JsonOutput)
        .unwrap_err();
    assert_matches!(err, OasisError::DeadlineExceeded { .. });
}

#[test]
fn unknown_report_fails_before_any_request() {
    let temp = tempfile::tempdir().unwrap();
    let transport = RoutingTransport::new(Vec::new());
    let fetcher = Fetcher::new(&transport).with_backoff_unit(Duration::ZERO);
    let builder = builder();
    let mut request = request(temp.path());
    request.report_name = "NOT_A_REAL_REPORT".to_string();

    let err = ChunkedFetch::new(&builder, &fetcher)
        .run(&request, &JsonOutput)
        .unwrap_err();
    assert_matches!(err, OasisError::UnknownReport(_));
    assert!(transport.calls().is_empty());
}
