#![forbid(unsafe_code)]

//! Upload boundary exercised with the CSV fixtures under `fixtures/`.

use std::path::PathBuf;

use gs_runtime::{AggregationPolicy, SkipLedger, SkipReason};
use gs_upload::{
    DETAIL_NOT_A_FILE, HTTP_BAD_REQUEST, HTTP_OK, Method, UploadRequest, UploadResponse,
    handle_method, handle_upload, handle_upload_with_ledger,
};
use serde_json::json;

fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}

fn post(group: &str, aggregate: &str, file: &str) -> UploadResponse {
    let request = UploadRequest::new()
        .with_group(group)
        .with_aggregate(aggregate)
        .with_file(fixture(file));
    handle_method(Method::Post, &request, &AggregationPolicy::default())
}

fn expected() -> serde_json::Value {
    json!({"eagle": 34, "smith": 27, "lee": 3})
}

#[test]
fn upload_simple() {
    let response = post("last_name", "count", "file0.csv");
    assert_eq!(response.status, HTTP_OK);
    assert_eq!(response.body, expected());
}

#[test]
fn upload_padding() {
    let response = post("last_name", "count", "file1.csv");
    assert_eq!(response.status, HTTP_OK);
    assert_eq!(response.body, expected());
}

#[test]
fn upload_missing_values() {
    let response = post("last_name", "count", "file2.csv");
    assert_eq!(response.status, HTTP_OK);
    assert_eq!(response.body, expected());
}

#[test]
fn upload_missing_values_are_accounted_for() {
    let request = UploadRequest::new()
        .with_group("last_name")
        .with_aggregate("count")
        .with_file(fixture("file2.csv"));
    let mut ledger = SkipLedger::new();
    let response = handle_upload_with_ledger(&request, &AggregationPolicy::default(), &mut ledger);

    assert!(response.is_success());
    assert_eq!(ledger.aggregated_rows(), 4);
    assert_eq!(ledger.blank_rows(), 3);
    let skipped: Vec<(u64, SkipReason)> = ledger
        .records()
        .iter()
        .map(|row| (row.record, row.reason))
        .collect();
    assert_eq!(
        skipped,
        vec![
            (5, SkipReason::MissingGroup),
            (9, SkipReason::MissingAggregate),
            (10, SkipReason::NonIntegerAggregate),
        ]
    );
}

#[test]
fn upload_bad_group() {
    let response = post("foobar", "count", "file2.csv");
    assert_eq!(response.status, HTTP_BAD_REQUEST);
    assert_eq!(
        response.body,
        json!({
            "detail": "Group and aggregate must be in headers. Headers: ['', 'first_name', 'last_name', 'count', '', '', '']"
        })
    );
}

#[test]
fn upload_bad_aggregate() {
    let response = post("last_name", "zipbaz", "file2.csv");
    assert_eq!(response.status, HTTP_BAD_REQUEST);
    assert_eq!(
        response.body,
        json!({
            "detail": "Group and aggregate must be in headers. Headers: ['', 'first_name', 'last_name', 'count', '', '', '']"
        })
    );
}

#[test]
fn upload_bad_file() {
    let request = UploadRequest::new()
        .with_group("last_name")
        .with_aggregate("count")
        .with_field("5");
    let response = handle_upload(&request, &AggregationPolicy::default());
    assert_eq!(response.status, HTTP_BAD_REQUEST);
    assert_eq!(response.body, json!({ "detail": DETAIL_NOT_A_FILE }));
}

#[test]
fn upload_bad_file_content() {
    let response = post("last_name", "count", "file3.csv");
    assert_eq!(response.status, HTTP_BAD_REQUEST);
    assert_eq!(
        response.body,
        json!({
            "detail": "Group and aggregate must be in headers. Headers: ['this is not a csv file...']"
        })
    );
}

#[test]
fn upload_no_file() {
    let request = UploadRequest::new()
        .with_group("last_name")
        .with_aggregate("count");
    let response = handle_upload(&request, &AggregationPolicy::default());
    assert_eq!(response.status, HTTP_BAD_REQUEST);
    assert_eq!(response.body, json!({ "detail": "File must be file-like." }));
}

#[test]
fn upload_empty_file() {
    let request = UploadRequest::new()
        .with_group("last_name")
        .with_aggregate("count")
        .with_file(Vec::new());
    let response = handle_upload(&request, &AggregationPolicy::default());
    assert_eq!(response.status, HTTP_BAD_REQUEST);
    assert_eq!(
        response.detail_text(),
        Some("Group and aggregate must be in headers. Headers: []")
    );
}

#[test]
fn strict_policy_rejects_fixture_with_missing_values() {
    let request = UploadRequest::new()
        .with_group("last_name")
        .with_aggregate("count")
        .with_file(fixture("file2.csv"));
    let response = handle_upload(&request, &AggregationPolicy::strict());
    assert_eq!(response.status, HTTP_BAD_REQUEST);
    assert_eq!(
        response.detail_text(),
        Some("Rejected malformed row in strict mode: record 5: missing group value")
    );

    let padded = UploadRequest::new()
        .with_group("last_name")
        .with_aggregate("count")
        .with_file(fixture("file1.csv"));
    let clean = handle_upload(&padded, &AggregationPolicy::strict());
    assert_eq!(clean.body, expected());
}

#[test]
fn repeated_uploads_are_independent() {
    let first = post("last_name", "count", "file2.csv");
    let second = post("last_name", "count", "file2.csv");
    assert_eq!(first, second);
}
