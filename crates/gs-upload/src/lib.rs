#![forbid(unsafe_code)]

//! Request/response contract between an HTTP front end and the aggregator.
//!
//! The transport is not modelled here. A front end decodes the multipart
//! form into an [`UploadRequest`], calls [`handle_method`] and writes the
//! returned status and JSON body back to the client.

use std::fmt;

use gs_groupby::{AggregateError, AggregationResult, aggregate_csv};
use gs_runtime::{AggregationPolicy, SkipLedger};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

pub const HTTP_OK: u16 = 200;
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;

pub const DETAIL_MISSING_COLUMNS: &str = "Aggregate and group must be defined.";
pub const DETAIL_NOT_A_FILE: &str = "File must be file-like.";

/// Value posted under the `file` form key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Upload {
    /// A file part with its raw bytes.
    File(Vec<u8>),
    /// A plain form value; not file-like.
    Field(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub group: Option<String>,
    pub aggregate: Option<String>,
    pub file: Option<Upload>,
}

impl UploadRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn with_aggregate(mut self, aggregate: impl Into<String>) -> Self {
        self.aggregate = Some(aggregate.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.file = Some(Upload::File(bytes.into()));
        self
    }

    #[must_use]
    pub fn with_field(mut self, value: impl Into<String>) -> Self {
        self.file = Some(Upload::Field(value.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: u16,
    pub body: Value,
}

impl UploadResponse {
    #[must_use]
    pub fn ok(result: &AggregationResult) -> Self {
        let body = result
            .iter()
            .map(|(group, sum)| (group.clone(), Value::from(*sum)))
            .collect();
        Self {
            status: HTTP_OK,
            body: Value::Object(body),
        }
    }

    #[must_use]
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::detail(HTTP_BAD_REQUEST, detail.into())
    }

    #[must_use]
    pub fn method_not_allowed(method: Method) -> Self {
        Self::detail(
            HTTP_METHOD_NOT_ALLOWED,
            format!("Method \"{method}\" not allowed."),
        )
    }

    fn detail(status: u16, detail: String) -> Self {
        Self {
            status,
            body: json!({ "detail": detail }),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// `detail` text of an error body.
    #[must_use]
    pub fn detail_text(&self) -> Option<&str> {
        self.body.get("detail").and_then(Value::as_str)
    }

    /// Compact JSON rendering of the body.
    #[must_use]
    pub fn to_json(&self) -> String {
        self.body.to_string()
    }
}

impl From<&AggregateError> for UploadResponse {
    fn from(err: &AggregateError) -> Self {
        Self::bad_request(err.to_string())
    }
}

/// Only `POST` runs the upload; every other method is refused.
#[must_use]
pub fn handle_method(
    method: Method,
    request: &UploadRequest,
    policy: &AggregationPolicy,
) -> UploadResponse {
    if method != Method::Post {
        debug!(%method, "refusing method");
        return UploadResponse::method_not_allowed(method);
    }
    handle_upload(request, policy)
}

#[must_use]
pub fn handle_upload(request: &UploadRequest, policy: &AggregationPolicy) -> UploadResponse {
    let mut ledger = SkipLedger::new();
    handle_upload_with_ledger(request, policy, &mut ledger)
}

/// Validates the request, then aggregates the uploaded bytes.
///
/// Column names are checked for presence before the file, matching the order
/// in which clients usually fix their requests.
#[must_use]
pub fn handle_upload_with_ledger(
    request: &UploadRequest,
    policy: &AggregationPolicy,
    ledger: &mut SkipLedger,
) -> UploadResponse {
    let (Some(group), Some(aggregate)) = (
        non_empty(request.group.as_deref()),
        non_empty(request.aggregate.as_deref()),
    ) else {
        info!("upload rejected: group or aggregate missing");
        return UploadResponse::bad_request(DETAIL_MISSING_COLUMNS);
    };

    let Some(Upload::File(bytes)) = &request.file else {
        info!("upload rejected: file is not file-like");
        return UploadResponse::bad_request(DETAIL_NOT_A_FILE);
    };

    match aggregate_csv(bytes.as_slice(), group, aggregate, policy, ledger) {
        Ok(result) => {
            info!(
                bytes = bytes.len(),
                groups = result.len(),
                skipped = ledger.skipped(),
                "upload aggregated"
            );
            UploadResponse::ok(&result)
        }
        Err(err) => {
            info!(error = %err, "upload rejected");
            UploadResponse::from(&err)
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
