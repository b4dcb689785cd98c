//! Re-issues every sample request in the catalog for one window. Heavy on
//! the service; meant for occasional validation of the catalog.

use std::path::Path;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::OasisError;
use crate::fetch::{Fetcher, ReportTransport};
use crate::time::CivilTime;
use crate::url::UrlBuilder;

/// Archive member name the service uses for a rejected request.
pub const INVALID_REQUEST_MARKER: &str = "INVALID_REQUEST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    Downloaded,
    InvalidRequest,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepEntry {
    pub report_name: String,
    pub url: String,
    pub status: SweepStatus,
    pub files: Vec<Utf8PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub entries: Vec<SweepEntry>,
}

impl SweepResult {
    pub fn count(&self, status: SweepStatus) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status == status)
            .count()
    }
}

/// Download failures are logged and recorded; the sweep always runs to the
/// end of the catalog.
pub fn sweep_catalog<T: ReportTransport>(
    builder: &UrlBuilder,
    fetcher: &Fetcher<T>,
    start: &CivilTime,
    end: &CivilTime,
    destination: &Path,
    max_attempts: u32,
    sink: &dyn ProgressSink,
) -> Result<SweepResult, OasisError> {
    let queries = builder.catalog().sample_queries();
    let total = queries.len();
    let mut entries = Vec::with_capacity(total);

    for (index, query) in queries.into_iter().enumerate() {
        let url = builder.build(
            &query.report_name,
            Some(start),
            Some(end),
            &query.extra_params,
        )?;
        sink.event(ProgressEvent {
            message: format!("phase=Sweep; {}/{} {}", index + 1, total, query.report_name),
            elapsed: None,
        });

        let entry = match fetcher.fetch(&url, destination, max_attempts) {
            Ok(files) => {
                let invalid = files.iter().any(|file| {
                    file.file_name()
                        .is_some_and(|name| name.contains(INVALID_REQUEST_MARKER))
                });
                let status = if invalid {
                    warn!(url = %url, "service rejected sample request");
                    SweepStatus::InvalidRequest
                } else {
                    SweepStatus::Downloaded
                };
                SweepEntry {
                    report_name: query.report_name,
                    url,
                    status,
                    files,
                    error: None,
                }
            }
            Err(err) => {
                warn!(url = %url, error = %err, "could not download sample request");
                SweepEntry {
                    report_name: query.report_name,
                    url,
                    status: SweepStatus::Failed,
                    files: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        };
        entries.push(entry);
    }

    let result = SweepResult { entries };
    info!(
        downloaded = result.count(SweepStatus::Downloaded),
        invalid = result.count(SweepStatus::InvalidRequest),
        failed = result.count(SweepStatus::Failed),
        "catalog sweep finished"
    );
    Ok(result)
}
