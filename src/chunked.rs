//! Ranged fetches stitched together from bounded sub-requests.
//!
//! OASIS silently truncates time windows beyond a per-report ceiling, so a
//! long range is walked in fixed-size chunks. Each chunk yields one table
//! fragment; fragments are concatenated, trimmed to the requested window,
//! sorted and written out as CSV.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset, TimeDelta};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::OasisError;
use crate::fetch::{Fetcher, ReportTransport};
use crate::fs_util::ensure_absolute_dir;
use crate::report::Report;
use crate::table::ReportTable;
use crate::time::{ChunkSize, CivilTime};
use crate::url::UrlBuilder;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_START_COLUMN: &str = "INTERVAL_START_GMT";
pub const DEFAULT_END_COLUMN: &str = "INTERVAL_END_GMT";
pub const DEFAULT_SORT_BY: &[&str] = &["DATA_ITEM", "INTERVAL_START_GMT"];
pub const DEFAULT_DESTINATION: &str = "caiso_downloads";

/// What to do when one chunk cannot be fetched or parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFailurePolicy {
    #[default]
    Abort,
    /// Record the window in [`RangeResult::failed_chunks`] and continue.
    Skip,
}

#[derive(Debug, Clone)]
pub struct RangeRequest {
    pub report_name: String,
    pub start: CivilTime,
    pub end_limit: CivilTime,
    pub query_params: Vec<(String, String)>,
    pub chunk_size: ChunkSize,
    pub max_attempts: u32,
    pub start_column: String,
    pub end_column: String,
    pub sort_by: Vec<String>,
    pub destination: PathBuf,
    pub keep_temp_files: bool,
    pub failure_policy: ChunkFailurePolicy,
    /// Wall-clock budget for the whole run, checked before every chunk.
    pub deadline: Option<Duration>,
}

impl RangeRequest {
    pub fn new(report_name: impl Into<String>, start: CivilTime, end_limit: CivilTime) -> Self {
        Self {
            report_name: report_name.into(),
            start,
            end_limit,
            query_params: Vec::new(),
            chunk_size: ChunkSize::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            start_column: DEFAULT_START_COLUMN.to_string(),
            end_column: DEFAULT_END_COLUMN.to_string(),
            sort_by: DEFAULT_SORT_BY.iter().map(|key| key.to_string()).collect(),
            destination: PathBuf::from(DEFAULT_DESTINATION),
            keep_temp_files: false,
            failure_policy: ChunkFailurePolicy::default(),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl fmt::Display for ChunkWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkSummary {
    pub window: ChunkWindow,
    /// Full paths when downloads are kept, bare member names otherwise.
    pub files: Vec<Utf8PathBuf>,
    pub error_files: Vec<Utf8PathBuf>,
    pub rows: usize,
    /// Latest end timestamp among the chunk's rows.
    pub honored_until: Option<DateTime<FixedOffset>>,
    /// The service returned less time than was asked for.
    pub narrowed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedChunk {
    pub window: ChunkWindow,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RangeResult {
    pub report_name: String,
    pub output_path: Utf8PathBuf,
    pub rows: usize,
    pub chunks: Vec<ChunkSummary>,
    pub failed_chunks: Vec<FailedChunk>,
    #[serde(skip)]
    pub table: ReportTable,
}

/// Shared flag that stops a ranged fetch before its next chunk.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Splits `[start, end_limit]` into consecutive windows of `step`. The last
/// window may run past `end_limit`; rows beyond it are trimmed afterwards.
pub fn chunk_windows(
    start: DateTime<Tz>,
    end_limit: DateTime<Tz>,
    step: TimeDelta,
) -> Result<Vec<ChunkWindow>, OasisError> {
    if end_limit <= start {
        return Err(OasisError::InvalidTimestamp(format!(
            "range end {} is not after start {}",
            end_limit.to_rfc3339(),
            start.to_rfc3339()
        )));
    }
    let stop = advance(end_limit, step)?;
    let mut windows = Vec::new();
    let mut chunk_start = start;
    let mut chunk_end = advance(start, step)?;
    while chunk_end < stop {
        windows.push(ChunkWindow {
            start: chunk_start.fixed_offset(),
            end: chunk_end.fixed_offset(),
        });
        chunk_start = chunk_end;
        chunk_end = advance(chunk_end, step)?;
    }
    Ok(windows)
}

fn advance(instant: DateTime<Tz>, step: TimeDelta) -> Result<DateTime<Tz>, OasisError> {
    instant
        .checked_add_signed(step)
        .ok_or_else(|| OasisError::InvalidTimestamp(format!("{} + {step} overflows", instant)))
}

/// `<start>_<end>_<report>.csv`, both instants in the reference zone.
pub fn output_file_name(report_name: &str, start: &DateTime<Tz>, end_limit: &DateTime<Tz>) -> String {
    format!(
        "{}_{}_{}.csv",
        start.format("%Y%m%d-%H%M"),
        end_limit.format("%Y%m%d-%H%M"),
        report_name
    )
}

pub struct ChunkedFetch<'a, T: ReportTransport> {
    builder: &'a UrlBuilder,
    fetcher: &'a Fetcher<T>,
    cancellation: CancellationToken,
}

impl<'a, T: ReportTransport> ChunkedFetch<'a, T> {
    pub fn new(builder: &'a UrlBuilder, fetcher: &'a Fetcher<T>) -> Self {
        Self {
            builder,
            fetcher,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn run(
        &self,
        request: &RangeRequest,
        sink: &dyn ProgressSink,
    ) -> Result<RangeResult, OasisError> {
        let started = Instant::now();
        let tz = self.builder.timezone();
        self.builder.catalog().lookup(&request.report_name)?;

        let start = request.start.in_zone(tz)?;
        let end_limit = request.end_limit.in_zone(tz)?;
        let windows = chunk_windows(start, end_limit, request.chunk_size.as_delta())?;

        let destination = ensure_absolute_dir(&request.destination)?;
        let temp_dir = if request.keep_temp_files {
            None
        } else {
            Some(tempfile::Builder::new().prefix("oasis-").tempdir().map_err(|err| {
                OasisError::Filesystem(format!("create temporary directory: {err}"))
            })?)
        };
        let download_dir: &Path = match &temp_dir {
            Some(dir) => dir.path(),
            None => destination.as_std_path(),
        };

        info!(
            report = %request.report_name,
            start = %start.to_rfc3339(),
            end = %end_limit.to_rfc3339(),
            chunk_size = %request.chunk_size,
            chunks = windows.len(),
            "ranged fetch started"
        );

        let total = windows.len();
        let mut fragments = Vec::with_capacity(total);
        let mut chunks = Vec::with_capacity(total);
        let mut failed_chunks = Vec::new();
        for (index, window) in windows.into_iter().enumerate() {
            self.check_budget(request, started)?;
            sink.event(ProgressEvent {
                message: format!("phase=Chunk; {}/{} {}", index + 1, total, window),
                elapsed: Some(started.elapsed()),
            });

            match self.fetch_chunk(request, &window, end_limit.fixed_offset(), download_dir, tz) {
                Ok((fragment, summary)) => {
                    fragments.push(fragment);
                    chunks.push(summary);
                }
                Err(err) => match request.failure_policy {
                    ChunkFailurePolicy::Abort => {
                        return Err(OasisError::Chunk {
                            window: window.to_string(),
                            source: Box::new(err),
                        });
                    }
                    ChunkFailurePolicy::Skip => {
                        warn!(window = %window, error = %err, "skipping failed chunk");
                        failed_chunks.push(FailedChunk {
                            window,
                            error: err.to_string(),
                        });
                    }
                },
            }
        }

        let mut table = ReportTable::concat(fragments);
        table.retain_window(
            &request.start_column,
            &request.end_column,
            start.fixed_offset(),
            end_limit.fixed_offset(),
            tz,
        )?;
        table.sort_by_columns(&request.sort_by, tz)?;

        let output_path = destination.join(output_file_name(&request.report_name, &start, &end_limit));
        table.write_csv_file(output_path.as_std_path())?;
        sink.event(ProgressEvent {
            message: format!("phase=Write; {} rows to {}", table.len(), output_path),
            elapsed: Some(started.elapsed()),
        });
        info!(
            report = %request.report_name,
            rows = table.len(),
            failed = failed_chunks.len(),
            output = %output_path,
            "ranged fetch finished"
        );

        Ok(RangeResult {
            report_name: request.report_name.clone(),
            output_path,
            rows: table.len(),
            chunks,
            failed_chunks,
            table,
        })
    }

    fn check_budget(&self, request: &RangeRequest, started: Instant) -> Result<(), OasisError> {
        if self.cancellation.is_cancelled() {
            return Err(OasisError::Cancelled);
        }
        if let Some(deadline) = request.deadline {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return Err(OasisError::DeadlineExceeded {
                    elapsed_secs: elapsed.as_secs(),
                });
            }
        }
        Ok(())
    }

    fn fetch_chunk(
        &self,
        request: &RangeRequest,
        window: &ChunkWindow,
        end_limit: DateTime<FixedOffset>,
        download_dir: &Path,
        tz: Tz,
    ) -> Result<(ReportTable, ChunkSummary), OasisError> {
        let url = self.builder.build(
            &request.report_name,
            Some(&CivilTime::from(window.start)),
            Some(&CivilTime::from(window.end)),
            &request.query_params,
        )?;
        info!(window = %window, url = %url, "fetching chunk");
        let files = self.fetcher.fetch(&url, download_dir, request.max_attempts)?;

        let mut tables = Vec::with_capacity(files.len());
        let mut error_files = Vec::new();
        for file in &files {
            let report = Report::from_path(file.as_std_path())?;
            debug!(report = %report, "parsed report file");
            if let Some(error) = report.service_error() {
                warn!(file = %file, error = %error, "report carries no data, skipping");
                error_files.push(file.clone());
                continue;
            }
            if let Some(table) = report.into_table() {
                tables.push(table);
            }
        }
        let (files, error_files) = if request.keep_temp_files {
            (files, error_files)
        } else {
            for file in &files {
                if let Err(err) = fs::remove_file(file) {
                    warn!(file = %file, error = %err, "failed to remove downloaded file");
                }
            }
            (member_names(&files), member_names(&error_files))
        };

        let fragment = ReportTable::concat(tables);
        let honored_until = fragment.max_instant(&request.end_column, tz);
        let expected_end = window.end.min(end_limit);
        let narrowed = honored_until.is_some_and(|until| until < expected_end);
        if narrowed {
            warn!(
                window = %window,
                honored_until = ?honored_until.map(|until| until.to_rfc3339()),
                "service returned a narrower window than requested"
            );
        }

        let summary = ChunkSummary {
            window: *window,
            files,
            error_files,
            rows: fragment.len(),
            honored_until,
            narrowed,
        };
        Ok((fragment, summary))
    }
}

/// Bare archive member names, for files that no longer exist on disk.
fn member_names(files: &[Utf8PathBuf]) -> Vec<Utf8PathBuf> {
    files
        .iter()
        .map(|file| Utf8PathBuf::from(file.file_name().unwrap_or(file.as_str())))
        .collect()
}
