use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::catalog::{CatalogFile, RequestStyle};
use crate::chunked::{CancellationToken, ChunkedFetch, RangeRequest, RangeResult};
use crate::config::ResolvedConfig;
use crate::error::OasisError;
use crate::fetch::{Fetcher, ReportTransport};
use crate::report::{Report, ServiceError};
use crate::sweep::{SweepResult, sweep_catalog};
use crate::time::CivilTime;
use crate::url::{QuerySpec, UrlBuilder};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub destination: PathBuf,
    pub max_attempts: u32,
    /// Applied in order; each narrows the previous result.
    pub filters: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportListResult {
    pub reports: Vec<ReportListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportListEntry {
    pub name: String,
    pub request_style: RequestStyle,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlResult {
    pub report_name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub url: String,
    pub files: Vec<FetchedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedFile {
    pub source: Utf8PathBuf,
    pub rows: Option<usize>,
    pub csv_path: Option<Utf8PathBuf>,
    pub service_error: Option<ServiceError>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<T: ReportTransport> {
    builder: UrlBuilder,
    fetcher: Fetcher<T>,
}

impl<T: ReportTransport> App<T> {
    pub fn new(builder: UrlBuilder, fetcher: Fetcher<T>) -> Self {
        Self { builder, fetcher }
    }

    pub fn from_config(config: &ResolvedConfig, transport: T) -> Self {
        let mut builder = UrlBuilder::new(config.catalog.clone()).with_timezone(config.timezone);
        if let Some(base_url) = &config.base_url {
            builder = builder.with_base_url(base_url.clone());
        }
        let fetcher = Fetcher::new(transport).with_backoff_unit(config.backoff);
        Self::new(builder, fetcher)
    }

    pub fn builder(&self) -> &UrlBuilder {
        &self.builder
    }

    pub fn fetcher(&self) -> &Fetcher<T> {
        &self.fetcher
    }

    pub fn report_names(&self) -> Result<ReportListResult, OasisError> {
        let catalog = self.builder.catalog();
        let reports = catalog
            .all_report_names()
            .into_iter()
            .map(|name| {
                let descriptor = catalog.lookup(&name)?;
                Ok(ReportListEntry {
                    name,
                    request_style: descriptor.request_style,
                    samples: descriptor.sample_params.len(),
                })
            })
            .collect::<Result<Vec<_>, OasisError>>()?;
        Ok(ReportListResult { reports })
    }

    pub fn report_params(&self, report_name: &str) -> Result<CatalogFile, OasisError> {
        self.builder.catalog().report_params(report_name)
    }

    pub fn build_url(&self, query: &QuerySpec) -> Result<UrlResult, OasisError> {
        Ok(UrlResult {
            report_name: query.report_name.clone(),
            url: self.builder.build_query(query)?,
        })
    }

    /// One request, no chunking: every file in the bundle becomes a report.
    pub fn fetch_reports(
        &self,
        query: &QuerySpec,
        destination: &Path,
        max_attempts: u32,
        sink: &dyn ProgressSink,
    ) -> Result<(String, Vec<Report>), OasisError> {
        let started = Instant::now();
        let url = self.builder.build_query(query)?;
        sink.event(ProgressEvent {
            message: format!("phase=Download; {url}"),
            elapsed: None,
        });

        let files = self.fetcher.fetch(&url, destination, max_attempts)?;
        let reports = files
            .iter()
            .map(|file| Report::from_path(file.as_std_path()))
            .collect::<Result<Vec<_>, OasisError>>()?;
        sink.event(ProgressEvent {
            message: format!("phase=Parse; {} file(s)", reports.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok((url, reports))
    }

    /// Fetches, filters and writes a CSV next to each data-bearing file.
    pub fn fetch(
        &self,
        query: &QuerySpec,
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, OasisError> {
        let (url, reports) =
            self.fetch_reports(query, &options.destination, options.max_attempts, sink)?;

        let mut files = Vec::with_capacity(reports.len());
        for mut report in reports {
            let source = report
                .source()
                .cloned()
                .ok_or_else(|| OasisError::Filesystem("report without a source file".to_string()))?;
            for (key, values) in &options.filters {
                report.filter(key, values.as_slice())?;
            }

            let entry = match report.table() {
                Some(table) => {
                    let csv_path = source.with_extension("csv");
                    table.write_csv_file(csv_path.as_std_path())?;
                    info!(report = %report, rows = table.len(), csv = %csv_path, "report written");
                    FetchedFile {
                        source,
                        rows: Some(table.len()),
                        csv_path: Some(csv_path),
                        service_error: None,
                    }
                }
                None => FetchedFile {
                    source,
                    rows: None,
                    csv_path: None,
                    service_error: report.service_error().cloned(),
                },
            };
            files.push(entry);
        }
        Ok(FetchResult { url, files })
    }

    pub fn fetch_range(
        &self,
        request: &RangeRequest,
        cancellation: CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<RangeResult, OasisError> {
        ChunkedFetch::new(&self.builder, &self.fetcher)
            .with_cancellation(cancellation)
            .run(request, sink)
    }

    pub fn sweep(
        &self,
        start: &CivilTime,
        end: &CivilTime,
        destination: &Path,
        max_attempts: u32,
        sink: &dyn ProgressSink,
    ) -> Result<SweepResult, OasisError> {
        sweep_catalog(
            &self.builder,
            &self.fetcher,
            start,
            end,
            destination,
            max_attempts,
            sink,
        )
    }
}
