//! Offline catalog generation from the text of the OASIS interface
//! specification. Best effort: the document wraps and annotates its sample
//! URLs irregularly, so the output needs a manual review before it replaces
//! the shipped catalog.

use std::ops::RangeInclusive;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::{CatalogFile, RequestStyle, SampleParams};
use crate::error::OasisError;

/// Pages the sample URLs live on in the v4.3.5 interface specification.
pub const DEFAULT_PAGES: RangeInclusive<usize> = 47..=65;

/// Text extraction separates pages with form feeds.
pub const PAGE_BREAK: char = '\u{c}';

static ANNOTATIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"\n\s*OR", r"\n\s*Note", r"\n\s*NOTE"]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("annotation pattern"))
        .collect()
});
static WRAPPED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s+").expect("wrapped line pattern"));
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("url pattern"));
static SCHEME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://").expect("scheme pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointParts {
    pub domain: String,
    pub path: String,
    pub params: SampleParams,
}

/// Extracts sample request URLs, without scheme, from the pages of `text`
/// whose zero-based index falls in `pages`.
pub fn scrape_endpoint_urls(text: &str, pages: RangeInclusive<usize>) -> Vec<String> {
    let mut endpoints = Vec::new();
    for (page_number, page) in text.split(PAGE_BREAK).enumerate() {
        if !pages.contains(&page_number) {
            continue;
        }

        let mut page = page.to_string();
        for annotation in ANNOTATIONS.iter() {
            page = annotation.replace_all(&page, "").into_owned();
        }
        let page = WRAPPED_LINE.replace_all(&page, "");

        for found in URL.find_iter(&page) {
            let candidate = found.as_str();
            let recognized = (candidate.contains("GroupZip") && candidate.contains("groupid"))
                || (candidate.contains("SingleZip") && candidate.contains("queryname"));
            if !recognized {
                continue;
            }
            endpoints.extend(
                SCHEME
                    .split(candidate)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string),
            );
        }
    }
    debug!(endpoints = endpoints.len(), "endpoint urls scraped");
    endpoints
}

/// Splits `oasis.caiso.com/oasisapi/SingleZip?queryname=...` into its parts.
pub fn endpoint_to_parts(url: &str) -> Result<EndpointParts, OasisError> {
    let url = SCHEME.replace(url.trim(), "");
    let (location, query) = url.split_once('?').unwrap_or((url.as_ref(), ""));
    let (domain, path) = match location.find('/') {
        Some(index) => location.split_at(index),
        None => (location, ""),
    };
    if domain.is_empty() {
        return Err(OasisError::InvalidParam(format!("endpoint without domain: {url}")));
    }

    let mut params = SampleParams::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| OasisError::InvalidParam(format!("{pair} in {url}")))?;
        params.insert(key.to_string(), value.to_string());
    }

    Ok(EndpointParts {
        domain: domain.to_string(),
        path: path.to_string(),
        params,
    })
}

/// Groups endpoints by domain, path and report into the catalog file shape.
/// Endpoints that cannot be parsed or name no report are skipped.
pub fn build_catalog<S: AsRef<str>>(urls: &[S]) -> CatalogFile {
    let mut catalog = CatalogFile::new();
    for url in urls {
        let url = url.as_ref();
        let parts = match endpoint_to_parts(url) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(url, error = %err, "skipping malformed endpoint");
                continue;
            }
        };
        let report = [RequestStyle::SingleReport, RequestStyle::GroupReport]
            .iter()
            .find_map(|style| parts.params.get(style.identifying_param()))
            .cloned();
        let Some(report) = report else {
            warn!(url, "skipping endpoint without a report name");
            continue;
        };

        catalog
            .entry(parts.domain)
            .or_default()
            .entry(parts.path)
            .or_default()
            .entry(report)
            .or_default()
            .push(parts.params);
    }
    catalog
}
