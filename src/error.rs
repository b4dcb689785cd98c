use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum OasisError {
    #[error("unknown report: {0}")]
    #[diagnostic(help("run `oasis reports list` to see the catalog"))]
    UnknownReport(String),

    #[error("download failed after {attempts} attempt(s) for {url}: {message}")]
    Download {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("unrecognized report shape: {0}")]
    UnrecognizedShape(String),

    #[error("response is not a valid zip archive: {0}")]
    Archive(String),

    #[error("OASIS request failed: {0}")]
    Http(String),

    #[error("OASIS returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("failed to parse XML: {0}")]
    XmlParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read endpoint catalog at {0}")]
    CatalogRead(PathBuf),

    #[error("failed to parse endpoint catalog: {0}")]
    CatalogParse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid chunk size: {0}")]
    #[diagnostic(help("use <n>m, <n>h or <n>d, e.g. 1h or 4d"))]
    InvalidChunkSize(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("column not found in report table: {0}")]
    MissingColumn(String),

    #[error("failed to write table: {0}")]
    TableWrite(String),

    #[error("chunk {window} failed")]
    Chunk {
        window: String,
        #[source]
        source: Box<OasisError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded after {elapsed_secs}s")]
    DeadlineExceeded { elapsed_secs: u64 },
}

impl OasisError {
    /// Whether the fetcher should try the same URL again.
    pub fn is_retryable(&self) -> bool {
        match self {
            OasisError::Archive(_) | OasisError::Http(_) => true,
            OasisError::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
