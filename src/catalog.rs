use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::OasisError;

/// Sample query parameters harvested for one report.
pub type SampleParams = BTreeMap<String, String>;

/// On-disk catalog layout: domain -> path -> report -> sample parameter sets.
pub type CatalogFile = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<SampleParams>>>>;

pub const DEFAULT_DOMAIN: &str = "oasis.caiso.com";
pub const SINGLE_ZIP_PATH: &str = "/oasisapi/SingleZip";
pub const GROUP_ZIP_PATH: &str = "/oasisapi/GroupZip";

/// Parameters the URL builder owns; stripped from samples before reuse.
const RESERVED_PARAMS: &[&str] = &["startdatetime", "enddatetime", "queryname", "groupid"];

const EMBEDDED_CATALOG: &str = include_str!("../data/oasis_endpoints.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStyle {
    SingleReport,
    GroupReport,
}

impl RequestStyle {
    pub fn identifying_param(&self) -> &'static str {
        match self {
            RequestStyle::SingleReport => "queryname",
            RequestStyle::GroupReport => "groupid",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            RequestStyle::SingleReport => SINGLE_ZIP_PATH,
            RequestStyle::GroupReport => GROUP_ZIP_PATH,
        }
    }

    fn from_path(path: &str) -> Option<Self> {
        if path.ends_with("SingleZip") {
            Some(RequestStyle::SingleReport)
        } else if path.ends_with("GroupZip") {
            Some(RequestStyle::GroupReport)
        } else {
            None
        }
    }
}

impl fmt::Display for RequestStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStyle::SingleReport => write!(f, "single"),
            RequestStyle::GroupReport => write!(f, "group"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDescriptor {
    pub request_style: RequestStyle,
    pub identifying_param_name: &'static str,
    pub report_name: String,
    pub sample_params: Vec<SampleParams>,
}

/// One sample request from the catalog with the builder-owned parameters removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleQuery {
    pub report_name: String,
    pub extra_params: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    domain: String,
    single: BTreeMap<String, Vec<SampleParams>>,
    group: BTreeMap<String, Vec<SampleParams>>,
}

impl Catalog {
    /// The catalog shipped with the crate.
    pub fn embedded() -> Result<Self, OasisError> {
        Self::from_json_str(EMBEDDED_CATALOG)
    }

    pub fn from_path(path: &Path) -> Result<Self, OasisError> {
        let content =
            fs::read_to_string(path).map_err(|_| OasisError::CatalogRead(path.to_path_buf()))?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, OasisError> {
        let file: CatalogFile = serde_json::from_str(content)
            .map_err(|err| OasisError::CatalogParse(err.to_string()))?;
        Self::from_file(file)
    }

    pub fn from_file(mut file: CatalogFile) -> Result<Self, OasisError> {
        let (domain, paths) = match file.remove(DEFAULT_DOMAIN) {
            Some(paths) => (DEFAULT_DOMAIN.to_string(), paths),
            None => file
                .into_iter()
                .next()
                .ok_or_else(|| OasisError::CatalogParse("catalog has no domains".to_string()))?,
        };

        let mut single = BTreeMap::new();
        let mut group = BTreeMap::new();
        for (path, reports) in paths {
            match RequestStyle::from_path(&path) {
                Some(RequestStyle::SingleReport) => single.extend(reports),
                Some(RequestStyle::GroupReport) => group.extend(reports),
                None => warn!(path = %path, "ignoring unrecognized catalog path"),
            }
        }
        if single.is_empty() && group.is_empty() {
            return Err(OasisError::CatalogParse(format!(
                "no {SINGLE_ZIP_PATH} or {GROUP_ZIP_PATH} reports for {domain}"
            )));
        }
        debug!(
            domain = %domain,
            single = single.len(),
            group = group.len(),
            "catalog loaded"
        );

        Ok(Self {
            domain,
            single,
            group,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Single-report entries win when a name appears under both paths.
    pub fn lookup(&self, report_name: &str) -> Result<EndpointDescriptor, OasisError> {
        let (style, samples) = if let Some(samples) = self.single.get(report_name) {
            (RequestStyle::SingleReport, samples)
        } else if let Some(samples) = self.group.get(report_name) {
            (RequestStyle::GroupReport, samples)
        } else {
            return Err(OasisError::UnknownReport(report_name.to_string()));
        };

        Ok(EndpointDescriptor {
            request_style: style,
            identifying_param_name: style.identifying_param(),
            report_name: report_name.to_string(),
            sample_params: samples.clone(),
        })
    }

    pub fn all_report_names(&self) -> BTreeSet<String> {
        self.single.keys().chain(self.group.keys()).cloned().collect()
    }

    /// Sample parameter sets for one report, keyed the way the catalog file is.
    pub fn report_params(&self, report_name: &str) -> Result<CatalogFile, OasisError> {
        let descriptor = self.lookup(report_name)?;
        let reports = BTreeMap::from([(descriptor.report_name, descriptor.sample_params)]);
        let paths = BTreeMap::from([(descriptor.request_style.path().to_string(), reports)]);
        Ok(BTreeMap::from([(self.domain.clone(), paths)]))
    }

    /// Every sample request in the catalog, ready to be re-issued for a new window.
    pub fn sample_queries(&self) -> Vec<SampleQuery> {
        self.group
            .iter()
            .chain(self.single.iter())
            .flat_map(|(report_name, samples)| {
                samples.iter().map(move |sample| SampleQuery {
                    report_name: report_name.clone(),
                    extra_params: sample
                        .iter()
                        .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect(),
                })
            })
            .collect()
    }
}
