use chrono_tz::Tz;

use crate::catalog::Catalog;
use crate::error::OasisError;
use crate::time::{CivilTime, DEFAULT_TIMEZONE, format_oasis};

/// One request against the service, before it becomes a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub report_name: String,
    pub start: Option<CivilTime>,
    pub end: Option<CivilTime>,
    pub extra_params: Vec<(String, String)>,
}

impl QuerySpec {
    pub fn new(report_name: impl Into<String>) -> Self {
        Self {
            report_name: report_name.into(),
            start: None,
            end: None,
            extra_params: Vec::new(),
        }
    }

    pub fn window(mut self, start: CivilTime, end: CivilTime) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct UrlBuilder {
    catalog: Catalog,
    base_url: String,
    timezone: Tz,
}

impl UrlBuilder {
    pub fn new(catalog: Catalog) -> Self {
        let base_url = format!("http://{}", catalog.domain());
        Self {
            catalog,
            base_url,
            timezone: DEFAULT_TIMEZONE,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Extra parameters keep their given order, then the window, then the
    /// report identifier.
    pub fn build(
        &self,
        report_name: &str,
        start: Option<&CivilTime>,
        end: Option<&CivilTime>,
        extra_params: &[(String, String)],
    ) -> Result<String, OasisError> {
        let descriptor = self.catalog.lookup(report_name)?;

        let mut pairs: Vec<String> = extra_params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        if let Some(start) = start {
            pairs.push(format!("startdatetime={}", format_oasis(start, self.timezone)?));
        }
        if let Some(end) = end {
            pairs.push(format!("enddatetime={}", format_oasis(end, self.timezone)?));
        }
        pairs.push(format!(
            "{}={}",
            descriptor.identifying_param_name, descriptor.report_name
        ));

        Ok(format!(
            "{}{}?{}",
            self.base_url,
            descriptor.request_style.path(),
            pairs.join("&")
        ))
    }

    pub fn build_query(&self, query: &QuerySpec) -> Result<String, OasisError> {
        self.build(
            &query.report_name,
            query.start.as_ref(),
            query.end.as_ref(),
            &query.extra_params,
        )
    }
}

/// Parses `key=value` as written on the command line or in a config file.
pub fn parse_param(raw: &str) -> Result<(String, String), OasisError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| OasisError::InvalidParam(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(OasisError::InvalidParam(raw.to_string()));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use assert_matches::assert_matches;

    use super::*;

    fn builder() -> UrlBuilder {
        UrlBuilder::new(Catalog::embedded().unwrap())
    }

    fn query_pairs(url: &str) -> BTreeSet<String> {
        let (_, query) = url.split_once('?').unwrap();
        query.split('&').map(str::to_string).collect()
    }

    #[test]
    fn builds_single_report_url() {
        let start: CivilTime = "2013-09-19T07:00".parse().unwrap();
        let end: CivilTime = "2013-09-19T08:00".parse().unwrap();
        let params = vec![
            ("version".to_string(), "2".to_string()),
            ("market_run_id".to_string(), "RTM".to_string()),
            ("node".to_string(), "LAPLMG1_7_B2".to_string()),
        ];
        let url = builder()
            .build("PRC_INTVL_LMP", Some(&start), Some(&end), &params)
            .unwrap();

        assert!(url.starts_with("http://oasis.caiso.com/oasisapi/SingleZip?"));
        let expected: BTreeSet<String> = [
            "version=2",
            "market_run_id=RTM",
            "node=LAPLMG1_7_B2",
            "startdatetime=20130919T07:00-0700",
            "enddatetime=20130919T08:00-0700",
            "queryname=PRC_INTVL_LMP",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        assert_eq!(query_pairs(&url), expected);
        assert!(url.ends_with("&queryname=PRC_INTVL_LMP"));
    }

    #[test]
    fn group_reports_use_groupid() {
        let url = builder().build("DAM_LMP_GRP", None, None, &[]).unwrap();
        assert_eq!(
            url,
            "http://oasis.caiso.com/oasisapi/GroupZip?groupid=DAM_LMP_GRP"
        );
    }

    #[test]
    fn param_order_is_preserved() {
        let query = QuerySpec::new("PRC_LMP")
            .param("version", "1")
            .param("market_run_id", "DAM");
        let url = builder()
            .with_base_url("http://localhost:8080/")
            .build_query(&query)
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:8080/oasisapi/SingleZip?version=1&market_run_id=DAM&queryname=PRC_LMP"
        );
    }

    #[test]
    fn unknown_report_fails_before_formatting() {
        assert_matches!(
            builder().build("NOT_A_REAL_REPORT", None, None, &[]),
            Err(OasisError::UnknownReport(_))
        );
    }

    #[test]
    fn parse_param_splits_on_first_equals() {
        assert_eq!(
            parse_param("node=A=B").unwrap(),
            ("node".to_string(), "A=B".to_string())
        );
        assert_matches!(parse_param("novalue"), Err(OasisError::InvalidParam(_)));
        assert_matches!(parse_param("=x"), Err(OasisError::InvalidParam(_)));
    }
}
