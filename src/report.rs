//! Normalization and tabulation of OASIS report documents.
//!
//! A report nests as `master -> payload -> region -> items -> data rows`.
//! Element names carry report-specific prefixes and namespaces, so each
//! level is located by a marker substring rather than an exact name. The
//! markup collapses a repeated element that happens to occur once into a
//! bare element; normalization rewrites the item list and every data list
//! as lists so later stages see one shape.

use std::fmt;
use std::fs;
use std::path::Path;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::debug;

use crate::error::OasisError;
use crate::table::{DataRow, ReportTable};
use crate::xml::{OneOrMany, XmlDocument, XmlElement, XmlNode};

pub const PAYLOAD_MARKER: &str = "MessagePayload";
pub const REGION_MARKER: &str = "RTO";
pub const ERROR_MARKER: &str = "ERROR";
pub const ITEM_MARKER: &str = "ITEM";
pub const DATA_MARKER: &str = "DATA";
/// Region-level item that carries legal text rather than data.
pub const DISCLAIMER_ITEM: &str = "DISCLAIMER_ITEM";

/// Element names discovered at each level of a data-bearing report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportKeys {
    pub master: String,
    pub payload: String,
    pub region: String,
    pub item: String,
    pub data: String,
}

/// The error section the service returns instead of data for a rejected
/// or empty query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceError {
    pub key: String,
    pub fields: Vec<(String, String)>,
}

impl ServiceError {
    fn from_entry(key: &str, entry: Option<&OneOrMany<XmlNode>>) -> Self {
        let mut fields = Vec::new();
        for node in entry.map(OneOrMany::as_slice).unwrap_or_default() {
            match node {
                XmlNode::Element(element) => {
                    for (name, value) in &element.children {
                        if let Some(text) = value.first().and_then(XmlNode::scalar) {
                            fields.push((name.clone(), text.to_string()));
                        }
                    }
                }
                XmlNode::Text(text) => fields.push((key.to_string(), text.clone())),
                XmlNode::Empty => {}
            }
        }
        Self {
            key: key.to_string(),
            fields,
        }
    }

    fn field_containing(&self, marker: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name.contains(marker))
            .map(|(_, value)| value.as_str())
    }

    pub fn code(&self) -> Option<&str> {
        self.field_containing("ERR_CODE")
    }

    pub fn description(&self) -> Option<&str> {
        self.field_containing("ERR_DESC")
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code(), self.description()) {
            (Some(code), Some(description)) => write!(f, "{code}: {description}"),
            (Some(code), None) => write!(f, "{code}"),
            (None, Some(description)) => write!(f, "{description}"),
            (None, None) => write!(f, "{}", self.key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBody {
    Error(ServiceError),
    Data(ReportKeys),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportFilter {
    pub key: String,
    pub values: Vec<String>,
}

impl fmt::Display for ReportFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: [{}]}}", self.key, self.values.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    source: Option<Utf8PathBuf>,
    document: XmlDocument,
    body: ReportBody,
    table: Option<ReportTable>,
    filters: Vec<ReportFilter>,
}

impl Report {
    pub fn from_path(path: &Path) -> Result<Self, OasisError> {
        let content = fs::read_to_string(path)
            .map_err(|err| OasisError::Filesystem(format!("read {}: {err}", path.display())))?;
        let mut report = Self::parse(&content)?;
        report.source = Utf8PathBuf::from_path_buf(path.to_path_buf()).ok();
        Ok(report)
    }

    pub fn parse(xml: &str) -> Result<Self, OasisError> {
        Self::from_document(XmlDocument::parse(xml)?)
    }

    pub fn from_document(mut document: XmlDocument) -> Result<Self, OasisError> {
        let body = discover(&document)?;
        let table = match &body {
            ReportBody::Data(keys) => {
                normalize(&mut document, keys)?;
                Some(tabulate(&document, keys)?)
            }
            ReportBody::Error(error) => {
                debug!(error = %error, "report carries a service error");
                None
            }
        };
        Ok(Self {
            source: None,
            document,
            body,
            table,
            filters: Vec::new(),
        })
    }

    pub fn source(&self) -> Option<&Utf8PathBuf> {
        self.source.as_ref()
    }

    pub fn document(&self) -> &XmlDocument {
        &self.document
    }

    pub fn body(&self) -> &ReportBody {
        &self.body
    }

    pub fn keys(&self) -> Option<&ReportKeys> {
        match &self.body {
            ReportBody::Data(keys) => Some(keys),
            ReportBody::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ReportBody::Error(_))
    }

    pub fn service_error(&self) -> Option<&ServiceError> {
        match &self.body {
            ReportBody::Error(error) => Some(error),
            ReportBody::Data(_) => None,
        }
    }

    /// `None` for error-only reports.
    pub fn table(&self) -> Option<&ReportTable> {
        self.table.as_ref()
    }

    pub fn into_table(self) -> Option<ReportTable> {
        self.table
    }

    pub fn filters(&self) -> &[ReportFilter] {
        &self.filters
    }

    /// Keeps only data rows whose `search_key` value is one of
    /// `allowed_values` and rebuilds the table. Filters accumulate. Rows
    /// without the field are dropped. Error-only reports are left untouched.
    pub fn filter<S: AsRef<str>>(
        &mut self,
        search_key: &str,
        allowed_values: &[S],
    ) -> Result<(), OasisError> {
        let ReportBody::Data(keys) = &self.body else {
            debug!(search_key, "filter ignored on error-only report");
            return Ok(());
        };

        let region = region_mut(&mut self.document, keys)?;
        let items = region
            .get_mut(&keys.item)
            .ok_or_else(|| missing(&keys.item, &keys.region))?
            .make_many();
        for item in items.iter_mut() {
            let Some(item) = item.as_element_mut() else {
                continue;
            };
            if let Some(data) = item.get_mut(&keys.data) {
                data.make_many().retain(|row| {
                    field_value(row, search_key).is_some_and(|value| {
                        allowed_values.iter().any(|allowed| allowed.as_ref() == value)
                    })
                });
            }
        }

        self.table = Some(tabulate(&self.document, keys)?);
        self.filters.push(ReportFilter {
            key: search_key.to_string(),
            values: allowed_values
                .iter()
                .map(|value| value.as_ref().to_string())
                .collect(),
        });
        Ok(())
    }

    pub fn to_xml(&self) -> Result<String, OasisError> {
        self.document.to_xml()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self
            .source
            .as_ref()
            .map(|path| path.as_str())
            .unwrap_or("<memory>");
        let filters: Vec<String> = self.filters.iter().map(ToString::to_string).collect();
        write!(f, "OASISReport: {source} filtered on [{}]", filters.join(", "))
    }
}

/// Locates each level of the document, stopping at the region when it
/// holds an error section.
pub fn discover(document: &XmlDocument) -> Result<ReportBody, OasisError> {
    let master = document.root_name.clone();
    let root = document
        .root
        .as_element()
        .ok_or_else(|| shape(format!("<{master}> has no child elements")))?;

    let payload = root
        .find_key(|key| key.contains(PAYLOAD_MARKER))
        .ok_or_else(|| missing(PAYLOAD_MARKER, &master))?
        .to_string();
    let payload_element = single(root.get(&payload), &payload)?;

    let region = payload_element
        .find_key(|key| key.contains(REGION_MARKER))
        .ok_or_else(|| missing(REGION_MARKER, &payload))?
        .to_string();
    let region_element = single(payload_element.get(&region), &region)?;

    if let Some(error_key) = region_element.find_key(|key| key.contains(ERROR_MARKER)) {
        return Ok(ReportBody::Error(ServiceError::from_entry(
            error_key,
            region_element.get(error_key),
        )));
    }

    let item = region_element
        .find_key(|key| key.contains(ITEM_MARKER) && local_name(key) != DISCLAIMER_ITEM)
        .ok_or_else(|| missing(ITEM_MARKER, &region))?
        .to_string();
    let items = region_element
        .get(&item)
        .ok_or_else(|| missing(&item, &region))?;
    if items.iter().all(|node| node.as_element().is_none()) {
        return Err(shape(format!("<{item}> has no child elements")));
    }

    // Filtered documents may hold items with no rows left.
    let data = items
        .iter()
        .filter_map(XmlNode::as_element)
        .find_map(|element| element.find_key(|key| key.contains(DATA_MARKER)))
        .ok_or_else(|| missing(DATA_MARKER, &item))?
        .to_string();

    debug!(
        master = %master,
        payload = %payload,
        region = %region,
        item = %item,
        data = %data,
        "report keys discovered"
    );
    Ok(ReportBody::Data(ReportKeys {
        master,
        payload,
        region,
        item,
        data,
    }))
}

/// Rewrites the item entry and each item's data entry as lists. Applying it
/// twice changes nothing. An item without a data entry gets an empty one.
pub fn normalize(document: &mut XmlDocument, keys: &ReportKeys) -> Result<(), OasisError> {
    let region = region_mut(document, keys)?;
    let items = region
        .get_mut(&keys.item)
        .ok_or_else(|| missing(&keys.item, &keys.region))?
        .make_many();

    for (index, item) in items.iter_mut().enumerate() {
        let item = item
            .as_element_mut()
            .ok_or_else(|| shape(format!("<{}> #{index} has no child elements", keys.item)))?;
        match item.get_mut(&keys.data) {
            Some(data) => {
                data.make_many();
            }
            None => item
                .children
                .push((keys.data.clone(), OneOrMany::Many(Vec::new()))),
        }
    }
    Ok(())
}

/// Concatenates every item's data rows, in document order, into a table.
pub fn tabulate(document: &XmlDocument, keys: &ReportKeys) -> Result<ReportTable, OasisError> {
    let region = region(document, keys)?;
    let items = region
        .get(&keys.item)
        .ok_or_else(|| missing(&keys.item, &keys.region))?;

    let mut rows = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let item = item
            .as_element()
            .ok_or_else(|| shape(format!("<{}> #{index} has no child elements", keys.item)))?;
        let Some(data) = item.get(&keys.data) else {
            continue;
        };
        for node in data.iter() {
            rows.push(data_row(node, &keys.data)?);
        }
    }
    Ok(ReportTable::from_rows(rows))
}

fn data_row(node: &XmlNode, data_key: &str) -> Result<DataRow, OasisError> {
    match node {
        XmlNode::Empty => Ok(DataRow::new()),
        XmlNode::Text(_) => Err(shape(format!("<{data_key}> holds text, not fields"))),
        XmlNode::Element(element) => element
            .children
            .iter()
            .map(|(field, value)| match value {
                OneOrMany::Single(node) => node
                    .scalar()
                    .map(|text| (field.clone(), text.to_string()))
                    .ok_or_else(|| shape(format!("<{field}> in <{data_key}> is not a scalar"))),
                OneOrMany::Many(_) => Err(shape(format!("<{field}> repeats in <{data_key}>"))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|fields| fields.into_iter().collect()),
    }
}

fn field_value<'a>(row: &'a XmlNode, key: &str) -> Option<&'a str> {
    row.as_element()?.get(key)?.first()?.scalar()
}

fn region<'a>(document: &'a XmlDocument, keys: &ReportKeys) -> Result<&'a XmlElement, OasisError> {
    let root = document
        .root
        .as_element()
        .ok_or_else(|| shape(format!("<{}> has no child elements", keys.master)))?;
    let payload = single(root.get(&keys.payload), &keys.payload)?;
    single(payload.get(&keys.region), &keys.region)
}

fn region_mut<'a>(
    document: &'a mut XmlDocument,
    keys: &ReportKeys,
) -> Result<&'a mut XmlElement, OasisError> {
    let root = document
        .root
        .as_element_mut()
        .ok_or_else(|| shape(format!("<{}> has no child elements", keys.master)))?;
    let payload = single_mut(root.get_mut(&keys.payload), &keys.payload)?;
    single_mut(payload.get_mut(&keys.region), &keys.region)
}

fn single<'a>(
    entry: Option<&'a OneOrMany<XmlNode>>,
    key: &str,
) -> Result<&'a XmlElement, OasisError> {
    match entry {
        Some(OneOrMany::Single(node)) => node
            .as_element()
            .ok_or_else(|| shape(format!("<{key}> has no child elements"))),
        Some(OneOrMany::Many(_)) => Err(shape(format!("<{key}> occurs more than once"))),
        None => Err(shape(format!("<{key}> not found"))),
    }
}

fn single_mut<'a>(
    entry: Option<&'a mut OneOrMany<XmlNode>>,
    key: &str,
) -> Result<&'a mut XmlElement, OasisError> {
    match entry {
        Some(OneOrMany::Single(node)) => node
            .as_element_mut()
            .ok_or_else(|| shape(format!("<{key}> has no child elements"))),
        Some(OneOrMany::Many(_)) => Err(shape(format!("<{key}> occurs more than once"))),
        None => Err(shape(format!("<{key}> not found"))),
    }
}

fn local_name(key: &str) -> &str {
    key.rsplit_once(':').map(|(_, local)| local).unwrap_or(key)
}

fn missing(marker: &str, parent: &str) -> OasisError {
    shape(format!("no element matching {marker} under <{parent}>"))
}

fn shape(detail: String) -> OasisError {
    OasisError::UnrecognizedShape(detail)
}
