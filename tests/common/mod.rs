#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Mutex;

use zip::write::SimpleFileOptions;

use oasis_fetch::error::OasisError;
use oasis_fetch::fetch::ReportTransport;

/// Answers a URL with the body of the first route whose key it contains.
pub struct RoutingTransport {
    routes: Vec<(String, Vec<u8>)>,
    pub calls: Mutex<Vec<String>>,
}

impl RoutingTransport {
    pub fn new(routes: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|(key, body)| (key.to_string(), body))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ReportTransport for RoutingTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>, OasisError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.routes
            .iter()
            .find(|(key, _)| url.contains(key.as_str()))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| OasisError::HttpStatus {
                status: 404,
                message: format!("no route for {url}"),
            })
    }
}

pub fn zip_of(files: &[(&str, String)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// `(data_item, interval_start_gmt, interval_end_gmt, value)` per row, one item.
pub fn report_xml(rows: &[(&str, &str, &str, &str)]) -> String {
    let data: String = rows
        .iter()
        .map(|(item, start, end, value)| {
            format!(
                "<REPORT_DATA><DATA_ITEM>{item}</DATA_ITEM><RESOURCE_NAME>LAPLMG1_7_B2</RESOURCE_NAME>\
                 <INTERVAL_START_GMT>{start}</INTERVAL_START_GMT>\
                 <INTERVAL_END_GMT>{end}</INTERVAL_END_GMT><VALUE>{value}</VALUE></REPORT_DATA>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <OASISReport xmlns=\"http://www.caiso.com/soa/OASISReport_v1.xsd\">\
         <MessageHeader><Source>OASIS</Source></MessageHeader>\
         <MessagePayload><RTO><name>CAISO</name>\
         <REPORT_ITEM><REPORT_HEADER><REPORT>PRC_INTVL_LMP</REPORT></REPORT_HEADER>{data}</REPORT_ITEM>\
         </RTO></MessagePayload></OASISReport>"
    )
}

pub fn error_xml() -> String {
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
     <m:OASISReport xmlns:m=\"http://www.caiso.com/soa/OASISReport_v1.xsd\">\
     <m:MessagePayload><m:RTO><m:name>CAISO</m:name><m:ERROR>\
     <m:ERR_CODE>1000</m:ERR_CODE><m:ERR_DESC>No data returned for the specified selection</m:ERR_DESC>\
     </m:ERROR></m:RTO></m:MessagePayload></m:OASISReport>"
        .to_string()
}
