pub mod app;
pub mod catalog;
pub mod chunked;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod generate;
pub mod output;
pub mod report;
pub mod sweep;
pub mod table;
pub mod time;
pub mod url;
pub mod xml;
