use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;

use crate::error::OasisError;
use crate::time::parse_instant;

/// One flat record from a report; field order follows the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRow {
    fields: Vec<(String, String)>,
}

impl DataRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Replaces an existing value or appends a new field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DataRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = DataRow::new();
        for (key, value) in iter {
            row.insert(key, value);
        }
        row
    }
}

/// Rows plus the union of their columns, in first-seen order. Rows missing a
/// column render that cell empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportTable {
    columns: Vec<String>,
    rows: Vec<DataRow>,
}

impl ReportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<DataRow>) -> Self {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if seen.insert(key.to_string()) {
                    columns.push(key.to_string());
                }
            }
        }
        Self { columns, rows }
    }

    /// Concatenates fragments in order.
    pub fn concat(fragments: impl IntoIterator<Item = ReportTable>) -> Self {
        let rows = fragments
            .into_iter()
            .flat_map(|fragment| fragment.rows)
            .collect();
        Self::from_rows(rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<DataRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|name| name == column)
    }

    /// Keeps rows whose `start_column` is at or after `start` and whose
    /// `end_column` is at or before `end`. Rows missing either value are
    /// dropped; a value that is not a timestamp is an error.
    pub fn retain_window(
        &mut self,
        start_column: &str,
        end_column: &str,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        tz: Tz,
    ) -> Result<(), OasisError> {
        if self.rows.is_empty() {
            return Ok(());
        }
        for column in [start_column, end_column] {
            if !self.has_column(column) {
                return Err(OasisError::MissingColumn(column.to_string()));
            }
        }

        let mut keep = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let row_start = cell_instant(row, start_column, tz)?;
            let row_end = cell_instant(row, end_column, tz)?;
            keep.push(matches!(
                (row_start, row_end),
                (Some(row_start), Some(row_end)) if row_start >= start && row_end <= end
            ));
        }
        let rows = std::mem::take(&mut self.rows);
        let kept = rows
            .into_iter()
            .zip(keep)
            .filter_map(|(row, keep)| keep.then_some(row))
            .collect();
        *self = Self::from_rows(kept);
        Ok(())
    }

    /// Latest instant found in `column`, if any row carries one.
    pub fn max_instant(&self, column: &str, tz: Tz) -> Option<DateTime<FixedOffset>> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter_map(|value| parse_instant(value, tz))
            .max()
    }

    /// Stable sort by `keys`, earlier keys first. Each column is compared as
    /// timestamps, numbers or text, whichever fits every value in it; missing
    /// cells sort last.
    pub fn sort_by_columns(&mut self, keys: &[String], tz: Tz) -> Result<(), OasisError> {
        if self.rows.is_empty() || keys.is_empty() {
            return Ok(());
        }
        let mut sort_columns = Vec::with_capacity(keys.len());
        for key in keys {
            if !self.has_column(key) {
                return Err(OasisError::MissingColumn(key.clone()));
            }
            sort_columns.push(SortColumn::classify(&self.rows, key, tz));
        }

        let mut keyed: Vec<(Vec<SortValue>, DataRow)> = self
            .rows
            .drain(..)
            .map(|row| {
                let values = sort_columns
                    .iter()
                    .zip(keys)
                    .map(|(kind, key)| kind.value(row.get(key), tz))
                    .collect();
                (values, row)
            })
            .collect();
        keyed.sort_by(|(left, _), (right, _)| left.cmp(right));
        self.rows = keyed.into_iter().map(|(_, row)| row).collect();
        Ok(())
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), OasisError> {
        let mut csv = csv::Writer::from_writer(writer);
        if !self.columns.is_empty() {
            csv.write_record(&self.columns)
                .map_err(|err| OasisError::TableWrite(err.to_string()))?;
        }
        for row in &self.rows {
            csv.write_record(
                self.columns
                    .iter()
                    .map(|column| row.get(column).unwrap_or("")),
            )
            .map_err(|err| OasisError::TableWrite(err.to_string()))?;
        }
        csv.flush()
            .map_err(|err| OasisError::TableWrite(err.to_string()))
    }

    pub fn write_csv_file(&self, path: &Path) -> Result<(), OasisError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| OasisError::Filesystem(err.to_string()))?;
        }
        let file =
            fs::File::create(path).map_err(|err| OasisError::Filesystem(err.to_string()))?;
        self.write_csv(file)
    }
}

fn cell_instant(
    row: &DataRow,
    column: &str,
    tz: Tz,
) -> Result<Option<DateTime<FixedOffset>>, OasisError> {
    match row.get(column) {
        None | Some("") => Ok(None),
        Some(value) => parse_instant(value, tz)
            .map(Some)
            .ok_or_else(|| OasisError::InvalidTimestamp(format!("{column}={value}"))),
    }
}

#[derive(Debug, Clone, Copy)]
enum SortColumn {
    Instant,
    Number,
    Text,
}

impl SortColumn {
    fn classify(rows: &[DataRow], key: &str, tz: Tz) -> Self {
        let mut values = rows
            .iter()
            .filter_map(|row| row.get(key))
            .filter(|value| !value.is_empty())
            .peekable();
        if values.peek().is_none() {
            return SortColumn::Text;
        }
        let values: Vec<&str> = values.collect();
        if values.iter().all(|value| parse_instant(value, tz).is_some()) {
            SortColumn::Instant
        } else if values.iter().all(|value| value.trim().parse::<f64>().is_ok()) {
            SortColumn::Number
        } else {
            SortColumn::Text
        }
    }

    fn value(&self, cell: Option<&str>, tz: Tz) -> SortValue {
        let Some(cell) = cell.filter(|value| !value.is_empty()) else {
            return SortValue::Missing;
        };
        match self {
            SortColumn::Instant => parse_instant(cell, tz)
                .map(SortValue::Instant)
                .unwrap_or(SortValue::Missing),
            SortColumn::Number => cell
                .trim()
                .parse::<f64>()
                .map(SortValue::Number)
                .unwrap_or(SortValue::Missing),
            SortColumn::Text => SortValue::Text(cell.to_string()),
        }
    }
}

/// Within one column every present value has the same variant.
#[derive(Debug, Clone)]
enum SortValue {
    Instant(DateTime<FixedOffset>),
    Number(f64),
    Text(String),
    Missing,
}

impl SortValue {
    fn rank(&self) -> u8 {
        match self {
            SortValue::Instant(_) => 0,
            SortValue::Number(_) => 1,
            SortValue::Text(_) => 2,
            SortValue::Missing => 3,
        }
    }
}

impl PartialEq for SortValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortValue {}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortValue::Instant(left), SortValue::Instant(right)) => left.cmp(right),
            (SortValue::Number(left), SortValue::Number(right)) => left.total_cmp(right),
            (SortValue::Text(left), SortValue::Text(right)) => left.cmp(right),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}
