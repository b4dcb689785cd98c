use std::fmt;
use std::str::FromStr;

use chrono::offset::LocalResult;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::OasisError;

/// OASIS only honors timestamps expressed in Pacific time.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Los_Angeles;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// A civil timestamp as supplied by a caller: either without zone
/// information, to be read in the reference zone, or with a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CivilTime {
    Naive(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
}

impl CivilTime {
    /// Resolves the timestamp to an instant in `tz`. Naive values are read
    /// as wall-clock time in `tz`; zoned values are converted.
    pub fn in_zone(&self, tz: Tz) -> Result<DateTime<Tz>, OasisError> {
        match self {
            CivilTime::Naive(naive) => localize(naive, tz),
            CivilTime::Zoned(value) => Ok(value.with_timezone(&tz)),
        }
    }
}

impl From<NaiveDateTime> for CivilTime {
    fn from(value: NaiveDateTime) -> Self {
        CivilTime::Naive(value)
    }
}

impl<Z: TimeZone> From<DateTime<Z>> for CivilTime {
    fn from(value: DateTime<Z>) -> Self {
        CivilTime::Zoned(value.fixed_offset())
    }
}

impl fmt::Display for CivilTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CivilTime::Naive(value) => write!(f, "{}", value.format("%Y-%m-%dT%H:%M:%S")),
            CivilTime::Zoned(value) => write!(f, "{}", value.to_rfc3339()),
        }
    }
}

impl FromStr for CivilTime {
    type Err = OasisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Ok(zoned) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(CivilTime::Zoned(zoned));
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(CivilTime::Naive(naive));
            }
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(CivilTime::Naive)
            .ok_or_else(|| OasisError::InvalidTimestamp(value.to_string()))
    }
}

/// Reads a wall-clock time in `tz`. An ambiguous time (the repeated hour when
/// daylight saving ends) resolves to standard time; a skipped time is an error.
pub fn localize(naive: &NaiveDateTime, tz: Tz) -> Result<DateTime<Tz>, OasisError> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(value) => Ok(value),
        LocalResult::Ambiguous(_, standard) => Ok(standard),
        LocalResult::None => Err(OasisError::InvalidTimestamp(format!(
            "{naive} does not exist in {tz}"
        ))),
    }
}

/// Renders `value` as `YYYYMMDDTHH:MM±hhmm` in `tz`, the only timestamp
/// layout the service accepts.
pub fn format_oasis(value: &CivilTime, tz: Tz) -> Result<String, OasisError> {
    Ok(value.in_zone(tz)?.format("%Y%m%dT%H:%M%z").to_string())
}

/// Parses a timestamp cell from a report table. Offsets in the cell win;
/// naive cells are read in `tz`.
pub fn parse_instant(value: &str, tz: Tz) -> Option<DateTime<FixedOffset>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%:z", "%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%:z"] {
        if let Ok(parsed) = DateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    trimmed
        .parse::<CivilTime>()
        .ok()
        .and_then(|civil| civil.in_zone(tz).ok())
        .map(|value| value.fixed_offset())
}

/// Length of one chunk in a ranged fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkSize(TimeDelta);

impl ChunkSize {
    /// Accepts positive whole-minute lengths, the granularity the text form carries.
    pub fn from_delta(delta: TimeDelta) -> Result<Self, OasisError> {
        if delta <= TimeDelta::zero() {
            return Err(OasisError::InvalidChunkSize(format!(
                "{}s is not positive",
                delta.num_seconds()
            )));
        }
        if delta.num_seconds() % 60 != 0 || delta.subsec_nanos() != 0 {
            return Err(OasisError::InvalidChunkSize(format!(
                "{}s is not a whole number of minutes",
                delta.num_seconds()
            )));
        }
        Ok(Self(delta))
    }

    pub fn hours(hours: i64) -> Result<Self, OasisError> {
        TimeDelta::try_hours(hours)
            .ok_or_else(|| OasisError::InvalidChunkSize(format!("{hours}h")))
            .and_then(Self::from_delta)
    }

    pub fn days(days: i64) -> Result<Self, OasisError> {
        TimeDelta::try_days(days)
            .ok_or_else(|| OasisError::InvalidChunkSize(format!("{days}d")))
            .and_then(Self::from_delta)
    }

    pub fn as_delta(&self) -> TimeDelta {
        self.0
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self(TimeDelta::days(1))
    }
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = self.0.num_minutes();
        if minutes % (24 * 60) == 0 {
            write!(f, "{}d", minutes / (24 * 60))
        } else if minutes % 60 == 0 {
            write!(f, "{}h", minutes / 60)
        } else {
            write!(f, "{minutes}m")
        }
    }
}

impl FromStr for ChunkSize {
    type Err = OasisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let split = trimmed
            .find(|ch: char| !ch.is_ascii_digit())
            .ok_or_else(|| OasisError::InvalidChunkSize(value.to_string()))?;
        let (amount, unit) = trimmed.split_at(split);
        let amount: i64 = amount
            .parse()
            .map_err(|_| OasisError::InvalidChunkSize(value.to_string()))?;
        let delta = match unit {
            "m" | "min" => TimeDelta::try_minutes(amount),
            "h" => TimeDelta::try_hours(amount),
            "d" => TimeDelta::try_days(amount),
            _ => None,
        }
        .ok_or_else(|| OasisError::InvalidChunkSize(value.to_string()))?;
        Self::from_delta(delta).map_err(|_| OasisError::InvalidChunkSize(value.to_string()))
    }
}

impl TryFrom<String> for ChunkSize {
    type Error = OasisError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChunkSize> for String {
    fn from(value: ChunkSize) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    #[test]
    fn naive_time_is_read_in_reference_zone() {
        let value: CivilTime = "2013-09-19T07:00".parse().unwrap();
        assert_eq!(
            format_oasis(&value, DEFAULT_TIMEZONE).unwrap(),
            "20130919T07:00-0700"
        );
    }

    #[test]
    fn zoned_time_is_converted() {
        let value: CivilTime = "2018-01-01T08:00:00Z".parse().unwrap();
        assert_eq!(
            format_oasis(&value, DEFAULT_TIMEZONE).unwrap(),
            "20180101T00:00-0800"
        );
    }

    #[test]
    fn date_only_means_midnight() {
        let value: CivilTime = "2018-01-03".parse().unwrap();
        assert_eq!(value.to_string(), "2018-01-03T00:00:00");
    }

    #[test]
    fn skipped_hour_is_rejected() {
        let value: CivilTime = "2018-03-11T02:30".parse().unwrap();
        let err = value.in_zone(DEFAULT_TIMEZONE).unwrap_err();
        assert_matches!(err, OasisError::InvalidTimestamp(_));
    }

    #[test]
    fn repeated_hour_resolves_to_standard_time() {
        let value: CivilTime = "2018-11-04T01:30".parse().unwrap();
        let resolved = value.in_zone(DEFAULT_TIMEZONE).unwrap();
        assert_eq!(resolved.format("%z").to_string(), "-0800");
    }

    #[test]
    fn parses_oasis_gmt_cells() {
        let parsed = parse_instant("2018-01-01T08:05:00-00:00", DEFAULT_TIMEZONE).unwrap();
        assert_eq!(
            parsed.with_timezone(&Utc).to_rfc3339(),
            "2018-01-01T08:05:00+00:00"
        );
        assert!(parse_instant("", DEFAULT_TIMEZONE).is_none());
        assert!(parse_instant("not a time", DEFAULT_TIMEZONE).is_none());
    }

    #[test]
    fn chunk_size_round_trips_through_text() {
        let size: ChunkSize = "4d".parse().unwrap();
        assert_eq!(size.as_delta(), TimeDelta::days(4));
        assert_eq!(size.to_string(), "4d");
        assert_eq!("90m".parse::<ChunkSize>().unwrap().to_string(), "90m");
        assert_eq!("1h".parse::<ChunkSize>().unwrap(), ChunkSize::hours(1).unwrap());
    }

    #[test]
    fn chunk_size_rejects_garbage() {
        assert_matches!("0h".parse::<ChunkSize>(), Err(OasisError::InvalidChunkSize(_)));
        assert_matches!("3w".parse::<ChunkSize>(), Err(OasisError::InvalidChunkSize(_)));
        assert_matches!("h".parse::<ChunkSize>(), Err(OasisError::InvalidChunkSize(_)));
    }

    #[test]
    fn chunk_size_needs_whole_positive_minutes() {
        assert_matches!(
            ChunkSize::from_delta(TimeDelta::seconds(30)),
            Err(OasisError::InvalidChunkSize(_))
        );
        assert_matches!(
            ChunkSize::from_delta(TimeDelta::seconds(90)),
            Err(OasisError::InvalidChunkSize(_))
        );
        assert_matches!(ChunkSize::hours(0), Err(OasisError::InvalidChunkSize(_)));
        assert_matches!(ChunkSize::days(-1), Err(OasisError::InvalidChunkSize(_)));

        let size = ChunkSize::from_delta(TimeDelta::minutes(150)).unwrap();
        assert_eq!(size.to_string().parse::<ChunkSize>().unwrap(), size);
        assert_eq!(ChunkSize::default(), ChunkSize::days(1).unwrap());
    }
}
