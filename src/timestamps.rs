use std::fmt;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Canonical wire form, `YYYY-MM-DD HH:MM:SS`. Zero-padded so that
/// lexicographic comparison of two canonical strings equals chronological
/// comparison.
const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format of the timestamp column in parsed log rows, minus the leading
/// weekday token: `Jan 02 10:00:00 2023`.
const SOURCE_FORMAT: &str = "%b %d %H:%M:%S %Y";

/// A datetime in canonical form. `Ord` is plain string order, which is the
/// point of the canonical form: comparisons never need to re-parse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Parse a canonical `YYYY-MM-DD HH:MM:SS` string, normalizing any
    /// unpadded fields along the way.
    pub fn parse(value: &str) -> Result<Self> {
        let parsed = NaiveDateTime::parse_from_str(value.trim(), CANONICAL_FORMAT)
            .with_context(|| format!("'{value}' is not a YYYY-MM-DD HH:MM:SS date time"))?;
        Ok(Self(parsed.format(CANONICAL_FORMAT).to_string()))
    }

    /// Parse a row timestamp, `<weekday> <Mon> <DD> <HH:MM:SS> <YYYY>`.
    ///
    /// The weekday token is dropped before parsing: log files in the wild
    /// carry stamps whose weekday contradicts the date, and nothing
    /// downstream reads it. Month names resolve through chrono's fixed
    /// English month table.
    pub fn from_source(value: &str) -> Result<Self> {
        let (_, rest) = value
            .trim()
            .split_once(' ')
            .ok_or_else(|| anyhow!("'{value}' is not a row timestamp"))?;
        let parsed = NaiveDateTime::parse_from_str(rest, SOURCE_FORMAT)
            .with_context(|| format!("'{value}' is not a row timestamp"))?;
        Ok(Self(parsed.format(CANONICAL_FORMAT).to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive datetime bounds of the unfiltered dataset currently selected.
/// Unset bounds mean no dataset has been loaded yet; filter validation
/// skips whichever side is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRange {
    pub min: Option<Timestamp>,
    pub max: Option<Timestamp>,
}

impl FilterRange {
    pub fn new(min: Timestamp, max: Timestamp) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Reduce the timestamp column of an unfiltered row set to its bounds.
///
/// Fallback path for when no metadata endpoint result is at hand. Works on
/// canonicalized stamps so min/max is a plain string comparison.
pub fn derive_range_from_rows(rows: &[Vec<String>], timestamp_column: usize) -> Result<FilterRange> {
    let mut min: Option<Timestamp> = None;
    let mut max: Option<Timestamp> = None;

    for (idx, row) in rows.iter().enumerate() {
        let raw = row
            .get(timestamp_column)
            .ok_or_else(|| anyhow!("row {idx} has no column {timestamp_column}"))?;
        let stamp = Timestamp::from_source(raw)
            .with_context(|| format!("bad timestamp in row {idx}"))?;

        if min.as_ref().is_none_or(|m| stamp < *m) {
            min = Some(stamp.clone());
        }
        if max.as_ref().is_none_or(|m| stamp > *m) {
            max = Some(stamp);
        }
    }

    match (min, max) {
        (Some(min), Some(max)) => Ok(FilterRange::new(min, max)),
        _ => bail!("cannot derive date time bounds from an empty table"),
    }
}
