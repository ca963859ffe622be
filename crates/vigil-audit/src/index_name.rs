//! Rollover index naming.
//!
//! Audit events are partitioned into time-bucketed indices. The bucket an
//! event belongs to depends only on its timestamp (in UTC) and the rollover
//! period, so the mapping is a pure function: [`resolve`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// Default prefix of audit index names.
pub const INDEX_NAME_PREFIX: &str = ".security_audit_log";

/// Document type recorded in index metadata.
pub const DOC_TYPE: &str = "doc";

/// Time bucket size of an audit index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rollover {
    /// `prefix-YYYY.MM.dd.HH`
    Hourly,
    /// `prefix-YYYY.MM.dd`
    #[default]
    Daily,
    /// `prefix-{iso week year}.{iso week}`
    Weekly,
    /// `prefix-YYYY.MM`
    Monthly,
}

impl Rollover {
    /// Formats the bucket suffix for `timestamp`.
    #[must_use]
    pub fn suffix(self, timestamp: DateTime<Utc>) -> String {
        match self {
            Self::Hourly => format!(
                "{:04}.{:02}.{:02}.{:02}",
                timestamp.year(),
                timestamp.month(),
                timestamp.day(),
                timestamp.hour()
            ),
            Self::Daily => format!(
                "{:04}.{:02}.{:02}",
                timestamp.year(),
                timestamp.month(),
                timestamp.day()
            ),
            Self::Weekly => {
                let week = timestamp.iso_week();
                format!("{:04}.{}", week.year(), week.week())
            }
            Self::Monthly => format!("{:04}.{:02}", timestamp.year(), timestamp.month()),
        }
    }

    /// Returns a step that is never longer than one bucket.
    fn step(self) -> Duration {
        match self {
            Self::Hourly => Duration::hours(1),
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::weeks(1),
            // months vary in length; a day step never skips one
            Self::Monthly => Duration::days(1),
        }
    }
}

impl fmt::Display for Rollover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        })
    }
}

impl FromStr for Rollover {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(AuditError::settings(format!(
                "rollover must be one of hourly, daily, weekly, monthly (got {other})"
            ))),
        }
    }
}

/// Resolves the index that holds events recorded at `timestamp`.
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use vigil_audit::index_name::{resolve, Rollover, INDEX_NAME_PREFIX};
///
/// let ts = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap();
/// assert_eq!(
///     resolve(INDEX_NAME_PREFIX, ts, Rollover::Daily),
///     ".security_audit_log-2024.03.01"
/// );
/// ```
#[must_use]
pub fn resolve(prefix: &str, timestamp: DateTime<Utc>, rollover: Rollover) -> String {
    format!("{prefix}-{}", rollover.suffix(timestamp))
}

/// Resolves every index covering the inclusive time range `[from, to]`.
///
/// Names are returned in chronological order without duplicates. An empty
/// vec is returned when `to` is before `from`.
#[must_use]
pub fn resolve_range(
    prefix: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    rollover: Rollover,
) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    if to < from {
        return names;
    }

    let mut cursor = from;
    while cursor <= to {
        let name = resolve(prefix, cursor, rollover);
        if names.last() != Some(&name) {
            names.push(name);
        }
        cursor += rollover.step();
    }
    // the step may jump past `to` while still inside its bucket
    let last = resolve(prefix, to, rollover);
    if names.last() != Some(&last) {
        names.push(last);
    }
    names
}
