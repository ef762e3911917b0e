// Data models for tasklist

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest id that survives a round trip through a JSON number read as a double
pub const MAX_ID: u64 = (1 << 53) - 1;

/// Take `counter` as an id, returning it with the counter's next value
///
/// `None` once the counter has passed `MAX_ID`.
pub fn claim_id(counter: u64) -> Option<(u64, u64)> {
    if counter == 0 || counter > MAX_ID {
        return None;
    }
    counter.checked_add(1).map(|next| (counter, next))
}

/// A single to-do item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,
    pub text: String,
    pub completed: bool,
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso8601")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// New active task with both timestamps set to `now`
    pub fn new(id: u64, text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            text: text.into(),
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive text comparison used for duplicate detection
    pub fn same_text(&self, other: &str) -> bool {
        self.text.to_lowercase() == other.to_lowercase()
    }
}

/// Active/completed/total counts over the whole task list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSummary {
    pub active: usize,
    pub completed: usize,
    pub total: usize,
}

impl CounterSummary {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        tasks.into_iter().fold(Self::default(), |mut acc, task| {
            if task.completed {
                acc.completed += 1;
            } else {
                acc.active += 1;
            }
            acc.total += 1;
            acc
        })
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

impl fmt::Display for CounterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total == 0 {
            return write!(f, "No tasks");
        }
        if self.active == 0 {
            return write!(f, "All {} task{} completed!", self.total, plural(self.total));
        }
        write!(f, "{} task{} remaining", self.active, plural(self.active))?;
        if self.completed > 0 {
            write!(f, " ({} completed)", self.completed)?;
        }
        Ok(())
    }
}

/// Source of timestamps for the store
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Format a timestamp as ISO-8601 with milliseconds and a `Z` suffix
pub fn to_iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse any RFC 3339 timestamp into UTC
pub fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Serde adapter for millisecond-precision ISO-8601 timestamps
pub mod iso8601 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_iso8601(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_iso8601(&s).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", s)))
    }
}
