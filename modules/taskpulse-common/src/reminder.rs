//! Reminder timing: the `remind_before` offset and the due-window predicate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Longest accepted offset.
pub const MAX_REMIND_BEFORE_SECS: i64 = 365 * DAY;

/// How long before a task's due time its reminder fires.
///
/// Accepts human durations ("15 minutes", "1 hour", "2 days", "1 week") and
/// compact forms ("30m", "1h", "1d", "1w"). Stored as whole seconds, at most
/// 365 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemindBefore(i64);

impl RemindBefore {
    pub fn from_secs(secs: i64) -> Option<Self> {
        (1..=MAX_REMIND_BEFORE_SECS).contains(&secs).then_some(Self(secs))
    }

    pub fn minutes(n: i64) -> Self {
        Self(n * MINUTE)
    }

    pub fn hours(n: i64) -> Self {
        Self(n * HOUR)
    }

    pub fn days(n: i64) -> Self {
        Self(n * DAY)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::seconds(self.0)
    }
}

impl fmt::Display for RemindBefore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (n, unit) = [(WEEK, "week"), (DAY, "day"), (HOUR, "hour"), (MINUTE, "minute")]
            .into_iter()
            .find(|(size, _)| self.0 % size == 0)
            .map(|(size, unit)| (self.0 / size, unit))
            .unwrap_or((self.0, "second"));
        let plural = if n == 1 { "" } else { "s" };
        write!(f, "{n} {unit}{plural}")
    }
}

impl FromStr for RemindBefore {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in reminder offset: {s:?}"))?;
        let (digits, unit) = trimmed.split_at(split);
        let n: i64 = digits
            .parse()
            .map_err(|_| format!("missing amount in reminder offset: {s:?}"))?;

        let size = match unit.trim() {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => MINUTE,
            "h" | "hr" | "hrs" | "hour" | "hours" => HOUR,
            "d" | "day" | "days" => DAY,
            "w" | "week" | "weeks" => WEEK,
            other => return Err(format!("unknown unit {other:?} in reminder offset: {s:?}")),
        };

        if n == 0 {
            return Err(format!("reminder offset must be positive: {s:?}"));
        }
        n.checked_mul(size)
            .and_then(Self::from_secs)
            .ok_or_else(|| format!("reminder offset exceeds 365 days: {s:?}"))
    }
}

impl TryFrom<String> for RemindBefore {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RemindBefore> for String {
    fn from(value: RemindBefore) -> Self {
        value.to_string()
    }
}

/// The instant a reminder should fire for a task due at `due_at`. Saturates
/// at the earliest representable instant.
pub fn trigger_at(due_at: DateTime<Utc>, remind_before: RemindBefore) -> DateTime<Utc> {
    due_at
        .checked_sub_signed(remind_before.as_duration())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A reminder is due once its trigger time has arrived, but only while the
/// task itself is still in the future. Past-due tasks are never reminded.
pub fn is_due(due_at: DateTime<Utc>, remind_before: RemindBefore, now: DateTime<Utc>) -> bool {
    due_at > now && trigger_at(due_at, remind_before) <= now
}
