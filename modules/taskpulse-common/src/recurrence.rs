//! Next-occurrence computation for recurring tasks.
//!
//! Pure functions only: no clock, no I/O. Identical inputs always produce
//! identical outputs, so every calendar edge case is unit-testable.
//!
//! Weekday indices are Monday-first: 0 = Monday .. 6 = Sunday.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on `interval`. Keeps date arithmetic far from chrono's limits.
pub const MAX_INTERVAL: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => f.write_str("daily"),
            Self::Weekly => f.write_str("weekly"),
            Self::Monthly => f.write_str("monthly"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecurrenceError {
    #[error("interval must be between 1 and {MAX_INTERVAL}, got {0}")]
    InvalidInterval(u32),

    #[error("weekly recurrence requires at least one weekday")]
    EmptyWeekdays,

    #[error("weekday index {0} is out of range (0=Monday..6=Sunday)")]
    InvalidWeekday(u8),

    #[error("monthly recurrence requires day_of_month")]
    MissingDayOfMonth,

    #[error("day_of_month must be between 1 and 31, got {0}")]
    InvalidDayOfMonth(u8),

    #[error("{field} is not allowed for {pattern} recurrence")]
    UnexpectedField {
        field: &'static str,
        pattern: RecurrencePattern,
    },

    #[error("next occurrence falls outside the supported calendar range")]
    OutOfRange,
}

/// Recurrence settings in their stored/wire shape. Pattern-specific fields
/// are optional here; [`RecurrenceConfig::validate`] enforces which are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceConfig {
    pub pattern: RecurrencePattern,
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
}

impl RecurrenceConfig {
    pub fn daily(interval: u32) -> Self {
        Self {
            pattern: RecurrencePattern::Daily,
            interval,
            days_of_week: None,
            day_of_month: None,
        }
    }

    pub fn weekly(interval: u32, days_of_week: impl IntoIterator<Item = u8>) -> Self {
        Self {
            pattern: RecurrencePattern::Weekly,
            interval,
            days_of_week: Some(days_of_week.into_iter().collect()),
            day_of_month: None,
        }
    }

    pub fn monthly(interval: u32, day_of_month: u8) -> Self {
        Self {
            pattern: RecurrencePattern::Monthly,
            interval,
            days_of_week: None,
            day_of_month: Some(day_of_month),
        }
    }

    /// Check the pattern-specific invariants and produce a rule the
    /// calculator can use.
    pub fn validate(&self) -> Result<RecurrenceRule, RecurrenceError> {
        if self.interval == 0 || self.interval > MAX_INTERVAL {
            return Err(RecurrenceError::InvalidInterval(self.interval));
        }

        match self.pattern {
            RecurrencePattern::Daily => {
                self.reject_days_of_week()?;
                self.reject_day_of_month()?;
                Ok(RecurrenceRule::Daily {
                    interval: self.interval,
                })
            }
            RecurrencePattern::Weekly => {
                self.reject_day_of_month()?;
                let days = self.days_of_week.as_deref().unwrap_or_default();
                Ok(RecurrenceRule::Weekly {
                    interval: self.interval,
                    days: weekday_set(days)?,
                })
            }
            RecurrencePattern::Monthly => {
                self.reject_days_of_week()?;
                let day = self.day_of_month.ok_or(RecurrenceError::MissingDayOfMonth)?;
                if !(1..=31).contains(&day) {
                    return Err(RecurrenceError::InvalidDayOfMonth(day));
                }
                Ok(RecurrenceRule::Monthly {
                    interval: self.interval,
                    day_of_month: day,
                })
            }
        }
    }

    fn reject_days_of_week(&self) -> Result<(), RecurrenceError> {
        match &self.days_of_week {
            Some(days) if !days.is_empty() => Err(RecurrenceError::UnexpectedField {
                field: "days_of_week",
                pattern: self.pattern,
            }),
            _ => Ok(()),
        }
    }

    fn reject_day_of_month(&self) -> Result<(), RecurrenceError> {
        match self.day_of_month {
            Some(_) => Err(RecurrenceError::UnexpectedField {
                field: "day_of_month",
                pattern: self.pattern,
            }),
            None => Ok(()),
        }
    }
}

/// A validated recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceRule {
    Daily { interval: u32 },
    Weekly { interval: u32, days: BTreeSet<u8> },
    Monthly { interval: u32, day_of_month: u8 },
}

impl RecurrenceRule {
    pub fn pattern(&self) -> RecurrencePattern {
        match self {
            Self::Daily { .. } => RecurrencePattern::Daily,
            Self::Weekly { .. } => RecurrencePattern::Weekly,
            Self::Monthly { .. } => RecurrencePattern::Monthly,
        }
    }

    pub fn interval(&self) -> u32 {
        match self {
            Self::Daily { interval }
            | Self::Weekly { interval, .. }
            | Self::Monthly { interval, .. } => *interval,
        }
    }

    pub fn to_config(&self) -> RecurrenceConfig {
        match self {
            Self::Daily { interval } => RecurrenceConfig::daily(*interval),
            Self::Weekly { interval, days } => RecurrenceConfig::weekly(*interval, days.iter().copied()),
            Self::Monthly {
                interval,
                day_of_month,
            } => RecurrenceConfig::monthly(*interval, *day_of_month),
        }
    }
}

impl TryFrom<&RecurrenceConfig> for RecurrenceRule {
    type Error = RecurrenceError;

    fn try_from(config: &RecurrenceConfig) -> Result<Self, Self::Error> {
        config.validate()
    }
}

fn weekday_set(days: &[u8]) -> Result<BTreeSet<u8>, RecurrenceError> {
    if days.is_empty() {
        return Err(RecurrenceError::EmptyWeekdays);
    }
    days.iter()
        .map(|&d| {
            if d <= 6 {
                Ok(d)
            } else {
                Err(RecurrenceError::InvalidWeekday(d))
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Next due timestamp after a completion at `completed_at`.
/// Time-of-day is always carried over from `completed_at`.
pub fn compute_next(
    completed_at: DateTime<Utc>,
    rule: &RecurrenceRule,
) -> Result<DateTime<Utc>, RecurrenceError> {
    match rule {
        RecurrenceRule::Daily { interval } => shift_days(completed_at, i64::from(*interval)),
        RecurrenceRule::Weekly { interval, days } => next_weekly(completed_at, *interval, days),
        RecurrenceRule::Monthly {
            interval,
            day_of_month,
        } => next_monthly(completed_at, *interval, *day_of_month),
    }
}

/// Flat-argument form of [`compute_next`] for callers holding raw fields.
/// Validates before computing.
pub fn next_occurrence(
    completed_at: DateTime<Utc>,
    pattern: RecurrencePattern,
    interval: u32,
    days_of_week: Option<&[u8]>,
    day_of_month: Option<u8>,
) -> Result<DateTime<Utc>, RecurrenceError> {
    let config = RecurrenceConfig {
        pattern,
        interval,
        days_of_week: days_of_week.map(<[u8]>::to_vec),
        day_of_month,
    };
    compute_next(completed_at, &config.validate()?)
}

fn next_weekly(
    completed_at: DateTime<Utc>,
    interval: u32,
    days: &BTreeSet<u8>,
) -> Result<DateTime<Utc>, RecurrenceError> {
    let first = *days.iter().next().ok_or(RecurrenceError::EmptyWeekdays)?;
    let current = completed_at.weekday().num_days_from_monday() as u8;

    // Strictly later in the same week; never the completion day itself.
    if let Some(&day) = days.range(current + 1..).next() {
        return shift_days(completed_at, i64::from(day - current));
    }

    // Monday of this week + `interval` weeks, then the first configured day.
    let offset = 7 * i64::from(interval) - i64::from(current) + i64::from(first);
    shift_days(completed_at, offset)
}

fn next_monthly(
    completed_at: DateTime<Utc>,
    interval: u32,
    day_of_month: u8,
) -> Result<DateTime<Utc>, RecurrenceError> {
    // The second pass only matters if the first candidate is not strictly
    // after the completion.
    for extra in 0..2 {
        let candidate = with_month_offset(completed_at, interval + extra, day_of_month)?;
        if candidate > completed_at {
            return Ok(candidate);
        }
    }
    Err(RecurrenceError::OutOfRange)
}

fn with_month_offset(
    from: DateTime<Utc>,
    months: u32,
    day_of_month: u8,
) -> Result<DateTime<Utc>, RecurrenceError> {
    let total = i64::from(from.year()) * 12 + i64::from(from.month0()) + i64::from(months);
    let year = i32::try_from(total.div_euclid(12)).map_err(|_| RecurrenceError::OutOfRange)?;
    let month = (total.rem_euclid(12) + 1) as u32;

    let last_day = days_in_month(year, month).ok_or(RecurrenceError::OutOfRange)?;
    let day = u32::from(day_of_month).min(last_day);

    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(RecurrenceError::OutOfRange)?;
    Ok(date.and_time(from.time()).and_utc())
}

fn shift_days(from: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, RecurrenceError> {
    from.checked_add_signed(Duration::days(days))
        .ok_or(RecurrenceError::OutOfRange)
}

/// Number of days in `month` (1-12) of `year`.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year.checked_add(1)?, 1)
    } else {
        (year, month + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some(first_of_next.pred_opt()?.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn next(completed_at: DateTime<Utc>, config: RecurrenceConfig) -> DateTime<Utc> {
        compute_next(completed_at, &config.validate().unwrap()).unwrap()
    }

    // --- Daily ---

    #[test]
    fn daily_adds_interval_days_keeping_time() {
        let completed = utc(2026, 1, 4, 15, 0);
        assert_eq!(next(completed, RecurrenceConfig::daily(1)), utc(2026, 1, 5, 15, 0));
        assert_eq!(next(completed, RecurrenceConfig::daily(3)), utc(2026, 1, 7, 15, 0));
    }

    #[test]
    fn daily_crosses_year_boundary() {
        let completed = utc(2026, 12, 31, 23, 30);
        assert_eq!(next(completed, RecurrenceConfig::daily(1)), utc(2027, 1, 1, 23, 30));
    }

    // --- Weekly ---

    #[test]
    fn weekly_sunday_rolls_to_next_monday() {
        // 2026-01-04 is a Sunday.
        let completed = utc(2026, 1, 4, 15, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::weekly(1, [0, 3])),
            utc(2026, 1, 5, 15, 0)
        );
    }

    #[test]
    fn weekly_picks_next_day_in_same_week() {
        // 2026-01-07 is a Wednesday; Mon/Wed/Fri -> Friday.
        let completed = utc(2026, 1, 7, 15, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::weekly(1, [0, 2, 4])),
            utc(2026, 1, 9, 15, 0)
        );
    }

    #[test]
    fn weekly_never_reselects_completion_day() {
        // Monday with only Monday configured -> the following Monday.
        let completed = utc(2026, 1, 5, 9, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::weekly(1, [0])),
            utc(2026, 1, 12, 9, 0)
        );
    }

    #[test]
    fn weekly_interval_skips_whole_weeks_after_exhausting_current_week() {
        // Friday 2026-01-09, Mon/Wed every 2 weeks -> Monday 2026-01-19.
        let completed = utc(2026, 1, 9, 8, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::weekly(2, [0, 2])),
            utc(2026, 1, 19, 8, 0)
        );
    }

    #[test]
    fn weekly_interval_does_not_apply_within_current_week() {
        // Monday with Mon/Thu every 3 weeks -> Thursday of the same week.
        let completed = utc(2026, 1, 5, 8, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::weekly(3, [0, 3])),
            utc(2026, 1, 8, 8, 0)
        );
    }

    #[test]
    fn weekly_unsorted_duplicate_days_are_normalised() {
        let completed = utc(2026, 1, 4, 15, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::weekly(1, [3, 0, 3])),
            utc(2026, 1, 5, 15, 0)
        );
    }

    // --- Monthly ---

    #[test]
    fn monthly_clamps_to_last_day_of_short_month() {
        let completed = utc(2026, 1, 31, 15, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::monthly(1, 31)),
            utc(2026, 2, 28, 15, 0)
        );
    }

    #[test]
    fn monthly_clamps_to_leap_day() {
        let completed = utc(2028, 1, 30, 7, 45);
        assert_eq!(
            next(completed, RecurrenceConfig::monthly(1, 30)),
            utc(2028, 2, 29, 7, 45)
        );
    }

    #[test]
    fn monthly_clamps_to_thirty_day_month() {
        let completed = utc(2026, 3, 31, 12, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::monthly(1, 31)),
            utc(2026, 4, 30, 12, 0)
        );
    }

    #[test]
    fn monthly_sets_configured_day_in_target_month() {
        let completed = utc(2026, 1, 20, 10, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::monthly(1, 15)),
            utc(2026, 2, 15, 10, 0)
        );
    }

    #[test]
    fn monthly_interval_crosses_year() {
        let completed = utc(2026, 11, 10, 6, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::monthly(3, 31)),
            utc(2027, 2, 28, 6, 0)
        );
    }

    #[test]
    fn monthly_december_rolls_into_january() {
        let completed = utc(2026, 12, 15, 6, 0);
        assert_eq!(
            next(completed, RecurrenceConfig::monthly(1, 31)),
            utc(2027, 1, 31, 6, 0)
        );
    }

    #[test]
    fn calculator_is_deterministic() {
        let completed = utc(2026, 5, 17, 13, 13);
        let rule = RecurrenceConfig::weekly(2, [1, 5]).validate().unwrap();
        let a = compute_next(completed, &rule).unwrap();
        let b = compute_next(completed, &rule).unwrap();
        assert_eq!(a, b);
    }

    // --- Validation ---

    #[test]
    fn weekly_requires_weekdays() {
        let config = RecurrenceConfig::weekly(1, []);
        assert_eq!(config.validate(), Err(RecurrenceError::EmptyWeekdays));

        let missing = RecurrenceConfig {
            days_of_week: None,
            ..RecurrenceConfig::weekly(1, [0])
        };
        assert_eq!(missing.validate(), Err(RecurrenceError::EmptyWeekdays));
    }

    #[test]
    fn weekly_rejects_out_of_range_weekday() {
        let config = RecurrenceConfig::weekly(1, [0, 7]);
        assert_eq!(config.validate(), Err(RecurrenceError::InvalidWeekday(7)));
    }

    #[test]
    fn monthly_requires_day_in_range() {
        let mut config = RecurrenceConfig::monthly(1, 0);
        assert_eq!(config.validate(), Err(RecurrenceError::InvalidDayOfMonth(0)));
        config.day_of_month = Some(32);
        assert_eq!(config.validate(), Err(RecurrenceError::InvalidDayOfMonth(32)));
        config.day_of_month = None;
        assert_eq!(config.validate(), Err(RecurrenceError::MissingDayOfMonth));
    }

    #[test]
    fn pattern_fields_are_mutually_exclusive() {
        let mut config = RecurrenceConfig::daily(1);
        config.day_of_month = Some(3);
        assert_eq!(
            config.validate(),
            Err(RecurrenceError::UnexpectedField {
                field: "day_of_month",
                pattern: RecurrencePattern::Daily,
            })
        );

        let mut config = RecurrenceConfig::monthly(1, 3);
        config.days_of_week = Some(vec![1]);
        assert!(matches!(
            config.validate(),
            Err(RecurrenceError::UnexpectedField { field: "days_of_week", .. })
        ));
    }

    #[test]
    fn interval_must_be_positive_and_bounded() {
        assert_eq!(
            RecurrenceConfig::daily(0).validate(),
            Err(RecurrenceError::InvalidInterval(0))
        );
        assert_eq!(
            RecurrenceConfig::daily(MAX_INTERVAL + 1).validate(),
            Err(RecurrenceError::InvalidInterval(MAX_INTERVAL + 1))
        );
    }

    #[test]
    fn calculator_rejects_empty_weekday_set() {
        let rule = RecurrenceRule::Weekly {
            interval: 1,
            days: BTreeSet::new(),
        };
        assert_eq!(
            compute_next(utc(2026, 1, 4, 15, 0), &rule),
            Err(RecurrenceError::EmptyWeekdays)
        );
    }

    #[test]
    fn flat_form_validates_then_computes() {
        let completed = utc(2026, 1, 4, 15, 0);
        let next = next_occurrence(
            completed,
            RecurrencePattern::Weekly,
            1,
            Some(&[0, 3]),
            None,
        )
        .unwrap();
        assert_eq!(next, utc(2026, 1, 5, 15, 0));

        let err = next_occurrence(completed, RecurrencePattern::Weekly, 1, Some(&[]), None);
        assert_eq!(err, Err(RecurrenceError::EmptyWeekdays));
    }

    #[test]
    fn rule_round_trips_to_config() {
        let config = RecurrenceConfig::weekly(2, [4, 0]);
        let rule = config.validate().unwrap();
        assert_eq!(rule.pattern(), RecurrencePattern::Weekly);
        assert_eq!(rule.interval(), 2);
        assert_eq!(rule.to_config().days_of_week, Some(vec![0, 4]));
    }

    #[test]
    fn days_in_month_handles_leap_years() {
        assert_eq!(days_in_month(2026, 2), Some(28));
        assert_eq!(days_in_month(2028, 2), Some(29));
        assert_eq!(days_in_month(1900, 2), Some(28));
        assert_eq!(days_in_month(2000, 2), Some(29));
        assert_eq!(days_in_month(2026, 12), Some(31));
        assert_eq!(days_in_month(2026, 4), Some(30));
    }
}
