use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    /// Normalized (six or seven field) expression.
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Create a new cron schedule from an expression.
    ///
    /// Five-field expressions get a leading `0` seconds field.
    pub fn new(expression: &str) -> Result<Self, CronParseError> {
        let normalized = normalize_cron_expression(expression);

        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| CronParseError::InvalidExpression(e.to_string()))?;

        Ok(Self {
            expression: normalized,
            schedule,
        })
    }

    /// Get the normalized expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`, evaluated in `tz`.
    pub fn next_after_in_tz(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz);
        self.schedule
            .after(&local)
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// All occurrences in `(start, end)`, evaluated in `tz`.
    pub fn between_in_tz(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tz: Tz,
    ) -> Vec<DateTime<Utc>> {
        let local_start = start.with_timezone(&tz);
        let local_end = end.with_timezone(&tz);

        self.schedule
            .after(&local_start)
            .take_while(|dt| *dt < local_end)
            .map(|dt| dt.with_timezone(&Utc))
            .collect()
    }
}

/// A recurring, timezone-aware trigger.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    schedule: CronSchedule,
    timezone: Tz,
}

impl CronTrigger {
    /// Build a trigger from an expression and an IANA timezone name.
    pub fn new(expression: &str, timezone: &str) -> Result<Self, CronParseError> {
        let timezone = timezone
            .parse::<Tz>()
            .map_err(|e| CronParseError::InvalidTimezone(e.to_string()))?;

        Ok(Self {
            schedule: CronSchedule::new(expression)?,
            timezone,
        })
    }

    /// Parse `TZ=<zone> <expression>` (or `CRON_TZ=`). Without a prefix the
    /// schedule runs in UTC.
    pub fn parse(spec: &str) -> Result<Self, CronParseError> {
        let spec = spec.trim();
        let prefixed = spec
            .strip_prefix("TZ=")
            .or_else(|| spec.strip_prefix("CRON_TZ="));

        match prefixed {
            Some(rest) => {
                let (zone, expression) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| CronParseError::InvalidExpression(spec.to_string()))?;
                Self::new(expression.trim(), zone)
            }
            None => Self::new(spec, "UTC"),
        }
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.next_after_in_tz(after, self.timezone)
    }

    /// Occurrences in `(start, end)`.
    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.schedule.between_in_tz(start, end, self.timezone)
    }
}

/// Normalize a cron expression to include seconds.
fn normalize_cron_expression(expr: &str) -> String {
    let parts: Vec<&str> = expr.split_whitespace().collect();

    match parts.len() {
        5 => format!("0 {}", parts.join(" ")),
        _ => parts.join(" "),
    }
}

/// Cron parsing error.
#[derive(Debug, Clone, Error)]
pub enum CronParseError {
    #[error("Invalid cron expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_five_part_cron() {
        let schedule = CronSchedule::new("*/5 * * * *").unwrap();
        assert_eq!(schedule.expression(), "0 */5 * * * *");
    }

    #[test]
    fn test_parse_six_part_cron() {
        let schedule = CronSchedule::new("30 */5 * * * *").unwrap();
        assert_eq!(schedule.expression(), "30 */5 * * * *");
    }

    #[test]
    fn test_invalid_cron() {
        assert!(CronSchedule::new("invalid").is_err());
        assert!(CronTrigger::new("0 9 * * *", "Mars/Olympus").is_err());
    }

    #[test]
    fn test_parse_tz_prefix() {
        let trigger = CronTrigger::parse("TZ=America/New_York 0 9 * * *").unwrap();
        assert_eq!(trigger.timezone(), chrono_tz::America::New_York);
        assert_eq!(trigger.schedule().expression(), "0 0 9 * * *");

        let utc = CronTrigger::parse("0 9 * * *").unwrap();
        assert_eq!(utc.timezone(), Tz::UTC);
    }

    #[test]
    fn test_next_after_respects_timezone() {
        let trigger = CronTrigger::parse("TZ=America/New_York 0 9 * * *").unwrap();

        // 2026-01-15 10:00 EST, already past today's run.
        let after = Utc.with_ymd_and_hms(2026, 1, 15, 15, 0, 0).unwrap();
        let next = trigger.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 16, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_next_after_across_dst() {
        let trigger = CronTrigger::parse("TZ=America/New_York 0 9 * * *").unwrap();

        // Clocks spring forward on 2026-03-08; 09:00 EDT is 13:00 UTC.
        let after = Utc.with_ymd_and_hms(2026, 3, 7, 15, 0, 0).unwrap();
        let next = trigger.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 8, 13, 0, 0).unwrap());
    }

    #[test]
    fn test_next_after_is_exclusive() {
        let trigger = CronTrigger::parse("0 9 * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let next = trigger.next_after(at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 5, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_between() {
        let trigger = CronTrigger::parse("0 * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::hours(3);
        let times = trigger.between(start, end);
        assert_eq!(times.len(), 2);
    }
}
