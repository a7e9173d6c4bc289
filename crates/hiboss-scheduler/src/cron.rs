//! Cron expression parsing and `nextFireAt` computation. The `cron` crate
//! parses 6-field expressions (seconds first); 5-field crontab syntax and
//! `@daily`/`@hourly` shorthands are normalized to that form before parsing.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

/// Normalize a spec-level cron expression (5-field crontab syntax, or a
/// `@shorthand`) into the 6-field `sec min hour day month dow` form the
/// `cron` crate expects.
fn normalize(expr: &str) -> std::result::Result<String, String> {
    let trimmed = expr.trim();
    if let Some(shorthand) = trimmed.strip_prefix('@') {
        return Ok(match shorthand {
            "yearly" | "annually" => "0 0 0 1 1 *".to_string(),
            "monthly" => "0 0 0 1 * *".to_string(),
            "weekly" => "0 0 0 * * 0".to_string(),
            "daily" | "midnight" => "0 0 0 * * *".to_string(),
            "hourly" => "0 0 * * * *".to_string(),
            other => return Err(format!("unknown cron shorthand: @{other}")),
        });
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {trimmed}")),
        6 => Ok(trimmed.to_string()),
        n => Err(format!("expected 5 or 6 whitespace-separated fields, got {n}")),
    }
}

/// Parse and validate a cron expression, returning a reusable `Schedule`.
pub fn parse(expr: &str) -> Result<Schedule> {
    let normalized = normalize(expr).map_err(|reason| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason,
    })?;
    Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Resolve a schedule's effective timezone: its own `timezone`, or the
/// boss's configured timezone, falling back to UTC.
pub fn resolve_timezone(timezone: Option<&str>, boss_timezone: &str) -> Result<chrono_tz::Tz> {
    let raw = timezone.unwrap_or(boss_timezone);
    raw.parse::<chrono_tz::Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(raw.to_string()))
}

/// `nextFireAt(now)`: the next occurrence strictly in the
/// future relative to `now`, with the tie-break that an occurrence exactly
/// equal to `now` still counts as "future".
///
/// Misfires are not backfilled: callers always get the *next* future
/// occurrence, never a backlog of missed ones.
pub fn next_fire_at(schedule: &Schedule, tz: chrono_tz::Tz, now_ms: i64) -> Result<i64> {
    let now_utc = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .ok_or_else(|| SchedulerError::InvalidTimezone("unrepresentable instant".to_string()))?;
    let now_tz = now_utc.with_timezone(&tz);

    // `upcoming` is exclusive of `after`; step back 1ms so an occurrence
    // exactly at `now` still counts as future, not missed.
    let search_from = now_tz - chrono::Duration::milliseconds(1);

    let next: DateTime<chrono_tz::Tz> = schedule
        .after(&search_from)
        .next()
        .ok_or(SchedulerError::Exhausted)?;

    Ok(next.with_timezone(&Utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_five_field_crontab() {
        assert_eq!(normalize("0 9 * * 1-5").unwrap(), "0 0 9 * * 1-5");
    }

    #[test]
    fn normalizes_shorthands() {
        assert_eq!(normalize("@hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize("@daily").unwrap(), "0 0 0 * * *");
    }

    #[test]
    fn rejects_garbage() {
        assert!(normalize("not a cron expr").is_err());
    }

    #[test]
    fn next_fire_is_strictly_increasing_and_future() {
        let schedule = parse("* * * * *").unwrap();
        let tz = resolve_timezone(None, "UTC").unwrap();
        let now = hiboss_core::time::now_ms();
        let next = next_fire_at(&schedule, tz, now).unwrap();
        assert!(next >= now);
    }

    #[test]
    fn weekday_9am_los_angeles() {
        let schedule = parse("0 9 * * 1-5").unwrap();
        let tz = resolve_timezone(Some("America/Los_Angeles"), "UTC").unwrap();
        let now = hiboss_core::time::now_ms();
        let next = next_fire_at(&schedule, tz, now).unwrap();
        let next_local = Utc
            .timestamp_millis_opt(next)
            .single()
            .unwrap()
            .with_timezone(&tz);
        assert_eq!(next_local.format("%H:%M").to_string(), "09:00");
    }
}
