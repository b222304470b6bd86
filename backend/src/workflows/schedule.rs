// Workflow Schedules - Cron parsing and next-run computation for time-based workflows

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Bring an expression into the seconds-first form the `cron` crate parses.
///
/// Five fields (standard crontab) get a zero seconds field and a wildcard year.
/// Six and seven field expressions are already seconds-first.
pub fn normalize_cron_expression(expr: &str) -> String {
    let expr = expr.trim();
    match expr.split_whitespace().count() {
        5 => format!("0 {expr} *"),
        _ => expr.to_string(),
    }
}

pub fn parse_schedule(expr: &str) -> Result<Schedule, String> {
    if expr.trim().is_empty() {
        return Err("cron expression is empty".to_string());
    }
    Schedule::from_str(&normalize_cron_expression(expr))
        .map_err(|e| format!("invalid cron expression '{}': {}", expr, e))
}

/// The first occurrence strictly after `after`.
pub fn next_run_after(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    parse_schedule(expr)?
        .after(&after)
        .next()
        .ok_or_else(|| format!("cron expression '{}' has no upcoming occurrence", expr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_5_field() {
        assert_eq!(normalize_cron_expression("*/15 * * * *"), "0 */15 * * * * *");
    }

    #[test]
    fn test_normalize_6_field_passthrough() {
        assert_eq!(normalize_cron_expression("30 0 9 * * Mon"), "30 0 9 * * Mon");
    }

    #[test]
    fn test_next_run_after() {
        let after = Utc.with_ymd_and_hms(2026, 3, 10, 8, 59, 30).unwrap();
        let next = next_run_after("0 9 * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap());

        let again = next_run_after("0 9 * * *", next).unwrap();
        assert_eq!(again, Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(parse_schedule("").is_err());
        assert!(parse_schedule("every tuesday").is_err());
        assert!(parse_schedule("61 * * * *").is_err());
    }
}
