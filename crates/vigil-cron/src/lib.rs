//! Five-field cron evaluation.
//!
//! Expressions use the classic `minute hour day-of-month month day-of-week`
//! layout with ranges, lists, steps and `*`. Day-of-month and day-of-week are
//! OR-combined when both are restricted, the vixie-cron convention: either
//! field matching fires the schedule. A seconds field is not supported.
//!
//! All instants are UTC.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use vigil_types::{Result, VigilError};

/// A parsed five-field expression, ready for evaluation.
///
/// When both day fields are restricted the expression is split into a
/// dom-only and a dow-only schedule; the next fire time is the earlier of
/// the two, which is exactly the OR-combination.
#[derive(Debug, Clone)]
pub struct CronExpr {
    schedules: Vec<Schedule>,
    fields: [String; 5],
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(expr, "expected five fields (minute hour dom month dow)"));
        }

        let minute = fields[0].to_string();
        let hour = fields[1].to_string();
        let dom = normalize_wildcard(fields[2]);
        let month = fields[3].to_string();
        let dow = normalize_dow(fields[4]).ok_or_else(|| invalid(expr, "bad day-of-week field"))?;

        let dom_restricted = dom != "*";
        let dow_restricted = dow != "*";

        let mut variants = Vec::new();
        if dom_restricted && dow_restricted {
            variants.push([minute.clone(), hour.clone(), dom.clone(), month.clone(), "*".into()]);
            variants.push([minute.clone(), hour.clone(), "*".into(), month.clone(), dow.clone()]);
        } else {
            variants.push([minute.clone(), hour.clone(), dom.clone(), month.clone(), dow.clone()]);
        }

        let mut schedules = Vec::with_capacity(variants.len());
        for v in &variants {
            // The cron crate wants seconds up front and an optional year at
            // the end.
            let full = format!("0 {} {} {} {} {} *", v[0], v[1], v[2], v[3], v[4]);
            let schedule = Schedule::from_str(&full)
                .map_err(|e| invalid(expr, &e.to_string()))?;
            schedules.push(schedule);
        }

        Ok(Self {
            schedules,
            fields: [minute, hour, dom, month, dow],
        })
    }

    /// Earliest fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&after).next())
            .min()
    }
}

fn invalid(expr: &str, reason: &str) -> VigilError {
    VigilError::Validation {
        task: None,
        reason: format!("invalid cron expression '{expr}': {reason}"),
    }
}

fn normalize_wildcard(field: &str) -> String {
    if field == "?" {
        "*".to_string()
    } else {
        field.to_string()
    }
}

const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite numeric day-of-week tokens (unix convention, 0/7 = Sunday) to
/// named days, which every cron parser agrees on.
fn normalize_dow(field: &str) -> Option<String> {
    let field = normalize_wildcard(field);
    let mut items = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => (r, Some(s)),
            None => (item, None),
        };
        let mapped_range = if range == "*" {
            "*".to_string()
        } else if let Some((lo, hi)) = range.split_once('-') {
            format!("{}-{}", map_dow_token(lo)?, map_dow_token(hi)?)
        } else {
            map_dow_token(range)?
        };
        match step {
            Some(s) => {
                s.parse::<u8>().ok()?;
                items.push(format!("{mapped_range}/{s}"));
            }
            None => items.push(mapped_range),
        }
    }
    Some(items.join(","))
}

fn map_dow_token(token: &str) -> Option<String> {
    if let Ok(n) = token.parse::<u8>() {
        if n <= 7 {
            return Some(DOW_NAMES[(n % 7) as usize].to_string());
        }
        return None;
    }
    // Already a name; pass through for the parser to judge.
    Some(token.to_string())
}

/// `true` when `expr` is a parseable five-field expression.
pub fn validate(expr: &str) -> bool {
    CronExpr::parse(expr).is_ok()
}

/// Next fire time strictly after `after`.
pub fn next_after(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let parsed = CronExpr::parse(expr)?;
    parsed
        .next_after(after)
        .ok_or_else(|| invalid(expr, "no future fire time"))
}

/// The next `n` fire times strictly after `after`, strictly increasing.
pub fn next_n(expr: &str, n: usize, after: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
    let parsed = CronExpr::parse(expr)?;
    let mut out = Vec::with_capacity(n);
    let mut cursor = after;
    while out.len() < n {
        match parsed.next_after(cursor) {
            Some(next) => {
                cursor = next;
                out.push(next);
            }
            None => break,
        }
    }
    Ok(out)
}

/// Best-effort human description of an expression.
pub fn describe(expr: &str) -> String {
    let Ok(parsed) = CronExpr::parse(expr) else {
        return format!("invalid cron expression '{expr}'");
    };
    let [minute, hour, dom, _month, dow] = &parsed.fields;

    if minute == "*" && hour == "*" && dom == "*" && dow == "*" {
        return "every minute".to_string();
    }
    if let Some(step) = minute.strip_prefix("*/") {
        if hour == "*" && dom == "*" && dow == "*" {
            return format!("every {step} minutes");
        }
    }
    if let Some(step) = hour.strip_prefix("*/") {
        if let Ok(m) = minute.parse::<u8>() {
            if dom == "*" && dow == "*" {
                return format!("every {step} hours at minute {m}");
            }
        }
    }
    if let (Ok(m), Ok(h)) = (minute.parse::<u8>(), hour.parse::<u8>()) {
        let time = format!("{h:02}:{m:02}");
        return match (dom.as_str(), dow.as_str()) {
            ("*", "*") => format!("daily at {time}"),
            ("*", days) => format!("at {time} on {}", prettify_days(days)),
            (day, "*") => format!("monthly on day {day} at {time}"),
            (day, days) => {
                format!("at {time} on day {day} of the month or on {}", prettify_days(days))
            }
        };
    }
    if minute.parse::<u8>().is_ok() && hour == "*" && dom == "*" && dow == "*" {
        return format!("hourly at minute {minute}");
    }
    format!("cron schedule '{expr}'")
}

fn prettify_days(field: &str) -> String {
    const PRETTY: [(&str, &str); 7] = [
        ("SUN", "Sunday"),
        ("MON", "Monday"),
        ("TUE", "Tuesday"),
        ("WED", "Wednesday"),
        ("THU", "Thursday"),
        ("FRI", "Friday"),
        ("SAT", "Saturday"),
    ];
    field
        .split(',')
        .map(|item| {
            let mut out = item.to_string();
            for (abbr, full) in PRETTY {
                out = out.replace(abbr, full);
            }
            out
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn validate_accepts_standard_forms() {
        assert!(validate("* * * * *"));
        assert!(validate("*/5 * * * *"));
        assert!(validate("0 3 * * *"));
        assert!(validate("30 9,17 * * 1-5"));
        assert!(validate("0 0 1 1 *"));
    }

    #[test]
    fn validate_rejects_wrong_field_count_and_garbage() {
        assert!(!validate(""));
        assert!(!validate("* * * *"));
        assert!(!validate("* * * * * *"));
        assert!(!validate("61 * * * *"));
        assert!(!validate("not a cron"));
    }

    #[test]
    fn next_after_is_strictly_greater() {
        let exprs = ["* * * * *", "*/5 * * * *", "0 3 * * *", "59 23 31 12 *"];
        let probes = [
            at(2026, 1, 1, 0, 0, 0),
            at(2026, 2, 28, 23, 59, 59),
            at(2026, 12, 31, 23, 59, 0),
        ];
        for expr in exprs {
            for t in probes {
                let next = next_after(expr, t).unwrap();
                assert!(next > t, "{expr} at {t} gave {next}");
            }
        }
    }

    #[test]
    fn every_five_minutes() {
        let next = next_after("*/5 * * * *", at(2026, 6, 1, 12, 0, 3)).unwrap();
        assert_eq!(next, at(2026, 6, 1, 12, 5, 0));
    }

    #[test]
    fn year_rollover() {
        let next = next_after("0 0 1 1 *", at(2026, 12, 31, 23, 59, 59)).unwrap();
        assert_eq!(next, at(2027, 1, 1, 0, 0, 0));
    }

    #[test]
    fn fixpoint_one_second_before() {
        let t = at(2026, 6, 1, 12, 0, 3);
        let next = next_after("*/5 * * * *", t).unwrap();
        let again = next_after("*/5 * * * *", next - chrono::Duration::seconds(1)).unwrap();
        assert_eq!(next, again);
    }

    #[test]
    fn next_n_is_strictly_increasing() {
        let runs = next_n("*/15 * * * *", 8, at(2026, 3, 31, 23, 30, 0)).unwrap();
        assert_eq!(runs.len(), 8);
        for pair in runs.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        // Crosses the month boundary without repeating or skipping.
        assert_eq!(runs[0], at(2026, 3, 31, 23, 45, 0));
        assert_eq!(runs[1], at(2026, 4, 1, 0, 0, 0));
    }

    #[test]
    fn dom_dow_or_combined() {
        // Fires on the 13th of the month OR on Fridays.
        // 2026-03-01 is a Sunday; the first Friday is the 6th, before the 13th.
        let expr = "0 0 13 * 5";
        let first = next_after(expr, at(2026, 3, 1, 0, 0, 0)).unwrap();
        assert_eq!(first, at(2026, 3, 6, 0, 0, 0));
        // 2026-03-13 is both a Friday and the 13th; it must fire once.
        let second = next_after(expr, first).unwrap();
        assert_eq!(second, at(2026, 3, 13, 0, 0, 0));
        let third = next_after(expr, second).unwrap();
        assert_eq!(third, at(2026, 3, 20, 0, 0, 0));
    }

    #[test]
    fn dow_only_restriction_uses_unix_numbering() {
        // 1-5 = Monday..Friday. 2026-06-06 is a Saturday.
        let next = next_after("0 9 * * 1-5", at(2026, 6, 6, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 6, 8, 9, 0, 0));
        // 0 and 7 both mean Sunday.
        let sun = next_after("0 9 * * 0", at(2026, 6, 6, 0, 0, 0)).unwrap();
        let sun7 = next_after("0 9 * * 7", at(2026, 6, 6, 0, 0, 0)).unwrap();
        assert_eq!(sun, at(2026, 6, 7, 9, 0, 0));
        assert_eq!(sun, sun7);
    }

    #[test]
    fn describe_common_patterns() {
        assert_eq!(describe("* * * * *"), "every minute");
        assert_eq!(describe("*/5 * * * *"), "every 5 minutes");
        assert_eq!(describe("0 3 * * *"), "daily at 03:00");
        assert_eq!(describe("30 9 * * 1-5"), "at 09:30 on Monday-Friday");
        assert_eq!(describe("0 0 1 * *"), "monthly on day 1 at 00:00");
        assert!(describe("bad").starts_with("invalid cron expression"));
    }
}
