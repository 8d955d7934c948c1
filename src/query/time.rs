//! Temporal query expressions.
//!
//! A query's time field is `yyyy-MM-dd-HH`. The component at the
//! filesystem's granularity may be the literal `x`, meaning no temporal
//! restriction at all. Coarser components may only be `x` when wall-clock
//! substitution has been explicitly enabled; by default a wildcard there
//! is rejected, since substituting the coordinator's clock couples query
//! results to wherever the query happened to land.

use crate::error::{NodeError, Result};
use crate::model::TemporalType;
use chrono::{Datelike, Duration, Months, TimeZone, Timelike, Utc};

/// Resolve a time expression into a half-open `[start, end)` millisecond
/// window at the filesystem's granularity. `Ok(None)` means the expression
/// asks for no temporal restriction.
pub fn parse_time_window(
    expr: &str,
    temporal: TemporalType,
    allow_wildcards: bool,
) -> Result<Option<(i64, i64)>> {
    let parts: Vec<&str> = expr.trim().split('-').collect();
    if parts.len() != 4 {
        return Err(NodeError::Validation(format!(
            "time expression '{}' must be yyyy-MM-dd-HH",
            expr
        )));
    }
    let granularity_index = match temporal {
        TemporalType::Year => 0,
        TemporalType::Month => 1,
        TemporalType::Day => 2,
        TemporalType::Hour => 3,
    };
    if parts[granularity_index].eq_ignore_ascii_case("x") {
        return Ok(None);
    }

    let now = Utc::now();
    let component = |index: usize, current: i64| -> Result<i64> {
        let part = parts[index];
        if part.eq_ignore_ascii_case("x") {
            if allow_wildcards {
                Ok(current)
            } else {
                Err(NodeError::Validation(format!(
                    "wildcard in time expression '{}' (wall-clock substitution is disabled)",
                    expr
                )))
            }
        } else {
            part.parse::<i64>().map_err(|_| {
                NodeError::Validation(format!("bad time component '{}' in '{}'", part, expr))
            })
        }
    };

    let year = component(0, now.year() as i64)?;
    let month = if granularity_index >= 1 {
        component(1, now.month() as i64)?
    } else {
        1
    };
    let day = if granularity_index >= 2 {
        component(2, now.day() as i64)?
    } else {
        1
    };
    let hour = if granularity_index >= 3 {
        component(3, now.hour() as i64)?
    } else {
        0
    };

    let start = Utc
        .with_ymd_and_hms(year as i32, month as u32, day as u32, hour as u32, 0, 0)
        .single()
        .ok_or_else(|| {
            NodeError::Validation(format!("time expression '{}' is not a valid instant", expr))
        })?;
    let end = match temporal {
        TemporalType::Hour => start + Duration::hours(1),
        TemporalType::Day => start + Duration::days(1),
        TemporalType::Month => start.checked_add_months(Months::new(1)).ok_or_else(|| {
            NodeError::Validation(format!("time expression '{}' overflows", expr))
        })?,
        TemporalType::Year => Utc
            .with_ymd_and_hms(year as i32 + 1, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| {
                NodeError::Validation(format!("time expression '{}' overflows", expr))
            })?,
    };
    Ok(Some((start.timestamp_millis(), end.timestamp_millis())))
}
