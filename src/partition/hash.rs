//! Stable placement hashes.
//!
//! Both functions are pure over their inputs, so every node computes the
//! same placement independently. They fail only when the metadata component
//! they need is missing.

use crate::error::{NodeError, Result};
use crate::geohash;
use crate::model::{Metadata, TemporalType};
use chrono::{Datelike, TimeZone, Utc};

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

/// Group index for a record: its point encoded at the filesystem's spatial
/// precision, folded through `hash_to_long`, reduced modulo the group count.
pub fn spatial_group(meta: &Metadata, precision: usize, group_count: usize) -> Result<usize> {
    if group_count == 0 {
        return Err(NodeError::Partition("network has zero groups".into()));
    }
    let spatial = meta
        .spatial
        .as_ref()
        .ok_or_else(|| NodeError::Hash("metadata has no spatial component".into()))?;
    let point = spatial.representative_point()?;
    let hash = geohash::encode(point.lat, point.lon, precision);
    Ok((geohash::hash_to_long(&hash)? % group_count as u64) as usize)
}

/// Ordinal of the UTC bucket a timestamp truncates into: whole hours, days,
/// months, or years since the epoch. Reducing the raw truncated
/// milliseconds instead would alias every DAY bucket to slot 0 for any even
/// divisor, so the ordinal is what feeds the modulo.
pub fn temporal_bucket(ts_ms: i64, temporal: TemporalType) -> Result<i64> {
    match temporal {
        TemporalType::Hour => Ok(ts_ms.div_euclid(HOUR_MS)),
        TemporalType::Day => Ok(ts_ms.div_euclid(DAY_MS)),
        TemporalType::Month => {
            let dt = utc(ts_ms)?;
            Ok((dt.year() as i64 - 1970) * 12 + dt.month0() as i64)
        }
        TemporalType::Year => Ok(utc(ts_ms)?.year() as i64 - 1970),
    }
}

/// Node index within a group for a record's timestamp.
pub fn temporal_slot(meta: &Metadata, temporal: TemporalType, node_count: usize) -> Result<usize> {
    if node_count == 0 {
        return Err(NodeError::Partition("group has zero nodes".into()));
    }
    let ts = meta
        .timestamp_ms
        .ok_or_else(|| NodeError::Hash("metadata has no timestamp".into()))?;
    Ok(temporal_bucket(ts, temporal)?.rem_euclid(node_count as i64) as usize)
}

fn utc(ts_ms: i64) -> Result<chrono::DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .ok_or_else(|| NodeError::Validation(format!("timestamp {} out of range", ts_ms)))
}
