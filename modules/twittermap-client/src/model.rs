//! The externally observed result of the active query.
//!
//! Fields are replaced one at a time as responses land; readers get whole
//! snapshots through the session, never a model mid-update.

use serde::Serialize;
use serde_json::Value;

use twittermap_common::{GeoId, Granularity, TimeBin};
use twittermap_query::HASHTAG_LIMIT;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultModel {
    /// Latest dataset-wide live count.
    pub total_count: u64,
    pub time_result: Vec<TimeBucket>,
    /// Per-geography aggregates, cached and freshly fetched.
    pub map_result: Vec<GeoAggregate>,
    /// Top hashtags, descending by count.
    pub hashtag_result: Vec<HashtagCount>,
    /// Most recent raw records.
    pub sample_rows: Vec<Value>,
    pub last_error: Option<ReportedError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ReportedError {
    /// Payload of an `error` frame, verbatim.
    Backend(Value),
    /// Unknown key, malformed frame, or a payload that does not fit its batch.
    Protocol(String),
    /// A completed batch could not be merged into the cache.
    Merge(String),
}

impl ReportedError {
    pub fn from_client_error(err: &ClientError) -> Self {
        match err {
            ClientError::IncompleteMerge { .. } | ClientError::ScopeMismatch => {
                ReportedError::Merge(err.to_string())
            }
            _ => ReportedError::Protocol(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub bucket: String,
    pub count: u64,
}

impl TimeBucket {
    /// Decode `{<bin>: <bucket>, count}`.
    pub fn from_row(row: &Value, bin: TimeBin) -> Result<Self> {
        let bucket = match row.get(bin.as_str()) {
            Some(Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => return Err(row_error("time", bin.as_str(), row)),
        };
        let count = row.get("count").and_then(as_count).ok_or_else(|| row_error("time", "count", row))?;
        Ok(Self { bucket, count })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoAggregate {
    pub geo_id: GeoId,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_score_sum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_score_count: Option<u64>,
}

impl GeoAggregate {
    /// Aggregate for a geography with no matching records.
    pub fn zero(geo_id: GeoId) -> Self {
        Self {
            geo_id,
            count: 0,
            population: None,
            sentiment_score_sum: None,
            sentiment_score_count: None,
        }
    }

    /// Decode `{<level>: <id>, count, population?, sentimentScoreSum?, sentimentScoreCount?}`.
    pub fn from_row(row: &Value, level: Granularity) -> Result<Self> {
        let geo_id = row
            .get(level.as_str())
            .and_then(Value::as_i64)
            .ok_or_else(|| row_error("geo", level.as_str(), row))?;
        let count = row.get("count").and_then(as_count).ok_or_else(|| row_error("geo", "count", row))?;

        Ok(Self {
            geo_id,
            count,
            population: row.get("population").and_then(as_count),
            sentiment_score_sum: row.get("sentimentScoreSum").and_then(Value::as_f64),
            sentiment_score_count: row.get("sentimentScoreCount").and_then(as_count),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashtagCount {
    pub tag: String,
    pub count: u64,
}

impl HashtagCount {
    pub fn from_row(row: &Value) -> Result<Self> {
        let tag = row
            .get("tag")
            .and_then(Value::as_str)
            .ok_or_else(|| row_error("hashtag", "tag", row))?;
        let count = row.get("count").and_then(as_count).ok_or_else(|| row_error("hashtag", "count", row))?;
        Ok(Self {
            tag: tag.to_string(),
            count,
        })
    }
}

/// Stable sort by descending count, capped at the ranking limit.
pub fn rank_hashtags(mut tags: Vec<HashtagCount>) -> Vec<HashtagCount> {
    tags.sort_by(|a, b| b.count.cmp(&a.count));
    tags.truncate(HASHTAG_LIMIT);
    tags
}

/// Decode every row of a component array with `decode`.
pub fn decode_rows<T>(component: &Value, what: &str, decode: impl Fn(&Value) -> Result<T>) -> Result<Vec<T>> {
    let rows = component
        .as_array()
        .ok_or_else(|| ClientError::Protocol(format!("{what} component is not an array")))?;
    rows.iter().map(decode).collect()
}

fn as_count(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

fn row_error(what: &str, field: &str, row: &Value) -> ClientError {
    ClientError::Protocol(format!("{what} row without usable {field:?}: {row}"))
}
