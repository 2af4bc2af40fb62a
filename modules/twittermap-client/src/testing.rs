//! Fixtures for exercising the client without a backend.
//!
//! Frames are built the way the backend writes them, so tests go through
//! the same decoding path as production traffic.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use twittermap_common::{GeoId, Granularity, QueryParameters, TimeInterval};

use crate::cache::ScopeSignature;
use crate::model::GeoAggregate;
use crate::state::SessionState;

/// January 2016, keyword "zika", state level over `ids`.
pub fn params_with_ids(ids: &[GeoId]) -> QueryParameters {
    let interval = TimeInterval::new(
        Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).single().unwrap_or_default(),
        Utc.with_ymd_and_hms(2016, 2, 1, 0, 0, 0).single().unwrap_or_default(),
    );
    QueryParameters::new(interval)
        .with_keywords(["zika"])
        .with_geo(Granularity::State, ids.to_vec())
}

/// Fresh state whose cache already holds `ids` under the scope of
/// [`params_with_ids`]. Cached counts are `id * 10`.
pub fn state_with_cached(ids: &[GeoId]) -> SessionState {
    let params = params_with_ids(ids);
    let scope = ScopeSignature::of(&params);
    let mut state = SessionState::new(params);
    state.cache.enter_scope(&scope);
    let values: Vec<GeoAggregate> = ids.iter().map(|id| cached_value(*id)).collect();
    if let Err(err) = state.cache.merge(&scope, ids, Granularity::State, &values) {
        panic!("seeding cache failed: {err}");
    }
    state
}

pub fn cached_value(geo_id: GeoId) -> GeoAggregate {
    GeoAggregate {
        count: geo_id.unsigned_abs() * 10,
        ..GeoAggregate::zero(geo_id)
    }
}

/// `count` daily buckets starting 2016-01-01.
pub fn time_rows(count: usize) -> Value {
    Value::Array(
        (0..count)
            .map(|day| json!({"day": format!("2016-01-{:02}T00:00:00.000Z", day + 1), "count": day + 1}))
            .collect(),
    )
}

/// One geo row per id at `level`, count `id + 100`.
pub fn geo_rows(level: &str, ids: &[GeoId]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| json!({ level: id, "count": id + 100, "population": 1000 }))
            .collect(),
    )
}

pub fn hashtag_rows(tags: &[(&str, u64)]) -> Value {
    Value::Array(
        tags.iter()
            .map(|(tag, count)| json!({"tag": tag, "count": count}))
            .collect(),
    )
}

pub fn data_frame(key: &str, components: Vec<Value>) -> String {
    json!({"key": key, "value": components}).to_string()
}

pub fn done_frame(key: &str) -> String {
    json!({"key": key, "value": {"key": "done"}}).to_string()
}

pub fn total_count_frame(count: u64) -> String {
    json!({"key": "totalCount", "value": [[{"count": count}]]}).to_string()
}
