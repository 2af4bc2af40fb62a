//! Query descriptors and batch envelopes.
//!
//! Every builder here is a pure function of its inputs. Correlation keys are
//! attached by the caller through [`QueryDescriptor::wrapped`] or [`batch`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use twittermap_common::{GeoId, QueryParameters};

use crate::filter::{build_filter, FilterSpec};
use crate::population::{population_target, JoinSpec};

/// Lookback for the aggregate descriptors, in days.
pub const NON_SAMPLING_DAY_RANGE: i64 = 1500;
/// Lookback for the sample descriptor, in days.
pub const SAMPLING_DAY_RANGE: i64 = 1;
/// Rows returned by the sample descriptor.
pub const SAMPLE_SIZE: usize = 10;
/// Hashtags kept in the ranking.
pub const HASHTAG_LIMIT: usize = 50;

/// Field holding the derived sentiment score on each record.
pub const SENTIMENT_FIELD: &str = "sentimentScore";

// ---------------------------------------------------------------------------
// Wire model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    pub dataset: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub append: Vec<AppendField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unnest: Vec<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<SelectSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalSpec>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub estimable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

impl QueryDescriptor {
    fn on(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            append: Vec::new(),
            filter: None,
            unnest: Vec::new(),
            group: None,
            select: None,
            global: None,
            estimable: false,
            transform: None,
        }
    }

    /// Tag this descriptor so its response comes back under `key`.
    pub fn wrapped(mut self, key: impl Into<String>) -> Self {
        self.transform = Some(Transform::wrap(key));
        self
    }

    /// Geo ids this descriptor is restricted to, `None` when unrestricted.
    pub fn geo_ids(&self) -> Option<&[GeoId]> {
        self.filter.as_ref().and_then(FilterSpec::geo_ids)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppendField {
    pub field: String,
    pub definition: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(rename = "as")]
    pub as_: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Apply {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl Apply {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub field: String,
    pub apply: Apply,
    #[serde(rename = "as")]
    pub as_: String,
}

impl Aggregate {
    fn new(field: &str, apply: &str, as_: &str) -> Self {
        Self {
            field: field.to_string(),
            apply: Apply::named(apply),
            as_: as_.to_string(),
        }
    }

    fn count() -> Self {
        Self::new("*", "count", "count")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupBy {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<Apply>,
    #[serde(rename = "as", skip_serializing_if = "Option::is_none")]
    pub as_: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSpec {
    pub by: Vec<GroupBy>,
    pub aggregate: Vec<Aggregate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lookup: Vec<JoinSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectSpec {
    pub order: Vec<String>,
    pub limit: usize,
    pub offset: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub field: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSpec {
    pub global_aggregate: Aggregate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transform {
    pub wrap: Wrap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wrap {
    pub key: String,
}

impl Transform {
    pub fn wrap(key: impl Into<String>) -> Self {
        Self {
            wrap: Wrap { key: key.into() },
        }
    }

    pub fn key(&self) -> &str {
        &self.wrap.key
    }
}

/// Several descriptors sent as one envelope under one correlation key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRequest {
    pub batch: Vec<QueryDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option: Option<BatchOption>,
    pub transform: Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOption {
    pub slice_millis: i64,
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Record counts per time bucket.
pub fn by_time(params: &QueryParameters) -> QueryDescriptor {
    let bin = params.time_bin.as_str();
    QueryDescriptor {
        filter: Some(build_filter(params, NON_SAMPLING_DAY_RANGE, &params.geo_ids)),
        group: Some(GroupSpec {
            by: vec![GroupBy {
                field: "create_at".to_string(),
                apply: Some(Apply {
                    name: "interval".to_string(),
                    args: Some(json!({ "unit": bin })),
                }),
                as_: Some(bin.to_string()),
            }],
            aggregate: vec![Aggregate::count()],
            lookup: Vec::new(),
        }),
        ..QueryDescriptor::on(&params.dataset)
    }
}

/// Record counts per geography for `geo_ids`, joined with population.
///
/// `sentiment` is the scoring function reference; when present each record
/// gets a derived score and the group also sums and counts it.
pub fn by_geo(params: &QueryParameters, geo_ids: &[GeoId], sentiment: Option<&str>) -> QueryDescriptor {
    let level = params.geo_level.as_str();
    let mut aggregate = vec![Aggregate::count()];
    let mut append = Vec::new();

    if let Some(udf) = sentiment {
        append.push(AppendField {
            field: "text".to_string(),
            definition: udf.to_string(),
            type_: "Number".to_string(),
            as_: SENTIMENT_FIELD.to_string(),
        });
        aggregate.push(Aggregate::new(SENTIMENT_FIELD, "sum", "sentimentScoreSum"));
        aggregate.push(Aggregate::new(SENTIMENT_FIELD, "count", "sentimentScoreCount"));
    }

    QueryDescriptor {
        append,
        filter: Some(build_filter(params, NON_SAMPLING_DAY_RANGE, geo_ids)),
        group: Some(GroupSpec {
            by: vec![GroupBy {
                field: "geo".to_string(),
                apply: Some(Apply {
                    name: "level".to_string(),
                    args: Some(json!({ "level": level })),
                }),
                as_: Some(level.to_string()),
            }],
            aggregate,
            lookup: vec![population_target(params.geo_level)],
        }),
        ..QueryDescriptor::on(&params.dataset)
    }
}

/// Top hashtags by record count.
pub fn by_hashtag(params: &QueryParameters) -> QueryDescriptor {
    QueryDescriptor {
        filter: Some(build_filter(params, NON_SAMPLING_DAY_RANGE, &params.geo_ids)),
        unnest: vec![BTreeMap::from([("hashtags".to_string(), "tag".to_string())])],
        group: Some(GroupSpec {
            by: vec![GroupBy {
                field: "tag".to_string(),
                apply: None,
                as_: None,
            }],
            aggregate: vec![Aggregate::count()],
            lookup: Vec::new(),
        }),
        select: Some(SelectSpec {
            order: vec!["-count".to_string()],
            limit: HASHTAG_LIMIT,
            offset: 0,
            field: Vec::new(),
        }),
        ..QueryDescriptor::on(&params.dataset)
    }
}

/// The most recent raw records, for preview.
pub fn sample(params: &QueryParameters) -> QueryDescriptor {
    QueryDescriptor {
        filter: Some(build_filter(params, SAMPLING_DAY_RANGE, &params.geo_ids)),
        select: Some(SelectSpec {
            order: vec!["-create_at".to_string()],
            limit: SAMPLE_SIZE,
            offset: 0,
            field: vec!["create_at".to_string(), "id".to_string(), "user.id".to_string()],
        }),
        ..QueryDescriptor::on(&params.dataset)
    }
}

/// Estimated dataset-wide record count, wrapped under `totalCount`.
pub fn live_count(dataset: &str) -> QueryDescriptor {
    QueryDescriptor {
        global: Some(GlobalSpec {
            global_aggregate: Aggregate::count(),
        }),
        estimable: true,
        ..QueryDescriptor::on(dataset)
    }
    .wrapped("totalCount")
}

/// Envelope `components` under `key`, with a slicing hint when one is given.
/// Non-positive hints are dropped.
pub fn batch(components: Vec<QueryDescriptor>, slice_millis: Option<i64>, key: impl Into<String>) -> BatchRequest {
    BatchRequest {
        batch: components,
        option: slice_millis
            .filter(|ms| *ms > 0)
            .map(|slice_millis| BatchOption { slice_millis }),
        transform: Transform::wrap(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use twittermap_common::{Granularity, TimeBin, TimeInterval};

    fn params() -> QueryParameters {
        QueryParameters::new(TimeInterval::new(
            Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2016, 2, 1, 0, 0, 0).unwrap(),
        ))
        .with_keywords(["zika"])
        .with_geo(Granularity::City, vec![1, 2, 3])
        .with_time_bin(TimeBin::Hour)
    }

    #[test]
    fn by_time_groups_on_interval() {
        let value = serde_json::to_value(by_time(&params())).unwrap();
        assert_eq!(
            value["group"],
            json!({
                "by": [{
                    "field": "create_at",
                    "apply": { "name": "interval", "args": { "unit": "hour" } },
                    "as": "hour"
                }],
                "aggregate": [{ "field": "*", "apply": { "name": "count" }, "as": "count" }]
            })
        );
        assert_eq!(value["dataset"], "twitter.ds_tweet");
        assert!(value.get("transform").is_none());
    }

    #[test]
    fn by_geo_uses_requested_subset_and_population_join() {
        let descriptor = by_geo(&params(), &[3], None);
        assert_eq!(descriptor.geo_ids(), Some(&[3][..]));
        assert!(descriptor.append.is_empty());

        let group = descriptor.group.unwrap();
        assert_eq!(group.aggregate.len(), 1);
        assert_eq!(group.lookup, vec![population_target(Granularity::City)]);
        assert_eq!(group.by[0].as_.as_deref(), Some("city"));
    }

    #[test]
    fn sentiment_enriches_only_by_geo() {
        let p = params();
        let descriptor = by_geo(&p, &p.geo_ids, Some("twitter.`snlp#getSentimentScore`"));
        let value = serde_json::to_value(&descriptor).unwrap();

        assert_eq!(
            value["append"],
            json!([{
                "field": "text",
                "definition": "twitter.`snlp#getSentimentScore`",
                "type": "Number",
                "as": "sentimentScore"
            }])
        );
        let names: Vec<&str> = descriptor.group.as_ref().unwrap().aggregate.iter().map(|a| a.as_.as_str()).collect();
        assert_eq!(names, vec!["count", "sentimentScoreSum", "sentimentScoreCount"]);

        assert!(by_time(&p).append.is_empty());
        assert!(by_hashtag(&p).append.is_empty());
    }

    #[test]
    fn hashtags_are_ranked_and_capped() {
        let value = serde_json::to_value(by_hashtag(&params())).unwrap();
        assert_eq!(value["unnest"], json!([{ "hashtags": "tag" }]));
        assert_eq!(value["select"], json!({ "order": ["-count"], "limit": 50, "offset": 0 }));
        assert_eq!(value["group"]["by"], json!([{ "field": "tag" }]));
    }

    #[test]
    fn sample_looks_back_one_day() {
        let descriptor = sample(&params());
        let (start, end) = descriptor.filter.as_ref().unwrap().time_range().unwrap();
        assert_eq!(end - start, chrono::Duration::days(1));

        let select = descriptor.select.unwrap();
        assert_eq!(select.limit, SAMPLE_SIZE);
        assert_eq!(select.field, vec!["create_at", "id", "user.id"]);
    }

    #[test]
    fn live_count_is_estimable_global_count() {
        assert_eq!(
            serde_json::to_value(live_count("twitter.ds_tweet")).unwrap(),
            json!({
                "dataset": "twitter.ds_tweet",
                "global": {
                    "globalAggregate": { "field": "*", "apply": { "name": "count" }, "as": "count" }
                },
                "estimable": true,
                "transform": { "wrap": { "key": "totalCount" } }
            })
        );
    }

    #[test]
    fn batch_carries_slicing_hint_only_when_positive() {
        let p = params();
        let sliced = batch(vec![by_time(&p), by_hashtag(&p)], Some(2000), "none-cached:1");
        let value = serde_json::to_value(&sliced).unwrap();
        assert_eq!(value["option"], json!({ "sliceMillis": 2000 }));
        assert_eq!(value["transform"], json!({ "wrap": { "key": "none-cached:1" } }));
        assert_eq!(value["batch"].as_array().unwrap().len(), 2);

        let unsliced = batch(vec![by_time(&p)], Some(0), "full:1");
        assert!(serde_json::to_value(&unsliced).unwrap().get("option").is_none());
        assert!(batch(vec![], None, "full:2").option.is_none());
    }
}
