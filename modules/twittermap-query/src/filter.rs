//! Filter predicates shared by every descriptor.
//!
//! A filter is always a time range plus a keyword containment; a geo
//! containment is added only while the candidate id set stays at or below
//! [`GEO_FILTER_CEILING`]. Past the ceiling the backend returns every
//! geography and the caller picks out the ones it asked for.

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};

use twittermap_common::{GeoId, QueryParameters};

/// Largest geo id set that is still sent as an `in` predicate.
pub const GEO_FILTER_CEILING: usize = 2000;

const TIME_FIELD: &str = "create_at";
const TEXT_FIELD: &str = "text";

/// One predicate as the backend expects it: `{field, relation, values}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "relation")]
pub enum Predicate {
    #[serde(rename = "inRange")]
    InRange {
        field: String,
        #[serde(serialize_with = "iso_millis")]
        values: [DateTime<Utc>; 2],
    },
    #[serde(rename = "contains")]
    Contains { field: String, values: Vec<String> },
    #[serde(rename = "in")]
    In { field: String, values: Vec<GeoId> },
}

/// Ordered predicate list attached to a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FilterSpec(pub Vec<Predicate>);

impl FilterSpec {
    pub fn predicates(&self) -> &[Predicate] {
        &self.0
    }

    /// The `[start, end]` of the time predicate.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.0.iter().find_map(|p| match p {
            Predicate::InRange { values, .. } => Some((values[0], values[1])),
            _ => None,
        })
    }

    pub fn keywords(&self) -> Option<&[String]> {
        self.0.iter().find_map(|p| match p {
            Predicate::Contains { values, .. } => Some(values.as_slice()),
            _ => None,
        })
    }

    /// Geo ids of the containment predicate, `None` when it was omitted.
    pub fn geo_ids(&self) -> Option<&[GeoId]> {
        self.0.iter().find_map(|p| match p {
            Predicate::In { values, .. } => Some(values.as_slice()),
            _ => None,
        })
    }
}

/// Build the filter for `params`, looking back at most `lookback_days` from
/// the end of the interval, restricted to `geo_ids`.
pub fn build_filter(params: &QueryParameters, lookback_days: i64, geo_ids: &[GeoId]) -> FilterSpec {
    let end = params.time_interval.end;
    let earliest = end - Duration::days(lookback_days);
    let start = params.time_interval.start.max(earliest);

    let mut predicates = vec![
        Predicate::InRange {
            field: TIME_FIELD.to_string(),
            values: [start, end],
        },
        Predicate::Contains {
            field: TEXT_FIELD.to_string(),
            values: params.normalized_keywords(),
        },
    ];

    if geo_ids.len() <= GEO_FILTER_CEILING {
        predicates.push(Predicate::In {
            field: format!("geo_tag.{}", params.geo_level.id_field()),
            values: geo_ids.to_vec(),
        });
    }

    FilterSpec(predicates)
}

fn iso_millis<S: Serializer>(values: &[DateTime<Utc>; 2], serializer: S) -> Result<S::Ok, S::Error> {
    let formatted: Vec<String> = values
        .iter()
        .map(|d| d.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .collect();
    formatted.serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use twittermap_common::{Granularity, TimeInterval};

    fn params(start: (i32, u32, u32), end: (i32, u32, u32)) -> QueryParameters {
        QueryParameters::new(TimeInterval::new(
            Utc.with_ymd_and_hms(start.0, start.1, start.2, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(end.0, end.1, end.2, 0, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn geo_predicate_kept_at_ceiling() {
        let ids: Vec<GeoId> = (0..2000).collect();
        let filter = build_filter(&params((2016, 1, 1), (2016, 2, 1)), 1500, &ids);
        assert_eq!(filter.geo_ids().map(<[GeoId]>::len), Some(2000));
    }

    #[test]
    fn geo_predicate_dropped_past_ceiling() {
        let ids: Vec<GeoId> = (0..2001).collect();
        let filter = build_filter(&params((2016, 1, 1), (2016, 2, 1)), 1500, &ids);
        assert_eq!(filter.geo_ids(), None);
        assert_eq!(filter.predicates().len(), 2);
    }

    #[test]
    fn start_is_clamped_to_lookback() {
        let p = params((2010, 1, 1), (2016, 2, 1));
        let filter = build_filter(&p, 1, &[]);
        let (start, end) = filter.time_range().unwrap();
        assert_eq!(end, p.time_interval.end);
        assert_eq!(start, Utc.with_ymd_and_hms(2016, 1, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn start_kept_when_inside_lookback() {
        let p = params((2016, 1, 1), (2016, 2, 1));
        let filter = build_filter(&p, 1500, &[]);
        assert_eq!(filter.time_range().unwrap().0, p.time_interval.start);
    }

    #[test]
    fn empty_keywords_still_emit_containment() {
        let filter = build_filter(&params((2016, 1, 1), (2016, 2, 1)), 1500, &[]);
        assert_eq!(filter.keywords(), Some(&[][..]));
    }

    #[test]
    fn serializes_in_wire_shape() {
        let p = params((2016, 1, 1), (2016, 2, 1))
            .with_keywords(["\"zika\""])
            .with_geo(Granularity::County, vec![7, 8]);
        let filter = build_filter(&p, 1500, &p.geo_ids);

        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!([
                {
                    "field": "create_at",
                    "relation": "inRange",
                    "values": ["2016-01-01T00:00:00.000Z", "2016-02-01T00:00:00.000Z"]
                },
                { "field": "text", "relation": "contains", "values": ["zika"] },
                { "field": "geo_tag.countyID", "relation": "in", "values": [7, 8] }
            ])
        );
    }
}
