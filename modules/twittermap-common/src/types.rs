use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Identifier of a state, county, or city. Ids are 64-bit on the wire.
pub type GeoId = i64;

/// Dataset every query targets unless the caller overrides it.
pub const DEFAULT_DATASET: &str = "twitter.ds_tweet";

/// The 50 state ids the map starts out with.
pub const DEFAULT_STATE_IDS: [GeoId; 50] = [
    37, 51, 24, 11, 10, 34, 42, 9, 44, 48, 35, 4, 40, 6, 20, 32, 8, 49, 12, 22, 28, 1, 13, 45, 5,
    47, 21, 29, 54, 17, 18, 39, 19, 55, 26, 27, 31, 56, 41, 46, 16, 30, 53, 38, 25, 36, 50, 33, 23,
    2,
];

// --- Geo granularity ---

/// Geographic aggregation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    State,
    County,
    City,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::State, Granularity::County, Granularity::City];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::State => "state",
            Granularity::County => "county",
            Granularity::City => "city",
        }
    }

    /// Identifier field of this level inside a record's `geo_tag`.
    pub fn id_field(&self) -> &'static str {
        match self {
            Granularity::State => "stateID",
            Granularity::County => "countyID",
            Granularity::City => "cityID",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "state" => Ok(Granularity::State),
            "county" => Ok(Granularity::County),
            "city" => Ok(Granularity::City),
            other => Err(ConfigError::UnknownVariant {
                kind: "geo level",
                value: other.to_string(),
            }),
        }
    }
}

// --- Time ---

/// Unit of the time-series buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBin {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeBin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBin::Minute => "minute",
            TimeBin::Hour => "hour",
            TimeBin::Day => "day",
            TimeBin::Week => "week",
            TimeBin::Month => "month",
            TimeBin::Year => "year",
        }
    }
}

impl fmt::Display for TimeBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeBin {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(TimeBin::Minute),
            "hour" => Ok(TimeBin::Hour),
            "day" => Ok(TimeBin::Day),
            "week" => Ok(TimeBin::Week),
            "month" => Ok(TimeBin::Month),
            "year" => Ok(TimeBin::Year),
            other => Err(ConfigError::UnknownVariant {
                kind: "time bin",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Interval from `start` up to the current instant.
    pub fn until_now(start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Utc::now(),
        }
    }
}

// --- Query parameters ---

/// High-level parameters of one exploration query.
///
/// Mutated only by the query-issue operation; a batch in flight keeps its
/// own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameters {
    pub dataset: String,
    pub keywords: Vec<String>,
    pub time_interval: TimeInterval,
    pub time_bin: TimeBin,
    pub geo_level: Granularity,
    pub geo_ids: Vec<GeoId>,
}

impl QueryParameters {
    /// Parameters for the default state-level map over `time_interval`.
    pub fn new(time_interval: TimeInterval) -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            keywords: Vec::new(),
            time_interval,
            time_bin: TimeBin::Day,
            geo_level: Granularity::State,
            geo_ids: DEFAULT_STATE_IDS.to_vec(),
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_geo(mut self, level: Granularity, ids: Vec<GeoId>) -> Self {
        self.geo_level = level;
        self.geo_ids = ids;
        self
    }

    pub fn with_time_bin(mut self, bin: TimeBin) -> Self {
        self.time_bin = bin;
        self
    }

    /// Keywords with quotes removed and whitespace trimmed. Keywords that end
    /// up empty are dropped.
    pub fn normalized_keywords(&self) -> Vec<String> {
        self.keywords
            .iter()
            .map(|k| normalize_keyword(k))
            .filter(|k| !k.is_empty())
            .collect()
    }
}

pub fn normalize_keyword(raw: &str) -> String {
    raw.replace('"', "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn granularity_fields_are_distinct() {
        assert_eq!(Granularity::State.id_field(), "stateID");
        assert_eq!(Granularity::County.id_field(), "countyID");
        assert_eq!(Granularity::City.id_field(), "cityID");
    }

    #[test]
    fn granularity_parses_case_insensitively() {
        assert_eq!("County".parse::<Granularity>().unwrap(), Granularity::County);
        assert!("zip".parse::<Granularity>().is_err());
    }

    #[test]
    fn keywords_are_trimmed_and_unquoted() {
        let interval = TimeInterval::new(
            Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2016, 2, 1, 0, 0, 0).unwrap(),
        );
        let params = QueryParameters::new(interval).with_keywords([" \"zika\" ", "flu", "  "]);
        assert_eq!(params.normalized_keywords(), vec!["zika", "flu"]);
    }

    #[test]
    fn default_parameters_cover_fifty_states() {
        let params = QueryParameters::new(TimeInterval::until_now(Utc::now()));
        assert_eq!(params.geo_ids.len(), 50);
        assert_eq!(params.geo_level, Granularity::State);
        assert_eq!(params.dataset, DEFAULT_DATASET);
    }
}
