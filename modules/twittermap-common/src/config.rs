use std::env;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

use crate::error::ConfigError;
use crate::types::{QueryParameters, TimeInterval};

const DEFAULT_WS_URL: &str = "ws://localhost:9000/ws";
const DEFAULT_SENTIMENT_UDF: &str = "twitter.`snlp#getSentimentScore`";
const DEFAULT_LIVE_COUNT_INTERVAL_MS: u64 = 1000;

/// Client configuration loaded from environment variables.
///
/// Everything here is passed through to the coordinator or the presentation
/// layer as-is; nothing is reinterpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // Channel
    pub ws_url: String,

    // Sentiment enrichment
    pub sentiment_enabled: bool,
    pub sentiment_udf: String,

    // Hints
    pub cache_threshold: Option<u64>,
    pub query_slicing_millis: i64,
    pub live_count_interval: Duration,

    // Default query window
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,

    // UI pass-through
    pub predefined_keywords: Vec<String>,
    pub remove_search_bar: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            sentiment_enabled: false,
            sentiment_udf: DEFAULT_SENTIMENT_UDF.to_string(),
            cache_threshold: None,
            query_slicing_millis: 0,
            live_count_interval: Duration::from_millis(DEFAULT_LIVE_COUNT_INTERVAL_MS),
            start_date: default_start_date(),
            end_date: None,
            predefined_keywords: Vec::new(),
            remove_search_bar: false,
        }
    }
}

impl Config {
    /// Load configuration from `TWITTERMAP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup. Unset keys fall
    /// back to defaults; malformed values are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            ws_url: get("TWITTERMAP_WS_URL").unwrap_or(defaults.ws_url),
            sentiment_enabled: parse_bool("TWITTERMAP_SENTIMENT_ENABLED", get("TWITTERMAP_SENTIMENT_ENABLED"))?
                .unwrap_or(defaults.sentiment_enabled),
            sentiment_udf: get("TWITTERMAP_SENTIMENT_UDF").unwrap_or(defaults.sentiment_udf),
            cache_threshold: parse_num("TWITTERMAP_CACHE_THRESHOLD", get("TWITTERMAP_CACHE_THRESHOLD"))?,
            query_slicing_millis: parse_num(
                "TWITTERMAP_QUERY_SLICING_MILLIS",
                get("TWITTERMAP_QUERY_SLICING_MILLIS"),
            )?
            .unwrap_or(defaults.query_slicing_millis),
            live_count_interval: parse_num::<u64>(
                "TWITTERMAP_LIVE_COUNT_INTERVAL_MS",
                get("TWITTERMAP_LIVE_COUNT_INTERVAL_MS"),
            )?
            .map(Duration::from_millis)
            .unwrap_or(defaults.live_count_interval),
            start_date: parse_date("TWITTERMAP_START_DATE", get("TWITTERMAP_START_DATE"))?
                .unwrap_or(defaults.start_date),
            end_date: parse_date("TWITTERMAP_END_DATE", get("TWITTERMAP_END_DATE"))?,
            predefined_keywords: get("TWITTERMAP_PREDEFINED_KEYWORDS")
                .map(|raw| {
                    raw.split(',')
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            remove_search_bar: parse_bool("TWITTERMAP_REMOVE_SEARCH_BAR", get("TWITTERMAP_REMOVE_SEARCH_BAR"))?
                .unwrap_or(defaults.remove_search_bar),
        })
    }

    /// Slicing hint to attach to batches, if one is configured.
    pub fn slice_millis(&self) -> Option<i64> {
        (self.query_slicing_millis > 0).then_some(self.query_slicing_millis)
    }

    /// Scoring function reference when sentiment enrichment is on.
    pub fn sentiment(&self) -> Option<&str> {
        self.sentiment_enabled.then_some(self.sentiment_udf.as_str())
    }

    /// The query the map opens with: the configured window, all states.
    pub fn default_parameters(&self) -> QueryParameters {
        let interval = match self.end_date {
            Some(end) => TimeInterval::new(self.start_date, end),
            None => TimeInterval::until_now(self.start_date),
        };
        QueryParameters::new(interval)
    }

    /// Log the effective settings.
    pub fn log_summary(&self) {
        info!(
            ws_url = self.ws_url.as_str(),
            sentiment_enabled = self.sentiment_enabled,
            slicing_millis = self.query_slicing_millis,
            live_count_ms = self.live_count_interval.as_millis() as u64,
            cache_threshold = ?self.cache_threshold,
            predefined_keywords = self.predefined_keywords.len(),
            "Loaded twittermap config"
        );
    }
}

fn default_start_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 11, 22, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn parse_bool(key: &'static str, raw: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn parse_num<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|raw| {
        raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
    })
    .transpose()
}

fn parse_date(key: &'static str, raw: Option<String>) -> Result<Option<DateTime<Utc>>, ConfigError> {
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            })
    })
    .transpose()
}
