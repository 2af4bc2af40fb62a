//! Turns one query issue into the minimal request set.
//!
//! The requested geo ids are partitioned against the cache and exactly one
//! of three batch shapes is chosen:
//!
//! - nothing cached → `full`: time series, geo over every id, hashtags
//! - everything cached (or no ids) → `none-cached`: time series, hashtags
//! - some cached → `partial`: time series, geo over the missing ids, hashtags
//!
//! A sample request always goes out alongside the batch.

use tracing::{debug, info};

use twittermap_common::{Config, QueryParameters};
use twittermap_query::{batch, by_geo, by_hashtag, by_time, sample, BatchRequest, QueryDescriptor};

use crate::cache::ScopeSignature;
use crate::correlation::{BatchShape, CorrelationKey};
use crate::error::Result;
use crate::state::{PendingBatch, SessionState};

/// Requests produced for one query issue, in send order.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub key: CorrelationKey,
    pub shape: BatchShape,
    pub sample: QueryDescriptor,
    pub batch: BatchRequest,
}

impl Dispatch {
    /// Serialized text frames: the sample first, then the batch.
    pub fn messages(&self) -> Result<Vec<String>> {
        Ok(vec![
            serde_json::to_string(&self.sample)?,
            serde_json::to_string(&self.batch)?,
        ])
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchCoordinator {
    sentiment_udf: Option<String>,
    slice_millis: Option<i64>,
}

impl BatchCoordinator {
    pub fn new(sentiment_udf: Option<String>, slice_millis: Option<i64>) -> Self {
        Self {
            sentiment_udf,
            slice_millis: slice_millis.filter(|ms| *ms > 0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sentiment().map(str::to_string), config.slice_millis())
    }

    /// Plan the requests for `params` and record the pending batch.
    ///
    /// Bumps the generation, enters the query's cache scope, and fills the
    /// map result from the cache for everything that will not be fetched.
    pub fn prepare(&self, state: &mut SessionState, params: QueryParameters) -> Dispatch {
        state.generation += 1;
        let generation = state.generation;

        let scope = ScopeSignature::of(&params);
        if state.cache.enter_scope(&scope) {
            info!(
                generation,
                keywords = ?scope.keywords(),
                "Query signature changed, starting a new cache scope"
            );
        }

        let level = params.geo_level;
        let partition = state.cache.partition(&scope, &params.geo_ids, level);
        let shape = if partition.missing.is_empty() {
            BatchShape::NoneCached
        } else if partition.cached.is_empty() {
            BatchShape::Full
        } else {
            BatchShape::Partial
        };

        info!(
            generation,
            shape = %shape,
            level = %level,
            requested = params.geo_ids.len(),
            cached = partition.cached.len(),
            missing = partition.missing.len(),
            "Issuing query"
        );

        let key = CorrelationKey::batch(shape, generation);
        let sentiment = self.sentiment_udf.as_deref();
        let components = match shape {
            BatchShape::NoneCached => vec![by_time(&params), by_hashtag(&params)],
            BatchShape::Full | BatchShape::Partial => vec![
                by_time(&params),
                by_geo(&params, &partition.missing, sentiment),
                by_hashtag(&params),
            ],
        };

        let cached_values = state.cache.lookup(&scope, &partition.cached, level);
        match shape {
            BatchShape::NoneCached | BatchShape::Partial => {
                state.model.map_result = cached_values.clone();
            }
            BatchShape::Full => {}
        }
        state.model.last_error = None;

        let fetched_ids = if shape.fetches_geo() {
            partition.missing
        } else {
            Vec::new()
        };

        let pending = PendingBatch {
            key,
            shape,
            scope,
            level,
            time_bin: params.time_bin,
            requested_ids: params.geo_ids.clone(),
            fetched_ids,
            cached_values,
            fresh_geo: None,
        };
        if let Some(previous) = state.pending.replace(pending) {
            debug!(superseded = %previous.key, by = %key, "Pending batch superseded");
        }

        let dispatch = Dispatch {
            key,
            shape,
            sample: sample(&params).wrapped(CorrelationKey::sample(generation).to_string()),
            batch: batch(components, self.slice_millis, key.to_string()),
        };
        state.parameters = params;
        dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{params_with_ids, state_with_cached};
    use twittermap_common::GeoId;

    fn geo_filter_ids(dispatch: &Dispatch) -> Option<Vec<GeoId>> {
        dispatch.batch.batch.get(1).and_then(|d| d.geo_ids()).map(<[GeoId]>::to_vec)
    }

    #[test]
    fn cold_cache_issues_full_batch() {
        let mut state = state_with_cached(&[]);
        let dispatch = BatchCoordinator::default().prepare(&mut state, params_with_ids(&[1, 2, 3]));

        assert_eq!(dispatch.shape, BatchShape::Full);
        assert_eq!(dispatch.batch.batch.len(), 3);
        assert_eq!(geo_filter_ids(&dispatch), Some(vec![1, 2, 3]));
        assert_eq!(dispatch.batch.transform.key(), "full:1");
        assert_eq!(dispatch.sample.transform.as_ref().map(|t| t.key()), Some("sample:1"));

        let pending = state.pending.as_ref().unwrap();
        assert_eq!(pending.fetched_ids, vec![1, 2, 3]);
        assert_eq!(pending.requested_ids, vec![1, 2, 3]);
    }

    #[test]
    fn warm_cache_skips_geo_and_fills_map_synchronously() {
        let mut state = state_with_cached(&[1, 2, 3]);
        let dispatch = BatchCoordinator::default().prepare(&mut state, params_with_ids(&[3, 1, 2]));

        assert_eq!(dispatch.shape, BatchShape::NoneCached);
        assert_eq!(dispatch.batch.batch.len(), 2);
        assert!(dispatch.batch.batch.iter().all(|d| d.group.as_ref().map_or(true, |g| g.lookup.is_empty())));

        let ids: Vec<GeoId> = state.model.map_result.iter().map(|a| a.geo_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert!(state.pending.as_ref().unwrap().fetched_ids.is_empty());
    }

    #[test]
    fn partial_hit_fetches_only_missing_ids() {
        let mut state = state_with_cached(&[1, 2]);
        let dispatch = BatchCoordinator::default().prepare(&mut state, params_with_ids(&[1, 2, 3, 4]));

        assert_eq!(dispatch.shape, BatchShape::Partial);
        assert_eq!(geo_filter_ids(&dispatch), Some(vec![3, 4]));

        let pending = state.pending.as_ref().unwrap();
        assert_eq!(pending.fetched_ids, vec![3, 4]);
        let cached: Vec<GeoId> = pending.cached_values.iter().map(|a| a.geo_id).collect();
        assert_eq!(cached, vec![1, 2]);
        assert_eq!(state.model.map_result, pending.cached_values);
    }

    #[test]
    fn empty_id_set_degrades_to_no_geo_batch() {
        let mut state = state_with_cached(&[]);
        let dispatch = BatchCoordinator::default().prepare(&mut state, params_with_ids(&[]));

        assert_eq!(dispatch.shape, BatchShape::NoneCached);
        assert_eq!(dispatch.batch.batch.len(), 2);
        assert!(state.model.map_result.is_empty());
    }

    #[test]
    fn keyword_change_invalidates_cache() {
        let mut state = state_with_cached(&[1, 2]);
        let params = params_with_ids(&[1, 2]).with_keywords(["flu"]);
        let dispatch = BatchCoordinator::default().prepare(&mut state, params);

        assert_eq!(dispatch.shape, BatchShape::Full);
        assert!(state.cache.is_empty());
    }

    #[test]
    fn slicing_and_sentiment_are_passed_through() {
        let mut state = state_with_cached(&[]);
        let coordinator = BatchCoordinator::new(Some("twitter.`score`".to_string()), Some(1500));
        let dispatch = coordinator.prepare(&mut state, params_with_ids(&[1]));

        assert_eq!(dispatch.batch.option.map(|o| o.slice_millis), Some(1500));
        assert_eq!(dispatch.batch.batch[1].append.len(), 1);
        assert!(dispatch.batch.batch[0].append.is_empty());

        let unsliced = BatchCoordinator::new(None, Some(-1)).prepare(&mut state, params_with_ids(&[1]));
        assert!(unsliced.batch.option.is_none());
    }

    #[test]
    fn generations_increase_and_supersede_pending() {
        let mut state = state_with_cached(&[]);
        let coordinator = BatchCoordinator::default();
        let first = coordinator.prepare(&mut state, params_with_ids(&[1]));
        let second = coordinator.prepare(&mut state, params_with_ids(&[1]));

        assert_eq!(first.key.generation, 1);
        assert_eq!(second.key.generation, 2);
        assert_eq!(state.pending.as_ref().unwrap().key, second.key);
    }

    #[test]
    fn messages_send_sample_before_batch() {
        let mut state = state_with_cached(&[]);
        let dispatch = BatchCoordinator::default().prepare(&mut state, params_with_ids(&[1]));
        let messages = dispatch.messages().unwrap();

        assert_eq!(messages.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        let second: serde_json::Value = serde_json::from_str(&messages[1]).unwrap();
        assert_eq!(first["transform"]["wrap"]["key"], "sample:1");
        assert!(second["batch"].is_array());
    }
}
