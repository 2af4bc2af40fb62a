//! State shared by the coordinator and the reconciler.
//!
//! One `SessionState` per session, always behind the session's lock: the
//! coordinator mutates it when a query is issued, the reconciler when a
//! frame lands, never both at once.

use twittermap_common::{GeoId, Granularity, QueryParameters, TimeBin};

use crate::cache::{ResultCache, ScopeSignature};
use crate::correlation::{BatchShape, CorrelationKey};
use crate::model::{GeoAggregate, ResultModel};

/// A batch sent and not yet completed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    pub key: CorrelationKey,
    pub shape: BatchShape,
    pub scope: ScopeSignature,
    pub level: Granularity,
    pub time_bin: TimeBin,
    /// The full id set the caller asked for.
    pub requested_ids: Vec<GeoId>,
    /// The ids the geo sub-query was restricted to; empty for `NoneCached`.
    pub fetched_ids: Vec<GeoId>,
    /// Cached aggregates for the ids that were not fetched.
    pub cached_values: Vec<GeoAggregate>,
    /// Geo component of the latest data payload, if one arrived.
    pub fresh_geo: Option<Vec<GeoAggregate>>,
}

impl PendingBatch {
    pub fn generation(&self) -> u64 {
        self.key.generation
    }
}

#[derive(Debug)]
pub struct SessionState {
    pub parameters: QueryParameters,
    /// Generation of the most recently issued query; 0 before the first.
    pub generation: u64,
    pub cache: ResultCache,
    pub model: ResultModel,
    pub pending: Option<PendingBatch>,
}

impl SessionState {
    pub fn new(parameters: QueryParameters) -> Self {
        Self {
            parameters,
            generation: 0,
            cache: ResultCache::new(),
            model: ResultModel::default(),
            pending: None,
        }
    }
}
