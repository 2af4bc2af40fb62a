//! Per-geography aggregate cache, valid for one query signature at a time.
//!
//! The signature is the (keyword set, time interval) pair. Entering a
//! different signature drops every entry; operations issued against a
//! signature that is no longer current see an empty cache and cannot write.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use twittermap_common::{GeoId, Granularity, QueryParameters, TimeInterval};

use crate::error::{ClientError, Result};
use crate::model::GeoAggregate;

/// The (keyword set, time interval) a cache scope is valid for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeSignature {
    keywords: Vec<String>,
    interval: TimeInterval,
}

impl ScopeSignature {
    pub fn of(params: &QueryParameters) -> Self {
        let mut keywords = params.normalized_keywords();
        keywords.sort();
        keywords.dedup();
        Self {
            keywords,
            interval: params.time_interval,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

/// Split of a requested id set against the cache, input order preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub cached: Vec<GeoId>,
    pub missing: Vec<GeoId>,
}

#[derive(Debug, Default)]
pub struct ResultCache {
    scope: Option<ScopeSignature>,
    entries: HashMap<Granularity, HashMap<GeoId, GeoAggregate>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self) -> Option<&ScopeSignature> {
        self.scope.as_ref()
    }

    pub fn is_current(&self, scope: &ScopeSignature) -> bool {
        self.scope.as_ref() == Some(scope)
    }

    /// Make `scope` the live scope. Returns `true` when this replaced a
    /// different scope (or none), in which case all entries were dropped.
    pub fn enter_scope(&mut self, scope: &ScopeSignature) -> bool {
        if self.is_current(scope) {
            return false;
        }
        let dropped = self.len();
        self.entries.clear();
        self.scope = Some(scope.clone());
        debug!(dropped, "Cache scope replaced");
        true
    }

    /// Number of cached (level, id) entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, scope: &ScopeSignature, level: Granularity, geo_id: GeoId) -> bool {
        self.is_current(scope)
            && self
                .entries
                .get(&level)
                .is_some_and(|level_entries| level_entries.contains_key(&geo_id))
    }

    /// Split `ids` into those holding a value under `scope` and the rest.
    pub fn partition(&self, scope: &ScopeSignature, ids: &[GeoId], level: Granularity) -> Partition {
        let mut partition = Partition::default();
        for &id in ids {
            if self.contains(scope, level, id) {
                partition.cached.push(id);
            } else {
                partition.missing.push(id);
            }
        }
        partition
    }

    /// Cached aggregates for `ids`, in first-occurrence order. Ids that are
    /// not cached are skipped; repeated ids appear once.
    pub fn lookup(&self, scope: &ScopeSignature, ids: &[GeoId], level: Granularity) -> Vec<GeoAggregate> {
        if !self.is_current(scope) {
            return Vec::new();
        }
        let Some(level_entries) = self.entries.get(&level) else {
            return Vec::new();
        };

        let mut seen = HashSet::with_capacity(ids.len());
        ids.iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| level_entries.get(id).cloned())
            .collect()
    }

    /// Insert or overwrite the values of exactly `ids`. Every id must have a
    /// value in `fresh`; values for other ids are ignored. Returns the number
    /// of distinct ids written.
    pub fn merge(
        &mut self,
        scope: &ScopeSignature,
        ids: &[GeoId],
        level: Granularity,
        fresh: &[GeoAggregate],
    ) -> Result<usize> {
        if !self.is_current(scope) {
            return Err(ClientError::ScopeMismatch);
        }

        let by_id: HashMap<GeoId, &GeoAggregate> = fresh.iter().map(|agg| (agg.geo_id, agg)).collect();
        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<GeoId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let missing: Vec<GeoId> = unique.iter().copied().filter(|id| !by_id.contains_key(id)).collect();
        if !missing.is_empty() {
            return Err(ClientError::IncompleteMerge { missing });
        }

        let level_entries = self.entries.entry(level).or_default();
        for id in &unique {
            if let Some(agg) = by_id.get(id) {
                level_entries.insert(*id, (*agg).clone());
            }
        }
        Ok(unique.len())
    }
}
