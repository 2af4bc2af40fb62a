//! Applies inbound frames to the session state.
//!
//! Nothing here propagates an error to the caller: every failure ends up in
//! `ResultModel::last_error` and the frame is otherwise ignored, so one bad
//! frame never stalls the batches still in flight.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use twittermap_common::GeoId;

use crate::correlation::{BatchShape, Component};
use crate::error::{ClientError, Result};
use crate::frame::{BatchPayload, InboundFrame};
use crate::model::{decode_rows, rank_hashtags, GeoAggregate, HashtagCount, ReportedError, TimeBucket};
use crate::state::{PendingBatch, SessionState};

/// What applying one frame did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    SampleReplaced { rows: usize },
    BatchData { shape: BatchShape, generation: u64 },
    BatchCompleted { shape: BatchShape, generation: u64, merged: usize },
    TotalCount(u64),
    BackendError,
    /// Frame belongs to a superseded query.
    Stale { generation: u64 },
    Ignored,
    /// Frame was rejected; the reason is in the model's error field.
    Rejected,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseReconciler;

impl ResponseReconciler {
    /// Decode and apply one text frame.
    pub fn reconcile(&self, state: &mut SessionState, text: &str) -> Outcome {
        let applied = InboundFrame::decode(text).and_then(|frame| self.apply(state, frame));
        self.settle(state, applied)
    }

    fn settle(&self, state: &mut SessionState, applied: Result<Outcome>) -> Outcome {
        match applied {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, generation = state.generation, "Rejected inbound frame");
                state.model.last_error = Some(ReportedError::from_client_error(&err));
                Outcome::Rejected
            }
        }
    }

    /// Apply `frame`. On error the model is left untouched.
    pub fn apply(&self, state: &mut SessionState, frame: InboundFrame) -> Result<Outcome> {
        match frame {
            InboundFrame::Sample { generation, rows } => {
                if let Some(stale) = check_generation(state, generation)? {
                    return Ok(stale);
                }
                let count = rows.len();
                state.model.sample_rows = rows;
                Ok(Outcome::SampleReplaced { rows: count })
            }
            InboundFrame::Batch {
                shape,
                generation,
                payload,
            } => {
                if let Some(stale) = check_generation(state, generation)? {
                    return Ok(stale);
                }
                match payload {
                    BatchPayload::Data(components) => apply_data(state, shape, components),
                    BatchPayload::Done => complete(state, shape),
                }
            }
            InboundFrame::TotalCount(count) => {
                state.model.total_count = count;
                Ok(Outcome::TotalCount(count))
            }
            InboundFrame::BackendError(payload) => {
                error!(payload = %payload, "Backend reported an error");
                state.model.last_error = Some(ReportedError::Backend(payload));
                Ok(Outcome::BackendError)
            }
            InboundFrame::Done => Ok(Outcome::Ignored),
            InboundFrame::Unknown { key } => Err(ClientError::Protocol(format!("unknown frame key {key:?}"))),
        }
    }
}

/// `Some(Stale)` when the frame belongs to an older query.
fn check_generation(state: &SessionState, generation: Option<u64>) -> Result<Option<Outcome>> {
    match generation {
        Some(g) if g < state.generation => {
            debug!(frame_generation = g, current = state.generation, "Discarding stale frame");
            Ok(Some(Outcome::Stale { generation: g }))
        }
        Some(g) if g > state.generation => Err(ClientError::Protocol(format!(
            "frame for generation {g} which was never issued (current {})",
            state.generation
        ))),
        _ => Ok(None),
    }
}

fn pending_for<'a>(state: &'a mut SessionState, shape: BatchShape) -> Result<&'a mut PendingBatch> {
    let generation = state.generation;
    match state.pending.as_mut() {
        Some(pending) if pending.shape == shape && pending.generation() == generation => Ok(pending),
        _ => Err(ClientError::Protocol(format!(
            "no pending {shape} batch for generation {generation}"
        ))),
    }
}

/// Rows for `ids` only, first occurrence of each id, in received order.
fn restrict_to(rows: Vec<GeoAggregate>, ids: &[GeoId]) -> Vec<GeoAggregate> {
    let wanted: HashSet<GeoId> = ids.iter().copied().collect();
    let mut seen = HashSet::with_capacity(wanted.len());
    rows.into_iter()
        .filter(|a| wanted.contains(&a.geo_id) && seen.insert(a.geo_id))
        .collect()
}

fn apply_data(state: &mut SessionState, shape: BatchShape, components: Vec<Value>) -> Result<Outcome> {
    let pending = pending_for(state, shape)?;
    let expected = shape.components();
    if components.len() != expected.len() {
        return Err(ClientError::ShapeMismatch {
            key: pending.key.to_string(),
            expected: expected.len(),
            actual: components.len(),
        });
    }

    // Decode everything before touching the model.
    let mut time = None;
    let mut geo = None;
    let mut hashtags = None;
    for (component, value) in expected.iter().zip(&components) {
        match component {
            Component::TimeSeries => {
                let bin = pending.time_bin;
                time = Some(decode_rows(value, "time series", |row| TimeBucket::from_row(row, bin))?);
            }
            Component::GeoAggregate => {
                let level = pending.level;
                geo = Some(decode_rows(value, "geo", |row| GeoAggregate::from_row(row, level))?);
            }
            Component::Hashtags => {
                hashtags = Some(rank_hashtags(decode_rows(value, "hashtag", HashtagCount::from_row)?));
            }
        }
    }

    let generation = pending.generation();
    let map = geo.map(|rows| {
        let fresh = restrict_to(rows, &pending.fetched_ids);
        let map = match shape {
            BatchShape::Partial => {
                let mut merged = pending.cached_values.clone();
                merged.extend(fresh.iter().cloned());
                merged
            }
            _ => fresh.clone(),
        };
        pending.fresh_geo = Some(fresh);
        map
    });

    if let Some(time) = time {
        state.model.time_result = time;
    }
    if let Some(map) = map {
        state.model.map_result = map;
    }
    if let Some(hashtags) = hashtags {
        state.model.hashtag_result = hashtags;
    }

    Ok(Outcome::BatchData { shape, generation })
}

fn complete(state: &mut SessionState, shape: BatchShape) -> Result<Outcome> {
    pending_for(state, shape)?;
    let Some(pending) = state.pending.take() else {
        return Err(ClientError::Protocol(format!("no pending {shape} batch")));
    };
    let generation = pending.generation();

    if !shape.fetches_geo() {
        info!(generation, shape = %shape, "Batch complete");
        return Ok(Outcome::BatchCompleted {
            shape,
            generation,
            merged: 0,
        });
    }

    let Some(fresh) = pending.fresh_geo else {
        warn!(generation, shape = %shape, "Batch completed without data, cache left unchanged");
        return Ok(Outcome::BatchCompleted {
            shape,
            generation,
            merged: 0,
        });
    };

    // Geographies with no matching records have no row at all.
    let present: HashSet<GeoId> = fresh.iter().map(|a| a.geo_id).collect();
    let mut seen = HashSet::new();
    let zeros: Vec<GeoAggregate> = pending
        .fetched_ids
        .iter()
        .filter(|id| !present.contains(id) && seen.insert(**id))
        .map(|id| GeoAggregate::zero(*id))
        .collect();
    let mut aggregates = fresh;
    aggregates.extend(zeros.iter().cloned());

    let merged = state
        .cache
        .merge(&pending.scope, &pending.fetched_ids, pending.level, &aggregates)?;

    match shape {
        BatchShape::Partial => {
            state.model.map_result = state
                .cache
                .lookup(&pending.scope, &pending.requested_ids, pending.level);
        }
        _ => state.model.map_result.extend(zeros),
    }

    info!(
        generation,
        shape = %shape,
        merged,
        cached = state.cache.len(),
        "Batch complete, cache updated"
    );
    Ok(Outcome::BatchCompleted {
        shape,
        generation,
        merged,
    })
}
