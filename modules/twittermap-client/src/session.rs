//! One explorer session: cache, result model, and the channel they talk over.
//!
//! All mutable state sits behind a single lock. The coordinator and the
//! reconciler each take it for the duration of one step and publish a
//! snapshot of the model when they let go, so watchers only ever see whole
//! models.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use twittermap_common::{Config, QueryParameters};
use twittermap_query::live_count;

use crate::channel::Channel;
use crate::coordinator::BatchCoordinator;
use crate::correlation::CorrelationKey;
use crate::error::{ClientError, Result};
use crate::live_count::spawn_live_count_task;
use crate::model::{GeoAggregate, HashtagCount, ReportedError, ResultModel, TimeBucket};
use crate::reconciler::{Outcome, ResponseReconciler};
use crate::state::SessionState;

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    channel: Arc<dyn Channel>,
    coordinator: BatchCoordinator,
    reconciler: ResponseReconciler,
    state: Mutex<SessionState>,
    /// Batch messages waiting for the channel to open, in send order.
    outbox: tokio::sync::Mutex<VecDeque<String>>,
    model_tx: watch::Sender<ResultModel>,
}

impl Session {
    pub fn new(config: &Config, channel: Arc<dyn Channel>) -> Self {
        let (model_tx, _) = watch::channel(ResultModel::default());
        let id = Uuid::new_v4();
        info!(session = %id, ws_url = %config.ws_url, "Session created");
        Self {
            inner: Arc::new(Inner {
                id,
                channel,
                coordinator: BatchCoordinator::from_config(config),
                reconciler: ResponseReconciler,
                state: Mutex::new(SessionState::new(config.default_parameters())),
                outbox: tokio::sync::Mutex::new(VecDeque::new()),
                model_tx,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, model: ResultModel) {
        self.inner.model_tx.send_replace(model);
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Issue a query. The cached part of the map result is visible as soon
    /// as this returns; the requests go out now if the channel is open and
    /// are queued otherwise.
    pub async fn issue_query(&self, parameters: QueryParameters) -> Result<CorrelationKey> {
        let (key, messages, model) = {
            let mut state = self.lock();
            let dispatch = self.inner.coordinator.prepare(&mut state, parameters);
            (dispatch.key, dispatch.messages()?, state.model.clone())
        };
        self.publish(model);

        let mut outbox = self.inner.outbox.lock().await;
        outbox.extend(messages);
        if self.inner.channel.is_open() {
            self.drain(&mut outbox).await?;
        } else {
            debug!(
                session = %self.inner.id,
                key = %key,
                queued = outbox.len(),
                state = ?self.inner.channel.state(),
                "Channel not open, batch queued"
            );
        }
        Ok(key)
    }

    /// Send whatever is queued, if the channel is open. Returns the number
    /// of messages sent.
    pub async fn flush_outbox(&self) -> Result<usize> {
        if !self.inner.channel.is_open() {
            return Ok(0);
        }
        let mut outbox = self.inner.outbox.lock().await;
        self.drain(&mut outbox).await
    }

    async fn drain(&self, outbox: &mut VecDeque<String>) -> Result<usize> {
        let mut sent = 0;
        while let Some(message) = outbox.front() {
            self.inner
                .channel
                .send(message.clone())
                .await
                .map_err(|e| ClientError::Channel(e.to_string()))?;
            outbox.pop_front();
            sent += 1;
        }
        Ok(sent)
    }

    pub async fn outbox_len(&self) -> usize {
        self.inner.outbox.lock().await.len()
    }

    /// One live-count poll: flush queued batches and request the dataset
    /// count. Skipped, not queued, when the channel is not open. Returns
    /// whether the poll went out.
    pub async fn poll_live_count(&self) -> Result<bool> {
        if !self.inner.channel.is_open() {
            debug!(
                session = %self.inner.id,
                state = ?self.inner.channel.state(),
                "Channel not open, live count skipped"
            );
            return Ok(false);
        }

        self.flush_outbox().await?;
        let dataset = self.lock().parameters.dataset.clone();
        let message = serde_json::to_string(&live_count(&dataset))?;
        self.inner
            .channel
            .send(message)
            .await
            .map_err(|e| ClientError::Channel(e.to_string()))?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Decode and reconcile one inbound frame.
    pub fn apply_frame(&self, text: &str) -> Outcome {
        let (outcome, model) = {
            let mut state = self.lock();
            let outcome = self.inner.reconciler.reconcile(&mut state, text);
            (outcome, state.model.clone())
        };
        if !matches!(outcome, Outcome::Stale { .. } | Outcome::Ignored) {
            self.publish(model);
        }
        outcome
    }

    /// Consume inbound frames in delivery order until the sender is dropped.
    pub fn spawn_reconciler(&self, mut rx: mpsc::Receiver<String>) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            let mut frames = 0u64;
            while let Some(text) = rx.recv().await {
                session.apply_frame(&text);
                frames += 1;
            }
            info!(session = %session.inner.id, frames, "Inbound stream closed, reconciler stopped");
        })
    }

    pub fn spawn_live_count(&self, period: Duration) -> JoinHandle<()> {
        spawn_live_count_task(self.clone(), period)
    }

    // -----------------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------------

    pub fn model(&self) -> ResultModel {
        self.inner.model_tx.borrow().clone()
    }

    /// Receiver that sees a new snapshot after every model change.
    pub fn subscribe(&self) -> watch::Receiver<ResultModel> {
        self.inner.model_tx.subscribe()
    }

    pub fn total_count(&self) -> u64 {
        self.inner.model_tx.borrow().total_count
    }

    pub fn time_result(&self) -> Vec<TimeBucket> {
        self.inner.model_tx.borrow().time_result.clone()
    }

    pub fn map_result(&self) -> Vec<GeoAggregate> {
        self.inner.model_tx.borrow().map_result.clone()
    }

    pub fn hashtag_result(&self) -> Vec<HashtagCount> {
        self.inner.model_tx.borrow().hashtag_result.clone()
    }

    pub fn sample_rows(&self) -> Vec<Value> {
        self.inner.model_tx.borrow().sample_rows.clone()
    }

    pub fn last_error(&self) -> Option<ReportedError> {
        self.inner.model_tx.borrow().last_error.clone()
    }

    pub fn parameters(&self) -> QueryParameters {
        self.lock().parameters.clone()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Number of cached geo aggregates in the live scope.
    pub fn cached_len(&self) -> usize {
        self.lock().cache.len()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("channel", &self.inner.channel.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelState, MemoryChannel};
    use crate::testing::{data_frame, done_frame, geo_rows, hashtag_rows, params_with_ids, time_rows};

    fn session() -> (Session, Arc<MemoryChannel>, mpsc::UnboundedReceiver<String>) {
        let (channel, rx) = MemoryChannel::open();
        let channel = Arc::new(channel);
        (Session::new(&Config::default(), channel.clone()), channel, rx)
    }

    #[tokio::test]
    async fn issue_sends_sample_then_batch() {
        let (session, _channel, mut rx) = session();
        let key = session.issue_query(params_with_ids(&[1, 2])).await.unwrap();

        assert_eq!(key.to_string(), "full:1");
        let sample = rx.recv().await.unwrap();
        let batch = rx.recv().await.unwrap();
        assert!(sample.contains("\"sample:1\""));
        assert!(batch.contains("\"full:1\""));
        assert_eq!(session.generation(), 1);
    }

    #[tokio::test]
    async fn closed_channel_queues_until_flushed() {
        let (session, channel, mut rx) = session();
        channel.set_state(ChannelState::Connecting);

        session.issue_query(params_with_ids(&[1])).await.unwrap();
        assert_eq!(session.outbox_len().await, 2);
        assert!(rx.try_recv().is_err());

        channel.set_state(ChannelState::Open);
        assert_eq!(session.flush_outbox().await.unwrap(), 2);
        assert_eq!(session.outbox_len().await, 0);
        assert!(rx.recv().await.unwrap().contains("sample:1"));
    }

    #[tokio::test]
    async fn snapshot_published_after_each_frame() {
        let (session, _channel, _rx) = session();
        let mut watcher = session.subscribe();
        let key = session.issue_query(params_with_ids(&[7])).await.unwrap().to_string();
        watcher.borrow_and_update();

        session.apply_frame(&data_frame(&key, vec![time_rows(1), geo_rows("state", &[7]), hashtag_rows(&[])]));
        assert!(watcher.has_changed().unwrap());
        assert_eq!(watcher.borrow_and_update().map_result[0].geo_id, 7);

        session.apply_frame(&done_frame(&key));
        assert_eq!(session.cached_len(), 1);
    }

    #[tokio::test]
    async fn live_count_is_skipped_not_queued() {
        let (session, channel, mut rx) = session();
        channel.set_state(ChannelState::Closed);
        assert!(!session.poll_live_count().await.unwrap());
        assert_eq!(session.outbox_len().await, 0);

        channel.set_state(ChannelState::Open);
        assert!(session.poll_live_count().await.unwrap());
        assert!(rx.recv().await.unwrap().contains("totalCount"));
    }
}
