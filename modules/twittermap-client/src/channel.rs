//! The duplex text channel to the backend.
//!
//! The session only needs to know whether the channel is open and to push
//! text frames into it. Inbound frames arrive separately, as a stream handed
//! to `Session::spawn_reconciler`.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn state(&self) -> ChannelState;

    fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Send one text frame. Only called while the channel is open.
    async fn send(&self, text: String) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory channel
// ---------------------------------------------------------------------------

/// Channel backed by an unbounded queue. Sent frames come out of the paired
/// receiver; the state is flipped by hand.
pub struct MemoryChannel {
    state: Mutex<ChannelState>,
    outbound: mpsc::UnboundedSender<String>,
}

impl MemoryChannel {
    pub fn new(state: ChannelState) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Mutex::new(state),
                outbound,
            },
            rx,
        )
    }

    pub fn open() -> (Self, mpsc::UnboundedReceiver<String>) {
        Self::new(ChannelState::Open)
    }

    pub fn connecting() -> (Self, mpsc::UnboundedReceiver<String>) {
        Self::new(ChannelState::Connecting)
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(anyhow!("channel is {:?}", self.state()));
        }
        self.outbound
            .send(text)
            .map_err(|_| anyhow!("channel receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_channel_delivers_in_order() {
        let (channel, mut rx) = MemoryChannel::open();
        channel.send("a".into()).await.unwrap();
        channel.send("b".into()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn closed_channel_refuses_to_send() {
        let (channel, mut rx) = MemoryChannel::connecting();
        assert!(!channel.is_open());
        assert!(channel.send("a".into()).await.is_err());

        channel.set_state(ChannelState::Open);
        channel.send("b".into()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }
}
