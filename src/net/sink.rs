//! Outbound message boundary
//!
//! Systems never touch sockets. They hand each message to a [`MessageSink`],
//! which either encodes it for the transport or records it for tests.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::error;

use crate::metrics::Metrics;
use crate::net::protocol::{encode, EncodeError, NetworkId, ServerMessage};
use crate::net::queue::{MessageProducer, QueueError};
use crate::net::receiver::RawFrame;

/// Why a message never reached the outbound queue
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("outbound {0}")]
    Queue(#[from] QueueError),
}

/// Serialize-and-send capability used by the server systems
///
/// `Ok` means the message was handed to the transport. Callers that track
/// what a client knows must only commit that knowledge on `Ok`.
pub trait MessageSink<M> {
    fn send(&mut self, to: NetworkId, message: M) -> Result<(), SendError>;
}

/// Encodes messages and hands the frames to the transport's outbound queue
pub struct ChannelSink {
    outbound: MessageProducer<RawFrame>,
    metrics: Arc<Metrics>,
}

impl ChannelSink {
    pub fn new(outbound: MessageProducer<RawFrame>, metrics: Arc<Metrics>) -> Self {
        Self { outbound, metrics }
    }
}

impl MessageSink<ServerMessage> for ChannelSink {
    fn send(&mut self, to: NetworkId, message: ServerMessage) -> Result<(), SendError> {
        let payload = match encode(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {} for {}: {}", message.kind(), to, e);
                self.metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        let len = payload.len();
        match self.outbound.push(RawFrame { net_id: to, payload }) {
            Ok(()) => {
                self.metrics.record_send(len);
                Ok(())
            }
            // Saturation already logged by the queue
            Err(e) => {
                self.metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }
}

/// Keeps every message in memory, in send order
///
/// An optional limit makes it refuse messages once that many are held, the
/// way a saturated outbound queue would.
#[derive(Debug, Clone)]
pub struct RecordingSink<M = ServerMessage> {
    sent: Vec<(NetworkId, M)>,
    limit: Option<usize>,
}

impl<M> Default for RecordingSink<M> {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            limit: None,
        }
    }
}

impl<M> RecordingSink<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            sent: Vec::new(),
            limit: Some(limit),
        }
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn sent(&self) -> &[(NetworkId, M)] {
        &self.sent
    }

    /// Take everything recorded so far
    pub fn take(&mut self) -> Vec<(NetworkId, M)> {
        std::mem::take(&mut self.sent)
    }

    pub fn to(&self, net_id: NetworkId) -> impl Iterator<Item = &M> {
        self.sent
            .iter()
            .filter(move |(to, _)| *to == net_id)
            .map(|(_, m)| m)
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

impl<M> MessageSink<M> for RecordingSink<M> {
    fn send(&mut self, to: NetworkId, message: M) -> Result<(), SendError> {
        if self.limit.is_some_and(|limit| self.sent.len() >= limit) {
            return Err(QueueError::Full.into());
        }
        self.sent.push((to, message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::registry::Entity;
    use crate::net::protocol::decode;
    use crate::net::queue::MessageQueue;

    fn delete(tick_num: u32) -> ServerMessage {
        ServerMessage::EntityDelete {
            tick_num,
            entity: Entity::new(1, 0),
        }
    }

    #[test]
    fn test_channel_sink_encodes_and_counts() {
        let outbound = MessageQueue::new("outbound", 4);
        let metrics = Arc::new(Metrics::new());
        let mut sink = ChannelSink::new(outbound.producer(), metrics.clone());

        sink.send(3, delete(9)).unwrap();

        let frame = outbound.pop().unwrap();
        assert_eq!(frame.net_id, 3);
        let decoded: ServerMessage = decode(&frame.payload).unwrap();
        assert_eq!(decoded, delete(9));
        assert_eq!(metrics.messages_sent.load(Ordering::Relaxed), 1);
        assert_eq!(
            metrics.bytes_sent.load(Ordering::Relaxed),
            frame.payload.len() as u64
        );
    }

    #[test]
    fn test_channel_sink_counts_saturation() {
        let outbound = MessageQueue::new("outbound", 1);
        let metrics = Arc::new(Metrics::new());
        let mut sink = ChannelSink::new(outbound.producer(), metrics.clone());

        assert!(sink.send(1, delete(1)).is_ok());
        assert!(matches!(
            sink.send(1, delete(2)),
            Err(SendError::Queue(QueueError::Full))
        ));
        assert_eq!(metrics.messages_sent.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.messages_dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_recording_sink() {
        let mut sink = RecordingSink::new();
        sink.send(1, delete(1)).unwrap();
        sink.send(2, delete(2)).unwrap();
        assert_eq!(sink.to(2).count(), 1);
        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());

        sink.set_limit(Some(1));
        sink.send(1, delete(3)).unwrap();
        assert!(sink.send(1, delete(4)).is_err());
        assert_eq!(sink.len(), 1);
    }
}
