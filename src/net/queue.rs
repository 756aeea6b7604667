//! Bounded message queues between the network thread and the simulation
//!
//! Uses crossbeam-channel for lock-free MPSC communication. Producers never
//! block: a full queue logs and drops the message. The simulation pops at
//! fixed points in the tick and never waits.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Queue is full (backpressure)
    #[error("queue full")]
    Full,
    /// Consumer side has been dropped
    #[error("queue disconnected")]
    Disconnected,
}

/// Bounded FIFO for one message type
pub struct MessageQueue<T> {
    name: &'static str,
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl<T> MessageQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            name,
            sender,
            receiver,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Clonable producer handle for other threads
    pub fn producer(&self) -> MessageProducer<T> {
        MessageProducer {
            name: self.name,
            sender: self.sender.clone(),
            dropped: self.dropped.clone(),
        }
    }

    /// Enqueue without blocking; drops and logs on saturation
    #[inline]
    pub fn push(&self, message: T) -> Result<(), QueueError> {
        push_or_drop(self.name, &self.sender, &self.dropped, message)
    }

    /// Non-blocking pop in arrival order
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Take everything currently queued
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages dropped on saturation since creation
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer side of a [`MessageQueue`]
pub struct MessageProducer<T> {
    name: &'static str,
    sender: Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for MessageProducer<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            sender: self.sender.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> MessageProducer<T> {
    /// Enqueue without blocking; drops and logs on saturation
    #[inline]
    pub fn push(&self, message: T) -> Result<(), QueueError> {
        push_or_drop(self.name, &self.sender, &self.dropped, message)
    }
}

fn push_or_drop<T>(
    name: &'static str,
    sender: &Sender<T>,
    dropped: &AtomicU64,
    message: T,
) -> Result<(), QueueError> {
    sender.try_send(message).map_err(|e| match e {
        TrySendError::Full(_) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Queue '{}' saturated, dropping message", name);
            QueueError::Full
        }
        TrySendError::Disconnected(_) => QueueError::Disconnected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_in_order() {
        let queue = MessageQueue::new("test", 4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_saturation_drops() {
        let queue = MessageQueue::new("test", 2);
        queue.push('a').unwrap();
        queue.push('b').unwrap();
        assert_eq!(queue.push('c'), Err(QueueError::Full));
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.drain(), vec!['a', 'b']);
    }

    #[test]
    fn test_producer_from_other_thread() {
        let queue = MessageQueue::new("test", 100);
        let producer = queue.producer();
        let handle = std::thread::spawn(move || {
            for i in 0..50 {
                producer.push(i).unwrap();
            }
        });
        handle.join().unwrap();
        assert_eq!(queue.drain(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_producer_counts_drops() {
        let queue = MessageQueue::new("test", 1);
        let producer = queue.producer();
        producer.push(0).unwrap();
        assert_eq!(producer.push(1), Err(QueueError::Full));
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.capacity(), 1);
    }
}
