//! Bounded FIFO for messages sent while the connection is down

use crate::traits::{Result, TransportSink, WsMessage};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Default number of messages kept while disconnected
pub const DEFAULT_QUEUE_CAPACITY: usize = 5000;

/// Drop-oldest outbound queue
///
/// Never grows past its capacity: admitting a message into a full queue
/// evicts the oldest one. Retained messages keep their call order.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<WsMessage>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a message, returning the evicted one if the queue was full
    pub fn enqueue(&mut self, message: WsMessage) -> Option<WsMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        if evicted.is_some() {
            warn!(capacity = self.capacity, "Outbound queue full, dropped oldest message");
        }
        self.items.push_back(message);
        evicted
    }

    /// Put a message that failed to send back at the head of the queue
    ///
    /// Returns false when the queue is full: the message would be the oldest
    /// entry and is dropped instead.
    pub fn requeue(&mut self, message: WsMessage) -> bool {
        if self.items.len() >= self.capacity {
            warn!(capacity = self.capacity, "Outbound queue full, dropped unsent message");
            return false;
        }
        self.items.push_front(message);
        true
    }

    /// Send queued messages in order
    ///
    /// Stops at the first failed send; the failed message goes back to the
    /// front so nothing is lost or reordered. Returns how many were sent.
    pub async fn flush<S>(&mut self, sink: &mut S) -> Result<usize>
    where
        S: TransportSink + ?Sized,
    {
        let mut sent = 0;
        while let Some(message) = self.items.pop_front() {
            if let Err(e) = sink.send(message.clone()).await {
                self.items.push_front(message);
                warn!(sent, remaining = self.items.len(), error = %e, "Queue flush interrupted");
                return Err(e);
            }
            sent += 1;
        }
        if sent > 0 {
            debug!(sent, "Flushed outbound queue");
        }
        Ok(sent)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &WsMessage> {
        self.items.iter()
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::SocketError;
    use async_trait::async_trait;

    /// Records sends; fails the send with index `fail_at` once
    struct RecordingSink {
        sent: Vec<WsMessage>,
        fail_at: Option<usize>,
        calls: usize,
    }

    #[async_trait]
    impl TransportSink for RecordingSink {
        async fn send(&mut self, message: WsMessage) -> Result<()> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_at == Some(call) {
                return Err(SocketError::Transport("broken pipe".into()));
            }
            self.sent.push(message);
            Ok(())
        }

        async fn close(&mut self, _code: u16, _reason: &str) -> Result<()> {
            Ok(())
        }
    }

    fn msg(n: usize) -> WsMessage {
        WsMessage::Text(format!("m{n}"))
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let mut queue = OutboundQueue::new(5000);
        let mut evicted = Vec::new();
        for n in 1..=5001 {
            if let Some(old) = queue.enqueue(msg(n)) {
                evicted.push(old);
            }
        }
        assert_eq!(evicted, vec![msg(1)]);
        assert_eq!(queue.len(), 5000);
        let retained: Vec<_> = queue.iter().cloned().collect();
        let expected: Vec<_> = (2..=5001).map(msg).collect();
        assert_eq!(retained, expected);
    }

    #[tokio::test]
    async fn test_flush_preserves_order() {
        let mut queue = OutboundQueue::new(10);
        for n in 0..4 {
            queue.enqueue(msg(n));
        }
        let mut sink = RecordingSink { sent: Vec::new(), fail_at: None, calls: 0 };
        assert_eq!(queue.flush(&mut sink).await.unwrap(), 4);
        assert_eq!(sink.sent, (0..4).map(msg).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_is_put_back_in_front() {
        let mut queue = OutboundQueue::new(10);
        for n in 0..4 {
            queue.enqueue(msg(n));
        }
        let mut sink = RecordingSink { sent: Vec::new(), fail_at: Some(2), calls: 0 };
        assert!(queue.flush(&mut sink).await.is_err());
        assert_eq!(sink.sent, vec![msg(0), msg(1)]);
        assert_eq!(queue.iter().cloned().collect::<Vec<_>>(), vec![msg(2), msg(3)]);

        assert_eq!(queue.flush(&mut sink).await.unwrap(), 2);
        assert_eq!(sink.sent, (0..4).map(msg).collect::<Vec<_>>());
    }

    #[test]
    fn test_requeue_goes_first() {
        let mut queue = OutboundQueue::new(3);
        queue.enqueue(msg(2));
        assert!(queue.requeue(msg(1)));
        queue.enqueue(msg(3));
        assert_eq!(queue.iter().cloned().collect::<Vec<_>>(), vec![msg(1), msg(2), msg(3)]);
        assert!(!queue.requeue(msg(0)));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut queue = OutboundQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.enqueue(msg(1)).is_none());
        assert_eq!(queue.enqueue(msg(2)), Some(msg(1)));
    }
}
