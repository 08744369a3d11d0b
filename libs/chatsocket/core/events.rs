//! Typed lifecycle event bus
//!
//! Listeners register for one [`EventKind`] and get every [`ClientEvent`] of
//! that kind. Streams (`crossbeam_channel` receivers) get every event.
//! Emission snapshots the listener list and calls it outside the lock, so a
//! listener may register or remove listeners itself.

use crate::traits::{Envelope, SocketError, TransportKind};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Event names listeners can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Connecting,
    Close,
    Error,
    Message,
    Reconnecting,
    Reconnected,
    Heartbeat,
}

/// Events emitted by the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection is open and usable
    Open { transport: TransportKind },
    /// A connection attempt started (0 for the first attempt)
    Connecting { attempt: u32 },
    /// Connection closed
    Close { code: u16, reason: String },
    /// Transport, protocol or reconnection failure
    Error(SocketError),
    /// Inbound data not claimed by a subscription or a pending request
    Message(Envelope),
    /// Reconnect scheduled after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Open again after `attempts` failed or dropped attempts
    Reconnected { attempts: u32 },
    /// Heartbeat probe sent on an idle connection
    Heartbeat { missed: u32 },
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Open { .. } => EventKind::Open,
            ClientEvent::Connecting { .. } => EventKind::Connecting,
            ClientEvent::Close { .. } => EventKind::Close,
            ClientEvent::Error(_) => EventKind::Error,
            ClientEvent::Message(_) => EventKind::Message,
            ClientEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ClientEvent::Reconnected { .. } => EventKind::Reconnected,
            ClientEvent::Heartbeat { .. } => EventKind::Heartbeat,
        }
    }
}

pub type EventListener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

struct Registered {
    id: u64,
    kind: EventKind,
    listener: EventListener,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Registered>>,
    streams: Mutex<Vec<Sender<ClientEvent>>>,
}

/// Fan-out of client events to listeners and streams
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one kind of event
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push(Registered {
            id,
            kind,
            listener: Arc::new(listener),
        });
        ListenerHandle {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Receiver of every event emitted from now on
    pub fn stream(&self) -> Receiver<ClientEvent> {
        let (tx, rx) = unbounded();
        self.inner.streams.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: ClientEvent) {
        let kind = event.kind();
        let listeners: Vec<EventListener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| Arc::clone(&r.listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }

        // Receivers that were dropped are pruned here
        self.inner
            .streams
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .listeners
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }
}

/// Returned by [`EventBus::on`]; `off()` removes the listener
pub struct ListenerHandle {
    id: u64,
    bus: Weak<BusInner>,
}

impl ListenerHandle {
    /// Remove the listener; later calls do nothing
    pub fn off(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.listeners.lock().retain(|r| r.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listener_receives_only_its_kind() {
        let bus = EventBus::new();
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        let _handle = bus.on(EventKind::Open, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(ClientEvent::Open { transport: TransportKind::Native });
        bus.emit(ClientEvent::Heartbeat { missed: 1 });
        bus.emit(ClientEvent::Open { transport: TransportKind::Fallback });
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_off_is_idempotent() {
        let bus = EventBus::new();
        let handle = bus.on(EventKind::Close, |_| {});
        assert_eq!(bus.listener_count(EventKind::Close), 1);
        handle.off();
        handle.off();
        assert_eq!(bus.listener_count(EventKind::Close), 0);
    }

    #[test]
    fn test_stream_sees_all_events_in_order() {
        let bus = EventBus::new();
        let rx = bus.stream();
        bus.emit(ClientEvent::Connecting { attempt: 0 });
        bus.emit(ClientEvent::Open { transport: TransportKind::Native });

        let kinds: Vec<_> = rx.try_iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::Connecting, EventKind::Open]);
    }

    #[test]
    fn test_listener_may_unregister_itself() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let handle = bus.on(EventKind::Error, move |_| {
            if let Some(h) = inner.lock().as_ref() {
                h.off();
            }
        });
        *slot.lock() = Some(handle);

        bus.emit(ClientEvent::Error(SocketError::Disconnected));
        assert_eq!(bus.listener_count(EventKind::Error), 0);
    }

    #[test]
    fn test_dropped_stream_is_pruned() {
        let bus = EventBus::new();
        drop(bus.stream());
        bus.emit(ClientEvent::Heartbeat { missed: 1 });
        assert!(bus.inner.streams.lock().is_empty());
    }
}
