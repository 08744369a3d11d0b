//! Topic subscription registry
//!
//! Maps topics to their handlers. Several handlers may share a topic and the
//! same handler may be subscribed more than once; each (topic, handler) pair
//! carries its own reference count and is dispatched once per message no
//! matter how many times it was added.
//!
//! Server-side frames follow the life of the topic, not of the handlers:
//! subscribe when the topic first becomes server-side, unsubscribe when its
//! last handler goes away.

use crate::traits::Payload;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked with every message published on a topic
pub type MessageHandler = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Result of removing one handler reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Topic or handler not registered
    NotFound,
    /// Other references remain on the topic
    Retained,
    /// The topic lost its last handler and was deleted
    TopicReleased { server_side: bool },
}

struct HandlerSlot {
    handler: MessageHandler,
    refs: usize,
}

#[derive(Default)]
struct TopicEntry {
    slots: Vec<HandlerSlot>,
    server_side: bool,
}

fn same_handler(a: &MessageHandler, b: &MessageHandler) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: HashMap<String, TopicEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler reference
    ///
    /// Returns true when a server-side subscribe frame is needed: the caller
    /// asked for one and the topic was not server-side yet.
    pub fn add(&mut self, topic: &str, handler: MessageHandler, server_side: bool) -> bool {
        let entry = self.topics.entry(topic.to_string()).or_default();
        match entry.slots.iter_mut().find(|s| same_handler(&s.handler, &handler)) {
            Some(slot) => slot.refs += 1,
            None => entry.slots.push(HandlerSlot { handler, refs: 1 }),
        }
        let needs_frame = server_side && !entry.server_side;
        entry.server_side |= server_side;
        needs_frame
    }

    /// Drop one reference of `handler` on `topic`
    pub fn remove(&mut self, topic: &str, handler: &MessageHandler) -> Removal {
        let Some(entry) = self.topics.get_mut(topic) else {
            return Removal::NotFound;
        };
        let Some(index) = entry
            .slots
            .iter()
            .position(|s| same_handler(&s.handler, handler))
        else {
            return Removal::NotFound;
        };

        entry.slots[index].refs -= 1;
        if entry.slots[index].refs == 0 {
            entry.slots.remove(index);
        }
        if !entry.slots.is_empty() {
            return Removal::Retained;
        }

        let server_side = entry.server_side;
        self.topics.remove(topic);
        Removal::TopicReleased { server_side }
    }

    /// Snapshot of the handlers for a topic, for dispatch outside the lock
    pub fn handlers(&self, topic: &str) -> Option<Vec<MessageHandler>> {
        self.topics
            .get(topic)
            .map(|e| e.slots.iter().map(|s| Arc::clone(&s.handler)).collect())
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Total references held on a topic
    pub fn ref_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|e| e.slots.iter().map(|s| s.refs).sum())
            .unwrap_or(0)
    }

    /// Topics that need a subscribe frame after (re)connecting
    pub fn server_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, e)| e.server_side)
            .map(|(t, _)| t.clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// Returned by `subscribe`; `unsubscribe()` releases this one reference
///
/// Calling `unsubscribe()` again is a no-op. Dropping the handle without
/// calling it keeps the subscription alive.
pub struct SubscriptionHandle {
    topic: String,
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl SubscriptionHandle {
    pub fn new(topic: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            topic: topic.into(),
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }

    pub fn unsubscribe(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}
