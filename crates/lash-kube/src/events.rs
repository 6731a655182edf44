//! Progress events
//!
//! Workflows never print. They publish [`Event`]s on an [`EventBus`] and the
//! caller decides how to render them. Delivery is synchronous, in
//! subscription order, to whatever is subscribed at publish time.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Kind of progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A long operation started
    StartWait,
    /// A long operation ended without a result to report
    StopWait,
    /// Something finished successfully
    Done,
    /// Verbose detail
    Debug,
}

impl EventKind {
    /// All kinds, in declaration order
    pub const ALL: [EventKind; 4] = [
        EventKind::StartWait,
        EventKind::StopWait,
        EventKind::Done,
        EventKind::Debug,
    ];
}

/// An immutable progress message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    message: String,
}

impl Event {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn start_wait(message: impl Into<String>) -> Self {
        Self::new(EventKind::StartWait, message)
    }

    pub fn stop_wait(message: impl Into<String>) -> Self {
        Self::new(EventKind::StopWait, message)
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self::new(EventKind::Done, message)
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(EventKind::Debug, message)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Callback invoked for each published event
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    kind: EventKind,
    id: u64,
}

impl SubscriptionId {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler)>,
}

/// Publish/subscribe channel for progress events
///
/// Cloning shares the subscriber list. One bus is created per command run
/// and passed explicitly to the workflows.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for events of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_handler(kind, Arc::new(handler))
    }

    /// Register an already shared handler
    pub fn subscribe_handler(&self, kind: EventKind, handler: Handler) -> SubscriptionId {
        let mut subscribers = self.subscribers();
        subscribers.next_id += 1;
        let id = SubscriptionId {
            kind,
            id: subscribers.next_id,
        };
        subscribers.handlers.push((id, handler));
        id
    }

    /// Register one handler for every kind, unsubscribed together when dropped
    pub fn subscribe_all<F>(&self, handler: F) -> Subscriptions
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let ids = EventKind::ALL
            .iter()
            .map(|kind| self.subscribe_handler(*kind, Arc::clone(&handler)))
            .collect();
        Subscriptions {
            bus: self.clone(),
            ids,
        }
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.handlers.len();
        subscribers.handlers.retain(|(existing, _)| *existing != id);
        subscribers.handlers.len() != before
    }

    /// Deliver `event` to every handler subscribed to its kind
    ///
    /// Handlers run after the subscriber lock is released, so a handler may
    /// itself subscribe, unsubscribe or publish.
    pub fn publish(&self, event: Event) {
        let handlers: Vec<Handler> = self
            .subscribers()
            .handlers
            .iter()
            .filter(|(id, _)| id.kind == event.kind)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(&event);
        }
    }

    /// Number of handlers subscribed to `kind`
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers()
            .handlers
            .iter()
            .filter(|(id, _)| id.kind == kind)
            .count()
    }

    pub fn start_wait(&self, message: impl Into<String>) {
        self.publish(Event::start_wait(message));
    }

    pub fn stop_wait(&self, message: impl Into<String>) {
        self.publish(Event::stop_wait(message));
    }

    pub fn done(&self, message: impl Into<String>) {
        self.publish(Event::done(message));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.publish(Event::debug(message));
    }
}

/// Subscriptions removed from their bus on drop
pub struct Subscriptions {
    bus: EventBus,
    ids: Vec<SubscriptionId>,
}

impl Subscriptions {
    pub fn ids(&self) -> &[SubscriptionId] {
        &self.ids
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

/// Handler that stores every event, for tests and reports
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every kind on `bus`
    pub fn attach(&self, bus: &EventBus) -> Subscriptions {
        let events = Arc::clone(&self.events);
        bus.subscribe_all(move |event| {
            events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        })
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages of recorded events of one kind
    pub fn messages(&self, kind: EventKind) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .map(|e| e.message)
            .collect()
    }
}
