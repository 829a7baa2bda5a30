//! Fan-out of unsolicited telemetry to registered subscribers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tmtc_protocol::Severity;
use tracing::warn;

use crate::link::TelemetryListener;

// ============================== Notifications ===============================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventNotification {
    /// Event id with the severity bits masked out.
    pub event_id: u16,
    pub severity: Severity,
    pub source: u32,
    pub info: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HousekeepingNotification {
    pub structure_id: u32,
    pub data: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugNotification {
    pub message: String,
    pub received_at: DateTime<Utc>,
}

// ================================ Registry ==================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("subscriber {0:?} is not registered")]
pub struct NotRegistered(pub SubscriberId);

/// Where a notification goes, fixed at registration.
pub enum Sink<T> {
    Callback(Arc<dyn Fn(&T) + Send + Sync>),
    Queue(Sender<T>),
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        match self {
            Sink::Callback(f) => Sink::Callback(Arc::clone(f)),
            Sink::Queue(tx) => Sink::Queue(tx.clone()),
        }
    }
}

impl<T> Sink<T> {
    pub fn callback(f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Sink::Callback(Arc::new(f))
    }

    /// A bounded queue sink and the receiver that drains it.
    pub fn queue(capacity: usize) -> (Self, Receiver<T>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Sink::Queue(tx), rx)
    }
}

pub struct ListenerRegistry<T> {
    name: &'static str,
    subscribers: Mutex<Vec<(SubscriberId, Sink<T>)>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl<T: Clone> ListenerRegistry<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn add(&self, sink: Sink<T>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, sink));
        id
    }

    pub fn remove(&self, id: SubscriberId) -> Result<(), NotRegistered> {
        let mut subs = self.subscribers.lock();
        let pos = subs
            .iter()
            .position(|(sid, _)| *sid == id)
            .ok_or(NotRegistered(id))?;
        subs.remove(pos);
        Ok(())
    }

    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifications lost to full queues since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver to the subscribers present when the call starts. The lock is
    /// released before delivery, so subscribers may add or remove others.
    pub fn notify(&self, item: &T) {
        let snapshot: Vec<(SubscriberId, Sink<T>)> = self.subscribers.lock().clone();
        for (id, sink) in snapshot {
            match sink {
                Sink::Callback(f) => {
                    if catch_unwind(AssertUnwindSafe(|| f(item))).is_err() {
                        warn!(registry = self.name, ?id, "telemetry subscriber panicked");
                    }
                }
                Sink::Queue(tx) => match tx.try_send(item.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(registry = self.name, ?id, dropped, "subscriber queue full, notification dropped");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        warn!(registry = self.name, ?id, "subscriber queue closed");
                    }
                },
            }
        }
    }
}

// ================================ Fan-out ===================================

/// The three registries a session exposes, fed by the engine.
pub struct Telemetry {
    pub events: ListenerRegistry<EventNotification>,
    pub housekeeping: ListenerRegistry<HousekeepingNotification>,
    pub debug: ListenerRegistry<DebugNotification>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            events: ListenerRegistry::new("event"),
            housekeeping: ListenerRegistry::new("housekeeping"),
            debug: ListenerRegistry::new("debug"),
        }
    }

    pub fn clear(&self) {
        self.events.clear();
        self.housekeeping.clear();
        self.debug.clear();
    }
}

impl TelemetryListener for Telemetry {
    fn on_event(&self, event_id: u16, source: u32, info: &[u8]) {
        let (event_id, severity) = Severity::split_event_id(event_id);
        self.events.notify(&EventNotification {
            event_id,
            severity,
            source,
            info: info.to_vec(),
            received_at: Utc::now(),
        });
    }

    fn on_housekeeping(&self, structure_id: u32, data: &[u8]) {
        self.housekeeping.notify(&HousekeepingNotification {
            structure_id,
            data: data.to_vec(),
            received_at: Utc::now(),
        });
    }

    fn on_debug(&self, message: &str) {
        self.debug.notify(&DebugNotification {
            message: message.to_string(),
            received_at: Utc::now(),
        });
    }
}
