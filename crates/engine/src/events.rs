//! Publish/subscribe of named events with a retained history window.
//!
//! Waiting nodes are unblocked by querying history, not by live delivery: a
//! node that enters WAITING after an event was emitted still observes that
//! event as long as the event's timestamp is at or after the node's wait
//! entry.  Listener delivery is synchronous from the emitter's perspective,
//! but a panicking listener never takes the emitter down with it.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::EventRecord;

type Listener = Box<dyn Fn(&EventRecord) + Send + Sync>;

pub struct EventBus {
    history: Mutex<VecDeque<EventRecord>>,
    listeners: RwLock<Vec<Listener>>,
    capacity: usize,
}

impl EventBus {
    /// A bus retaining at most `capacity` events; the oldest are evicted
    /// first.
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            listeners: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record the event and notify every listener.
    pub fn emit(&self, record: EventRecord) {
        {
            let mut history = self.history.lock().unwrap();
            history.push_back(record.clone());
            while history.len() > self.capacity {
                history.pop_front();
            }
        }

        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&record))).is_err() {
                warn!(event_type = %record.event_type, "event listener panicked; ignoring");
            }
        }
    }

    /// Register a listener for every subsequently emitted event.
    pub fn subscribe(&self, listener: impl Fn(&EventRecord) + Send + Sync + 'static) {
        self.listeners.write().unwrap().push(Box::new(listener));
    }

    /// Has an event of `event_type` been observed?  `since` filters
    /// inclusively: an event stamped exactly at `since` counts.
    pub fn has_occurred(&self, event_type: &str, since: Option<DateTime<Utc>>) -> bool {
        self.history
            .lock()
            .unwrap()
            .iter()
            .any(|record| record.event_type == event_type && in_window(record, since))
    }

    /// All retained events of `event_type` at or after `since`.
    pub fn matching(&self, event_type: &str, since: Option<DateTime<Utc>>) -> Vec<EventRecord> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.event_type == event_type && in_window(record, since))
            .cloned()
            .collect()
    }

    /// A copy of the retained history, oldest first.
    pub fn history(&self) -> Vec<EventRecord> {
        self.history.lock().unwrap().iter().cloned().collect()
    }
}

fn in_window(record: &EventRecord, since: Option<DateTime<Utc>>) -> bool {
    match since {
        Some(cutoff) => record.timestamp >= cutoff,
        None => true,
    }
}
