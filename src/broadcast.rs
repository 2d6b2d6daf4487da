//! Per-session observer fan-out.
//!
//! The registry delivers orchestrator events to every live observer of a
//! session, best-effort. A failed send unsubscribes that observer and
//! delivery continues to the rest; nothing an observer does can raise past
//! `broadcast`. Sessions are fully independent and the registry never holds
//! an entry with zero observers.
//!
//! Delivery iterates over the subscriber list under that session's own
//! lock, collects failures, and applies removals after the walk - the
//! subscriber set is never mutated while it is being iterated.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::monitor::ViolationAlert;

/// Session-scoped wire message delivered to all subscribers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WireMessage {
    Violation(ViolationAlert),
    Progress {
        current_time: f64,
        total_time: f64,
        frame: u64,
        progress_percent: f64,
    },
    Completed {
        session_id: String,
        violations_count: u64,
    },
    Error {
        error: String,
    },
}

impl WireMessage {
    pub fn progress(current_time: f64, total_time: f64, frame: u64) -> Self {
        let progress_percent = if total_time > 0.0 {
            (current_time / total_time) * 100.0
        } else {
            0.0
        };
        WireMessage::Progress {
            current_time,
            total_time,
            frame,
            progress_percent,
        }
    }
}

/// Handle identifying one subscription.
pub type ObserverId = u64;

/// Delivery callback for one observer. A returned error drops the observer.
pub type ObserverSink = Box<dyn Fn(&WireMessage) -> Result<()> + Send>;

struct Observer {
    id: ObserverId,
    sink: ObserverSink,
}

type SubscriberSet = Arc<Mutex<Vec<Observer>>>;

/// Multicast registry keyed by session id.
///
/// The outer map lock is held only to look up or prune a session slot;
/// subscriber mutation and delivery serialize on the per-session lock.
#[derive(Default)]
pub struct BroadcastRegistry {
    sessions: Mutex<HashMap<String, SubscriberSet>>,
    next_id: AtomicU64,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe an observer to a session's events.
    pub fn subscribe(&self, session_id: &str, sink: ObserverSink) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let set = {
            let mut sessions = self.sessions.lock().expect("registry lock poisoned");
            sessions
                .entry(session_id.to_string())
                .or_default()
                .clone()
        };
        set.lock()
            .expect("subscriber lock poisoned")
            .push(Observer { id, sink });
        log::info!("observer {} subscribed to session {}", id, session_id);
        id
    }

    /// Remove one observer. Unknown ids are a no-op.
    pub fn unsubscribe(&self, session_id: &str, observer_id: ObserverId) {
        let Some(set) = self.session_set(session_id) else {
            return;
        };
        {
            let mut subscribers = set.lock().expect("subscriber lock poisoned");
            subscribers.retain(|observer| observer.id != observer_id);
        }
        self.prune_if_empty(session_id);
        log::info!(
            "observer {} unsubscribed from session {}",
            observer_id,
            session_id
        );
    }

    /// Deliver `message` to every current observer of the session.
    ///
    /// Never fails: observers whose sink errors are dropped from the
    /// registry and delivery continues to the rest, in subscription order.
    pub fn broadcast(&self, session_id: &str, message: &WireMessage) {
        let Some(set) = self.session_set(session_id) else {
            return;
        };
        {
            let mut subscribers = set.lock().expect("subscriber lock poisoned");
            let mut dead: Vec<ObserverId> = Vec::new();
            for observer in subscribers.iter() {
                if let Err(err) = (observer.sink)(message) {
                    log::warn!(
                        "dropping observer {} of session {}: {:#}",
                        observer.id,
                        session_id,
                        err
                    );
                    dead.push(observer.id);
                }
            }
            if !dead.is_empty() {
                subscribers.retain(|observer| !dead.contains(&observer.id));
            }
        }
        self.prune_if_empty(session_id);
    }

    /// Current observer count for a session.
    pub fn observer_count(&self, session_id: &str) -> usize {
        self.session_set(session_id)
            .map(|set| set.lock().expect("subscriber lock poisoned").len())
            .unwrap_or(0)
    }

    fn session_set(&self, session_id: &str) -> Option<SubscriberSet> {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .get(session_id)
            .cloned()
    }

    fn prune_if_empty(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        let empty = sessions
            .get(session_id)
            .map(|set| set.lock().expect("subscriber lock poisoned").is_empty())
            .unwrap_or(false);
        if empty {
            sessions.remove(session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::mpsc;

    fn channel_sink(tx: mpsc::Sender<String>) -> ObserverSink {
        Box::new(move |message| {
            let line = serde_json::to_string(message)?;
            tx.send(line).map_err(|_| anyhow!("observer gone"))
        })
    }

    #[test]
    fn broadcast_reaches_all_session_observers_in_order() {
        let registry = BroadcastRegistry::new();
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        registry.subscribe("s1", channel_sink(tx_a));
        registry.subscribe("s1", channel_sink(tx_b));

        registry.broadcast("s1", &WireMessage::progress(5.0, 30.0, 150));
        registry.broadcast(
            "s1",
            &WireMessage::Completed {
                session_id: "s1".into(),
                violations_count: 2,
            },
        );

        for rx in [rx_a, rx_b] {
            let first = rx.recv().unwrap();
            let second = rx.recv().unwrap();
            assert!(first.contains("\"progress\""));
            assert!(second.contains("\"completed\""));
        }
    }

    #[test]
    fn dead_observer_is_pruned_and_the_rest_still_receive() {
        let registry = BroadcastRegistry::new();
        let (tx, rx) = mpsc::channel();
        registry.subscribe("s1", Box::new(|_| Err(anyhow!("connection reset"))));
        registry.subscribe("s1", channel_sink(tx));
        assert_eq!(registry.observer_count("s1"), 2);

        registry.broadcast("s1", &WireMessage::progress(1.0, 10.0, 30));

        assert_eq!(registry.observer_count("s1"), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn last_observer_leaving_prunes_the_session_entry() {
        let registry = BroadcastRegistry::new();
        let id = registry.subscribe("s1", Box::new(|_| Err(anyhow!("dead on arrival"))));
        registry.broadcast("s1", &WireMessage::progress(0.0, 10.0, 0));
        assert_eq!(registry.observer_count("s1"), 0);
        // The entry is gone entirely, so an unsubscribe for it is a no-op.
        registry.unsubscribe("s1", id);
        assert!(registry
            .sessions
            .lock()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let registry = BroadcastRegistry::new();
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        registry.subscribe("s1", channel_sink(tx_a));
        registry.subscribe("s2", channel_sink(tx_b));

        registry.broadcast("s1", &WireMessage::progress(1.0, 10.0, 30));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn wire_messages_use_the_tagged_envelope() {
        let json = serde_json::to_string(&WireMessage::progress(15.0, 30.0, 450)).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"progress_percent\":50.0"));
        let json = serde_json::to_string(&WireMessage::Error {
            error: "source unreadable".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"error\""));
    }
}
