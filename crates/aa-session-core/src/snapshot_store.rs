//! Broadcast + history store of session events.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{SessionSnapshot, SessionStatus};

/// Default number of events retained for late subscribers.
const HISTORY_EVENTS: usize = 256;

/// Event published by the session orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Status changed.
    Transition {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// A new snapshot is available.
    Snapshot { snapshot: SessionSnapshot },
    /// The orchestrator was disposed; no further events follow.
    Disposed,
}

struct Inner {
    history: VecDeque<SessionEvent>,
    latest: SessionSnapshot,
}

/// Session event store with broadcast and history support.
///
/// UIs attaching mid-session replay the retained history and then follow
/// live updates.
pub struct SnapshotStore {
    inner: RwLock<Inner>,
    capacity: usize,
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// Create a new store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_EVENTS)
    }

    /// Create a store retaining at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(capacity.min(32)),
                latest: SessionSnapshot::unauthenticated(),
            }),
            capacity: capacity.max(1),
            sender,
        }
    }

    /// Push an event to both live listeners and history.
    pub fn push(&self, event: SessionEvent) {
        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if let SessionEvent::Snapshot { snapshot } = &event {
                inner.latest = snapshot.clone();
            }
            while inner.history.len() >= self.capacity {
                inner.history.pop_front();
            }
            inner.history.push_back(event.clone());
        }
        if self.sender.send(event).is_err() {
            tracing::trace!("No live session event subscribers");
        }
    }

    /// Publish a status transition.
    pub fn push_transition(&self, from: SessionStatus, to: SessionStatus) {
        self.push(SessionEvent::Transition { from, to });
    }

    /// Publish a snapshot.
    pub fn push_snapshot(&self, snapshot: SessionSnapshot) {
        self.push(SessionEvent::Snapshot { snapshot });
    }

    /// Publish disposal.
    pub fn push_disposed(&self) {
        self.push(SessionEvent::Disposed);
    }

    fn latest(&self) -> SessionSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone()
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<SessionEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live updates, ending after
    /// `Disposed`.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, SessionEvent> {
        // Subscribe before copying history: an event published in between may
        // repeat, but none is dropped.
        let rx = self.get_receiver();
        let history = self.get_history();

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Session event subscriber lagged: {e}");
                    None
                }
            }
        });

        hist.chain(live)
            .scan(false, |disposed, event| {
                if *disposed {
                    return future::ready(None);
                }
                *disposed = matches!(event, SessionEvent::Disposed);
                future::ready(Some(event))
            })
            .boxed()
    }

    /// Stream of snapshots: the latest one, then live ones until disposal.
    #[must_use]
    pub fn snapshot_stream(&self) -> futures::stream::BoxStream<'static, SessionSnapshot> {
        let rx = self.get_receiver();
        let current = self.latest();

        let live = BroadcastStream::new(rx)
            .filter_map(|res| future::ready(res.ok()))
            .take_while(|event| future::ready(!matches!(event, SessionEvent::Disposed)))
            .filter_map(|event| async move {
                match event {
                    SessionEvent::Snapshot { snapshot } => Some(snapshot),
                    _ => None,
                }
            });

        futures::stream::once(future::ready(current)).chain(live).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_snapshot() -> SessionSnapshot {
        SessionSnapshot {
            status: SessionStatus::Ready,
            ..SessionSnapshot::unauthenticated()
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let store = SnapshotStore::with_capacity(2);
        store.push_transition(SessionStatus::Unauthenticated, SessionStatus::Authenticating);
        store.push_transition(SessionStatus::Authenticating, SessionStatus::Ready);
        store.push_snapshot(ready_snapshot());

        let history = store.get_history();
        assert_eq!(history.len(), 2);
        assert!(matches!(history[1], SessionEvent::Snapshot { .. }));
        assert_eq!(store.latest().status, SessionStatus::Ready);
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let store = SnapshotStore::new();
        store.push_transition(SessionStatus::Unauthenticated, SessionStatus::Authenticating);

        let mut stream = store.history_plus_stream();
        store.push_transition(SessionStatus::Authenticating, SessionStatus::Error);

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(
            first,
            SessionEvent::Transition {
                from: SessionStatus::Unauthenticated,
                to: SessionStatus::Authenticating
            }
        );
        assert_eq!(
            second,
            SessionEvent::Transition {
                from: SessionStatus::Authenticating,
                to: SessionStatus::Error
            }
        );

        store.push_disposed();
        assert_eq!(stream.next().await, Some(SessionEvent::Disposed));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_snapshot_stream_ends_on_dispose() {
        let store = SnapshotStore::new();
        let stream = store.snapshot_stream();
        store.push_snapshot(ready_snapshot());
        store.push_transition(SessionStatus::Ready, SessionStatus::Unauthenticated);
        store.push_disposed();

        let snapshots: Vec<_> = stream.collect().await;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].status, SessionStatus::Unauthenticated);
        assert_eq!(snapshots[1].status, SessionStatus::Ready);
    }
}
