//! Change notification for collection mutations.
//!
//! After each committed mutation the collection emits a
//! `<name>:changed` event: to every in-process subscriber, and to the
//! transport's broadcast capability when the session carries one. The
//! event has no payload; clients re-query.

use crate::request::Session;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// What kind of mutation committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Documents were inserted.
    Created,
    /// Documents were updated.
    Updated,
    /// Documents were removed.
    Removed,
}

/// A change event from one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The collection that changed.
    pub collection: String,
    /// What kind of mutation committed.
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// The wire name of the event: `<collection>:changed`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}:changed", self.collection)
    }
}

/// Distributes change events to subscribers.
///
/// Notification is fire-and-forget: it happens after the commit and
/// carries no ordering guarantee relative to the client reply.
pub struct Notifier {
    collection: RwLock<String>,
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
}

impl Notifier {
    /// Creates a notifier for the named collection.
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: RwLock::new(collection.into()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to change events.
    ///
    /// Returns a receiver that sees every future event. Disconnected
    /// subscribers are dropped at the next emission.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a change event to subscribers and the session broadcast.
    pub fn notify(&self, kind: ChangeKind, session: &Session) {
        let event = ChangeEvent {
            collection: self.collection.read().clone(),
            kind,
        };

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        session.emit_to_all(&event.name());
    }

    /// Follows a collection rename.
    pub(crate) fn set_collection(&self, name: &str) {
        *self.collection.write() = name.to_string();
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Broadcast;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn emit_and_receive() {
        let notifier = Notifier::new("todos");
        let rx = notifier.subscribe();

        notifier.notify(ChangeKind::Created, &Session::anonymous());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name(), "todos:changed");
        assert_eq!(event.kind, ChangeKind::Created);
    }

    #[test]
    fn disconnected_subscribers_are_dropped() {
        let notifier = Notifier::new("todos");
        let rx = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 1);

        drop(rx);
        notifier.notify(ChangeKind::Removed, &Session::anonymous());
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn rename_changes_event_name() {
        let notifier = Notifier::new("todos");
        notifier.set_collection("tasks");

        let rx = notifier.subscribe();
        notifier.notify(ChangeKind::Updated, &Session::anonymous());
        assert_eq!(rx.try_recv().unwrap().name(), "tasks:changed");
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Broadcast for Recorder {
        fn emit_to_all(&self, event: &str) {
            self.events.lock().push(event.to_string());
        }
    }

    #[test]
    fn session_broadcast_receives_event_name() {
        let recorder = Arc::new(Recorder::default());
        let session = Session::anonymous().with_broadcast(recorder.clone());

        let notifier = Notifier::new("todos");
        notifier.notify(ChangeKind::Created, &session);

        assert_eq!(*recorder.events.lock(), vec!["todos:changed".to_string()]);
    }
}
