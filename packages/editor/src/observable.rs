//! # Change Notification
//!
//! An ordered listener list with subscribe/unsubscribe/notify. Listeners run
//! synchronously in registration order. A listener that returns an error is
//! logged and skipped; the rest of the list still runs.

use std::fmt;
use thiserror::Error;
use tracing::warn;
use trellis_common::Value;

use crate::NodeId;

/// Emitted by a document whenever its state changes
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PropertyChanged {
        node: NodeId,
        property: String,
        old: Option<Value>,
        new: Option<Value>,
    },
    NodeAdded {
        node: NodeId,
        parent: NodeId,
        position: usize,
    },
    NodeRemoved {
        node: NodeId,
        parent: NodeId,
        position: usize,
    },
    NodeMoved {
        node: NodeId,
        from_parent: NodeId,
        to_parent: NodeId,
        to_position: usize,
    },
}

impl Notification {
    /// Node the notification is about
    pub fn node(&self) -> &NodeId {
        match self {
            Notification::PropertyChanged { node, .. }
            | Notification::NodeAdded { node, .. }
            | Notification::NodeRemoved { node, .. }
            | Notification::NodeMoved { node, .. } => node,
        }
    }
}

/// Failure reported by a listener or bus handler
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl From<String> for ListenerError {
    fn from(s: String) -> Self {
        ListenerError(s)
    }
}

impl From<&str> for ListenerError {
    fn from(s: &str) -> Self {
        ListenerError(s.to_string())
    }
}

pub type ListenerResult = Result<(), ListenerError>;

/// Token returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Box<dyn FnMut(&E) -> ListenerResult>;

/// Ordered listener list
pub struct Listeners<E> {
    entries: Vec<(ListenerId, Listener<E>)>,
    next_id: u64,
}

impl<E: fmt::Debug> Listeners<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&E) -> ListenerResult + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(listener)));
        id
    }

    /// Returns false if the id was not registered
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Deliver `event` to every listener; returns the number of failures
    pub fn notify(&mut self, event: &E) -> usize {
        let mut failures = 0;
        for (id, listener) in self.entries.iter_mut() {
            if let Err(e) = listener(event) {
                failures += 1;
                warn!(listener = ?id, error = %e, event = ?event, "Listener failed");
            }
        }
        failures
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E: fmt::Debug> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// Capability of entities that emit change notifications
pub trait Observable {
    type Event;

    fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&Self::Event) -> ListenerResult + 'static;

    fn unsubscribe(&mut self, id: ListenerId) -> bool;
}
