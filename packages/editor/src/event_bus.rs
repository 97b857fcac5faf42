//! # Event Bus
//!
//! Topic-based publish/subscribe for signals that are not scoped to one
//! document ("active view changed", "command committed", ...).
//!
//! There is no global instance. The application builds one `EventBus`,
//! clones the handle into whatever needs it, and calls `shutdown` at the
//! end of the session.
//!
//! Delivery is synchronous and in subscription order. A `publish` issued
//! from inside a handler does not recurse: the event is queued and delivered
//! after the in-progress delivery list finishes, in FIFO order.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};
use trellis_common::Value;

use crate::ListenerResult;

/// A published event
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub payload: Value,
}

/// Returned by `subscribe`, consumed by `unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type Handler = Rc<dyn Fn(&BusEvent) -> ListenerResult>;

#[derive(Default)]
struct BusInner {
    subscribers: BTreeMap<String, Vec<(SubscriptionToken, Handler)>>,
    queue: VecDeque<BusEvent>,
    delivering: bool,
    shut_down: bool,
    next_token: u64,
}

/// Cloneable handle to one event bus
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionToken
    where
        F: Fn(&BusEvent) -> ListenerResult + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        inner.next_token += 1;
        let token = SubscriptionToken(inner.next_token);
        inner
            .subscribers
            .entry(topic.into())
            .or_default()
            .push((token, Rc::new(handler)));
        token
    }

    /// Returns false if the token was unknown
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut inner = self.inner.borrow_mut();
        let mut found = false;
        for handlers in inner.subscribers.values_mut() {
            let before = handlers.len();
            handlers.retain(|(t, _)| *t != token);
            found |= handlers.len() != before;
        }
        inner.subscribers.retain(|_, handlers| !handlers.is_empty());
        found
    }

    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Value>) {
        let event = BusEvent {
            topic: topic.into(),
            payload: payload.into(),
        };

        {
            let mut inner = self.inner.borrow_mut();
            if inner.shut_down {
                warn!(topic = %event.topic, "Publish after shutdown dropped");
                return;
            }
            inner.queue.push_back(event);
            if inner.delivering {
                debug!(queued = inner.queue.len(), "Reentrant publish queued");
                return;
            }
            inner.delivering = true;
        }

        let _guard = DeliveryGuard { bus: self };
        while let Some((event, handlers)) = self.next_delivery() {
            for (token, handler) in handlers {
                if let Err(e) = handler(&event) {
                    warn!(topic = %event.topic, subscription = ?token, error = %e, "Event handler failed");
                }
            }
        }
    }

    /// Pop the next queued event together with a snapshot of its handlers
    fn next_delivery(&self) -> Option<(BusEvent, Vec<(SubscriptionToken, Handler)>)> {
        let mut inner = self.inner.borrow_mut();
        let event = inner.queue.pop_front()?;
        let handlers = inner
            .subscribers
            .get(&event.topic)
            .cloned()
            .unwrap_or_default();
        Some((event, handlers))
    }

    /// Drop every subscription and queued event; later publishes are ignored
    pub fn shutdown(&self) {
        let mut inner = self.inner.borrow_mut();
        let dropped = inner.queue.len();
        inner.subscribers.clear();
        inner.queue.clear();
        inner.shut_down = true;
        debug!(dropped, "Event bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.borrow().shut_down
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .borrow()
            .subscribers
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("EventBus")
            .field("topics", &inner.subscribers.keys().collect::<Vec<_>>())
            .field("queued", &inner.queue.len())
            .field("shut_down", &inner.shut_down)
            .finish()
    }
}

/// Clears the delivering flag even if a handler panics
struct DeliveryGuard<'a> {
    bus: &'a EventBus,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.bus.inner.try_borrow_mut() {
            inner.delivering = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_delivers_in_subscription_order() {
        let bus = EventBus::new();
        let log = recorder();

        for name in ["first", "second"] {
            let log = log.clone();
            bus.subscribe("view.changed", move |e: &BusEvent| {
                log.borrow_mut().push(format!("{}:{}", name, e.payload));
                Ok(())
            });
        }
        bus.publish("view.changed", "top");
        bus.publish("other.topic", "ignored");

        assert_eq!(*log.borrow(), vec![r#"first:"top""#, r#"second:"top""#]);
    }

    #[test]
    fn test_reentrant_publish_is_queued() {
        let bus = EventBus::new();
        let log = recorder();

        let inner_bus = bus.clone();
        let first = log.clone();
        bus.subscribe("x", move |e: &BusEvent| {
            first.borrow_mut().push(format!("a:{}", e.payload));
            if e.payload == Value::Int(1) {
                inner_bus.publish("x", 2);
                first.borrow_mut().push("a:published".to_string());
            }
            Ok(())
        });
        let second = log.clone();
        bus.subscribe("x", move |e: &BusEvent| {
            second.borrow_mut().push(format!("b:{}", e.payload));
            Ok(())
        });

        bus.publish("x", 1);

        assert_eq!(
            *log.borrow(),
            vec!["a:1", "a:published", "b:1", "a:2", "b:2"]
        );
    }

    #[test]
    fn test_failing_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let log = recorder();

        bus.subscribe("x", |_: &BusEvent| Err("nope".into()));
        let after = log.clone();
        bus.subscribe("x", move |_: &BusEvent| {
            after.borrow_mut().push("ran".to_string());
            Ok(())
        });

        bus.publish("x", Value::Null);
        assert_eq!(*log.borrow(), vec!["ran"]);
    }

    #[test]
    fn test_unsubscribe_and_shutdown() {
        let bus = EventBus::new();
        let token = bus.subscribe("x", |_: &BusEvent| Ok(()));
        assert_eq!(bus.subscriber_count("x"), 1);

        assert!(bus.unsubscribe(token));
        assert!(!bus.unsubscribe(token));
        assert_eq!(bus.subscriber_count("x"), 0);

        let log = recorder();
        let late = log.clone();
        bus.subscribe("x", move |_: &BusEvent| {
            late.borrow_mut().push("ran".to_string());
            Ok(())
        });
        bus.shutdown();
        bus.publish("x", Value::Null);

        assert!(bus.is_shut_down());
        assert!(log.borrow().is_empty());
    }
}
