//! In-process publish/subscribe for breach notifications.
//!
//! The bus is owned by the application context rather than being a
//! process-wide singleton, so independent instances (tests in particular)
//! cannot cross-contaminate. Delivery is synchronous and ordered: `emit`
//! invokes every subscriber before returning.

use std::fmt;
use std::sync::RwLock;

/// Which monitored surface produced a breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachKind {
    Slo,
    Breaker,
    Credits,
}

/// A threshold violation reported by one of the monitors.
#[derive(Debug, Clone)]
pub struct BreachEvent {
    pub kind: BreachKind,
    pub note: String,
}

/// Events carried on the bus.
#[derive(Debug, Clone)]
pub enum GuardEvent {
    /// An SLO threshold was exceeded; drives the auto-guard ladder.
    Breach(BreachEvent),
    /// Daily credit spend crossed the configured limit.
    BudgetBreach(BreachEvent),
}

type Subscriber = Box<dyn Fn(&GuardEvent) + Send + Sync>;

/// Synchronous fan-out channel scoped to one application context.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Subscribers registered earlier see events first.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&GuardEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().unwrap().push(Box::new(subscriber));
    }

    /// Deliver `event` to every subscriber before returning.
    pub fn emit(&self, event: GuardEvent) {
        for subscriber in self.subscribers.read().unwrap().iter() {
            subscriber(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
