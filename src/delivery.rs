use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::actions::counter::SharedCounter;
use crate::error::EntityKind;
use crate::render::compose;

/// Sends a rendered message somewhere, e.g. a chat channel.
pub trait Delivery: Send + Sync + 'static {
    /// Destinations that currently receive notifications.
    fn destinations(&self) -> Vec<String>;

    fn deliver(&self, destination: &str, message: &str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { destinations: usize },
    Cancelled,
}

/// Handle on one pending delivery.
pub struct ScheduledDelivery {
    token: CancellationToken,
    handle: JoinHandle<DeliveryOutcome>,
}

impl ScheduledDelivery {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn outcome(self) -> DeliveryOutcome {
        self.handle.await.unwrap_or(DeliveryOutcome::Cancelled)
    }
}

/// Runs each notification on its own timed task.
///
/// Tasks are grouped per counter so deleting a counter drops its pending
/// notifications, and all of them hang off one shutdown token. A delay of
/// zero still goes through a spawned task.
pub struct DeliveryScheduler {
    delivery: Arc<dyn Delivery>,
    shutdown: CancellationToken,
    scopes: HashMap<String, CancellationToken>,
    tracker: TaskTracker,
}

impl DeliveryScheduler {
    pub fn new(delivery: Arc<dyn Delivery>) -> Self {
        Self {
            delivery,
            shutdown: CancellationToken::new(),
            scopes: HashMap::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Render the counter's message after its delay, deliver it, then mark
    /// the counter notified.
    pub fn schedule(&mut self, counter: SharedCounter, extra: Option<String>) -> ScheduledDelivery {
        let (name, delay) = {
            let c = counter.lock();
            (c.name().to_string(), c.policy().delay)
        };
        let render_from = Arc::clone(&counter);
        let render = move || compose(render_from.lock().render_message(), extra.as_deref());
        let mark = move || counter.lock().mark_notified();
        let scope = scope_key(EntityKind::Counter, &name);
        self.spawn(scope, Duration::from_secs(delay), render, mark)
    }

    /// Deliver an already rendered message for `name` after `delay`.
    pub fn schedule_message(
        &mut self,
        kind: EntityKind,
        name: &str,
        delay: Duration,
        message: String,
    ) -> ScheduledDelivery {
        self.spawn(scope_key(kind, name), delay, move || message, || {})
    }

    /// Cancel every pending delivery scheduled for an entity.
    pub fn cancel_scope(&mut self, kind: EntityKind, name: &str) {
        let scope = scope_key(kind, name);
        if let Some(token) = self.scopes.remove(&scope) {
            token.cancel();
            debug!(scope = %scope, "pending deliveries cancelled");
        }
    }

    /// Keep pending deliveries of a renamed entity cancellable under its new name.
    pub fn rename_scope(&mut self, kind: EntityKind, from: &str, to: &str) {
        if let Some(token) = self.scopes.remove(&scope_key(kind, from)) {
            self.scopes.insert(scope_key(kind, to), token);
        }
    }

    /// Cancel everything and wait for the tasks to wind down.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        self.scopes.clear();
        self.tracker.close();
        self.tracker.wait().await;
        info!("delivery scheduler stopped");
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    fn spawn<R, M>(&mut self, scope: String, delay: Duration, render: R, on_delivered: M) -> ScheduledDelivery
    where
        R: FnOnce() -> String + Send + 'static,
        M: FnOnce() + Send + 'static,
    {
        let shutdown = &self.shutdown;
        let parent = self
            .scopes
            .entry(scope.clone())
            .or_insert_with(|| shutdown.child_token());
        let token = parent.child_token();
        let cancelled = token.clone();
        let delivery = Arc::clone(&self.delivery);

        debug!(scope = %scope, delay_secs = delay.as_secs(), "delivery scheduled");
        let handle = self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    debug!(scope = %scope, "delivery cancelled");
                    return DeliveryOutcome::Cancelled;
                }
                _ = sleep(delay) => {}
            }

            let message = render();
            let destinations = delivery.destinations();
            for destination in &destinations {
                delivery.deliver(destination, &message);
            }
            on_delivered();
            info!(scope = %scope, destinations = destinations.len(), "notification delivered");
            DeliveryOutcome::Delivered {
                destinations: destinations.len(),
            }
        });

        ScheduledDelivery { token, handle }
    }
}

fn scope_key(kind: EntityKind, name: &str) -> String {
    format!("{kind}/{name}")
}
