// ABOUTME: Typed publish/subscribe event bus -- the only communication path between gateway modules.
// ABOUTME: Per-subscriber delivery order matches publish order; a failing handler never affects siblings.

use anyhow::Result;
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::event::{Event, EventKind};

/// Diagnostics ring buffer depth. Not used for replay or durability.
const RECENT_CAP: usize = 100;

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Every event, regardless of kind.
    All,
    Kind(EventKind),
}

impl Topic {
    fn matches(&self, kind: EventKind) -> bool {
        match self {
            Topic::All => true,
            Topic::Kind(k) => *k == kind,
        }
    }
}

/// Opaque subscription handle, used only for unsubscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Optional predicate evaluated at publish time against the candidate event.
pub type EventPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

type BoxedHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    predicate: Option<EventPredicate>,
    once: bool,
    tx: mpsc::UnboundedSender<Event>,
}

/// Typed publish/subscribe hub.
///
/// Each subscription gets a dedicated consumer task draining an unbounded
/// channel, so a subscriber sees events in exact publish order and a slow or
/// failing handler cannot stall the publisher or its siblings. Handler errors
/// are caught and logged inside the consumer task.
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    /// While `Some`, published events are buffered here instead of delivered.
    pause_buffer: Mutex<Option<VecDeque<Event>>>,
    recent: Mutex<VecDeque<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            pause_buffer: Mutex::new(None),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAP)),
        }
    }

    /// Publish an event to every live subscription whose topic matches and
    /// whose optional predicate accepts it. Never blocks on handlers.
    pub fn publish(&self, event: Event) {
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            if recent.len() >= RECENT_CAP {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        {
            let mut paused = self.pause_buffer.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(buffer) = paused.as_mut() {
                buffer.push_back(event);
                return;
            }
        }

        self.deliver(event);
    }

    fn deliver(&self, event: Event) {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|sub| {
            if !sub.topic.matches(event.kind) {
                return true;
            }
            if let Some(predicate) = &sub.predicate {
                if !predicate(&event) {
                    return true;
                }
            }
            if sub.tx.send(event.clone()).is_err() {
                // Consumer task is gone; drop the subscription.
                return false;
            }
            !sub.once
        });
    }

    /// Subscribe a handler to a topic. Returns an id usable with
    /// [`EventBus::unsubscribe`].
    pub fn subscribe<F, Fut>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add_subscription(topic, None, false, box_handler(handler))
    }

    /// Subscribe with an additional predicate evaluated per event.
    pub fn subscribe_filtered<F, Fut>(
        &self,
        topic: Topic,
        predicate: EventPredicate,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add_subscription(topic, Some(predicate), false, box_handler(handler))
    }

    /// Subscribe a handler that fires for exactly one matching event.
    pub fn subscribe_once<F, Fut>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add_subscription(Topic::Kind(kind), None, true, box_handler(handler))
    }

    fn add_subscription(
        &self,
        topic: Topic,
        predicate: Option<EventPredicate>,
        once: bool,
        handler: BoxedHandler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let kind = event.kind;
                if let Err(error) = handler(event).await {
                    tracing::warn!(kind = %kind, error = %error, "Event handler failed");
                }
            }
        });

        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(Subscription {
            id,
            topic,
            predicate,
            once,
            tx,
        });
        id
    }

    /// Remove a subscription. Safe to call with an already-removed id.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|sub| sub.id != id);
    }

    /// One-shot wait for the next event of the given kind.
    ///
    /// Used by synchronous request/response shims (an HTTP endpoint waiting
    /// for the agent's final answer). Errors if no matching event arrives
    /// within the window.
    pub async fn wait_for(&self, kind: EventKind, timeout: Duration) -> Result<Event> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        {
            let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
            subs.push(Subscription {
                id,
                topic: Topic::Kind(kind),
                predicate: None,
                once: true,
                tx,
            });
        }

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => {
                anyhow::bail!("bus closed while waiting for {}", kind)
            }
            Err(_) => {
                self.unsubscribe(id);
                anyhow::bail!("timed out after {:?} waiting for {}", timeout, kind)
            }
        }
    }

    /// Buffer published events instead of delivering them. Used during hot
    /// config reload so no event is lost or reordered. Idempotent.
    pub fn pause(&self) {
        let mut paused = self.pause_buffer.lock().unwrap_or_else(|e| e.into_inner());
        if paused.is_none() {
            *paused = Some(VecDeque::new());
        }
    }

    /// Flush buffered events in arrival order and resume direct delivery.
    pub fn resume(&self) {
        let buffered = {
            let mut paused = self.pause_buffer.lock().unwrap_or_else(|e| e.into_inner());
            paused.take()
        };
        if let Some(buffer) = buffered {
            tracing::debug!(count = buffer.len(), "Flushing paused events");
            for event in buffer {
                self.deliver(event);
            }
        }
    }

    /// Last published events, newest last. Diagnostics only.
    pub fn recent(&self) -> Vec<Event> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.iter().cloned().collect()
    }

    /// Number of live subscriptions (diagnostics).
    pub fn subscription_count(&self) -> usize {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subs.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn box_handler<F, Fut>(handler: F) -> BoxedHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(handler(event)))
}
