//! Typed in-process pub/sub for agent events.
//!
//! Handlers are registered per event kind (plus a global list), invoked
//! concurrently per dispatch with per-handler isolation, and the last N
//! events are kept in a fixed-capacity ring buffer for diagnostics and
//! filtered waits. The handler registry is guarded by a mutex; the handler
//! list is copied under the lock before iteration so handlers can
//! un-register themselves (or be `once`) safely.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tokio::sync::oneshot;
use tracing::{debug, error};
use uuid::Uuid;

use crate::domain::errors::OrchestratorError;
use crate::domain::models::{AgentEvent, AgentEventKind};

/// An event handler. Wrap async closures with [`EventDispatcher::handler`].
pub type EventHandler = Arc<dyn Fn(AgentEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque registration token, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Filter for history queries.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kind: Option<AgentEventKind>,
    pub agent_id: Option<String>,
    pub task_id: Option<Uuid>,
}

impl EventFilter {
    pub fn kind(kind: AgentEventKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }

    fn matches(&self, event: &AgentEvent) -> bool {
        self.kind.map_or(true, |k| k == event.kind)
            && self
                .agent_id
                .as_ref()
                .map_or(true, |a| *a == event.agent_id)
            && self.task_id.map_or(true, |t| t == event.task_id)
    }
}

struct HandlerEntry {
    id: HandlerId,
    handler: EventHandler,
    once: bool,
}

/// Predicate for filtered waits.
pub type WaitPredicate = Box<dyn Fn(&AgentEvent) -> bool + Send>;

struct Waiter {
    kind: AgentEventKind,
    predicate: Option<WaitPredicate>,
    sender: oneshot::Sender<AgentEvent>,
}

struct DispatcherInner {
    handlers: HashMap<AgentEventKind, Vec<HandlerEntry>>,
    global: Vec<HandlerEntry>,
    waiters: Vec<Waiter>,
    history: VecDeque<AgentEvent>,
    history_capacity: usize,
    next_id: u64,
}

/// Typed fan-out of agent events with bounded history.
pub struct EventDispatcher {
    inner: Mutex<DispatcherInner>,
}

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl EventDispatcher {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(DispatcherInner {
                handlers: HashMap::new(),
                global: Vec::new(),
                waiters: Vec::new(),
                history: VecDeque::with_capacity(history_capacity),
                history_capacity,
                next_id: 0,
            }),
        }
    }

    /// Wrap an async closure into an [`EventHandler`].
    pub fn handler<F, Fut>(f: F) -> EventHandler
    where
        F: Fn(AgentEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Arc::new(move |event| Box::pin(f(event)))
    }

    /// Register a handler for one event kind. Handlers for a kind fire in
    /// registration order.
    pub fn on(&self, kind: AgentEventKind, handler: EventHandler) -> HandlerId {
        self.register(Some(kind), handler, false)
    }

    /// Register a handler that fires at most once, auto-removing after the
    /// first matching dispatch.
    pub fn once(&self, kind: AgentEventKind, handler: EventHandler) -> HandlerId {
        self.register(Some(kind), handler, true)
    }

    /// Register a handler invoked for every event.
    pub fn on_global(&self, handler: EventHandler) -> HandlerId {
        self.register(None, handler, false)
    }

    fn register(
        &self,
        kind: Option<AgentEventKind>,
        handler: EventHandler,
        once: bool,
    ) -> HandlerId {
        let mut inner = self.inner.lock().expect("dispatcher lock poisoned");
        let id = HandlerId(inner.next_id);
        inner.next_id += 1;
        let entry = HandlerEntry { id, handler, once };
        match kind {
            Some(kind) => inner.handlers.entry(kind).or_default().push(entry),
            None => inner.global.push(entry),
        }
        id
    }

    /// Remove one specific handler. Idempotent.
    pub fn off(&self, kind: AgentEventKind, id: HandlerId) {
        let mut inner = self.inner.lock().expect("dispatcher lock poisoned");
        if let Some(entries) = inner.handlers.get_mut(&kind) {
            entries.retain(|e| e.id != id);
        }
    }

    /// Remove a global handler. Idempotent.
    pub fn off_global(&self, id: HandlerId) {
        let mut inner = self.inner.lock().expect("dispatcher lock poisoned");
        inner.global.retain(|e| e.id != id);
    }

    /// Remove every handler registered for a kind.
    pub fn remove_all_handlers(&self, kind: AgentEventKind) {
        let mut inner = self.inner.lock().expect("dispatcher lock poisoned");
        inner.handlers.remove(&kind);
    }

    pub fn handler_count(&self, kind: AgentEventKind) -> usize {
        let inner = self.inner.lock().expect("dispatcher lock poisoned");
        inner.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Dispatch one event.
    ///
    /// Records it in history, fulfills pending `wait_for` calls, then runs
    /// every per-kind and global handler concurrently. Completes when the
    /// slowest handler completes. A panicking handler is logged and never
    /// aborts its siblings or the dispatch.
    pub async fn dispatch(&self, event: AgentEvent) {
        let (handlers, fulfilled) = {
            let mut inner = self.inner.lock().expect("dispatcher lock poisoned");

            if inner.history.len() == inner.history_capacity && inner.history_capacity > 0 {
                inner.history.pop_front();
            }
            if inner.history_capacity > 0 {
                inner.history.push_back(event.clone());
            }

            // Pull out waiters matched by this event.
            let mut fulfilled = Vec::new();
            let mut remaining = Vec::new();
            for waiter in inner.waiters.drain(..) {
                let matches = waiter.kind == event.kind
                    && waiter.predicate.as_ref().map_or(true, |p| p(&event));
                if matches {
                    fulfilled.push(waiter.sender);
                } else {
                    remaining.push(waiter);
                }
            }
            inner.waiters = remaining;

            // Copy handlers under the lock; drop `once` entries now so they
            // cannot fire twice even under concurrent dispatch.
            let mut handlers: Vec<EventHandler> = Vec::new();
            if let Some(entries) = inner.handlers.get_mut(&event.kind) {
                for entry in entries.iter() {
                    handlers.push(Arc::clone(&entry.handler));
                }
                entries.retain(|e| !e.once);
            }
            for entry in &inner.global {
                handlers.push(Arc::clone(&entry.handler));
            }

            (handlers, fulfilled)
        };

        for sender in fulfilled {
            // Receiver may have timed out already; that is fine.
            let _ = sender.send(event.clone());
        }

        if handlers.is_empty() {
            debug!(kind = event.kind.as_str(), "No handlers for event");
            return;
        }

        // One task per handler: parallel execution and panic isolation.
        let joins = handlers.into_iter().map(|handler| {
            let event = event.clone();
            tokio::spawn(async move { handler(event).await })
        });
        for result in join_all(joins).await {
            if let Err(e) = result {
                error!(error = %e, "Event handler panicked");
            }
        }
    }

    /// Dispatch events in order, awaiting each before starting the next.
    pub async fn dispatch_batch(&self, events: Vec<AgentEvent>) {
        for event in events {
            self.dispatch(event).await;
        }
    }

    /// Copy of the history ring, optionally filtered.
    pub fn history(&self, filter: Option<&EventFilter>) -> Vec<AgentEvent> {
        let inner = self.inner.lock().expect("dispatcher lock poisoned");
        inner
            .history
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches(e)))
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.inner
            .lock()
            .expect("dispatcher lock poisoned")
            .history
            .len()
    }

    /// Wait for the next event of `kind` matching `predicate`.
    ///
    /// Fails with a typed timeout error when nothing matches within
    /// `timeout_ms`; a zero timeout fails immediately unless a matching
    /// event is dispatched before the first poll.
    pub async fn wait_for(
        &self,
        kind: AgentEventKind,
        predicate: Option<WaitPredicate>,
        timeout_ms: u64,
    ) -> Result<AgentEvent, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().expect("dispatcher lock poisoned");
            inner.waiters.push(Waiter {
                kind,
                predicate,
                sender: tx,
            });
        }

        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(event)) => Ok(event),
            // Sender dropped without firing; treat as timeout.
            Ok(Err(_)) | Err(_) => {
                let mut inner = self.inner.lock().expect("dispatcher lock poisoned");
                inner.waiters.retain(|w| !w.sender.is_closed());
                Err(OrchestratorError::Timeout {
                    what: format!("{} event", kind.as_str()),
                    waited_ms: timeout_ms,
                })
            }
        }
    }
}
