//! Per-invocation ambient context.
//!
//! An [`InvocationContext`] flows through every component of a run: it
//! carries the cancellation signal, the current cycle/trace ids, the
//! shared key-value request state, and the observer. Contexts are cheap
//! to clone; clones share the same cancellation token and state map.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::observer::{CallbackEvent, NoopObserver, Observer, SharedObserver};

/// Ambient state for one invocation.
#[derive(Clone)]
pub struct InvocationContext {
    cancel: CancellationToken,
    cycle_id: Uuid,
    parent_cycle_id: Option<Uuid>,
    state: Arc<Mutex<HashMap<String, Value>>>,
    observer: SharedObserver,
}

impl InvocationContext {
    /// Create a new context with a fresh cancellation token and no observer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            cycle_id: Uuid::new_v4(),
            parent_cycle_id: None,
            state: Arc::new(Mutex::new(HashMap::new())),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Attach an observer.
    #[must_use]
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Seed the request state with a fresh map.
    ///
    /// The returned context no longer shares state with the context it was
    /// derived from; cancellation and the observer remain shared.
    #[must_use]
    pub fn with_state(mut self, state: HashMap<String, Value>) -> Self {
        self.state = Arc::new(Mutex::new(state));
        self
    }

    /// Derive the context for a new event-loop cycle.
    ///
    /// The child shares the cancellation token, state map and observer; it
    /// gets a fresh cycle id with this context's id as its parent.
    #[must_use]
    pub fn child_cycle(&self) -> Self {
        Self {
            cancel: self.cancel.clone(),
            cycle_id: Uuid::new_v4(),
            parent_cycle_id: Some(self.cycle_id),
            state: Arc::clone(&self.state),
            observer: Arc::clone(&self.observer),
        }
    }

    /// Identifier of the current cycle.
    #[must_use]
    pub const fn cycle_id(&self) -> Uuid {
        self.cycle_id
    }

    /// Identifier of the parent cycle, if any.
    #[must_use]
    pub const fn parent_cycle_id(&self) -> Option<Uuid> {
        self.parent_cycle_id
    }

    /// Signal cancellation to everything holding this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` if cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when cancellation is signalled.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// The underlying cancellation token.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The attached observer.
    #[must_use]
    pub const fn observer(&self) -> &SharedObserver {
        &self.observer
    }

    /// Forward an event to the observer.
    pub async fn emit(&self, event: CallbackEvent) {
        self.observer.on_event(&event).await;
    }

    /// Store a value in the shared request state.
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.lock_state().insert(key.into(), value);
    }

    /// Read a value from the shared request state.
    #[must_use]
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.lock_state().get(key).cloned()
    }

    /// Snapshot the shared request state.
    #[must_use]
    pub fn state_snapshot(&self) -> HashMap<String, Value> {
        self.lock_state().clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("cycle_id", &self.cycle_id)
            .field("parent_cycle_id", &self.parent_cycle_id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn child_cycle_links_parent() {
        let ctx = InvocationContext::new();
        let child = ctx.child_cycle();

        assert_ne!(child.cycle_id(), ctx.cycle_id());
        assert_eq!(child.parent_cycle_id(), Some(ctx.cycle_id()));
    }

    #[test]
    fn cancellation_is_shared_with_children() {
        let ctx = InvocationContext::new();
        let child = ctx.child_cycle();
        assert!(!child.is_cancelled());

        ctx.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn state_is_shared_with_children() {
        let ctx = InvocationContext::new();
        let child = ctx.child_cycle();

        child.set_state("key", serde_json::json!(42));
        assert_eq!(ctx.get_state("key"), Some(serde_json::json!(42)));

        let snapshot = ctx.state_snapshot();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn with_state_seeds_map() {
        let mut seed = HashMap::new();
        seed.insert("a".to_owned(), serde_json::json!("b"));
        let ctx = InvocationContext::new().with_state(seed);
        assert_eq!(ctx.get_state("a"), Some(serde_json::json!("b")));
    }
}
