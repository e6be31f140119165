//! Registry of in-flight calls keyed by correlation id.
//!
//! This is the only structure touched by both the reader task and callers.
//! Every exit path (reply, deadline, cancellation, stream closure) goes
//! through a lookup-and-remove under one lock, so exactly one of them wins
//! for a given id and the others become no-ops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::CallError;
use crate::protocol::RpcId;

/// Deadline used when `now + timeout` does not fit in an `Instant` (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Result delivered into a pending call's slot.
pub type CallOutcome = Result<Value, CallError>;

#[derive(Debug)]
struct Waiter {
    tx: oneshot::Sender<CallOutcome>,
    method: String,
    created_at: Instant,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    closed: bool,
    waiters: HashMap<RpcId, Waiter>,
}

/// A freshly registered call: its id, deadline and result slot.
#[derive(Debug)]
pub struct Registration {
    pub id: RpcId,
    pub deadline: Instant,
    pub slot: oneshot::Receiver<CallOutcome>,
}

#[derive(Debug)]
pub struct PendingRegistry {
    inner: Mutex<Inner>,
    next_id: AtomicI64,
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicI64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh id and register a waiter for it.
    ///
    /// Fails with `StreamClosed` once [`close_all`](Self::close_all) ran.
    pub fn register(&self, method: &str, timeout: Duration) -> Result<Registration, CallError> {
        let created_at = Instant::now();
        let deadline = created_at
            .checked_add(timeout)
            .unwrap_or_else(|| created_at + FAR_FUTURE);
        let (tx, slot) = oneshot::channel();

        let mut inner = self.lock();
        if inner.closed {
            return Err(CallError::StreamClosed);
        }

        // Ids are never reused, so a stale reply cannot hit a newer call.
        let id = RpcId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        inner.waiters.insert(
            id.clone(),
            Waiter {
                tx,
                method: method.to_string(),
                created_at,
                deadline,
            },
        );
        tracing::debug!(
            %id,
            method,
            pending_len = inner.waiters.len(),
            "registered pending call"
        );

        Ok(Registration { id, deadline, slot })
    }

    /// Remove the waiter for `id` and hand it `outcome`.
    ///
    /// Returns `false` when no waiter exists (late, duplicate or unknown id).
    pub fn resolve(&self, id: &RpcId, outcome: CallOutcome) -> bool {
        let Some(waiter) = self.lock().waiters.remove(id) else {
            return false;
        };
        tracing::debug!(
            %id,
            method = %waiter.method,
            elapsed_ms = waiter.created_at.elapsed().as_millis() as u64,
            "resolved pending call"
        );
        if waiter.tx.send(outcome).is_err() {
            tracing::debug!(%id, "caller went away before its reply was delivered");
        }
        true
    }

    /// Remove the waiter for `id` without delivering anything.
    ///
    /// Returns `false` if another path already removed it.
    pub fn remove(&self, id: &RpcId) -> bool {
        self.lock().waiters.remove(id).is_some()
    }

    /// Refuse further registrations and fail every waiter with `StreamClosed`.
    ///
    /// Returns the number of calls that were still pending.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(RpcId, Waiter)> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.waiters.drain().collect()
        };

        let now = Instant::now();
        for (id, waiter) in &drained {
            tracing::debug!(
                %id,
                method = %waiter.method,
                overdue = now > waiter.deadline,
                "failing pending call: stream closed"
            );
        }
        let count = drained.len();
        for (_, waiter) in drained {
            let _ = waiter.tx.send(Err(CallError::StreamClosed));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &RpcId) -> bool {
        self.lock().waiters.contains_key(id)
    }

    /// Ids of pending calls, sorted (for diagnostics).
    pub fn pending_ids(&self) -> Vec<RpcId> {
        let mut ids: Vec<RpcId> = self.lock().waiters.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn ids_are_monotonic() {
        let registry = PendingRegistry::new();
        let a = registry.register("a", LONG).unwrap();
        let b = registry.register("b", LONG).unwrap();
        assert_eq!(a.id, RpcId::Number(1));
        assert_eq!(b.id, RpcId::Number(2));
        assert_eq!(registry.pending_ids(), vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn unbounded_timeout_does_not_overflow() {
        let registry = PendingRegistry::new();
        let reg = registry.register("m", Duration::MAX).unwrap();
        assert!(reg.deadline > Instant::now() + LONG);
        assert!(registry.contains(&reg.id));
    }

    #[tokio::test]
    async fn only_first_resolution_wins() {
        let registry = PendingRegistry::new();
        let reg = registry.register("m", LONG).unwrap();

        assert!(registry.resolve(&reg.id, Ok(serde_json::json!(1))));
        assert!(!registry.resolve(&reg.id, Ok(serde_json::json!(2))));
        assert!(!registry.remove(&reg.id));

        assert_eq!(reg.slot.await.unwrap(), Ok(serde_json::json!(1)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn removal_beats_late_resolution() {
        let registry = PendingRegistry::new();
        let reg = registry.register("m", LONG).unwrap();

        assert!(registry.remove(&reg.id));
        assert!(!registry.resolve(&reg.id, Ok(Value::Null)));
        assert!(reg.slot.await.is_err(), "slot sender dropped without a value");
    }

    #[tokio::test]
    async fn close_all_fails_waiters_and_refuses_new_calls() {
        let registry = PendingRegistry::new();
        let a = registry.register("a", LONG).unwrap();
        let b = registry.register("b", LONG).unwrap();

        assert_eq!(registry.close_all(), 2);
        assert_eq!(a.slot.await.unwrap(), Err(CallError::StreamClosed));
        assert_eq!(b.slot.await.unwrap(), Err(CallError::StreamClosed));

        assert_eq!(
            registry.register("c", LONG).unwrap_err(),
            CallError::StreamClosed
        );
        assert!(registry.is_empty());
    }
}
