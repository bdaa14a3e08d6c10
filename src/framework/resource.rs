//! # Suspending Resource Cache
//!
//! A keyed store of in-flight and completed asynchronous operations that lets
//! rendering logic ask for data *synchronously*: if the data is not ready yet,
//! [`ResourceCache::acquire`] hands back a [`Pending`](Acquired::Pending)
//! handle and the caller interrupts its own traversal, retrying the whole pass
//! once the handle settles.
//!
//! # Architecture Note
//! Some rendering engines implement suspension by *throwing* the pending
//! promise and catching it further up the stack. We deliberately avoid that
//! control-flow trick: `acquire` returns an explicit tagged union
//! ([`Acquired`]) and the render driver in [`crate::framework::render`] is
//! responsible for interrupting its traversal on `Pending`. Same protocol,
//! no exceptions-as-control-flow.
//!
//! # Scoping
//! One `ResourceCache` exists per request on the server and per page session
//! on the client, never a module-level global. A global cache on the server
//! would leak one user's data into another's render pass.
//!
//! # Single-consumption semantics
//! An entry lives exactly as long as one produce/read cycle:
//! created on first `acquire`, mutated only by its producer's settlement,
//! evicted on the first successful (or failed) read. A second `acquire` for
//! the same key after that starts a brand-new operation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::error::ResourceError;

// =============================================================================
// 1. KEYS
// =============================================================================

/// Composite cache key: a logical path plus an operation id, or a raw request
/// key for fetch-style resources.
///
/// Client-side caches persist across navigations, so the key carries the
/// navigation path *and* a phase identifier, so two different navigations
/// (or two phases of the same navigation) never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Key for a phase-scoped resource, e.g. `("/users", "onEnter")`.
    pub fn scoped(path: &str, operation: &str) -> Self {
        Self(format!("{path}:{operation}"))
    }

    /// Key for a raw request, e.g. a fetch keyed by URL path.
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// 2. ENTRIES AND HANDLES
// =============================================================================

/// Settlement state of one resource entry.
///
/// The producer's completion is funneled through a single path that flips
/// `suspended` to false and stores exactly one of `result`/`error`.
#[derive(Debug, Default)]
struct Slot {
    suspended: bool,
    result: Option<Value>,
    error: Option<ResourceError>,
}

struct Entry {
    slot: Arc<Mutex<Slot>>,
    settled: watch::Receiver<bool>,
}

/// Handle to an unsettled resource operation.
///
/// Cloneable: repeated suspensions for the same key all reference the one
/// underlying operation. The render driver awaits [`settled`](Self::settled)
/// before retrying its pass.
#[derive(Debug, Clone)]
pub struct PendingResource {
    rx: watch::Receiver<bool>,
}

impl PendingResource {
    /// Resolves once the producer has settled (with a value or an error).
    pub async fn settled(&mut self) {
        while !*self.rx.borrow() {
            // The sender is dropped right after settling; a closed channel
            // with `false` still in it means the producer task died, and
            // waiting longer cannot help.
            if self.rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Outcome of a cache consultation.
#[derive(Debug)]
pub enum Acquired {
    /// The operation settled with a value; the entry has been evicted.
    Ready(Value),
    /// The operation has not settled; interrupt the render pass and retry
    /// after the handle resolves.
    Pending(PendingResource),
    /// The operation settled with an error; the entry has been evicted.
    Failed(ResourceError),
}

// =============================================================================
// 3. THE CACHE
// =============================================================================

/// Request-scoped (or, on the client, session-scoped) suspending cache.
///
/// Cheap to clone: the render driver task and the request handler share one
/// underlying map. There is no unbounded wait protection here: a producer
/// that never settles suspends its subtree forever, exactly like the system
/// this models. Producers own their own deadlines.
#[derive(Clone, Default)]
pub struct ResourceCache {
    entries: Arc<Mutex<HashMap<ResourceKey, Entry>>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consult the cache for `key`, starting `producer` if no operation is in
    /// flight.
    ///
    /// - no entry: the producer is invoked once, spawned, and
    ///   [`Acquired::Pending`] is returned;
    /// - entry pending: `Pending` again, referencing the *same* operation;
    ///   the producer is never invoked a second time;
    /// - entry settled with an error: the entry is evicted and
    ///   [`Acquired::Failed`] propagates the error to the consulting subtree;
    /// - entry settled with a value: the entry is evicted and the value is
    ///   returned; a later `acquire` for this key starts over.
    ///
    /// Must only be called from within a render pass (or a phase driver); the
    /// producer is spawned on the ambient tokio runtime.
    pub fn acquire<F, Fut>(&self, key: ResourceKey, producer: F) -> Acquired
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ResourceError>> + Send + 'static,
    {
        let mut entries = lock(&self.entries);

        if let Some(entry) = entries.get(&key) {
            let slot = lock(&entry.slot);
            if slot.suspended {
                debug!(key = key.as_str(), "resource still pending");
                return Acquired::Pending(PendingResource { rx: entry.settled.clone() });
            }
            // Settled: single read, then the entry is gone.
            let outcome = if let Some(error) = slot.error.clone() {
                warn!(key = key.as_str(), %error, "resource settled with error");
                Acquired::Failed(error)
            } else {
                let value = slot.result.clone().unwrap_or(Value::Null);
                debug!(key = key.as_str(), "resource read, evicting");
                Acquired::Ready(value)
            };
            drop(slot);
            entries.remove(&key);
            return outcome;
        }

        debug!(key = key.as_str(), "starting resource producer");
        let slot = Arc::new(Mutex::new(Slot { suspended: true, result: None, error: None }));
        let (tx, rx) = watch::channel(false);

        let future = producer();
        let task_slot = Arc::clone(&slot);
        tokio::spawn(async move {
            let outcome = future.await;
            {
                let mut slot = lock(&task_slot);
                match outcome {
                    Ok(value) => slot.result = Some(value),
                    Err(error) => slot.error = Some(error),
                }
                slot.suspended = false;
            }
            let _ = tx.send(true);
        });

        entries.insert(key, Entry { slot, settled: rx.clone() });
        Acquired::Pending(PendingResource { rx })
    }

    /// Number of live entries. Used by the pipeline to log per-request cache
    /// pressure before the context is torn down.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drive `acquire` for `key` to a settled outcome, waiting out suspensions.
///
/// This is the phase-driver counterpart of the render loop: lifecycle phases
/// (client-side data/meta/enter) are not render passes, so they wait on the
/// pending handle directly instead of interrupting a traversal.
pub async fn acquire_settled<F, Fut>(
    cache: &ResourceCache,
    key: ResourceKey,
    mut producer: F,
) -> Result<Value, ResourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, ResourceError>> + Send + 'static,
{
    loop {
        match cache.acquire(key.clone(), &mut producer) {
            Acquired::Ready(value) => return Ok(value),
            Acquired::Failed(error) => return Err(error),
            Acquired::Pending(mut handle) => handle.settled().await,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// 4. TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn key() -> ResourceKey {
        ResourceKey::scoped("/users", "getData")
    }

    #[tokio::test]
    async fn producer_runs_once_for_repeated_suspensions() {
        let cache = ResourceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let producer = {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok(json!({"users": 3}))
                }
            }
        };

        // Two consultations before the producer settles: same operation.
        let first = cache.acquire(key(), producer.clone());
        let second = cache.acquire(key(), producer.clone());
        assert!(matches!(first, Acquired::Pending(_)));
        let Acquired::Pending(mut handle) = second else {
            panic!("expected second consultation to suspend");
        };
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        handle.settled().await;

        match cache.acquire(key(), producer.clone()) {
            Acquired::Ready(value) => assert_eq!(value, json!({"users": 3})),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_read_evicts_entry() {
        let cache = ResourceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let producer = {
            let calls = Arc::clone(&calls);
            move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(json!(n)) }
            }
        };

        let first = acquire_settled(&cache, key(), producer.clone()).await;
        assert_eq!(first, Ok(json!(0)));
        assert!(cache.is_empty(), "read must evict the entry");

        // Same key again: a brand-new operation, not a cached value.
        let second = acquire_settled(&cache, key(), producer).await;
        assert_eq!(second, Ok(json!(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn producer_error_propagates_and_evicts() {
        let cache = ResourceCache::new();
        let result = acquire_settled(&cache, key(), || async {
            Err(ResourceError::Producer("boom".into()))
        })
        .await;
        assert_eq!(result, Err(ResourceError::Producer("boom".into())));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collide() {
        let cache = ResourceCache::new();
        let a = acquire_settled(&cache, ResourceKey::scoped("/a", "getData"), || async {
            Ok(json!("a"))
        });
        let b = acquire_settled(&cache, ResourceKey::scoped("/a", "onEnter"), || async {
            Ok(json!("b"))
        });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a, Ok(json!("a")));
        assert_eq!(b, Ok(json!("b")));
    }

    #[tokio::test]
    async fn pending_handle_wakes_on_settlement() {
        let cache = ResourceCache::new();
        let Acquired::Pending(mut handle) = cache.acquire(key(), || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(json!(1))
        }) else {
            panic!("expected a suspension");
        };
        tokio::time::timeout(Duration::from_secs(1), handle.settled())
            .await
            .expect("handle should settle");
        assert!(matches!(cache.acquire(key(), || async { Ok(Value::Null) }), Acquired::Ready(_)));
    }
}
