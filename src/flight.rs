//! Call Coalescing
//!
//! Collapses concurrent loads of the same key into one execution. The first
//! caller registers a shared future for the key; everyone arriving while it
//! is in flight awaits a clone of that future and receives the same result.
//!
//! # Locking
//!
//! The map of in-flight calls is locked only to look up, register and remove
//! a record. Loads run and are awaited with the lock released, so a slow key
//! never blocks unrelated keys.
//!
//! A record lives until its call finishes or until every caller waiting on it
//! has been cancelled; the load is dropped along with the last caller.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::error::{Error, Result};

type SharedCall<T> = Shared<Pin<Box<dyn Future<Output = Result<T>> + Send>>>;

/// In-flight record; `id` tells a finished call apart from a newer one
/// registered under the same key.
struct Call<T: Clone> {
    id: u64,
    fut: SharedCall<T>,
}

/// Per-key request deduplication
pub struct FlightGroup<T: Clone> {
    calls: Mutex<HashMap<String, Call<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty flight group
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `load` for `key` unless a load for `key` is already in flight, in
    /// which case wait for that one and return its result.
    ///
    /// `load` only builds the future; it is invoked with the lock held and
    /// must not do work before being polled.
    pub async fn run<F, Fut>(&self, key: &str, load: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut waiter = {
            let mut calls = self.calls.lock();
            let (id, fut) = match calls.get(key) {
                Some(call) => {
                    trace!(key = %key, "Joining in-flight load");
                    (call.id, call.fut.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let fut = Self::make_shared(key.to_string(), load());
                    calls.insert(
                        key.to_string(),
                        Call {
                            id,
                            fut: fut.clone(),
                        },
                    );
                    (id, fut)
                }
            };
            Waiter {
                group: self,
                key,
                id,
                fut,
                done: false,
            }
        };

        let result = (&mut waiter.fut).await;
        waiter.done = true;
        result
    }

    /// Number of keys with a load in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    /// Box the load and make it shareable; a panic becomes an error for every
    /// waiter instead of unwinding through all of them.
    fn make_shared<Fut>(key: String, fut: Fut) -> SharedCall<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let boxed: Pin<Box<dyn Future<Output = Result<T>> + Send>> = Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!(key = %key, "Load panicked");
                    Err(Error::Internal(format!("load for key {} panicked", key)))
                }
            }
        });
        boxed.shared()
    }
}

/// One caller's stake in a call. Dropping it removes the record once the
/// call has finished, or when the last caller waiting on it goes away so the
/// abandoned load is not reported as in flight.
struct Waiter<'a, T: Clone> {
    group: &'a FlightGroup<T>,
    key: &'a str,
    id: u64,
    fut: SharedCall<T>,
    done: bool,
}

impl<T: Clone> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        let mut calls = self.group.calls.lock();
        let Some(call) = calls.get(self.key) else {
            return;
        };
        if call.id != self.id {
            return;
        }

        // The record and this waiter hold the only handles
        let abandoned = !self.done && call.fut.strong_count() == Some(2);
        if self.done || abandoned {
            if abandoned {
                debug!(key = %self.key, "Last waiter cancelled, dropping load");
            }
            calls.remove(self.key);
        }
    }
}

impl<T: Clone> std::fmt::Debug for FlightGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGroup")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
