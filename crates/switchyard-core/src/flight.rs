//! Keyed single-flight.
//!
//! Concurrent callers asking for the same key share one execution of the
//! work and all receive its outcome, success or failure. Different keys never
//! wait on each other. A flight is forgotten as soon as it completes, so the
//! next caller after completion starts a new one.
//!
//! The work runs on its own task. Dropping a caller, including the one that
//! started the flight, never cancels it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};

type Outcome<T> = Option<GatewayResult<T>>;
type Flights<T> = Arc<Mutex<HashMap<String, watch::Receiver<Outcome<T>>>>>;

/// Coalesces concurrent work per key.
#[derive(Debug)]
pub struct SingleFlight<T> {
    flights: Flights<T>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a flight for `key` is already running, in
    /// which case wait for that flight instead.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>> + Send + 'static,
    {
        let mut landing = self.join(key, work);
        let result = match landing.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(aborted(key))),
            // Sender dropped without an outcome: the task panicked or the
            // runtime shut down under it.
            Err(_) => Err(aborted(key)),
        };
        result
    }

    /// Number of flights currently in the air.
    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }

    fn join<F, Fut>(&self, key: &str, work: F) -> watch::Receiver<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>> + Send + 'static,
    {
        let mut flights = lock(&self.flights);
        if let Some(landing) = flights.get(key) {
            return landing.clone();
        }

        let (tx, rx) = watch::channel(None);
        flights.insert(key.to_string(), rx.clone());
        let landing = Landing {
            flights: Arc::clone(&self.flights),
            key: Some(key.to_string()),
            tx,
        };
        let fut = work();
        tokio::spawn(async move {
            let outcome = fut.await;
            landing.finish(outcome);
        });
        rx
    }
}

/// Owned by the flight's task. The entry is removed before waiters wake, on
/// success and on panic alike.
struct Landing<T> {
    flights: Flights<T>,
    key: Option<String>,
    tx: watch::Sender<Outcome<T>>,
}

impl<T> Landing<T> {
    fn finish(mut self, outcome: GatewayResult<T>) {
        self.land();
        let _ = self.tx.send(Some(outcome));
    }

    fn land(&mut self) {
        if let Some(key) = self.key.take() {
            lock(&self.flights).remove(&key);
        }
    }
}

impl<T> Drop for Landing<T> {
    fn drop(&mut self) {
        self.land();
    }
}

fn lock<T>(
    flights: &Flights<T>,
) -> std::sync::MutexGuard<'_, HashMap<String, watch::Receiver<Outcome<T>>>> {
    // The map only holds handles; a panic mid-update cannot corrupt it.
    flights.lock().unwrap_or_else(|e| e.into_inner())
}

fn aborted(key: &str) -> GatewayError {
    warn!(credential = %key, "refresh task ended without an outcome");
    GatewayError::RefreshFailed {
        credential: key.to_string(),
        reason: "refresh task aborted".into(),
    }
}
