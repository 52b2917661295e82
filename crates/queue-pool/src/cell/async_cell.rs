//! Asynchronous single-flight lazy cell.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

#[cfg(test)]
#[path = "async_cell_tests.rs"]
mod tests;

/// `None` means the attempt ended without a result: the initializer panicked
/// or its task was cancelled.
type Flight<V, E> = Shared<BoxFuture<'static, Option<Result<V, E>>>>;
type Initializer<V, E> = Box<dyn Fn() -> BoxFuture<'static, Result<V, E>> + Send + Sync>;

enum Slot<V, E> {
    Empty,
    InFlight { attempt: u64, flight: Flight<V, E> },
    Ready(V),
}

struct CellState<V, E> {
    slot: Slot<V, E>,
    next_attempt: u64,
}

/// Lazy cell whose initializer is a future, shared by all concurrent callers.
///
/// The first caller that finds the cell empty starts the initializer and
/// stores a [`Shared`] handle to it. Callers arriving while it is in flight
/// clone that handle and await it, so the initializer runs once per attempt no
/// matter how many tasks are waiting.
///
/// The attempt updates the cell before its result is handed to any waiter:
/// success stores the value, failure empties the cell so the next call starts
/// a new attempt.
///
/// Inside a Tokio runtime the attempt runs as a spawned task, so it keeps
/// going after every caller stops awaiting and its outcome is recorded in the
/// cell. Outside a runtime it only progresses while some caller polls it.
pub struct AsyncLazyCell<V, E> {
    state: Arc<Mutex<CellState<V, E>>>,
    init: Initializer<V, E>,
}

impl<V, E> AsyncLazyCell<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty cell bound to `init`. Does not invoke `init`.
    ///
    /// `init` is called once per attempt to produce a fresh future; it should
    /// only build that future and leave the work to it.
    pub fn new<F, Fut>(init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(CellState {
                slot: Slot::Empty,
                next_attempt: 0,
            })),
            init: Box::new(move || init().boxed()),
        }
    }

    /// Return the cached value, starting or joining an initialization attempt
    /// if there is none yet.
    ///
    /// # Errors
    ///
    /// Returns the initializer's error, unmodified, to every caller that
    /// awaited the failed attempt.
    ///
    /// # Panics
    ///
    /// Panics in every caller awaiting an attempt whose initializer panicked.
    /// The cell is already empty again, so later calls start a new attempt.
    pub async fn get(&self) -> Result<V, E> {
        let flight = {
            let mut state = self.state.lock();
            match &state.slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::InFlight { flight, .. } => flight.clone(),
                Slot::Empty => {
                    let attempt = state.next_attempt;
                    state.next_attempt += 1;
                    let flight = self.launch(attempt);
                    state.slot = Slot::InFlight {
                        attempt,
                        flight: flight.clone(),
                    };
                    flight
                }
            }
        };

        match flight.await {
            Some(result) => result,
            None => panic!("lazy cell initializer panicked or was cancelled"),
        }
    }

    /// Return the value if initialization already completed.
    pub fn peek(&self) -> Option<V> {
        match &self.state.lock().slot {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Check whether the cell holds a value
    pub fn is_initialized(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Ready(_))
    }

    /// Check whether an initialization attempt is currently in flight
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state.lock().slot, Slot::InFlight { .. })
    }

    fn launch(&self, attempt: u64) -> Flight<V, E> {
        let work = AssertUnwindSafe((self.init)()).catch_unwind();
        let guard = FlightGuard {
            state: Arc::downgrade(&self.state),
            attempt,
            armed: true,
        };

        let run = async move {
            let result = work.await.ok();
            guard.settle(result.as_ref());
            result
        };

        match Handle::try_current() {
            Ok(runtime) => {
                let task = runtime.spawn(run);
                async move { task.await.ok().flatten() }.boxed().shared()
            }
            Err(_) => run.boxed().shared(),
        }
    }
}

/// Owns the `InFlight` state of one attempt. Dropping it unsettled (the task
/// was cancelled) returns the slot to `Empty`.
struct FlightGuard<V, E> {
    state: Weak<Mutex<CellState<V, E>>>,
    attempt: u64,
    armed: bool,
}

impl<V: Clone, E> FlightGuard<V, E> {
    /// Record the outcome in the cell, if the cell still exists and is still
    /// waiting on this attempt. `None` means the initializer panicked.
    fn settle(mut self, result: Option<&Result<V, E>>) {
        self.armed = false;
        self.update(|| match result {
            Some(Ok(value)) => Slot::Ready(value.clone()),
            Some(Err(_)) | None => Slot::Empty,
        });
    }
}

impl<V, E> FlightGuard<V, E> {
    fn update(&self, next: impl FnOnce() -> Slot<V, E>) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = state.lock();
        if matches!(state.slot, Slot::InFlight { attempt, .. } if attempt == self.attempt) {
            state.slot = next();
        }
    }
}

impl<V, E> Drop for FlightGuard<V, E> {
    fn drop(&mut self) {
        if self.armed {
            self.update(|| Slot::Empty);
        }
    }
}

impl<V, E> fmt::Debug for AsyncLazyCell<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.lock().slot {
            Slot::Empty => "Empty",
            Slot::InFlight { .. } => "InFlight",
            Slot::Ready(_) => "Ready",
        };
        f.debug_struct("AsyncLazyCell").field("state", &state).finish()
    }
}
