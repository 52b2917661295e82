//! Blocking lazy cell.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;

#[cfg(test)]
#[path = "sync_cell_tests.rs"]
mod tests;

type Initializer<V, E> = Box<dyn Fn() -> Result<V, E> + Send + Sync>;

/// Error of one attempt, shared by the callers blocked on it. Each attempt
/// owns its own slot, so a later attempt never overwrites it.
type Failure<E> = Arc<Mutex<Option<E>>>;

enum Slot<V, E> {
    Empty,
    InProgress { attempt: u64, failure: Failure<E> },
    Ready(V),
}

struct CellState<V, E> {
    slot: Slot<V, E>,
    next_attempt: u64,
    /// Callers currently parked on an attempt
    waiting: usize,
}

/// Thread-safe lazy cell that memoizes success and retries after failure.
///
/// The initializer is bound at construction and invoked by [`LazyCell::get`]
/// the first time the cell is empty. It runs outside the cell's mutex; callers
/// that arrive while it runs park on a condition variable owned by this cell,
/// so cells never contend with one another.
///
/// # Examples
///
/// ```rust
/// use queue_pool::cell::LazyCell;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&calls);
/// let cell = LazyCell::new(move || {
///     if counter.fetch_add(1, Ordering::SeqCst) == 0 {
///         Err("not yet")
///     } else {
///         Ok(42)
///     }
/// });
///
/// assert_eq!(cell.get(), Err("not yet"));
/// assert_eq!(cell.get(), Ok(42));
/// assert_eq!(cell.get(), Ok(42));
/// assert_eq!(calls.load(Ordering::SeqCst), 2);
/// ```
pub struct LazyCell<V, E> {
    state: Mutex<CellState<V, E>>,
    settled: Condvar,
    init: Initializer<V, E>,
}

impl<V, E> LazyCell<V, E>
where
    V: Clone,
    E: Clone,
{
    /// Create an empty cell bound to `init`. Does not invoke `init`.
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> Result<V, E> + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(CellState {
                slot: Slot::Empty,
                next_attempt: 0,
                waiting: 0,
            }),
            settled: Condvar::new(),
            init: Box::new(init),
        }
    }

    /// Return the cached value, running the initializer if the cell is empty.
    ///
    /// # Errors
    ///
    /// Returns the initializer's error, unmodified, to the caller that ran the
    /// failed attempt and to every caller that was blocked on it.
    ///
    /// # Panics
    ///
    /// A panicking initializer resets the cell before the panic propagates to
    /// the caller that ran it; blocked callers then retry.
    pub fn get(&self) -> Result<V, E> {
        let mut state = self.state.lock();

        let (attempt, failure) = loop {
            let in_progress = match &state.slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::InProgress { attempt, failure } => Some((*attempt, Arc::clone(failure))),
                Slot::Empty => None,
            };

            let Some((attempt, failure)) = in_progress else {
                let attempt = state.next_attempt;
                state.next_attempt += 1;
                let failure: Failure<E> = Arc::new(Mutex::new(None));
                state.slot = Slot::InProgress {
                    attempt,
                    failure: Arc::clone(&failure),
                };
                break (attempt, failure);
            };

            state.waiting += 1;
            while matches!(state.slot, Slot::InProgress { attempt: a, .. } if a == attempt) {
                self.settled.wait(&mut state);
            }
            state.waiting -= 1;

            if let Some(error) = failure.lock().clone() {
                return Err(error);
            };
            // Succeeded or abandoned by a panic: look at the slot again.
        };
        drop(state);

        let guard = AttemptGuard {
            cell: self,
            attempt,
            failure,
            armed: true,
        };
        let result = (self.init)();
        guard.settle(&result);
        result
    }

    /// Return the value if initialization already completed, without blocking
    /// on an attempt in progress.
    pub fn peek(&self) -> Option<V> {
        match self.state.lock().slot {
            Slot::Ready(ref value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Check whether the cell holds a value
    pub fn is_initialized(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Ready(_))
    }

    #[cfg(test)]
    fn waiting(&self) -> usize {
        self.state.lock().waiting
    }
}

impl<V, E> fmt::Debug for LazyCell<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.lock().slot {
            Slot::Empty => "Empty",
            Slot::InProgress { .. } => "InProgress",
            Slot::Ready(_) => "Ready",
        };
        f.debug_struct("LazyCell").field("state", &state).finish()
    }
}

/// Owns the `InProgress` state of one attempt. Dropping it unsettled (the
/// initializer panicked) returns the slot to `Empty`.
struct AttemptGuard<'a, V, E> {
    cell: &'a LazyCell<V, E>,
    attempt: u64,
    failure: Failure<E>,
    armed: bool,
}

impl<V: Clone, E: Clone> AttemptGuard<'_, V, E> {
    fn settle(mut self, result: &Result<V, E>) {
        {
            let mut state = self.cell.state.lock();
            match result {
                Ok(value) => state.slot = Slot::Ready(value.clone()),
                Err(error) => {
                    *self.failure.lock() = Some(error.clone());
                    state.slot = Slot::Empty;
                }
            }
        }
        self.armed = false;
        self.cell.settled.notify_all();
    }
}

impl<V, E> Drop for AttemptGuard<'_, V, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.cell.state.lock();
            if matches!(state.slot, Slot::InProgress { attempt, .. } if attempt == self.attempt) {
                state.slot = Slot::Empty;
            }
        }
        self.cell.settled.notify_all();
    }
}
