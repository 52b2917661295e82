//! Single-slot lazy cells with retry-on-failure semantics.
//!
//! Both cells move through the same states:
//!
//! ```text
//! Empty --get()--> InProgress --Ok--> Ready (final)
//!                      |
//!                      +----Err----> Empty (next get() starts a new attempt)
//! ```
//!
//! - [`LazyCell`] runs a synchronous initializer. Callers arriving while an
//!   attempt is in progress block until it settles.
//! - [`AsyncLazyCell`] runs an asynchronous initializer. Callers arriving
//!   while an attempt is in flight await the same shared future.
//!
//! In both cells every caller that waited on a failed attempt receives a clone
//! of that attempt's error, and the failure is not remembered for later calls.
//! Each cell owns its initializer, so creating a cell has no side effects.

mod async_cell;
mod sync_cell;

pub use async_cell::AsyncLazyCell;
pub use sync_cell::LazyCell;
