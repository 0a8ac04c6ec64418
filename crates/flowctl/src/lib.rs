//! Flow-control disciplines that mediate between producer streams and pools
//! of cooperating consumer workers.
//!
//! Each discipline owns its worker, consumes from caller-supplied input
//! channels, and exposes an output channel whose elements obey a
//! per-discipline ordering and quantity contract:
//!
//! - [`join`] accumulates scalar items into size-bounded batches.
//! - [`unite`] accumulates pre-formed batches into larger batches without
//!   ever splitting an input batch.
//! - [`priority`] multiplexes several priority-tagged input streams across a
//!   fixed pool of handler slots, re-balanced every round by a
//!   [`divider`].
//! - [`rate_limiter`] paces a single stream to at most N items per interval.
//!
//! None of the disciplines persist state, expose cancellation beyond
//! closing their input channel(s), or make fairness claims across
//! disciplines running concurrently.

pub mod batch;
pub mod divider;
pub mod join;
pub mod priority;
pub mod rate_limiter;
pub mod unite;

pub use batch::Batch;
pub use divider::{Divider, DividerError, Fair, Rate as RateDivider};
pub use join::{Join, JoinConfig, JoinError};
pub use priority::{Priority, PriorityConfig, PriorityError, Prioritized};
pub use rate_limiter::{Rate, RateLimiter, RateLimiterConfig, RateLimiterError};
pub use unite::{Unite, UniteConfig, UniteError};
