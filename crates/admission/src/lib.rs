//! Pre-charge admission: request validation against the live catalog and
//! per-origin request-rate limiting.

#![warn(clippy::unwrap_used)]

pub mod gate;
pub mod limiter;

pub use gate::{AdmissionGate, RawChargeRequest};
pub use limiter::{Clock, ManualClock, RateLimiter, SlidingWindowLimiter, SystemClock};
