//! The two interception points.
//!
//! [`CachingFetch`] wraps the fetch primitive in the privileged context;
//! [`CachingAdapter`] replaces the HTTP client's adapter in the page and
//! reaches the store over the bridge. Both derive the same key for the same
//! logical request and share one store, so either can replay what the other
//! recorded.

mod adapter;
mod fetch;

pub use adapter::{install_when_ready, CachingAdapter, InstallOutcome, PollConfig};
pub use fetch::{CachingFetch, DEFAULT_BYPASS_PREFIXES};
