//! Response cache: key derivation, the store contract and the logic both
//! interception paths share.
//!
//! - Keys identify a request by method, canonical URL and textual body
//! - Entries snapshot successful (2xx) responses
//! - An index under a reserved key lists every cached key in insertion order
//! - A reserved flag turns the whole thing on and off

pub mod admin;
pub mod key;
mod layer;
mod storage;
mod traits;

pub use key::CacheKey;
pub use layer::CacheLayer;
pub use storage::SqliteStore;
pub use traits::{
  parse_index, CacheEntry, CacheStore, LocalStore, StoreChange, StoreMap, ENABLED_KEY, INDEX_KEY,
};
