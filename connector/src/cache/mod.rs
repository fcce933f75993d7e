//! In-memory caches with TTL, retry interval, stale serving and single-flight refresh.
//!
//! - [`CachedValue`]: one value and its refresh function
//! - [`CachedSet`]: a whole entity collection, replaced on every refresh
//! - [`KeyedCache`]: one lazily created [`CachedValue`] per key
//!
//! Nothing is persisted; every cache starts empty and fills on first access.

mod keyed;
mod set;
mod value;

pub use keyed::KeyedCache;
pub use set::{CachedSet, Entity, EntitySet, EntityStream};
pub use value::{CacheConfig, CacheState, CachedValue};
