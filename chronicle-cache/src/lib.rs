//! Read-through cache for historical time series.
//!
//! The cache sits in front of a slow [`chronicle_core::SeriesSource`] and
//! answers repeated queries from memory until the source reports a change.
//!
//! # Layers
//!
//! - [`RangeKey`] widens a requested date window and point limit to a
//!   coarser key that many nearby requests share.
//! - [`HierarchicalCache`] maps query keys to entity identities and
//!   identities to buckets of values, so one invalidation drops every query
//!   that resolved to the entity.
//! - [`CachingSeriesSource`] ties the two together: it fetches the widened
//!   range once, slices each exact request out of it, and invalidates on
//!   upstream change events.
//!
//! # Example
//!
//! ```ignore
//! let cache = CachingSeriesSource::from_config(source, &CacheConfig::from_env()).await?;
//!
//! // Fetches 2020 in full, returns February
//! let feb = cache.get_series(&selector, &DateWindow::closed(feb_1, feb_29), None).await?;
//!
//! // Served from the same cached fetch
//! let mar = cache.get_series(&selector, &DateWindow::closed(mar_1, mar_31), None).await?;
//! ```

pub mod config;
pub mod facade;
pub mod hierarchical;
pub mod lock;
pub mod range;
pub mod stats;
pub mod store;

pub use config::CacheConfig;
pub use facade::{CachingSeriesSource, SeriesQueryKey};
pub use hierarchical::{Bucket, HierarchicalCache, IdentityExtractor, Lookup, MissKey};
pub use lock::{IdentityGuard, IdentityLocks};
pub use range::{RangeKey, BLOCK_SIZE};
pub use stats::CacheStats;
pub use store::{
    CacheKey, CacheStore, CacheValue, DefaultStoreProvider, InMemoryStore, InMemoryStoreProvider,
    LruStore, LruStoreProvider, StoreProvider,
};
