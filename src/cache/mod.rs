//! Variant Caches
//!
//! Two levels sit in front of the backend:
//!
//! | Level | Type | Scope | Keyed by |
//! |-------|------|-------|----------|
//! | L1 | [`VariantCache`] | one context, unsynchronized | [`PipelineStateKey`](crate::key::PipelineStateKey) |
//! | L2 | [`PersistentCache`] | device, survives restarts | [`CacheHash`] of IR + portable key |
//!
//! Between the two, each program's own registry deduplicates compiles across
//! contexts of the same device.

pub mod blob;
pub mod hash;
pub mod persistent;
pub mod store;
pub mod variant_cache;

pub use blob::BlobError;
pub use hash::{CACHE_VERSION_TAG, CacheHash};
pub use persistent::{PersistedVariant, PersistentCache, PersistentCacheStats};
pub use store::{BlobStore, DirectoryBlobStore, MemoryBlobStore};
pub use variant_cache::{VariantCache, VariantCacheStats};
