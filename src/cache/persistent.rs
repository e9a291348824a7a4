//! Device-wide persistent variant cache.
//!
//! Best-effort by construction: every storage or integrity problem becomes a
//! miss and a `warn!`, never an error for the caller. Damaged entries are
//! removed so they are rebuilt on the next compile. After
//! `max_consecutive_errors` storage failures in a row the cache turns itself
//! off for the rest of the session, so a dead disk costs a handful of
//! failed syscalls rather than two per compile.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendStats, OptLevel};
use crate::key::PipelineStateKey;
use crate::program::ProgramId;
use crate::resources::BindingTable;
use crate::variant::{CompiledVariant, StageInfo, VariantHeader};

use super::blob;
use super::hash::CacheHash;
use super::store::BlobStore;

/// The serialized form of a variant.
///
/// Session-local identity (program id and full key) is not stored; it is
/// restored from the request that loads the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedVariant {
    pub code: Vec<u8>,
    pub stats: BackendStats,
    pub opt_level: OptLevel,
    pub bindings: BindingTable,
    pub stage_info: StageInfo,
}

impl PersistedVariant {
    #[must_use]
    pub fn from_variant(variant: &CompiledVariant) -> Self {
        Self {
            code: variant.header.code.clone(),
            stats: variant.header.stats,
            opt_level: variant.header.opt_level,
            bindings: variant.bindings,
            stage_info: variant.stage_info,
        }
    }

    #[must_use]
    pub fn into_variant(self, program: ProgramId, key: PipelineStateKey) -> CompiledVariant {
        CompiledVariant {
            header: VariantHeader {
                program,
                key,
                code: self.code,
                stats: self.stats,
                opt_level: self.opt_level,
            },
            bindings: self.bindings,
            stage_info: self.stage_info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersistentState {
    Ready,
    Disabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistentCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    /// Entries rejected by framing, decoding or stage checks.
    pub corrupt: u64,
    pub io_errors: u64,
    pub disabled: bool,
}

struct Inner {
    state: PersistentState,
    consecutive_errors: u32,
    stats: PersistentCacheStats,
}

pub struct PersistentCache {
    store: Arc<dyn BlobStore>,
    max_consecutive_errors: u32,
    inner: Mutex<Inner>,
}

impl PersistentCache {
    /// `max_consecutive_errors == 0` never disables the cache.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, max_consecutive_errors: u32) -> Self {
        Self {
            store,
            max_consecutive_errors,
            inner: Mutex::new(Inner {
                state: PersistentState::Ready,
                consecutive_errors: 0,
                stats: PersistentCacheStats::default(),
            }),
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.inner.lock().state == PersistentState::Disabled
    }

    #[must_use]
    pub fn stats(&self) -> PersistentCacheStats {
        let inner = self.inner.lock();
        PersistentCacheStats {
            disabled: inner.state == PersistentState::Disabled,
            ..inner.stats
        }
    }

    /// Raw payload stored under `hash`, with the framing checked.
    #[must_use]
    pub fn get(&self, hash: CacheHash) -> Option<Vec<u8>> {
        if self.is_disabled() {
            return None;
        }
        match self.store.get(hash) {
            Ok(Some(bytes)) => {
                self.note_io_ok();
                match blob::decode(&bytes) {
                    Ok(payload) => Some(payload.to_vec()),
                    Err(err) => {
                        self.reject(hash, &err);
                        None
                    }
                }
            }
            Ok(None) => {
                self.note_io_ok();
                self.inner.lock().stats.misses += 1;
                None
            }
            Err(err) => {
                self.note_io_error("read", hash, &err);
                None
            }
        }
    }

    /// Stores `payload` under `hash`. Failures are logged and dropped.
    pub fn put(&self, hash: CacheHash, payload: &[u8]) {
        if self.is_disabled() {
            return;
        }
        match self.store.put(hash, &blob::encode(payload)) {
            Ok(()) => {
                self.note_io_ok();
                self.inner.lock().stats.stores += 1;
            }
            Err(err) => self.note_io_error("write", hash, &err),
        }
    }

    /// Loads a variant for `program`/`key`.
    ///
    /// Entries that decode but describe another stage are treated like any
    /// other corruption.
    #[must_use]
    pub fn load_variant(
        &self,
        hash: CacheHash,
        program: ProgramId,
        key: &PipelineStateKey,
    ) -> Option<CompiledVariant> {
        let payload = self.get(hash)?;
        let persisted: PersistedVariant = match serde_json::from_slice(&payload) {
            Ok(persisted) => persisted,
            Err(err) => {
                self.reject(hash, &err);
                return None;
            }
        };
        if persisted.stage_info.stage() != key.stage() {
            self.reject(hash, &"stage mismatch");
            return None;
        }
        self.inner.lock().stats.hits += 1;
        debug!("Persistent cache hit {hash} for program {program}");
        Some(persisted.into_variant(program, *key))
    }

    pub fn store_variant(&self, hash: CacheHash, variant: &CompiledVariant) {
        if self.is_disabled() {
            return;
        }
        match serde_json::to_vec(&PersistedVariant::from_variant(variant)) {
            Ok(payload) => self.put(hash, &payload),
            Err(err) => warn!("Could not serialize variant {hash}: {err}"),
        }
    }

    fn reject(&self, hash: CacheHash, reason: &dyn std::fmt::Display) {
        warn!("Discarding corrupt persistent cache entry {hash}: {reason}");
        {
            let mut inner = self.inner.lock();
            inner.stats.corrupt += 1;
            inner.stats.misses += 1;
        }
        if let Err(err) = self.store.remove(hash) {
            debug!("Could not remove {hash}: {err}");
        }
    }

    fn note_io_ok(&self) {
        self.inner.lock().consecutive_errors = 0;
    }

    fn note_io_error(&self, op: &str, hash: CacheHash, err: &std::io::Error) {
        let mut inner = self.inner.lock();
        inner.stats.io_errors += 1;
        inner.stats.misses += u64::from(op == "read");
        inner.consecutive_errors += 1;
        warn!("Persistent cache {op} of {hash} failed: {err}");

        if self.max_consecutive_errors > 0
            && inner.consecutive_errors >= self.max_consecutive_errors
            && inner.state == PersistentState::Ready
        {
            inner.state = PersistentState::Disabled;
            warn!(
                "Disabling the persistent shader cache after {} consecutive storage errors",
                inner.consecutive_errors
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryBlobStore;

    #[test]
    fn test_payload_roundtrip_and_miss() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = PersistentCache::new(store.clone(), 4);

        assert_eq!(cache.get(CacheHash(1)), None);
        cache.put(CacheHash(1), b"data");
        assert_eq!(cache.get(CacheHash(1)).as_deref(), Some(&b"data"[..]));
        assert_eq!(cache.get(CacheHash(2)), None);

        let stats = cache.stats();
        assert_eq!(stats.stores, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_corrupt_entry_is_removed() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = PersistentCache::new(store.clone(), 4);
        cache.put(CacheHash(7), b"data");
        store.tamper(CacheHash(7), |blob| blob[25] ^= 1);

        assert_eq!(cache.get(CacheHash(7)), None);
        assert!(store.is_empty());
        assert_eq!(cache.stats().corrupt, 1);
    }
}
