//! Per-context variant cache.
//!
//! The first level of lookup. Owned by exactly one context, so it takes no
//! locks; misses fall through to the program's registry.

use std::sync::Arc;

use log::debug;
use rustc_hash::FxHashMap;

use crate::key::PipelineStateKey;
use crate::program::ProgramId;
use crate::variant::CompiledVariant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariantCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
}

#[derive(Default)]
pub struct VariantCache {
    entries: FxHashMap<PipelineStateKey, Arc<CompiledVariant>>,
    stats: VariantCacheStats,
}

impl VariantCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&mut self, key: &PipelineStateKey) -> Option<Arc<CompiledVariant>> {
        match self.entries.get(key) {
            Some(variant) => {
                self.stats.hits += 1;
                Some(variant.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: PipelineStateKey, variant: Arc<CompiledVariant>) {
        self.stats.inserts += 1;
        self.entries.insert(key, variant);
    }

    /// Drops every entry compiled from `program`, including merged variants
    /// that run it as their first half.
    pub fn evict_program(&mut self, program: ProgramId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| {
            key.program_id() != program && key.previous_program_id() != Some(program)
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!("Evicted {evicted} cached variant(s) of program {program}");
        }
        self.stats.evictions += evicted as u64;
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> VariantCacheStats {
        self.stats
    }
}
