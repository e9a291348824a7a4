//! Device
//!
//! Owns everything shared between contexts: settings, the backend, the
//! [`PartLibrary`] and the optional [`PersistentCache`]. Nothing in the
//! crate is global; dropping the device drops its caches.
//!
//! # Usage
//!
//! ```rust,ignore
//! let device = Device::new(CompilerSettings::default(), backend, Some(store));
//! let program = device.create_program(ir, info);
//! let mut ctx = device.create_context();
//! ctx.bind_program(ShaderStage::Fragment, Some(program));
//! ctx.draw()?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use log::info;

use crate::backend::CodeGenerator;
use crate::cache::{BlobStore, PersistentCache};
use crate::context::PipelineContext;
use crate::ir::ShaderIr;
use crate::parts::PartLibrary;
use crate::program::{ProgramId, ShaderInfo, ShaderProgram};
use crate::settings::CompilerSettings;

pub struct Device {
    settings: CompilerSettings,
    backend: Arc<dyn CodeGenerator>,
    parts: PartLibrary,
    persistent: Option<PersistentCache>,
    next_program_id: AtomicU32,
    compiles: AtomicU64,
}

impl Device {
    /// Creates a device. `store` backs the persistent cache unless the
    /// settings disable it.
    #[must_use]
    pub fn new(
        settings: CompilerSettings,
        backend: Arc<dyn CodeGenerator>,
        store: Option<Arc<dyn BlobStore>>,
    ) -> Arc<Self> {
        let persistent = store
            .filter(|_| settings.persistent_cache)
            .map(|store| PersistentCache::new(store, settings.persistent_cache_max_errors));
        info!(
            "Shader variant device: backend `{}`, compaction {}, persistent cache {}",
            backend.cache_tag(),
            if settings.binding_table_compaction { "on" } else { "off" },
            if persistent.is_some() { "on" } else { "off" },
        );
        Arc::new(Self {
            settings,
            backend,
            parts: PartLibrary::new(),
            persistent,
            next_program_id: AtomicU32::new(1),
            compiles: AtomicU64::new(0),
        })
    }

    /// Wraps `ir` into a program with a fresh id.
    #[must_use]
    pub fn create_program(&self, ir: ShaderIr, info: ShaderInfo) -> Arc<ShaderProgram> {
        let id = ProgramId(self.next_program_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(ShaderProgram::new(id, ir, info))
    }

    #[must_use]
    pub fn create_context(self: &Arc<Self>) -> PipelineContext {
        PipelineContext::new(self.clone())
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &dyn CodeGenerator {
        self.backend.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn parts(&self) -> &PartLibrary {
        &self.parts
    }

    #[inline]
    #[must_use]
    pub fn persistent_cache(&self) -> Option<&PersistentCache> {
        self.persistent.as_ref()
    }

    /// Number of successful backend variant compiles.
    #[must_use]
    pub fn compile_count(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }

    pub(crate) fn note_compile(&self) {
        self.compiles.fetch_add(1, Ordering::Relaxed);
    }
}
