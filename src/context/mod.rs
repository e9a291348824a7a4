//! Binder and Dirty Tracking
//!
//! A [`PipelineContext`] is the per-thread front end of the engine. It holds
//! the live [`PipelineState`], the bound programs, the variant currently
//! installed for each stage and a private [`VariantCache`].
//!
//! # Per-draw flow
//!
//! ```text
//! state setter ─▶ changed StateGroup ─▶ UNCOMPILED_* for dependent stages
//!                                               │
//! draw() ─▶ update_compiled_shaders() ◀─────────┘
//!              for each uncompiled stage:
//!                build_key ─▶ context cache ─▶ compiler ─▶ Arc::ptr_eq?
//!                                                          └─ changed: dirty bits
//! ```
//!
//! Identity, not content, decides whether a stage changed: the same key
//! always yields the same `Arc`, so `Arc::ptr_eq` is exact and cheap.
//!
//! Pre-rasterization stages are compiled before the fragment stage so that a
//! change of the last output map can still invalidate the fragment key within
//! the same draw.

pub mod dirty;

use std::sync::Arc;

use log::debug;

use crate::cache::{VariantCache, VariantCacheStats};
use crate::compiler::{self, VariantRequest};
use crate::device::Device;
use crate::errors::{Result, VariantError};
use crate::key::{KeyContext, MergedRole, build_key, key_dependencies};
use crate::program::ShaderProgram;
use crate::settings::DebugFlags;
use crate::stage::ShaderStage;
use crate::state::{PipelineState, StateGroup};
use crate::variant::{CompiledVariant, VariantSource, VertexInfo};

pub use dirty::DirtyFlags;

/// Lookup outcomes of one context, by where the variant came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub key_builds: u64,
    pub context_hits: u64,
    pub registry_hits: u64,
    pub persistent_hits: u64,
    pub compiles: u64,
    pub draws: u64,
    pub dispatches: u64,
}

pub struct PipelineContext {
    device: Arc<Device>,
    state: PipelineState,
    programs: [Option<Arc<ShaderProgram>>; ShaderStage::COUNT],
    bound: [Option<Arc<CompiledVariant>>; ShaderStage::COUNT],
    cache: VariantCache,
    dirty: DirtyFlags,
    /// Output map of the last pre-rasterization variant.
    last_vue_map: u64,
    last_writes_viewport: bool,
    stats: ContextStats,
}

/// Hardware state emitted straight from a state group.
fn hardware_dirty(changed: StateGroup) -> DirtyFlags {
    const MAP: [(StateGroup, DirtyFlags); 11] = [
        (StateGroup::RASTERIZER, DirtyFlags::RASTER.union(DirtyFlags::CLIP)),
        (StateGroup::BLEND, DirtyFlags::BLEND),
        (StateGroup::FRAMEBUFFER, DirtyFlags::WM.union(DirtyFlags::BLEND)),
        (StateGroup::VERTEX_ELEMENTS, DirtyFlags::VERTEX_ELEMENTS),
        (StateGroup::DEPTH_STENCIL_ALPHA, DirtyFlags::DEPTH_STENCIL),
        (StateGroup::SAMPLE_MASK, DirtyFlags::WM),
        (StateGroup::CLIP, DirtyFlags::CLIP),
        (StateGroup::VIEWPORT, DirtyFlags::SF_CL_VIEWPORT.union(DirtyFlags::CC_VIEWPORT)),
        (StateGroup::SCISSOR, DirtyFlags::SCISSOR_RECT),
        (StateGroup::BLEND_COLOR, DirtyFlags::BLEND),
        (StateGroup::STENCIL_REF, DirtyFlags::DEPTH_STENCIL),
    ];
    MAP.iter()
        .filter(|(group, _)| changed.intersects(*group))
        .fold(DirtyFlags::empty(), |acc, (_, flags)| acc | *flags)
}

impl PipelineContext {
    pub(crate) fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            state: PipelineState::new(),
            programs: Default::default(),
            bound: Default::default(),
            cache: VariantCache::new(),
            dirty: DirtyFlags::empty(),
            last_vue_map: 0,
            last_writes_viewport: false,
            stats: ContextStats::default(),
        }
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[must_use]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Applies state changes and invalidates the stages that depend on them.
    ///
    /// ```rust,ignore
    /// ctx.update_state(|s| s.set_blend_color([1.0; 4]));
    /// ```
    pub fn update_state(&mut self, f: impl FnOnce(&mut PipelineState)) {
        f(&mut self.state);
        let changed = self.state.take_changed();
        if changed.is_empty() {
            return;
        }
        self.dirty |= hardware_dirty(changed);
        self.mark_uncompiled(changed);
    }

    /// Sets `UNCOMPILED_*` for every bound stage whose key depends on
    /// `changed`.
    fn mark_uncompiled(&mut self, changed: StateGroup) {
        for stage in ShaderStage::ALL {
            let Some(program) = &self.programs[stage.index()] else {
                continue;
            };
            let mut deps = key_dependencies(program.info());
            // A merged first half contributes its prologue to this key.
            if let Some(first) = self.first_half_of(stage) {
                deps |= key_dependencies(first.info());
            }
            if deps.intersects(changed) {
                self.dirty |= DirtyFlags::uncompiled(stage);
            }
        }
    }

    /// Binds (or unbinds with `None`) the program of `stage`.
    ///
    /// # Panics
    /// Panics if the program was created for another stage.
    pub fn bind_program(&mut self, stage: ShaderStage, program: Option<Arc<ShaderProgram>>) {
        if let Some(program) = &program {
            assert_eq!(
                program.stage(),
                stage,
                "program {} is a {} program",
                program.id(),
                program.stage()
            );
        }
        let slot = &mut self.programs[stage.index()];
        let same = match (&*slot, &program) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }
        *slot = program;

        self.dirty |= match stage {
            ShaderStage::Compute => DirtyFlags::UNCOMPILED_CS,
            ShaderStage::Fragment => DirtyFlags::UNCOMPILED_FS,
            // Binding a pre-rasterization stage can move the last stage, the
            // merge partners and the tessellation domain seen by others.
            _ => {
                DirtyFlags::UNCOMPILED_VS
                    | DirtyFlags::UNCOMPILED_TCS
                    | DirtyFlags::UNCOMPILED_TES
                    | DirtyFlags::UNCOMPILED_GS
            }
        };
    }

    #[must_use]
    pub fn bound_program(&self, stage: ShaderStage) -> Option<&Arc<ShaderProgram>> {
        self.programs[stage.index()].as_ref()
    }

    /// Unbinds `program` from every stage and drops its cached variants.
    pub fn delete_program(&mut self, program: &Arc<ShaderProgram>) {
        for stage in ShaderStage::ALL {
            let i = stage.index();
            if self.programs[i]
                .as_ref()
                .is_some_and(|bound| Arc::ptr_eq(bound, program))
            {
                self.bind_program(stage, None);
            }
            // Merged variants that embed the program must be rebuilt.
            if self.bound[i]
                .as_ref()
                .is_some_and(|v| v.key().previous_program_id() == Some(program.id()))
            {
                self.dirty |= DirtyFlags::uncompiled(stage);
            }
        }
        self.cache.evict_program(program.id());
    }

    /// Variant currently installed for `stage`.
    ///
    /// A stage merged into a later one has no variant of its own.
    #[must_use]
    pub fn bound_variant(&self, stage: ShaderStage) -> Option<&Arc<CompiledVariant>> {
        self.bound[stage.index()].as_ref()
    }

    /// Returns and clears the accumulated hardware dirty bits.
    ///
    /// `UNCOMPILED_*` bits stay until the binder has handled them.
    pub fn take_dirty(&mut self) -> DirtyFlags {
        let hardware = self.dirty.hardware_part();
        self.dirty = self.dirty.uncompiled_part();
        hardware
    }

    #[must_use]
    pub fn pending_dirty(&self) -> DirtyFlags {
        self.dirty
    }

    #[must_use]
    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    #[must_use]
    pub fn cache_stats(&self) -> VariantCacheStats {
        self.cache.stats()
    }

    // ─── Draw / Dispatch ─────────────────────────────────────────────────

    /// Makes every bound render stage ready for a draw.
    pub fn draw(&mut self) -> Result<()> {
        if self.programs[ShaderStage::Vertex.index()].is_none() {
            return Err(VariantError::MissingProgram(ShaderStage::Vertex));
        }
        self.update_compiled_shaders()?;
        self.stats.draws += 1;
        Ok(())
    }

    /// Makes the compute stage ready for a dispatch.
    pub fn dispatch(&mut self) -> Result<()> {
        if self.programs[ShaderStage::Compute.index()].is_none() {
            return Err(VariantError::MissingProgram(ShaderStage::Compute));
        }
        self.update_stage(ShaderStage::Compute)?;
        self.stats.dispatches += 1;
        Ok(())
    }

    /// Selects variants for every render stage marked uncompiled.
    ///
    /// Returns the hardware dirty bits raised by this call; they are also
    /// accumulated for [`take_dirty`](Self::take_dirty).
    pub fn update_compiled_shaders(&mut self) -> Result<DirtyFlags> {
        let before = self.dirty;

        for stage in ShaderStage::PRE_RASTER {
            self.update_stage(stage)?;
        }
        self.update_linkage();
        self.update_stage(ShaderStage::Fragment)?;

        Ok((self.dirty - before).hardware_part())
    }

    fn last_pre_raster_stage(&self) -> Option<ShaderStage> {
        [ShaderStage::Geometry, ShaderStage::TessEval, ShaderStage::Vertex]
            .into_iter()
            .find(|s| self.programs[s.index()].is_some())
    }

    /// Stage whose variant runs `stage` as its first half, if merging.
    fn merged_into(&self, stage: ShaderStage) -> Option<ShaderStage> {
        if !self.device.settings().merge_stages {
            return None;
        }
        let bound = |s: ShaderStage| self.programs[s.index()].is_some();
        match stage {
            ShaderStage::Vertex if bound(ShaderStage::TessControl) => Some(ShaderStage::TessControl),
            ShaderStage::Vertex if !bound(ShaderStage::TessEval) && bound(ShaderStage::Geometry) => {
                Some(ShaderStage::Geometry)
            }
            ShaderStage::TessEval if bound(ShaderStage::Geometry) => Some(ShaderStage::Geometry),
            _ => None,
        }
    }

    fn first_half_of(&self, stage: ShaderStage) -> Option<Arc<ShaderProgram>> {
        let candidate = match stage {
            ShaderStage::TessControl => ShaderStage::Vertex,
            ShaderStage::Geometry if self.programs[ShaderStage::TessEval.index()].is_some() => {
                ShaderStage::TessEval
            }
            ShaderStage::Geometry => ShaderStage::Vertex,
            _ => return None,
        };
        if self.merged_into(candidate) == Some(stage) {
            self.programs[candidate.index()].clone()
        } else {
            None
        }
    }

    fn merged_role(&self, stage: ShaderStage) -> MergedRole {
        let bound = |s: ShaderStage| self.programs[s.index()].is_some();
        match stage {
            ShaderStage::Vertex if bound(ShaderStage::TessControl) => MergedRole::Ls,
            ShaderStage::Vertex | ShaderStage::TessEval if bound(ShaderStage::Geometry) => {
                MergedRole::Es
            }
            _ => MergedRole::None,
        }
    }

    fn update_stage(&mut self, stage: ShaderStage) -> Result<()> {
        let i = stage.index();
        let flag = DirtyFlags::uncompiled(stage);
        if !self.dirty.contains(flag) {
            return Ok(());
        }

        let Some(program) = self.programs[i].clone() else {
            if self.bound[i].take().is_some() {
                self.dirty |= DirtyFlags::shader(stage);
            }
            self.dirty -= flag;
            return Ok(());
        };
        if self.merged_into(stage).is_some() {
            if self.bound[i].take().is_some() {
                self.dirty |= DirtyFlags::shader(stage);
            }
            self.dirty -= flag;
            return Ok(());
        }

        let first_half = self.first_half_of(stage);
        let tess_eval = self.programs[ShaderStage::TessEval.index()].clone();
        let ctx = KeyContext {
            last_pre_raster: self.last_pre_raster_stage() == Some(stage),
            merged_role: self.merged_role(stage),
            first_half: first_half.as_deref(),
            tess_eval: tess_eval.as_deref().map(ShaderProgram::info),
            last_vue_slots: self.last_vue_map,
        };
        let key = build_key(&program, &self.state, &ctx);
        self.stats.key_builds += 1;

        let variant = if let Some(variant) = self.cache.lookup(&key) {
            self.note_source(stage, VariantSource::Context);
            variant
        } else {
            let request = VariantRequest {
                program: &program,
                key,
                first_half: first_half.as_deref(),
                color_regions: self.state.framebuffer().color_regions(),
            };
            match compiler::get_or_compile(&self.device, &request) {
                Ok((variant, source)) => {
                    self.note_source(stage, source);
                    self.cache.insert(key, variant.clone());
                    variant
                }
                Err(err) => {
                    // Keep the stage uncompiled so the next draw retries the
                    // key (and fails fast while it stays the same).
                    if self.bound[i].take().is_some() {
                        self.dirty |= DirtyFlags::shader(stage);
                    }
                    return Err(err);
                }
            }
        };

        let changed = !self.bound[i]
            .as_ref()
            .is_some_and(|old| Arc::ptr_eq(old, &variant));
        if changed {
            self.dirty |= DirtyFlags::variant_changed(stage);
            self.note_linkage_change(stage, &variant);
            self.bound[i] = Some(variant);
        }
        self.dirty -= flag;
        Ok(())
    }

    fn note_source(&mut self, stage: ShaderStage, source: VariantSource) {
        match source {
            VariantSource::Context => self.stats.context_hits += 1,
            VariantSource::Registry => self.stats.registry_hits += 1,
            VariantSource::Persistent => self.stats.persistent_hits += 1,
            VariantSource::Compiled => self.stats.compiles += 1,
        }
        if self.device.settings().debug.contains(DebugFlags::CACHE) {
            debug!("{stage} variant from {source:?}");
        }
    }

    /// Follow-ups that depend only on the new variant of one stage.
    fn note_linkage_change(&mut self, stage: ShaderStage, variant: &CompiledVariant) {
        let old = self.bound[stage.index()].as_deref();
        if stage == ShaderStage::Vertex {
            let new_vs = variant.stage_info.as_vertex();
            let old_vs = old.and_then(|v| v.stage_info.as_vertex());
            let sgvs = |v: Option<&VertexInfo>| {
                v.map(|v| (v.uses_draw_params, v.needs_edge_flag))
            };
            if sgvs(new_vs) != sgvs(old_vs) {
                self.dirty |= DirtyFlags::VERTEX_BUFFERS | DirtyFlags::VERTEX_ELEMENTS;
            }
        }
        if stage.produces_vertices()
            && old.map(|v| v.stage_info.urb_entry_size()) != Some(variant.stage_info.urb_entry_size())
        {
            self.dirty |= DirtyFlags::URB;
        }
    }

    /// Propagates the last pre-rasterization output map to the fragment
    /// stage.
    fn update_linkage(&mut self) {
        let last = self
            .last_pre_raster_stage()
            .map(|stage| self.effective_variant(stage));
        let Some(Some(variant)) = last else {
            return;
        };
        let vue_map = variant.stage_info.vue_map().unwrap_or(0);
        let writes_viewport = variant.stage_info.writes_viewport_index();

        if vue_map != self.last_vue_map {
            self.last_vue_map = vue_map;
            self.dirty |= DirtyFlags::SBE;
            self.mark_uncompiled(StateGroup::LAST_VUE_MAP);
        }
        if writes_viewport != self.last_writes_viewport {
            self.last_writes_viewport = writes_viewport;
            self.dirty |= DirtyFlags::CLIP
                | DirtyFlags::SF_CL_VIEWPORT
                | DirtyFlags::CC_VIEWPORT
                | DirtyFlags::SCISSOR_RECT
                | DirtyFlags::UNCOMPILED_FS;
        }
    }

    /// The variant executing `stage`, which is a later stage's variant when
    /// `stage` is merged.
    fn effective_variant(&self, stage: ShaderStage) -> Option<Arc<CompiledVariant>> {
        let owner = self.merged_into(stage).unwrap_or(stage);
        self.bound[owner.index()].clone()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_dirty_unions_groups() {
        let dirty = hardware_dirty(StateGroup::FRAMEBUFFER | StateGroup::SCISSOR);
        assert_eq!(dirty, DirtyFlags::WM | DirtyFlags::BLEND | DirtyFlags::SCISSOR_RECT);
        assert!(dirty.uncompiled_part().is_empty());
    }

    #[test]
    fn test_key_only_groups_have_no_hardware_state() {
        assert!(hardware_dirty(StateGroup::LAST_VUE_MAP).is_empty());
        assert!(hardware_dirty(StateGroup::empty()).is_empty());
    }
}
