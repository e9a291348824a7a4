//! Shader Programs
//!
//! A [`ShaderProgram`] is the "uncompiled shader": immutable IR, static
//! [`ShaderInfo`] gathered by the IR producer, a device-unique [`ProgramId`]
//! and the registry of every variant compiled from it.
//!
//! # Variant Registry
//!
//! The registry maps a [`PipelineStateKey`] to a [`VariantSlot`]. Slots are
//! claimed under the registry lock and filled under their own lock, so:
//!
//! - a key is compiled at most once at a time, and every caller waiting on
//!   that key observes the same `Arc<CompiledVariant>`;
//! - different keys of the same program compile concurrently;
//! - a failed compile is remembered in the slot until the program is
//!   destroyed, so repeated draws with that key fail fast.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::Xxh3;

use crate::ir::{Opcode, ShaderIr};
use crate::key::PipelineStateKey;
use crate::stage::ShaderStage;
use crate::state::TessPrimitive;
use crate::variant::CompiledVariant;

/// Device-unique handle of a shader program.
///
/// Id 0 is reserved for "no program" inside keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub(crate) u32);

impl ProgramId {
    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static usage information produced alongside the IR.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderInfo {
    pub stage: ShaderStage,

    // ---- Resources ----
    /// Texture indices referenced by the program.
    pub textures_used: u64,
    pub num_images: u32,
    pub num_ubos: u32,
    pub num_ssbos: u32,
    pub num_atomic_buffers: u32,
    /// Whether the backend will emit loads from an embedded constant buffer.
    pub has_constant_data: bool,

    // ---- Varyings ----
    pub inputs_read: u64,
    pub outputs_written: u64,
    pub patch_inputs_read: u32,
    pub patch_outputs_written: u32,

    // ---- Vertex ----
    pub num_vertex_inputs: u32,
    pub uses_draw_params: bool,
    pub needs_edge_flag: bool,

    // ---- Tessellation / Geometry ----
    pub tcs_vertices_out: u32,
    /// Domain of a tessellation evaluation program.
    pub tess_primitive: TessPrimitive,
    pub reads_tess_factors: bool,
    pub gs_max_vertices: u32,

    // ---- Fragment ----
    /// Interpolated color components read, two colors of four components.
    pub colors_read: u8,
    /// Render targets written.
    pub color_outputs_written: u8,
    pub uses_discard: bool,
    pub uses_sample_shading: bool,
    pub writes_depth: bool,
    /// Input slots must match the previous stage's output map exactly.
    pub depends_on_last_vue_map: bool,

    // ---- Compute ----
    pub workgroup_size: [u32; 3],
    pub uses_num_work_groups: bool,

    /// Whether the stage writes the viewport index (pre-rasterization).
    pub writes_viewport_index: bool,
}

impl ShaderInfo {
    #[must_use]
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            textures_used: 0,
            num_images: 0,
            num_ubos: 0,
            num_ssbos: 0,
            num_atomic_buffers: 0,
            has_constant_data: false,
            inputs_read: 0,
            outputs_written: 0,
            patch_inputs_read: 0,
            patch_outputs_written: 0,
            num_vertex_inputs: 0,
            uses_draw_params: false,
            needs_edge_flag: false,
            tcs_vertices_out: 0,
            tess_primitive: TessPrimitive::Triangles,
            reads_tess_factors: false,
            gs_max_vertices: 0,
            colors_read: 0,
            color_outputs_written: 0,
            uses_discard: false,
            uses_sample_shading: false,
            writes_depth: false,
            depends_on_last_vue_map: false,
            workgroup_size: [1, 1, 1],
            uses_num_work_groups: false,
            writes_viewport_index: false,
        }
    }

    /// Fixed-layout byte image of every field, for content hashing.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.push(self.stage.index() as u8);
        out.extend_from_slice(&self.textures_used.to_le_bytes());
        for count in [
            self.num_images,
            self.num_ubos,
            self.num_ssbos,
            self.num_atomic_buffers,
        ] {
            out.extend_from_slice(&count.to_le_bytes());
        }
        out.extend_from_slice(&self.inputs_read.to_le_bytes());
        out.extend_from_slice(&self.outputs_written.to_le_bytes());
        out.extend_from_slice(&self.patch_inputs_read.to_le_bytes());
        out.extend_from_slice(&self.patch_outputs_written.to_le_bytes());
        out.extend_from_slice(&self.num_vertex_inputs.to_le_bytes());
        out.extend_from_slice(&self.tcs_vertices_out.to_le_bytes());
        out.push(self.tess_primitive as u8);
        out.extend_from_slice(&self.gs_max_vertices.to_le_bytes());
        out.push(self.colors_read);
        out.push(self.color_outputs_written);
        for size in self.workgroup_size {
            out.extend_from_slice(&size.to_le_bytes());
        }
        let flags = [
            self.has_constant_data,
            self.uses_draw_params,
            self.needs_edge_flag,
            self.reads_tess_factors,
            self.uses_discard,
            self.uses_sample_shading,
            self.writes_depth,
            self.depends_on_last_vue_map,
            self.uses_num_work_groups,
            self.writes_viewport_index,
        ];
        let packed = flags
            .iter()
            .enumerate()
            .fold(0u16, |acc, (i, &set)| acc | (u16::from(set) << i));
        out.extend_from_slice(&packed.to_le_bytes());
        out
    }

    /// Fills in the flags that can be read straight off the IR.
    fn scan(&mut self, ir: &ShaderIr) {
        self.uses_discard |= ir.uses(Opcode::Discard);
        self.uses_num_work_groups |= ir.uses(Opcode::LoadNumWorkGroups);
    }
}

// ─── Variant Slots ───────────────────────────────────────────────────────────

/// Compilation state of one key.
#[derive(Debug, Clone)]
pub enum SlotState {
    /// Claimed, nothing compiled yet (or a compile is in flight).
    Empty,
    Ready(Arc<CompiledVariant>),
    Failed(Arc<str>),
}

#[derive(Debug)]
pub struct VariantSlot {
    state: Mutex<SlotState>,
}

impl VariantSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }

    /// Locks the slot. Holding the guard while compiling is what makes
    /// concurrent requests for the same key wait for a single build.
    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock()
    }

    /// Non-blocking peek used by diagnostics.
    #[must_use]
    pub fn ready(&self) -> Option<Arc<CompiledVariant>> {
        match &*self.state.try_lock()? {
            SlotState::Ready(variant) => Some(variant.clone()),
            _ => None,
        }
    }
}

// ─── Program ─────────────────────────────────────────────────────────────────

pub struct ShaderProgram {
    id: ProgramId,
    info: ShaderInfo,
    ir: ShaderIr,
    /// Content hash of the IR, computed once.
    content_hash: u128,
    variants: Mutex<FxHashMap<PipelineStateKey, Arc<VariantSlot>>>,
    /// Key of the most recently claimed variant, for recompile diagnostics.
    last_key: Mutex<Option<PipelineStateKey>>,
    compiled_once: AtomicBool,
}

impl ShaderProgram {
    pub(crate) fn new(id: ProgramId, ir: ShaderIr, mut info: ShaderInfo) -> Self {
        info.scan(&ir);
        let mut hasher = Xxh3::new();
        hasher.update(&ir.canonical_bytes());
        hasher.update(&info.canonical_bytes());
        let content_hash = hasher.digest128();
        Self {
            id,
            info,
            ir,
            content_hash,
            variants: Mutex::new(FxHashMap::default()),
            last_key: Mutex::new(None),
            compiled_once: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ProgramId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn stage(&self) -> ShaderStage {
        self.info.stage
    }

    #[inline]
    #[must_use]
    pub fn info(&self) -> &ShaderInfo {
        &self.info
    }

    #[inline]
    #[must_use]
    pub fn ir(&self) -> &ShaderIr {
        &self.ir
    }

    /// Hash of the canonical IR together with the static info.
    #[inline]
    #[must_use]
    pub fn content_hash(&self) -> u128 {
        self.content_hash
    }

    /// Returns the slot for `key`, inserting an empty one on first request.
    ///
    /// The second value is `true` when this call created the slot.
    pub fn claim_slot(&self, key: &PipelineStateKey) -> (Arc<VariantSlot>, bool) {
        let mut variants = self.variants.lock();
        if let Some(slot) = variants.get(key) {
            return (slot.clone(), false);
        }
        let slot = Arc::new(VariantSlot::new());
        variants.insert(*key, slot.clone());
        (slot, true)
    }

    /// Looks up a finished variant without claiming anything.
    #[must_use]
    pub fn find_variant(&self, key: &PipelineStateKey) -> Option<Arc<CompiledVariant>> {
        let slot = self.variants.lock().get(key).cloned()?;
        slot.ready()
    }

    /// Number of keys ever requested, including failed and in-flight ones.
    #[must_use]
    pub fn variant_count(&self) -> usize {
        self.variants.lock().len()
    }

    /// Records `key` as the latest compile and returns the previous one if the
    /// program had been compiled before.
    pub(crate) fn note_compile(&self, key: &PipelineStateKey) -> Option<PipelineStateKey> {
        let mut last = self.last_key.lock();
        let previous = if self.compiled_once.swap(true, Ordering::AcqRel) {
            *last
        } else {
            None
        };
        *last = Some(*key);
        previous
    }
}

impl fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("id", &self.id)
            .field("stage", &self.info.stage)
            .field("instructions", &self.ir.len())
            .field("variants", &self.variant_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operand;

    fn program() -> ShaderProgram {
        let mut ir = ShaderIr::new();
        ir.push(Opcode::Discard, &[]);
        ir.push(Opcode::LoadPushConst, &[Operand::Const(0)]);
        ShaderProgram::new(ProgramId(1), ir, ShaderInfo::new(ShaderStage::Fragment))
    }

    #[test]
    fn test_scan_detects_discard() {
        assert!(program().info().uses_discard);
    }

    #[test]
    fn test_claim_returns_same_slot() {
        let p = program();
        let key = PipelineStateKey::zeroed_for(ShaderStage::Fragment, p.id());
        let (a, created_a) = p.claim_slot(&key);
        let (b, created_b) = p.claim_slot(&key);
        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(p.variant_count(), 1);
    }

    #[test]
    fn test_note_compile_reports_previous_key() {
        let p = program();
        let k1 = PipelineStateKey::zeroed_for(ShaderStage::Fragment, p.id());
        let mut k2 = k1;
        k2.words[0] = 1;
        assert_eq!(p.note_compile(&k1), None);
        assert_eq!(p.note_compile(&k2), Some(k1));
    }

    #[test]
    fn test_content_hash_covers_info() {
        let a = program();
        let mut info = a.info().clone();
        info.num_ubos = 1;
        info.has_constant_data = true;
        let b = ShaderProgram::new(ProgramId(2), a.ir().clone(), info);
        assert_ne!(a.content_hash(), b.content_hash());

        let c = ShaderProgram::new(ProgramId(3), a.ir().clone(), a.info().clone());
        assert_eq!(a.content_hash(), c.content_hash());
    }
}
