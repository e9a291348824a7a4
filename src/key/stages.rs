//! Per-stage key layouts.
//!
//! Word 0 of every stage holds small flags and counts; wider masks get a
//! word of their own. Fields for an embedded first-half prologue (merged
//! stages) use the high words.

use crate::state::{CompareFunc, TessPrimitive};

use super::fields::stage_key;

stage_key! {
    /// Vertex shader key.
    struct VertexKey {
        nr_userclip_plane_consts: u8 = [0, 0, 4],
        clamp_vertex_color: bool = [0, 4, 1],
        /// Runs as the first half of a merged tessellation unit.
        as_ls: bool = [0, 5, 1],
        /// Runs as the first half of a merged geometry unit.
        as_es: bool = [0, 6, 1],
        prolog_num_inputs: u8 = [0, 8, 5],
        prolog_divisor_is_one: u16 = [1, 0, 16],
        prolog_divisor_is_fetched: u16 = [1, 16, 16],
    }
}

stage_key! {
    /// Tessellation control shader key.
    struct TessControlKey {
        input_vertices: u8 = [0, 0, 6],
        tes_primitive_mode: TessPrimitive = [0, 8, 2],
        tes_reads_tess_factors: bool = [0, 10, 1],
        outputs_written_lo: u32 = [1, 0, 32],
        patch_outputs_written: u32 = [2, 0, 32],
        ls_prolog_num_inputs: u8 = [3, 0, 5],
        ls_prolog_divisor_is_one: u16 = [4, 0, 16],
        ls_prolog_divisor_is_fetched: u16 = [4, 16, 16],
        outputs_written_hi: u32 = [5, 0, 32],
    }
}

impl TessControlKey {
    /// Per-vertex outputs the evaluation stage reads.
    #[must_use]
    pub fn outputs_written(&self) -> u64 {
        join_mask(self.outputs_written_lo, self.outputs_written_hi)
    }
}

stage_key! {
    /// Tessellation evaluation shader key.
    struct TessEvalKey {
        nr_userclip_plane_consts: u8 = [0, 0, 4],
        clamp_vertex_color: bool = [0, 4, 1],
        as_es: bool = [0, 5, 1],
    }
}

stage_key! {
    /// Geometry shader key.
    struct GeometryKey {
        nr_userclip_plane_consts: u8 = [0, 0, 4],
        clamp_vertex_color: bool = [0, 4, 1],
        prolog_tri_strip_adj_fix: bool = [0, 5, 1],
        es_prolog_num_inputs: u8 = [1, 0, 5],
        es_prolog_divisor_is_one: u16 = [2, 0, 16],
        es_prolog_divisor_is_fetched: u16 = [2, 16, 16],
    }
}

stage_key! {
    /// Fragment shader key.
    struct FragmentKey {
        nr_color_regions: u8 = [0, 0, 4],
        flat_shade: bool = [0, 4, 1],
        alpha_test_func: CompareFunc = [0, 5, 3],
        alpha_to_coverage: bool = [0, 8, 1],
        clamp_fragment_color: bool = [0, 9, 1],
        persample_interp: bool = [0, 10, 1],
        multisample_fbo: bool = [0, 11, 1],
        color_two_side: bool = [0, 12, 1],
        input_slots_valid_lo: u32 = [1, 0, 32],
        /// 4-bit export format per render target, 0 = unbound.
        epilog_spi_format: u32 = [2, 0, 32],
        epilog_color_is_int8: u8 = [3, 0, 8],
        epilog_last_cbuf: u8 = [3, 8, 3],
        input_slots_valid_hi: u32 = [4, 0, 32],
    }
}

impl FragmentKey {
    /// Input slots written by the last pre-rasterization stage.
    #[must_use]
    pub fn input_slots_valid(&self) -> u64 {
        join_mask(self.input_slots_valid_lo, self.input_slots_valid_hi)
    }
}

stage_key! {
    /// Compute shaders are keyed by the header alone.
    struct ComputeKey {}
}

/// Splits a 64-bit slot mask into the low and high key words.
#[inline]
#[must_use]
pub fn split_mask(mask: u64) -> (u32, u32) {
    (mask as u32, (mask >> 32) as u32)
}

#[inline]
#[must_use]
pub fn join_mask(lo: u32, hi: u32) -> u64 {
    u64::from(lo) | (u64::from(hi) << 32)
}

/// Typed view of a [`PipelineStateKey`](super::PipelineStateKey).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKey {
    Vertex(VertexKey),
    TessControl(TessControlKey),
    TessEval(TessEvalKey),
    Geometry(GeometryKey),
    Fragment(FragmentKey),
    Compute(ComputeKey),
}
