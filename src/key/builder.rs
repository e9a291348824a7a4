//! Key Builder
//!
//! Projects a program's static usage info and the live pipeline state onto
//! a [`PipelineStateKey`]. Pure: the same inputs always give the same key,
//! regardless of the order in which unrelated state was changed.
//!
//! Each stage only looks at the state groups reported by
//! [`key_dependencies`]. Within those groups, fields that cannot affect
//! the program are dropped (flat shading for a shader that reads no colors,
//! the alpha test function under alpha-to-coverage), so variants are not
//! multiplied by state that makes no difference.

use crate::program::{ShaderInfo, ShaderProgram};
use crate::stage::ShaderStage;
use crate::state::{CompareFunc, PipelineState, PrimitiveTopology, StateGroup, MAX_COLOR_TARGETS};

use super::stages::{
    ComputeKey, FragmentKey, GeometryKey, StageKey, TessControlKey, TessEvalKey, VertexKey,
    split_mask,
};
use super::{KeyFlags, PipelineStateKey};

/// How a stage participates in a merged executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergedRole {
    #[default]
    None,
    /// Vertex stage feeding tessellation control.
    Ls,
    /// Vertex or tessellation evaluation stage feeding geometry.
    Es,
}

/// Inter-stage facts owned by the binder.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyContext<'a> {
    /// The stage is the last before rasterization.
    pub last_pre_raster: bool,
    /// Role of this program when it is itself merged into a later stage.
    pub merged_role: MergedRole,
    /// Previous-stage program executed as this variant's first half.
    pub first_half: Option<&'a ShaderProgram>,
    /// Bound tessellation evaluation program, for the control stage.
    pub tess_eval: Option<&'a ShaderInfo>,
    /// Output slots of the last pre-rasterization stage, for fragment.
    pub last_vue_slots: u64,
}

/// Builds the key of `program` under `state`.
#[must_use]
pub fn build_key(
    program: &ShaderProgram,
    state: &PipelineState,
    ctx: &KeyContext<'_>,
) -> PipelineStateKey {
    let info = program.info();
    let mut key = PipelineStateKey::zeroed_for(info.stage, program.id());

    let stage_key = match info.stage {
        ShaderStage::Vertex => StageKey::Vertex(vertex_key(info, state, ctx)),
        ShaderStage::TessControl => StageKey::TessControl(tess_control_key(state, ctx)),
        ShaderStage::TessEval => StageKey::TessEval(tess_eval_key(state, ctx)),
        ShaderStage::Geometry => StageKey::Geometry(geometry_key(state, ctx)),
        ShaderStage::Fragment => StageKey::Fragment(fragment_key(info, state, ctx)),
        ShaderStage::Compute => StageKey::Compute(ComputeKey::default()),
    };
    key.set_stage_key(&stage_key);

    let mut flags = KeyFlags::empty();
    if ctx.last_pre_raster && info.stage.produces_vertices() {
        flags |= KeyFlags::LAST_PRE_RASTER;
    }
    if let Some(first) = ctx.first_half {
        flags |= KeyFlags::MERGED;
        key.previous_program_id = first.id().raw();
    }
    key.flags = flags.bits();
    key
}

/// State groups that can change the key of a program of this kind.
///
/// The binder combines these with the groups reported changed by the state
/// tracker; a change in any other group never leads to a key rebuild.
#[must_use]
pub fn key_dependencies(info: &ShaderInfo) -> StateGroup {
    match info.stage {
        ShaderStage::Vertex => StateGroup::RASTERIZER | StateGroup::VERTEX_ELEMENTS,
        ShaderStage::TessControl => StateGroup::TESS,
        ShaderStage::TessEval => StateGroup::RASTERIZER,
        ShaderStage::Geometry => StateGroup::RASTERIZER | StateGroup::PRIMITIVE,
        ShaderStage::Fragment => {
            let mut deps = StateGroup::FRAMEBUFFER
                | StateGroup::BLEND
                | StateGroup::DEPTH_STENCIL_ALPHA
                | StateGroup::RASTERIZER;
            if info.depends_on_last_vue_map {
                deps |= StateGroup::LAST_VUE_MAP;
            }
            deps
        }
        ShaderStage::Compute => StateGroup::empty(),
    }
}

// ─── Shared pieces ───────────────────────────────────────────────────────────

fn userclip_planes(state: &PipelineState, ctx: &KeyContext<'_>) -> u8 {
    if ctx.last_pre_raster {
        (8 - state.rasterizer().clip_plane_enable.leading_zeros()) as u8
    } else {
        0
    }
}

fn clamp_vertex_color(state: &PipelineState, ctx: &KeyContext<'_>) -> bool {
    ctx.last_pre_raster && state.rasterizer().clamp_vertex_color
}

/// Vertex prologue inputs: `(num_inputs, divisor_is_one, divisor_is_fetched)`.
fn vertex_prolog(info: &ShaderInfo, state: &PipelineState) -> (u8, u16, u16) {
    let mut is_one = 0u16;
    let mut is_fetched = 0u16;
    let elements = &state.vertex_elements().elements;
    let count = (info.num_vertex_inputs as usize).min(elements.len()).min(16);
    for (i, element) in elements.iter().take(count).enumerate() {
        match element.instance_divisor {
            0 => {}
            1 => is_one |= 1 << i,
            _ => is_fetched |= 1 << i,
        }
    }
    (info.num_vertex_inputs.min(16) as u8, is_one, is_fetched)
}

/// Embedded prologue of a vertex program running as a merged first half.
fn first_half_prolog(state: &PipelineState, ctx: &KeyContext<'_>) -> (u8, u16, u16) {
    match ctx.first_half {
        Some(first) if first.stage() == ShaderStage::Vertex => vertex_prolog(first.info(), state),
        _ => (0, 0, 0),
    }
}

// ─── Stages ──────────────────────────────────────────────────────────────────

fn vertex_key(info: &ShaderInfo, state: &PipelineState, ctx: &KeyContext<'_>) -> VertexKey {
    let (prolog_num_inputs, prolog_divisor_is_one, prolog_divisor_is_fetched) =
        vertex_prolog(info, state);
    VertexKey {
        nr_userclip_plane_consts: userclip_planes(state, ctx),
        clamp_vertex_color: clamp_vertex_color(state, ctx),
        as_ls: ctx.merged_role == MergedRole::Ls,
        as_es: ctx.merged_role == MergedRole::Es,
        prolog_num_inputs,
        prolog_divisor_is_one,
        prolog_divisor_is_fetched,
    }
}

fn tess_control_key(state: &PipelineState, ctx: &KeyContext<'_>) -> TessControlKey {
    let (ls_prolog_num_inputs, ls_prolog_divisor_is_one, ls_prolog_divisor_is_fetched) =
        first_half_prolog(state, ctx);
    let (tes_primitive_mode, tes_reads_tess_factors, outputs_written, patch_outputs_written) =
        match ctx.tess_eval {
            Some(tes) => (
                tes.tess_primitive,
                tes.reads_tess_factors,
                tes.inputs_read,
                tes.patch_inputs_read,
            ),
            None => Default::default(),
        };
    let (outputs_written_lo, outputs_written_hi) = split_mask(outputs_written);
    TessControlKey {
        input_vertices: (*state.patch_vertices()).min(32) as u8,
        tes_primitive_mode,
        tes_reads_tess_factors,
        outputs_written_lo,
        patch_outputs_written,
        ls_prolog_num_inputs,
        ls_prolog_divisor_is_one,
        ls_prolog_divisor_is_fetched,
        outputs_written_hi,
    }
}

fn tess_eval_key(state: &PipelineState, ctx: &KeyContext<'_>) -> TessEvalKey {
    TessEvalKey {
        nr_userclip_plane_consts: userclip_planes(state, ctx),
        clamp_vertex_color: clamp_vertex_color(state, ctx),
        as_es: ctx.merged_role == MergedRole::Es,
    }
}

fn geometry_key(state: &PipelineState, ctx: &KeyContext<'_>) -> GeometryKey {
    let (es_prolog_num_inputs, es_prolog_divisor_is_one, es_prolog_divisor_is_fetched) =
        first_half_prolog(state, ctx);
    GeometryKey {
        nr_userclip_plane_consts: userclip_planes(state, ctx),
        clamp_vertex_color: clamp_vertex_color(state, ctx),
        prolog_tri_strip_adj_fix: *state.topology() == PrimitiveTopology::TriangleStripAdjacency,
        es_prolog_num_inputs,
        es_prolog_divisor_is_one,
        es_prolog_divisor_is_fetched,
    }
}

fn fragment_key(info: &ShaderInfo, state: &PipelineState, ctx: &KeyContext<'_>) -> FragmentKey {
    let rast = state.rasterizer();
    let blend = state.blend();
    let fb = state.framebuffer();
    let multisample = fb.samples > 1;
    let reads_colors = info.colors_read != 0;

    let alpha_test_func = match state.depth_stencil_alpha().alpha_test {
        Some(func) if !blend.alpha_to_coverage => func,
        _ => CompareFunc::Always,
    };

    let mut spi_format = 0u32;
    let mut is_int8 = 0u8;
    let mut last_cbuf = 0u8;
    for (i, format) in fb.color_formats.iter().enumerate().take(MAX_COLOR_TARGETS) {
        let Some(format) = format else { continue };
        if info.color_outputs_written & (1 << i) == 0 {
            continue;
        }
        spi_format |= (format.export_format() + 1) << (4 * i);
        if format.is_int8() {
            is_int8 |= 1 << i;
        }
        last_cbuf = i as u8;
    }

    let (input_slots_valid_lo, input_slots_valid_hi) = if info.depends_on_last_vue_map {
        split_mask(ctx.last_vue_slots)
    } else {
        (0, 0)
    };

    FragmentKey {
        nr_color_regions: fb.color_regions().clamp(1, MAX_COLOR_TARGETS as u32) as u8,
        flat_shade: reads_colors && rast.flat_shade,
        alpha_test_func,
        alpha_to_coverage: blend.alpha_to_coverage,
        clamp_fragment_color: rast.clamp_fragment_color,
        persample_interp: multisample && (rast.force_persample_interp || info.uses_sample_shading),
        multisample_fbo: multisample,
        color_two_side: reads_colors && rast.light_twoside,
        input_slots_valid_lo,
        epilog_spi_format: spi_format,
        epilog_color_is_int8: is_int8,
        epilog_last_cbuf: last_cbuf,
        input_slots_valid_hi,
    }
}
