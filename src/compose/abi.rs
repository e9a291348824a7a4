//! Calling conventions of main bodies and parts.
//!
//! Every signature starts with the same four uniform dwords:
//!
//! | dword | name                | notes                                    |
//! |-------|---------------------|------------------------------------------|
//! | 0-1   | `internal_bindings` | pointer to driver-internal descriptors   |
//! | 2     | `scratch_offset`    |                                          |
//! | 3     | `merged_wave_info`  | live counts of a merged unit, see below  |
//!
//! For merged units, bits 0..7 of `merged_wave_info` hold the number of
//! invocations with first-half work and bits 8..15 those with second-half
//! work.
//!
//! Both halves of a merged unit declare the same uniform layout so that the
//! second half can be fed from the wrapper's initial values.

use crate::program::ShaderInfo;
use crate::stage::ShaderStage;

use super::types::{Param, ScalarKind, Signature, ValueType};

/// Uniform dword holding the merged live-invocation counts.
pub const MERGED_WAVE_INFO_DWORD: u32 = 3;

/// Register layout family a stage is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgLayout {
    Standalone,
    /// Vertex + tessellation control in one unit.
    MergedLsHs,
    /// Vertex or tessellation evaluation + geometry in one unit.
    MergedEsGs { es_is_vertex: bool },
}

// ─── Uniforms ────────────────────────────────────────────────────────────────

fn common_uniforms() -> Vec<Param> {
    vec![
        Param::uniform("internal_bindings", ValueType::PTR),
        Param::uniform("scratch_offset", ValueType::I32),
        Param::uniform("merged_wave_info", ValueType::I32),
        Param::uniform("const_buffers", ValueType::PTR),
    ]
}

fn vs_uniforms() -> [Param; 3] {
    [
        Param::uniform("base_vertex", ValueType::I32),
        Param::uniform("start_instance", ValueType::I32),
        Param::uniform("draw_id", ValueType::I32),
    ]
}

fn tcs_uniforms() -> [Param; 2] {
    [
        Param::uniform("tess_offchip_layout", ValueType::I32),
        Param::uniform("tess_factor_offset", ValueType::I32),
    ]
}

fn tes_uniforms() -> [Param; 3] {
    [
        Param::uniform("tess_offchip_layout", ValueType::I32),
        Param::uniform("tes_pad0", ValueType::I32),
        Param::uniform("tes_pad1", ValueType::I32),
    ]
}

fn gs_uniforms() -> [Param; 2] {
    [
        Param::uniform("gs2vs_offset", ValueType::I32),
        Param::uniform("gs_wave_id", ValueType::I32),
    ]
}

fn fs_uniforms() -> [Param; 2] {
    [
        Param::uniform("alpha_ref", ValueType::F32),
        Param::uniform("prim_mask", ValueType::I32),
    ]
}

/// Uniform parameters of `stage` under `layout`.
#[must_use]
pub fn uniforms(stage: ShaderStage, layout: ArgLayout) -> Vec<Param> {
    let mut params = common_uniforms();
    match layout {
        ArgLayout::MergedLsHs => {
            params.extend(vs_uniforms());
            params.extend(tcs_uniforms());
        }
        ArgLayout::MergedEsGs { es_is_vertex } => {
            if es_is_vertex {
                params.extend(vs_uniforms());
            } else {
                params.extend(tes_uniforms());
            }
            params.extend(gs_uniforms());
        }
        ArgLayout::Standalone => match stage {
            ShaderStage::Vertex => params.extend(vs_uniforms()),
            ShaderStage::TessControl => params.extend(tcs_uniforms()),
            ShaderStage::TessEval => params.extend(tes_uniforms()),
            ShaderStage::Geometry => params.extend(gs_uniforms()),
            ShaderStage::Fragment => params.extend(fs_uniforms()),
            ShaderStage::Compute => {}
        },
    }
    params
}

/// The same uniforms as plain returned dwords.
fn uniform_returns(stage: ShaderStage, layout: ArgLayout) -> Vec<Param> {
    uniforms(stage, layout)
        .into_iter()
        .flat_map(|p| {
            (0..p.ty.dwords).map(move |d| {
                let name = if p.ty.dwords == 1 {
                    p.name.clone()
                } else {
                    format!("{}.{d}", p.name).into()
                };
                Param::uniform(name, ValueType::I32)
            })
        })
        .collect()
}

// ─── Varyings ────────────────────────────────────────────────────────────────

fn gs_varyings(merged: bool) -> Vec<Param> {
    if merged {
        ["gs_vtx01_offset", "gs_vtx23_offset", "gs_prim_id", "gs_invocation_id", "gs_vtx45_offset"]
            .into_iter()
            .map(|n| Param::varying(n, ValueType::I32))
            .collect()
    } else {
        (0..6)
            .map(|i| Param::varying(format!("gs_vtx{i}_offset"), ValueType::I32))
            .chain([
                Param::varying("gs_prim_id", ValueType::I32),
                Param::varying("gs_invocation_id", ValueType::I32),
            ])
            .collect()
    }
}

fn vs_system_varyings(layout: ArgLayout) -> Vec<Param> {
    let mut params = match layout {
        ArgLayout::MergedLsHs => vec![
            Param::varying("tcs_patch_id", ValueType::I32),
            Param::varying("tcs_rel_ids", ValueType::I32),
        ],
        ArgLayout::MergedEsGs { .. } => gs_varyings(true),
        ArgLayout::Standalone => Vec::new(),
    };
    params.extend([
        Param::varying("vertex_id", ValueType::I32),
        Param::varying("instance_id", ValueType::I32),
        Param::varying("rel_auto_id", ValueType::I32),
    ]);
    if layout == ArgLayout::Standalone {
        params.push(Param::varying("vs_prim_id", ValueType::I32));
    }
    params
}

fn vertex_index_varyings(num_inputs: u32) -> impl Iterator<Item = Param> {
    (0..num_inputs).map(|i| Param::varying(format!("vertex_index{i}"), ValueType::F32))
}

fn tes_varyings(layout: ArgLayout) -> Vec<Param> {
    let mut params = if matches!(layout, ArgLayout::MergedEsGs { .. }) {
        gs_varyings(true)
    } else {
        Vec::new()
    };
    params.extend([
        Param::varying("tes_u", ValueType::F32),
        Param::varying("tes_v", ValueType::F32),
        Param::varying("tes_rel_patch_id", ValueType::I32),
        Param::varying("tes_patch_id", ValueType::I32),
    ]);
    params
}

fn fs_varyings() -> Vec<Param> {
    let v2 = ValueType::vec(ScalarKind::Float, 2);
    vec![
        Param::varying("persp_center", v2),
        Param::varying("persp_sample", v2),
        Param::varying("linear_center", v2),
        Param::varying("pos_x", ValueType::F32),
        Param::varying("pos_y", ValueType::F32),
        Param::varying("pos_z", ValueType::F32),
        Param::varying("pos_w", ValueType::F32),
        Param::varying("front_face", ValueType::I32),
        Param::varying("ancillary", ValueType::I32),
        Param::varying("sample_coverage", ValueType::I32),
    ]
}

/// Flattens varyings to single float dwords, as parts return them.
fn as_returned(params: Vec<Param>) -> Vec<Param> {
    params
        .into_iter()
        .flat_map(|p| {
            (0..p.ty.dwords).map(move |d| {
                let name = if p.ty.dwords == 1 {
                    p.name.clone()
                } else {
                    format!("{}.{d}", p.name).into()
                };
                Param::varying(name, ValueType::F32)
            })
        })
        .collect()
}

// ─── Main bodies ─────────────────────────────────────────────────────────────

/// Facts about the parts surrounding a main body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartLinks {
    pub has_prolog: bool,
    pub has_epilog: bool,
}

/// Signature of a program's main body.
#[must_use]
pub fn main_signature(info: &ShaderInfo, layout: ArgLayout, links: PartLinks) -> Signature {
    let stage = info.stage;
    let mut params = uniforms(stage, layout);
    let mut returns = Vec::new();

    match stage {
        ShaderStage::Vertex => {
            params.extend(vs_system_varyings(layout));
            if links.has_prolog {
                params.extend(vertex_index_varyings(info.num_vertex_inputs));
            }
        }
        ShaderStage::TessControl => {
            params.extend(tcs_varyings(layout));
            if links.has_epilog {
                returns = tcs_epilog_inputs(layout);
            }
        }
        ShaderStage::TessEval => params.extend(tes_varyings(layout)),
        ShaderStage::Geometry => {
            params.extend(gs_varyings(layout != ArgLayout::Standalone));
        }
        ShaderStage::Fragment => {
            params.extend(fs_varyings());
            if links.has_prolog {
                params.extend(color_varyings(info.colors_read));
            }
            if links.has_epilog {
                returns = fs_epilog_params(info);
            }
        }
        ShaderStage::Compute => {
            params.push(Param::varying("local_invocation_ids", ValueType::I32));
        }
    }
    Signature::new(params, returns)
}

fn tcs_varyings(layout: ArgLayout) -> Vec<Param> {
    let mut params = vec![
        Param::varying("tcs_patch_id", ValueType::I32),
        Param::varying("tcs_rel_ids", ValueType::I32),
    ];
    if layout == ArgLayout::MergedLsHs {
        params.extend([
            Param::varying("vertex_id", ValueType::I32),
            Param::varying("instance_id", ValueType::I32),
            Param::varying("rel_auto_id", ValueType::I32),
        ]);
    }
    params
}

fn color_varyings(colors_read: u8) -> impl Iterator<Item = Param> {
    (0..8u32)
        .filter(move |bit| colors_read & (1 << bit) != 0)
        .map(|bit| Param::varying(format!("color{}.{}", bit / 4, bit % 4), ValueType::F32))
}

// ─── Parts ───────────────────────────────────────────────────────────────────

/// Vertex prologue: computes one fetch index per input.
#[must_use]
pub fn vs_prolog_signature(num_inputs: u32, layout: ArgLayout) -> Signature {
    let mut params = uniforms(ShaderStage::Vertex, layout);
    params.extend(vs_system_varyings(layout));

    let mut returns = uniform_returns(ShaderStage::Vertex, layout);
    returns.extend(as_returned(vs_system_varyings(layout)));
    returns.extend(vertex_index_varyings(num_inputs));
    Signature::new(params, returns)
}

fn tcs_epilog_inputs(layout: ArgLayout) -> Vec<Param> {
    let mut returns = uniform_returns(ShaderStage::TessControl, layout);
    returns.extend([
        Param::varying("rel_patch_id", ValueType::F32),
        Param::varying("invocation_id", ValueType::F32),
        Param::varying("tf_lds_offset", ValueType::F32),
    ]);
    returns
}

/// Tessellation control epilogue: writes the tess factors.
#[must_use]
pub fn tcs_epilog_signature(layout: ArgLayout) -> Signature {
    let mut params = uniforms(ShaderStage::TessControl, layout);
    params.extend([
        Param::varying("rel_patch_id", ValueType::I32),
        Param::varying("invocation_id", ValueType::I32),
        Param::varying("tf_lds_offset", ValueType::I32),
    ]);
    Signature::new(params, Vec::new())
}

/// Geometry prologue: may reorder the input vertex offsets.
#[must_use]
pub fn gs_prolog_signature(layout: ArgLayout) -> Signature {
    let merged = layout != ArgLayout::Standalone;
    let mut params = uniforms(ShaderStage::Geometry, layout);
    params.extend(gs_varyings(merged));

    let mut returns = uniform_returns(ShaderStage::Geometry, layout);
    returns.extend(as_returned(gs_varyings(merged)));
    Signature::new(params, returns)
}

/// Fragment prologue: interpolates the color inputs.
#[must_use]
pub fn fs_prolog_signature(colors_read: u8) -> Signature {
    let mut params = uniforms(ShaderStage::Fragment, ArgLayout::Standalone);
    params.extend(fs_varyings());

    let mut returns = uniform_returns(ShaderStage::Fragment, ArgLayout::Standalone);
    returns.extend(as_returned(fs_varyings()));
    returns.extend(color_varyings(colors_read));
    Signature::new(params, returns)
}

fn fs_epilog_params(info: &ShaderInfo) -> Vec<Param> {
    let mut params = uniform_returns(ShaderStage::Fragment, ArgLayout::Standalone);
    for rt in 0..8u32 {
        if info.color_outputs_written & (1 << rt) != 0 {
            params.push(Param::varying(format!("color{rt}"), ValueType::vec(ScalarKind::Float, 4)));
        }
    }
    if info.writes_depth {
        params.push(Param::varying("depth", ValueType::F32));
    }
    params
}

/// Fragment epilogue: converts and exports colors.
#[must_use]
pub fn fs_epilog_signature(info: &ShaderInfo) -> Signature {
    Signature::new(fs_epilog_params(info), Vec::new())
}
