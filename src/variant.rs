//! Compiled Variants
//!
//! A [`CompiledVariant`] is one machine-code specialization of a program.
//! Every variant carries the same [`VariantHeader`] and [`BindingTable`];
//! what differs per stage lives in the [`StageInfo`] tagged union, selected
//! by the stage of the key.
//!
//! Variants are immutable once built and shared through `Arc`: the owning
//! program's registry, every per-context cache and the binder all hold the
//! same allocation, which is what makes `Arc::ptr_eq` a valid "did the
//! variant change" test.

use serde::{Deserialize, Serialize};

use crate::backend::{BackendStats, OptLevel, StageLinkage};
use crate::key::{PipelineStateKey, StageKey};
use crate::program::{ProgramId, ShaderInfo};
use crate::resources::BindingTable;
use crate::stage::ShaderStage;
use crate::state::TessPrimitive;

/// Fields shared by every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantHeader {
    pub program: ProgramId,
    pub key: PipelineStateKey,
    /// Final machine code with compact resource slots patched in.
    pub code: Vec<u8>,
    pub stats: BackendStats,
    pub opt_level: OptLevel,
}

// ─── Stage Info ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexInfo {
    /// Output slot mask, i.e. the vertex output map.
    pub outputs_written: u64,
    pub uses_draw_params: bool,
    pub needs_edge_flag: bool,
    pub writes_viewport_index: bool,
    pub urb_entry_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TessControlInfo {
    pub outputs_written: u64,
    pub patch_outputs_written: u64,
    pub vertices_out: u32,
    pub urb_entry_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TessEvalInfo {
    pub outputs_written: u64,
    pub primitive: TessPrimitive,
    pub writes_viewport_index: bool,
    pub urb_entry_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryInfo {
    pub outputs_written: u64,
    pub max_vertices: u32,
    pub writes_viewport_index: bool,
    pub urb_entry_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
    pub color_outputs_written: u8,
    pub uses_discard: bool,
    pub per_sample: bool,
    pub writes_depth: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeInfo {
    pub workgroup_size: [u32; 3],
    pub uses_num_work_groups: bool,
}

/// Stage-specific metadata of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageInfo {
    Vertex(VertexInfo),
    TessControl(TessControlInfo),
    TessEval(TessEvalInfo),
    Geometry(GeometryInfo),
    Fragment(FragmentInfo),
    Compute(ComputeInfo),
}

impl StageInfo {
    /// Combines static program info, the key and backend linkage.
    #[must_use]
    pub fn new(info: &ShaderInfo, key: &PipelineStateKey, linkage: &StageLinkage) -> Self {
        let outputs_written = if linkage.outputs_written != 0 {
            linkage.outputs_written
        } else {
            info.outputs_written
        };
        let writes_viewport_index = linkage.writes_viewport_index || info.writes_viewport_index;
        let urb_entry_size = linkage.urb_entry_size;

        match key.stage() {
            ShaderStage::Vertex => Self::Vertex(VertexInfo {
                outputs_written,
                uses_draw_params: info.uses_draw_params,
                needs_edge_flag: info.needs_edge_flag,
                writes_viewport_index,
                urb_entry_size,
            }),
            ShaderStage::TessControl => Self::TessControl(TessControlInfo {
                outputs_written,
                patch_outputs_written: u64::from(info.patch_outputs_written),
                vertices_out: info.tcs_vertices_out,
                urb_entry_size,
            }),
            ShaderStage::TessEval => Self::TessEval(TessEvalInfo {
                outputs_written,
                primitive: info.tess_primitive,
                writes_viewport_index,
                urb_entry_size,
            }),
            ShaderStage::Geometry => Self::Geometry(GeometryInfo {
                outputs_written,
                max_vertices: info.gs_max_vertices,
                writes_viewport_index,
                urb_entry_size,
            }),
            ShaderStage::Fragment => {
                let persample_key = match key.stage_key() {
                    StageKey::Fragment(fs) => fs.persample_interp,
                    _ => false,
                };
                Self::Fragment(FragmentInfo {
                    color_outputs_written: info.color_outputs_written,
                    uses_discard: info.uses_discard,
                    per_sample: info.uses_sample_shading || persample_key,
                    writes_depth: info.writes_depth,
                })
            }
            ShaderStage::Compute => Self::Compute(ComputeInfo {
                workgroup_size: info.workgroup_size,
                uses_num_work_groups: info.uses_num_work_groups,
            }),
        }
    }

    #[must_use]
    pub fn stage(&self) -> ShaderStage {
        match self {
            Self::Vertex(_) => ShaderStage::Vertex,
            Self::TessControl(_) => ShaderStage::TessControl,
            Self::TessEval(_) => ShaderStage::TessEval,
            Self::Geometry(_) => ShaderStage::Geometry,
            Self::Fragment(_) => ShaderStage::Fragment,
            Self::Compute(_) => ShaderStage::Compute,
        }
    }

    /// Output slot mask for stages that feed later stages.
    #[must_use]
    pub fn vue_map(&self) -> Option<u64> {
        match self {
            Self::Vertex(v) => Some(v.outputs_written),
            Self::TessControl(v) => Some(v.outputs_written),
            Self::TessEval(v) => Some(v.outputs_written),
            Self::Geometry(v) => Some(v.outputs_written),
            Self::Fragment(_) | Self::Compute(_) => None,
        }
    }

    #[must_use]
    pub fn urb_entry_size(&self) -> u32 {
        match self {
            Self::Vertex(v) => v.urb_entry_size,
            Self::TessControl(v) => v.urb_entry_size,
            Self::TessEval(v) => v.urb_entry_size,
            Self::Geometry(v) => v.urb_entry_size,
            Self::Fragment(_) | Self::Compute(_) => 0,
        }
    }

    #[must_use]
    pub fn writes_viewport_index(&self) -> bool {
        match self {
            Self::Vertex(v) => v.writes_viewport_index,
            Self::TessEval(v) => v.writes_viewport_index,
            Self::Geometry(v) => v.writes_viewport_index,
            _ => false,
        }
    }

    #[must_use]
    pub fn as_vertex(&self) -> Option<&VertexInfo> {
        match self {
            Self::Vertex(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_fragment(&self) -> Option<&FragmentInfo> {
        match self {
            Self::Fragment(v) => Some(v),
            _ => None,
        }
    }
}

// ─── Variant ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledVariant {
    pub header: VariantHeader,
    pub bindings: BindingTable,
    pub stage_info: StageInfo,
}

impl CompiledVariant {
    #[inline]
    #[must_use]
    pub fn program(&self) -> ProgramId {
        self.header.program
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> &PipelineStateKey {
        &self.header.key
    }

    #[inline]
    #[must_use]
    pub fn stage(&self) -> ShaderStage {
        self.stage_info.stage()
    }

    #[inline]
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.header.code
    }
}

/// Where a lookup found its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantSource {
    /// The context's own variant cache.
    Context,
    /// Another context already compiled it into the program's registry.
    Registry,
    /// Loaded from the persistent cache.
    Persistent,
    /// Freshly compiled by the backend.
    Compiled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_info_follows_key_stage() {
        let info = ShaderInfo {
            outputs_written: 0b1011,
            uses_draw_params: true,
            ..ShaderInfo::new(ShaderStage::Vertex)
        };
        let key = PipelineStateKey::zeroed_for(ShaderStage::Vertex, ProgramId(1));
        let stage_info = StageInfo::new(&info, &key, &StageLinkage::default());

        assert_eq!(stage_info.stage(), ShaderStage::Vertex);
        assert_eq!(stage_info.vue_map(), Some(0b1011));
        assert!(stage_info.as_vertex().unwrap().uses_draw_params);
        assert!(stage_info.as_fragment().is_none());
    }

    #[test]
    fn test_linkage_overrides_static_outputs() {
        let info = ShaderInfo {
            outputs_written: 0b1,
            ..ShaderInfo::new(ShaderStage::Geometry)
        };
        let key = PipelineStateKey::zeroed_for(ShaderStage::Geometry, ProgramId(1));
        let linkage = StageLinkage {
            outputs_written: 0b111,
            urb_entry_size: 4,
            writes_viewport_index: true,
        };
        let stage_info = StageInfo::new(&info, &key, &linkage);
        assert_eq!(stage_info.vue_map(), Some(0b111));
        assert_eq!(stage_info.urb_entry_size(), 4);
        assert!(stage_info.writes_viewport_index());
    }
}
