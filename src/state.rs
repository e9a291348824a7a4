//! Live Pipeline State
//!
//! [`PipelineState`] holds the dynamically settable GPU configuration the
//! state tracker hands to the engine. State is grouped into
//! [`StateGroup`]s; every setter records the group it changed so the binder
//! can invalidate only the stages whose keys depend on it.
//!
//! Much of this state never reaches a key (viewports, scissors, blend
//! color, line width). It lives here anyway so the binder can demonstrate
//! that such changes never trigger a rebuild.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Max simultaneously bound render targets.
pub const MAX_COLOR_TARGETS: usize = 8;
/// Max vertex attributes.
pub const MAX_VERTEX_ELEMENTS: usize = 16;
/// Max user clip planes.
pub const MAX_CLIP_PLANES: usize = 8;

bitflags! {
    /// Groups of pipeline state that are set together.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StateGroup: u32 {
        const RASTERIZER          = 1 << 0;
        const BLEND               = 1 << 1;
        const FRAMEBUFFER         = 1 << 2;
        const VERTEX_ELEMENTS     = 1 << 3;
        const DEPTH_STENCIL_ALPHA = 1 << 4;
        const SAMPLE_MASK         = 1 << 5;
        const CLIP                = 1 << 6;
        const VIEWPORT            = 1 << 7;
        const SCISSOR             = 1 << 8;
        const BLEND_COLOR         = 1 << 9;
        const STENCIL_REF         = 1 << 10;
        const TESS                = 1 << 11;
        const PRIMITIVE           = 1 << 12;
        /// The output map of the last pre-rasterization stage. Set by the
        /// binder, never by the state tracker.
        const LAST_VUE_MAP        = 1 << 13;
    }
}

// ─── Enumerations ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompareFunc {
    Never = 0,
    Less = 1,
    Equal = 2,
    LessEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterEqual = 6,
    #[default]
    Always = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TessPrimitive {
    #[default]
    Triangles = 0,
    Quads = 1,
    Isolines = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
    LinesAdjacency,
    TrianglesAdjacency,
    TriangleStripAdjacency,
    Patches,
}

/// Render-target formats, reduced to what changes fragment output code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColorFormat {
    #[default]
    Unorm8 = 0,
    Snorm8 = 1,
    Uint8 = 2,
    Sint8 = 3,
    Float16 = 4,
    Uint16 = 5,
    Sint16 = 6,
    Float32 = 7,
    Uint32 = 8,
    Sint32 = 9,
    Unorm10 = 10,
}

impl ColorFormat {
    /// Export encoding used by the fragment epilogue (4 bits).
    #[inline]
    #[must_use]
    pub fn export_format(self) -> u32 {
        self as u32
    }

    /// 8-bit integer formats need clamping in the epilogue.
    #[inline]
    #[must_use]
    pub fn is_int8(self) -> bool {
        matches!(self, Self::Uint8 | Self::Sint8)
    }
}

// ─── State Objects ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RasterizerState {
    /// Bitmask of enabled user clip planes.
    pub clip_plane_enable: u8,
    pub clamp_vertex_color: bool,
    pub clamp_fragment_color: bool,
    pub flat_shade: bool,
    pub light_twoside: bool,
    pub force_persample_interp: bool,
    pub line_width: f32,
    pub point_size: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlendState {
    pub alpha_to_coverage: bool,
    pub alpha_to_one: bool,
    pub color_write_masks: [u8; MAX_COLOR_TARGETS],
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DepthStencilAlphaState {
    pub depth_test: Option<CompareFunc>,
    pub depth_write: bool,
    /// Alpha test function, `None` when disabled.
    pub alpha_test: Option<CompareFunc>,
    /// Supplied to shaders as a uniform, never compiled in.
    pub alpha_ref: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FramebufferState {
    pub color_formats: SmallVec<[Option<ColorFormat>; MAX_COLOR_TARGETS]>,
    pub samples: u32,
    pub width: u32,
    pub height: u32,
}

impl FramebufferState {
    /// Render-target count as seen by the fragment key.
    #[inline]
    #[must_use]
    pub fn color_regions(&self) -> u32 {
        self.color_formats.len() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VertexElement {
    pub buffer_index: u32,
    pub offset: u32,
    pub format: u32,
    /// 0 = per-vertex, 1 = per-instance, N = fetched divisor.
    pub instance_divisor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VertexElements {
    pub elements: SmallVec<[VertexElement; MAX_VERTEX_ELEMENTS]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub scale: [f32; 3],
    pub translate: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// ─── Pipeline State ──────────────────────────────────────────────────────────

/// The live pipeline state of one context.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineState {
    rasterizer: RasterizerState,
    blend: BlendState,
    depth_stencil_alpha: DepthStencilAlphaState,
    framebuffer: FramebufferState,
    vertex_elements: VertexElements,
    clip_planes: [[f32; 4]; MAX_CLIP_PLANES],
    viewport: Viewport,
    scissor: ScissorRect,
    blend_color: [f32; 4],
    stencil_ref: [u8; 2],
    sample_mask: u32,
    patch_vertices: u32,
    topology: PrimitiveTopology,

    changed: StateGroup,
}

macro_rules! state_setter {
    ($set:ident, $get:ident, $field:ident: $ty:ty, $group:ident) => {
        #[inline]
        #[must_use]
        pub fn $get(&self) -> &$ty {
            &self.$field
        }

        /// Replaces the state and records its group if it differs.
        pub fn $set(&mut self, value: $ty) {
            if self.$field != value {
                self.$field = value;
                self.changed |= StateGroup::$group;
            }
        }
    };
}

impl PipelineState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sample_mask: u32::MAX,
            patch_vertices: 3,
            framebuffer: FramebufferState {
                samples: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    state_setter!(set_rasterizer, rasterizer, rasterizer: RasterizerState, RASTERIZER);
    state_setter!(set_blend, blend, blend: BlendState, BLEND);
    state_setter!(
        set_depth_stencil_alpha,
        depth_stencil_alpha,
        depth_stencil_alpha: DepthStencilAlphaState,
        DEPTH_STENCIL_ALPHA
    );
    state_setter!(set_framebuffer, framebuffer, framebuffer: FramebufferState, FRAMEBUFFER);
    state_setter!(
        set_vertex_elements,
        vertex_elements,
        vertex_elements: VertexElements,
        VERTEX_ELEMENTS
    );
    state_setter!(set_clip_planes, clip_planes, clip_planes: [[f32; 4]; MAX_CLIP_PLANES], CLIP);
    state_setter!(set_viewport, viewport, viewport: Viewport, VIEWPORT);
    state_setter!(set_scissor, scissor, scissor: ScissorRect, SCISSOR);
    state_setter!(set_blend_color, blend_color, blend_color: [f32; 4], BLEND_COLOR);
    state_setter!(set_stencil_ref, stencil_ref, stencil_ref: [u8; 2], STENCIL_REF);
    state_setter!(set_sample_mask, sample_mask, sample_mask: u32, SAMPLE_MASK);
    state_setter!(set_patch_vertices, patch_vertices, patch_vertices: u32, TESS);
    state_setter!(set_topology, topology, topology: PrimitiveTopology, PRIMITIVE);

    /// Groups changed since the last call.
    pub fn take_changed(&mut self) -> StateGroup {
        std::mem::take(&mut self.changed)
    }

    #[inline]
    #[must_use]
    pub fn pending_changes(&self) -> StateGroup {
        self.changed
    }
}
