//! Shader pipeline stages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A programmable pipeline stage.
///
/// The discriminant doubles as the index into per-stage arrays and as the
/// stage tag stored in [`PipelineStateKey`](crate::key::PipelineStateKey)
/// headers, so the order must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ShaderStage {
    Vertex = 0,
    TessControl = 1,
    TessEval = 2,
    Geometry = 3,
    Fragment = 4,
    Compute = 5,
}

impl ShaderStage {
    pub const COUNT: usize = 6;

    /// All stages in pipeline order.
    pub const ALL: [ShaderStage; Self::COUNT] = [
        Self::Vertex,
        Self::TessControl,
        Self::TessEval,
        Self::Geometry,
        Self::Fragment,
        Self::Compute,
    ];

    /// The graphics stages that run before rasterization.
    pub const PRE_RASTER: [ShaderStage; 4] = [
        Self::Vertex,
        Self::TessControl,
        Self::TessEval,
        Self::Geometry,
    ];

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Short name used in logs and debug dumps.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessControl => "tess ctrl",
            Self::TessEval => "tess eval",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }

    /// Whether this stage writes a vertex output map (VUE map) consumed by
    /// a later stage.
    #[inline]
    #[must_use]
    pub fn produces_vertices(self) -> bool {
        matches!(
            self,
            Self::Vertex | Self::TessControl | Self::TessEval | Self::Geometry
        )
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
