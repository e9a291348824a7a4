//! Dirty flags consumed by command emission.

use bitflags::bitflags;

use crate::stage::ShaderStage;

bitflags! {
    /// Hardware state that must be re-emitted before the next draw, plus the
    /// `UNCOMPILED_*` bits telling the binder which stages need a new key.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u64 {
        // ---- Shader programs ----
        const VS              = 1 << 0;
        const TCS             = 1 << 1;
        const TES             = 1 << 2;
        const GS              = 1 << 3;
        const FS              = 1 << 4;
        const CS              = 1 << 5;

        // ---- Per-stage binding tables ----
        const BINDINGS_VS     = 1 << 6;
        const BINDINGS_TCS    = 1 << 7;
        const BINDINGS_TES    = 1 << 8;
        const BINDINGS_GS     = 1 << 9;
        const BINDINGS_FS     = 1 << 10;
        const BINDINGS_CS     = 1 << 11;

        // ---- Per-stage constants ----
        const CONSTANTS_VS    = 1 << 12;
        const CONSTANTS_TCS   = 1 << 13;
        const CONSTANTS_TES   = 1 << 14;
        const CONSTANTS_GS    = 1 << 15;
        const CONSTANTS_FS    = 1 << 16;
        const CONSTANTS_CS    = 1 << 17;

        // ---- Fixed function ----
        const VF_SGVS         = 1 << 18;
        const VERTEX_BUFFERS  = 1 << 19;
        const VERTEX_ELEMENTS = 1 << 20;
        const WM              = 1 << 21;
        const CLIP            = 1 << 22;
        const SBE             = 1 << 23;
        const SF_CL_VIEWPORT  = 1 << 24;
        const CC_VIEWPORT     = 1 << 25;
        const SCISSOR_RECT    = 1 << 26;
        const URB             = 1 << 27;
        const BLEND           = 1 << 28;
        const DEPTH_STENCIL   = 1 << 29;
        const RASTER          = 1 << 30;

        // ---- Binder ----
        const UNCOMPILED_VS   = 1 << 40;
        const UNCOMPILED_TCS  = 1 << 41;
        const UNCOMPILED_TES  = 1 << 42;
        const UNCOMPILED_GS   = 1 << 43;
        const UNCOMPILED_FS   = 1 << 44;
        const UNCOMPILED_CS   = 1 << 45;

        const ALL_UNCOMPILED_RENDER = Self::UNCOMPILED_VS.bits()
            | Self::UNCOMPILED_TCS.bits()
            | Self::UNCOMPILED_TES.bits()
            | Self::UNCOMPILED_GS.bits()
            | Self::UNCOMPILED_FS.bits();
        const ALL_UNCOMPILED = Self::ALL_UNCOMPILED_RENDER.bits() | Self::UNCOMPILED_CS.bits();
    }
}

impl DirtyFlags {
    #[must_use]
    pub fn shader(stage: ShaderStage) -> Self {
        Self::from_bits_retain(1 << stage.index())
    }

    #[must_use]
    pub fn bindings(stage: ShaderStage) -> Self {
        Self::from_bits_retain(1 << (6 + stage.index()))
    }

    #[must_use]
    pub fn constants(stage: ShaderStage) -> Self {
        Self::from_bits_retain(1 << (12 + stage.index()))
    }

    #[must_use]
    pub fn uncompiled(stage: ShaderStage) -> Self {
        Self::from_bits_retain(1 << (40 + stage.index()))
    }

    /// Everything to re-emit when `stage` switches to another variant.
    #[must_use]
    pub fn variant_changed(stage: ShaderStage) -> Self {
        let mut flags = Self::shader(stage) | Self::bindings(stage) | Self::constants(stage);
        match stage {
            ShaderStage::Vertex => flags |= Self::VF_SGVS,
            ShaderStage::Fragment => flags |= Self::WM,
            _ => {}
        }
        flags
    }

    /// Only the binder-facing `UNCOMPILED_*` bits.
    #[must_use]
    pub fn uncompiled_part(self) -> Self {
        self & Self::ALL_UNCOMPILED
    }

    /// Only the hardware-facing bits.
    #[must_use]
    pub fn hardware_part(self) -> Self {
        self - Self::ALL_UNCOMPILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_stage_helpers_match_named_bits() {
        assert_eq!(DirtyFlags::shader(ShaderStage::Geometry), DirtyFlags::GS);
        assert_eq!(DirtyFlags::bindings(ShaderStage::Fragment), DirtyFlags::BINDINGS_FS);
        assert_eq!(DirtyFlags::constants(ShaderStage::Compute), DirtyFlags::CONSTANTS_CS);
        assert_eq!(DirtyFlags::uncompiled(ShaderStage::TessEval), DirtyFlags::UNCOMPILED_TES);
    }

    #[test]
    fn test_vertex_variant_change() {
        let flags = DirtyFlags::variant_changed(ShaderStage::Vertex);
        assert_eq!(
            flags,
            DirtyFlags::VS | DirtyFlags::BINDINGS_VS | DirtyFlags::CONSTANTS_VS | DirtyFlags::VF_SGVS
        );
        assert!(flags.uncompiled_part().is_empty());
    }
}
