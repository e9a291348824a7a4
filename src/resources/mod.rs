//! Resource Slot Compaction
//!
//! Maps the sparse `(group, index)` resource references of a shader variant
//! onto a dense hardware binding table.
//!
//! - [`binding_table`]: table construction and the two mapping directions
//! - [`usage`]: usage collection and IR rewriting (two passes, owned copies)
//! - [`fixup`]: patching compact indices into backend machine code
//!
//! # Usage
//!
//! ```rust,ignore
//! let usage = usage::collect(&ir);
//! let table = BindingTable::compact(&usage, &sizes, settings.binding_table_compaction);
//! let rewritten = usage::rewrite(&ir, &table);
//! ```

pub mod binding_table;
pub mod fixup;
pub mod usage;

pub use binding_table::{
    BINDING_TABLE_ENTRY_BYTES, BindingTable, GroupSizes, GroupUsage, NOT_USED,
    SURFACE_GROUP_MAX_ELEMENTS, SurfaceGroup, low_bits,
};
pub use fixup::apply_fixups;

use crate::program::ShaderInfo;
use crate::stage::ShaderStage;

/// Declared element count of every group for one program.
///
/// `color_regions` is the bound render-target count and only matters for
/// fragment shaders, which always get at least one (possibly null) target.
///
/// The UBO group carries one extra trailing slot for the program's constant
/// data, and SSBOs are preceded by the atomic counter buffers.
#[must_use]
pub fn declared_sizes(info: &ShaderInfo, color_regions: u32) -> GroupSizes {
    let mut sizes = GroupSizes::new();

    if info.stage == ShaderStage::Fragment {
        sizes.set(SurfaceGroup::RenderTarget, color_regions.max(1));
    }
    if info.stage == ShaderStage::Compute && info.uses_num_work_groups {
        sizes.set(SurfaceGroup::WorkGroups, 1);
    }

    sizes.set(
        SurfaceGroup::Texture,
        64 - info.textures_used.leading_zeros(),
    );
    sizes.set(SurfaceGroup::Ubo, info.num_ubos + 1);
    sizes.set(SurfaceGroup::Ssbo, info.num_atomic_buffers + info.num_ssbos);
    sizes.set(SurfaceGroup::Image, info.num_images);
    sizes
}

/// Usage the driver adds on top of what the IR references.
///
/// Render targets are always bound in full, and the constant-data UBO is
/// referenced by backend-emitted loads rather than by IR instructions.
#[must_use]
pub fn implicit_usage(info: &ShaderInfo, sizes: &GroupSizes) -> GroupUsage {
    let mut usage = GroupUsage::new();

    usage.mark_mask(
        SurfaceGroup::RenderTarget,
        low_bits(sizes.get(SurfaceGroup::RenderTarget)),
    );
    if sizes.get(SurfaceGroup::WorkGroups) > 0 {
        usage.mark(SurfaceGroup::WorkGroups, 0);
    }
    if info.has_constant_data {
        usage.mark(SurfaceGroup::Ubo, sizes.get(SurfaceGroup::Ubo) - 1);
    }
    usage
}
