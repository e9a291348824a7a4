//! Machine-code relocation of resource indices.

use crate::backend::Fixup;

use super::binding_table::{BindingTable, NOT_USED};

/// Returns a copy of `code` with every fixup location holding its compact
/// slot index as a little-endian `u32`.
///
/// Dynamic references receive the group's base offset. A reference without a
/// slot is written as [`NOT_USED`]; the caller validates the manifest before
/// relocating.
///
/// # Panics
/// Panics if a fixup points outside `code`.
#[must_use]
pub fn apply_fixups(code: &[u8], fixups: &[Fixup], table: &BindingTable) -> Vec<u8> {
    let mut out = code.to_vec();
    for fixup in fixups {
        let group = fixup.reference.group;
        let value = match fixup.reference.index {
            Some(index) if index < table.size(group) => table.group_index_to_slot(group, index),
            Some(_) => NOT_USED,
            None => table.offset(group),
        };

        let start = fixup.offset as usize;
        let end = start + 4;
        assert!(
            end <= out.len(),
            "fixup at {start} is outside the {} byte code blob",
            out.len()
        );
        out[start..end].copy_from_slice(&value.to_le_bytes());
    }
    out
}
