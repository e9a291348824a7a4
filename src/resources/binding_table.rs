//! Binding Table Compaction
//!
//! Shaders address resources as `(group, index)` pairs, where each
//! [`SurfaceGroup`] has its own logical index space of up to
//! [`SURFACE_GROUP_MAX_ELEMENTS`] entries. Hardware wants a single dense
//! table, so only the indices a variant actually references are given a
//! slot.
//!
//! # Layout
//!
//! Groups are laid out in the fixed priority order of
//! [`SurfaceGroup::ALL`]. Within a group, used indices are assigned slots in
//! ascending order; a group's base offset is the number of slots consumed by
//! the groups before it:
//!
//! ```text
//! group:      RenderTarget | Texture     | Ubo
//! used_mask:  0b1          | 0b1000_1001 | 0b10
//! slot:       [0]          | [1][2][3]   | [4]
//! index:      #0           | #0 #3 #7    | #1
//! ```
//!
//! With compaction disabled every index below the group size is marked used,
//! which keeps shader behaviour identical at the cost of a larger table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Max elements in a surface group.
pub const SURFACE_GROUP_MAX_ELEMENTS: u32 = 64;

/// Encoded form of "this index has no slot".
pub const NOT_USED: u32 = u32::MAX;

/// Size of one hardware binding-table record.
pub const BINDING_TABLE_ENTRY_BYTES: u32 = 4;

/// Logical resource categories sharing one index space before compaction.
///
/// The declaration order is the slot-assignment priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SurfaceGroup {
    RenderTarget = 0,
    WorkGroups = 1,
    Texture = 2,
    Ubo = 3,
    Ssbo = 4,
    Image = 5,
}

impl SurfaceGroup {
    pub const COUNT: usize = 6;

    pub const ALL: [SurfaceGroup; Self::COUNT] = [
        Self::RenderTarget,
        Self::WorkGroups,
        Self::Texture,
        Self::Ubo,
        Self::Ssbo,
        Self::Image,
    ];

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RenderTarget => "render target",
            Self::WorkGroups => "CS work groups",
            Self::Texture => "texture",
            Self::Ubo => "ubo",
            Self::Ssbo => "ssbo",
            Self::Image => "image",
        }
    }
}

/// Mask with the low `size` bits set.
#[inline]
#[must_use]
pub fn low_bits(size: u32) -> u64 {
    if size >= 64 {
        u64::MAX
    } else {
        (1u64 << size) - 1
    }
}

/// Declared number of elements per group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupSizes([u32; SurfaceGroup::COUNT]);

impl GroupSizes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, group: SurfaceGroup, size: u32) -> Self {
        self.set(group, size);
        self
    }

    /// # Panics
    /// Panics if `size` exceeds [`SURFACE_GROUP_MAX_ELEMENTS`].
    pub fn set(&mut self, group: SurfaceGroup, size: u32) {
        assert!(
            size <= SURFACE_GROUP_MAX_ELEMENTS,
            "{} group declares {size} elements (max {SURFACE_GROUP_MAX_ELEMENTS})",
            group.name()
        );
        self.0[group.index()] = size;
    }

    #[inline]
    #[must_use]
    pub fn get(&self, group: SurfaceGroup) -> u32 {
        self.0[group.index()]
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }
}

/// Resource usage gathered from a shader before compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupUsage {
    masks: [u64; SurfaceGroup::COUNT],
    /// Groups accessed with a dynamic index; these need every element.
    indirect: u8,
}

impl GroupUsage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a statically known index as referenced.
    ///
    /// # Panics
    /// Panics if `index` is outside the 64-entry group index space.
    pub fn mark(&mut self, group: SurfaceGroup, index: u32) {
        assert!(
            index < SURFACE_GROUP_MAX_ELEMENTS,
            "{} index {index} exceeds the group maximum",
            group.name()
        );
        self.masks[group.index()] |= 1u64 << index;
    }

    /// Marks every element of `group` as referenced.
    pub fn mark_indirect(&mut self, group: SurfaceGroup) {
        self.indirect |= 1 << group.index();
    }

    /// ORs a precomputed mask into the group.
    pub fn mark_mask(&mut self, group: SurfaceGroup, mask: u64) {
        self.masks[group.index()] |= mask;
    }

    #[inline]
    #[must_use]
    pub fn mask(&self, group: SurfaceGroup) -> u64 {
        self.masks[group.index()]
    }

    #[inline]
    #[must_use]
    pub fn is_indirect(&self, group: SurfaceGroup) -> bool {
        self.indirect & (1 << group.index()) != 0
    }

    /// Merges another usage set into this one.
    pub fn merge(&mut self, other: &GroupUsage) {
        for (dst, src) in self.masks.iter_mut().zip(other.masks) {
            *dst |= src;
        }
        self.indirect |= other.indirect;
    }
}

/// The compacted binding table of one variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingTable {
    sizes: [u32; SurfaceGroup::COUNT],
    used_mask: [u64; SurfaceGroup::COUNT],
    offsets: [u32; SurfaceGroup::COUNT],
    size_bytes: u32,
}

impl BindingTable {
    /// Builds the table from gathered usage and declared group sizes.
    ///
    /// # Panics
    /// Panics when usage references an index at or beyond its group's
    /// declared size. That means the IR producer emitted an invalid program.
    #[must_use]
    pub fn compact(usage: &GroupUsage, sizes: &GroupSizes, compaction: bool) -> Self {
        let mut bt = BindingTable::default();

        for group in SurfaceGroup::ALL {
            let i = group.index();
            let size = sizes.get(group);
            let full = low_bits(size);
            bt.sizes[i] = size;

            let mask = usage.mask(group);
            assert!(
                mask & !full == 0,
                "{} group references index {} but only declares {size} elements",
                group.name(),
                63 - mask.leading_zeros()
            );

            bt.used_mask[i] = if usage.is_indirect(group) || !compaction {
                full
            } else {
                mask
            };
        }

        // Offsets and total size. Only groups with at least one used element
        // get a base offset; empty groups keep 0 and never resolve.
        let mut next = 0u32;
        for group in SurfaceGroup::ALL {
            let i = group.index();
            if bt.used_mask[i] != 0 {
                bt.offsets[i] = next;
                next += bt.used_mask[i].count_ones();
            }
        }
        bt.size_bytes = next * BINDING_TABLE_ENTRY_BYTES;
        bt
    }

    /// Maps a `(group, index)` pair to its compact slot.
    ///
    /// For example: `<Ubo, 5>` → slot 12. Returns `None` when the index is
    /// not referenced by this variant.
    ///
    /// # Panics
    /// Panics if `index` is not below the group's declared size.
    #[must_use]
    pub fn group_index_to_compact(&self, group: SurfaceGroup, index: u32) -> Option<u32> {
        let i = group.index();
        assert!(
            index < self.sizes[i],
            "{} index {index} out of range (size {})",
            group.name(),
            self.sizes[i]
        );
        let mask = self.used_mask[i];
        let bit = 1u64 << index;
        if bit & mask != 0 {
            Some(self.offsets[i] + ((bit - 1) & mask).count_ones())
        } else {
            None
        }
    }

    /// Encoded variant of [`group_index_to_compact`](Self::group_index_to_compact)
    /// returning [`NOT_USED`] for unreferenced indices.
    #[must_use]
    pub fn group_index_to_slot(&self, group: SurfaceGroup, index: u32) -> u32 {
        self.group_index_to_compact(group, index).unwrap_or(NOT_USED)
    }

    /// Maps a compact slot back to the group-relative index.
    ///
    /// For example: slot 12 → `<Ubo, 5>`. Returns `None` when the slot does
    /// not belong to `group`.
    #[must_use]
    pub fn compact_to_group_index(&self, group: SurfaceGroup, compact: u32) -> Option<u32> {
        let i = group.index();
        if compact < self.offsets[i] {
            return None;
        }

        let mut remaining = compact - self.offsets[i];
        let mut mask = self.used_mask[i];
        while mask != 0 {
            let index = mask.trailing_zeros();
            mask &= mask - 1;
            if remaining == 0 {
                return Some(index);
            }
            remaining -= 1;
        }
        None
    }

    /// Resolves a compact slot to its `(group, index)` pair.
    #[must_use]
    pub fn resolve(&self, compact: u32) -> Option<(SurfaceGroup, u32)> {
        SurfaceGroup::ALL.into_iter().find_map(|group| {
            let i = group.index();
            let count = self.used_mask[i].count_ones();
            (count != 0 && compact >= self.offsets[i] && compact < self.offsets[i] + count)
                .then(|| self.compact_to_group_index(group, compact).map(|idx| (group, idx)))
                .flatten()
        })
    }

    /// Iterates the table in slot order as `(slot, group, index)`.
    pub fn entries(&self) -> impl Iterator<Item = (u32, SurfaceGroup, u32)> + '_ {
        SurfaceGroup::ALL.into_iter().flat_map(move |group| {
            let i = group.index();
            let base = self.offsets[i];
            BitIter(self.used_mask[i])
                .enumerate()
                .map(move |(n, index)| (base + n as u32, group, index))
        })
    }

    /// Number of slots in the compact table.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.used_mask.iter().map(|m| m.count_ones()).sum()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total hardware table size.
    #[inline]
    #[must_use]
    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    #[inline]
    #[must_use]
    pub fn size(&self, group: SurfaceGroup) -> u32 {
        self.sizes[group.index()]
    }

    #[inline]
    #[must_use]
    pub fn used_mask(&self, group: SurfaceGroup) -> u64 {
        self.used_mask[group.index()]
    }

    #[inline]
    #[must_use]
    pub fn offset(&self, group: SurfaceGroup) -> u32 {
        self.offsets[group.index()]
    }

    /// Whether every declared element of `group` has a slot.
    #[inline]
    #[must_use]
    pub fn is_fully_used(&self, group: SurfaceGroup) -> bool {
        let i = group.index();
        self.used_mask[i] == low_bits(self.sizes[i])
    }

    /// Sum of the declared group sizes (the uncompacted table length).
    #[must_use]
    pub fn declared_len(&self) -> u32 {
        self.sizes.iter().sum()
    }
}

/// Iterates the set bits of a mask, lowest first.
struct BitIter(u64);

impl Iterator for BitIter {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(bit)
    }
}

impl fmt::Display for BindingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.declared_len();
        let compacted = self.len();

        if total == 0 {
            return writeln!(f, "Binding table is empty");
        }

        if total == compacted {
            writeln!(f, "Binding table ({total} entries)")?;
        } else {
            writeln!(
                f,
                "Binding table (compacted to {compacted} entries from {total} entries)"
            )?;
        }

        for (slot, group, index) in self.entries() {
            writeln!(f, "  [{slot}] {} #{index}", group.name())?;
        }
        Ok(())
    }
}
