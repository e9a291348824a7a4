//! Pipeline State Keys
//!
//! A [`PipelineStateKey`] holds exactly the state bits that change the code
//! generated for one program. It is a plain `#[repr(C)]` value with no
//! padding and no pointers, so equality, hashing and the persistent cache
//! hash can all work on its byte image.
//!
//! Keys are only produced by [`build_key`], which starts from a zeroed key
//! and fills the fields relevant to the stage. Fields that do not apply are
//! therefore always zero, and two builds from equivalent state are
//! bit-identical.
//!
//! # Layout
//!
//! ```text
//! ┌──────────┬────────────┬─────────────────────┬─────────┬────────────────┐
//! │ stage    │ program_id │ previous_program_id │ flags   │ words[8]       │
//! │ u32      │ u32        │ u32 (0 = none)      │ KeyFlags│ stage fields   │
//! └──────────┴────────────┴─────────────────────┴─────────┴────────────────┘
//! ```
//!
//! The word layout of each stage is declared in [`stages`] and decoded back
//! with [`PipelineStateKey::stage_key`].

pub mod builder;
pub mod fields;
pub mod stages;

use std::fmt;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::program::ProgramId;
use crate::stage::ShaderStage;

pub use builder::{KeyContext, MergedRole, build_key, key_dependencies};
pub use fields::{KeyField, KeyValue};
pub use stages::{
    ComputeKey, FragmentKey, GeometryKey, StageKey, TessControlKey, TessEvalKey, VertexKey,
};

/// Number of stage-specific words in a key.
pub const KEY_WORDS: usize = 8;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct KeyFlags: u32 {
        /// The stage is the last one before rasterization.
        const LAST_PRE_RASTER = 1 << 0;
        /// The variant also runs the previous stage as its first half.
        const MERGED          = 1 << 1;
    }
}

/// Fixed-layout specialization key of one program variant.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct PipelineStateKey {
    pub(crate) stage: u32,
    pub(crate) program_id: u32,
    pub(crate) previous_program_id: u32,
    pub(crate) flags: u32,
    pub(crate) words: [u32; KEY_WORDS],
}

/// Header fields reported by [`PipelineStateKey::diff`].
const HEADER_FIELDS: [&str; 4] = ["stage", "program_id", "previous_program_id", "flags"];

impl PipelineStateKey {
    /// A key with only the header filled in.
    #[must_use]
    pub(crate) fn zeroed_for(stage: ShaderStage, program: ProgramId) -> Self {
        Self {
            stage: stage as u32,
            program_id: program.0,
            ..Self::zeroed()
        }
    }

    #[must_use]
    pub fn stage(&self) -> ShaderStage {
        ShaderStage::from_index(self.stage as usize).unwrap_or(ShaderStage::Compute)
    }

    #[inline]
    #[must_use]
    pub fn program_id(&self) -> ProgramId {
        ProgramId(self.program_id)
    }

    /// Program running as the merged first half, if any.
    #[inline]
    #[must_use]
    pub fn previous_program_id(&self) -> Option<ProgramId> {
        (self.previous_program_id != 0).then_some(ProgramId(self.previous_program_id))
    }

    #[inline]
    #[must_use]
    pub fn flags(&self) -> KeyFlags {
        KeyFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Byte image with session-local program ids cleared.
    ///
    /// Program ids are allocated per device and mean nothing in another
    /// process; the persistent cache identifies programs by IR content.
    #[must_use]
    pub fn portable_bytes(&self) -> Vec<u8> {
        let portable = Self {
            program_id: 0,
            previous_program_id: 0,
            ..*self
        };
        bytemuck::bytes_of(&portable).to_vec()
    }

    #[inline]
    #[must_use]
    pub fn words(&self) -> &[u32; KEY_WORDS] {
        &self.words
    }

    /// Decodes the stage words into the typed key.
    #[must_use]
    pub fn stage_key(&self) -> StageKey {
        match self.stage() {
            ShaderStage::Vertex => StageKey::Vertex(VertexKey::decode(&self.words)),
            ShaderStage::TessControl => StageKey::TessControl(TessControlKey::decode(&self.words)),
            ShaderStage::TessEval => StageKey::TessEval(TessEvalKey::decode(&self.words)),
            ShaderStage::Geometry => StageKey::Geometry(GeometryKey::decode(&self.words)),
            ShaderStage::Fragment => StageKey::Fragment(FragmentKey::decode(&self.words)),
            ShaderStage::Compute => StageKey::Compute(ComputeKey::decode(&self.words)),
        }
    }

    pub(crate) fn set_stage_key(&mut self, key: &StageKey) {
        self.words = [0; KEY_WORDS];
        match key {
            StageKey::Vertex(k) => k.encode(&mut self.words),
            StageKey::TessControl(k) => k.encode(&mut self.words),
            StageKey::TessEval(k) => k.encode(&mut self.words),
            StageKey::Geometry(k) => k.encode(&mut self.words),
            StageKey::Fragment(k) => k.encode(&mut self.words),
            StageKey::Compute(k) => k.encode(&mut self.words),
        }
    }

    /// Field table of this key's stage.
    #[must_use]
    pub fn fields(&self) -> &'static [KeyField] {
        match self.stage() {
            ShaderStage::Vertex => VertexKey::FIELDS,
            ShaderStage::TessControl => TessControlKey::FIELDS,
            ShaderStage::TessEval => TessEvalKey::FIELDS,
            ShaderStage::Geometry => GeometryKey::FIELDS,
            ShaderStage::Fragment => FragmentKey::FIELDS,
            ShaderStage::Compute => ComputeKey::FIELDS,
        }
    }

    /// Field-by-field differences from `old` to `self`.
    ///
    /// Keys of different stages only report the header difference.
    #[must_use]
    pub fn diff(&self, old: &PipelineStateKey) -> Vec<KeyFieldChange> {
        let header_old = [old.stage, old.program_id, old.previous_program_id, old.flags];
        let header_new = [self.stage, self.program_id, self.previous_program_id, self.flags];

        let mut changes: Vec<KeyFieldChange> = HEADER_FIELDS
            .iter()
            .zip(header_old.into_iter().zip(header_new))
            .filter(|(_, (o, n))| o != n)
            .map(|(&field, (old, new))| KeyFieldChange { field, old, new })
            .collect();

        if old.stage == self.stage {
            changes.extend(self.fields().iter().filter_map(|field| {
                let (o, n) = (field.read(&old.words), field.read(&self.words));
                (o != n).then_some(KeyFieldChange {
                    field: field.name,
                    old: o,
                    new: n,
                })
            }));
        }
        changes
    }
}

/// One changed field between two keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFieldChange {
    pub field: &'static str,
    pub old: u32,
    pub new: u32,
}

impl fmt::Display for KeyFieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.old > 1 || self.new > 1 {
            write!(f, "{} changed: {:#x} -> {:#x}", self.field, self.old, self.new)
        } else {
            write!(f, "{} changed: {} -> {}", self.field, self.old, self.new)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CompareFunc;

    #[test]
    fn test_key_has_no_padding() {
        assert_eq!(
            std::mem::size_of::<PipelineStateKey>(),
            4 * (4 + KEY_WORDS)
        );
    }

    #[test]
    fn test_stage_key_roundtrip() {
        let mut key = PipelineStateKey::zeroed_for(ShaderStage::Fragment, ProgramId(3));
        let fs = FragmentKey {
            nr_color_regions: 2,
            alpha_test_func: CompareFunc::Greater,
            input_slots_valid_lo: 0xdead_beef,
            input_slots_valid_hi: 0x100,
            epilog_last_cbuf: 1,
            ..Default::default()
        };
        key.set_stage_key(&StageKey::Fragment(fs));
        assert_eq!(key.stage_key(), StageKey::Fragment(fs));
    }

    #[test]
    fn test_diff_names_changed_fields() {
        let mut a = PipelineStateKey::zeroed_for(ShaderStage::Fragment, ProgramId(1));
        a.set_stage_key(&StageKey::Fragment(FragmentKey {
            nr_color_regions: 1,
            ..Default::default()
        }));
        let mut b = a;
        b.set_stage_key(&StageKey::Fragment(FragmentKey {
            nr_color_regions: 2,
            flat_shade: true,
            ..Default::default()
        }));

        let diff = b.diff(&a);
        let names: Vec<_> = diff.iter().map(|c| c.field).collect();
        assert_eq!(names, vec!["nr_color_regions", "flat_shade"]);
        assert_eq!(diff[0].to_string(), "nr_color_regions changed: 0x1 -> 0x2");
    }

    #[test]
    fn test_portable_bytes_ignore_program_ids() {
        let a = PipelineStateKey::zeroed_for(ShaderStage::Vertex, ProgramId(1));
        let b = PipelineStateKey::zeroed_for(ShaderStage::Vertex, ProgramId(9));
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.portable_bytes(), b.portable_bytes());
    }
}
