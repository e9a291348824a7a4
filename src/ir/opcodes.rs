//! Opcode descriptor table.
//!
//! Every opcode maps to a small static [`OpcodeDescriptor`] describing which
//! resource group it touches and which operand carries the group-relative
//! index. Usage scanning and index rewriting are both driven from this table
//! instead of per-pass `match` cascades.

use serde::{Deserialize, Serialize};

use crate::resources::SurfaceGroup;

/// Instruction opcodes understood by the device-independent IR.
///
/// The discriminant indexes [`OPCODE_TABLE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Opcode {
    Mov = 0,
    IAdd,
    FAdd,
    FMul,
    FFma,
    Select,
    LoadInput,
    StoreOutput,
    LoadPushConst,
    Tex,
    TexFetch,
    TexSize,
    ImageLoad,
    ImageStore,
    ImageSize,
    ImageAtomic,
    LoadUbo,
    LoadSsbo,
    StoreSsbo,
    SsboAtomic,
    GetBufferSize,
    LoadNumWorkGroups,
    Discard,
    EmitVertex,
    EndPrimitive,
    Barrier,
    Return,
}

impl Opcode {
    pub const COUNT: usize = Opcode::Return as usize + 1;

    #[inline]
    #[must_use]
    pub fn descriptor(self) -> &'static OpcodeDescriptor {
        &OPCODE_TABLE[self as usize]
    }

    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }
}

/// Where an opcode's resource index lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    /// The index is the given operand (constant or dynamic).
    Operand(u8),
    /// The opcode always refers to element 0 of its group.
    Implicit,
}

/// Resource access performed by an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceAccess {
    pub group: SurfaceGroup,
    pub index: IndexSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeDescriptor {
    pub opcode: Opcode,
    pub name: &'static str,
    /// Number of operands the opcode expects.
    pub operands: u8,
    /// Whether the opcode defines a new value.
    pub has_dest: bool,
    pub resource: Option<ResourceAccess>,
}

const fn op(opcode: Opcode, name: &'static str, operands: u8, has_dest: bool) -> OpcodeDescriptor {
    OpcodeDescriptor {
        opcode,
        name,
        operands,
        has_dest,
        resource: None,
    }
}

const fn res(
    opcode: Opcode,
    name: &'static str,
    operands: u8,
    has_dest: bool,
    group: SurfaceGroup,
    index: IndexSource,
) -> OpcodeDescriptor {
    OpcodeDescriptor {
        opcode,
        name,
        operands,
        has_dest,
        resource: Some(ResourceAccess { group, index }),
    }
}

use IndexSource::{Implicit, Operand};
use SurfaceGroup::{Image, Ssbo, Texture, Ubo, WorkGroups};

pub static OPCODE_TABLE: [OpcodeDescriptor; Opcode::COUNT] = [
    op(Opcode::Mov, "mov", 1, true),
    op(Opcode::IAdd, "iadd", 2, true),
    op(Opcode::FAdd, "fadd", 2, true),
    op(Opcode::FMul, "fmul", 2, true),
    op(Opcode::FFma, "ffma", 3, true),
    op(Opcode::Select, "select", 3, true),
    op(Opcode::LoadInput, "load_input", 1, true),
    op(Opcode::StoreOutput, "store_output", 2, false),
    op(Opcode::LoadPushConst, "load_push_const", 1, true),
    res(Opcode::Tex, "tex", 2, true, Texture, Operand(0)),
    res(Opcode::TexFetch, "txf", 2, true, Texture, Operand(0)),
    res(Opcode::TexSize, "txs", 1, true, Texture, Operand(0)),
    res(Opcode::ImageLoad, "image_load", 2, true, Image, Operand(0)),
    res(Opcode::ImageStore, "image_store", 3, false, Image, Operand(0)),
    res(Opcode::ImageSize, "image_size", 1, true, Image, Operand(0)),
    res(Opcode::ImageAtomic, "image_atomic", 3, true, Image, Operand(0)),
    res(Opcode::LoadUbo, "load_ubo", 2, true, Ubo, Operand(0)),
    res(Opcode::LoadSsbo, "load_ssbo", 2, true, Ssbo, Operand(0)),
    // store_ssbo(value, block, offset)
    res(Opcode::StoreSsbo, "store_ssbo", 3, false, Ssbo, Operand(1)),
    res(Opcode::SsboAtomic, "ssbo_atomic", 3, true, Ssbo, Operand(0)),
    res(Opcode::GetBufferSize, "get_buffer_size", 1, true, Ssbo, Operand(0)),
    res(Opcode::LoadNumWorkGroups, "load_num_work_groups", 0, true, WorkGroups, Implicit),
    op(Opcode::Discard, "discard", 0, false),
    op(Opcode::EmitVertex, "emit_vertex", 0, false),
    op(Opcode::EndPrimitive, "end_primitive", 0, false),
    op(Opcode::Barrier, "barrier", 0, false),
    op(Opcode::Return, "return", 0, false),
];
