//! Device-independent shader IR.
//!
//! A deliberately small SSA instruction list: enough structure for the
//! engine to scan resource usage, rewrite resource indices and hash the
//! program, while leaving instruction semantics to the backend.

pub mod opcodes;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub use opcodes::{IndexSource, Opcode, OpcodeDescriptor, ResourceAccess, OPCODE_TABLE};

/// An SSA value id.
pub type ValueId = u32;

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// A compile-time constant.
    Const(u32),
    /// The result of an earlier instruction.
    Value(ValueId),
}

impl Operand {
    #[inline]
    #[must_use]
    pub fn as_const(self) -> Option<u32> {
        match self {
            Self::Const(c) => Some(c),
            Self::Value(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dest: Option<ValueId>,
    pub operands: SmallVec<[Operand; 4]>,
}

impl Instruction {
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &'static OpcodeDescriptor {
        self.opcode.descriptor()
    }

    /// The operand holding this instruction's group-relative resource index,
    /// if it accesses a resource through an operand.
    #[must_use]
    pub fn resource_operand(&self) -> Option<(ResourceAccess, Operand)> {
        let access = self.descriptor().resource?;
        match access.index {
            IndexSource::Operand(slot) => self
                .operands
                .get(slot as usize)
                .map(|&operand| (access, operand)),
            IndexSource::Implicit => Some((access, Operand::Const(0))),
        }
    }
}

/// An immutable-by-convention instruction list.
///
/// Passes that change the IR always work on an owned clone; the program's
/// own copy is never mutated after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderIr {
    instructions: Vec<Instruction>,
    num_values: u32,
}

impl ShaderIr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction, allocating a destination value when the
    /// opcode defines one.
    ///
    /// # Panics
    /// Panics if the operand count does not match the opcode descriptor.
    pub fn push(&mut self, opcode: Opcode, operands: &[Operand]) -> Option<ValueId> {
        let desc = opcode.descriptor();
        assert_eq!(
            operands.len(),
            desc.operands as usize,
            "{} expects {} operands",
            desc.name,
            desc.operands
        );
        let dest = desc.has_dest.then(|| self.alloc_value());
        self.instructions.push(Instruction {
            opcode,
            dest,
            operands: operands.iter().copied().collect(),
        });
        dest
    }

    /// Allocates a fresh SSA value id.
    pub fn alloc_value(&mut self) -> ValueId {
        let id = self.num_values;
        self.num_values += 1;
        id
    }

    #[inline]
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[inline]
    pub(crate) fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn num_values(&self) -> u32 {
        self.num_values
    }

    /// Whether any instruction uses the given opcode.
    #[must_use]
    pub fn uses(&self, opcode: Opcode) -> bool {
        self.instructions.iter().any(|i| i.opcode == opcode)
    }

    /// Canonical byte image used for content hashing.
    ///
    /// Fixed little-endian layout, independent of struct layout and
    /// serializer details.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.instructions.len() * 16);
        out.extend_from_slice(&self.num_values.to_le_bytes());
        out.extend_from_slice(&(self.instructions.len() as u32).to_le_bytes());
        for inst in &self.instructions {
            out.extend_from_slice(&(inst.opcode as u16).to_le_bytes());
            match inst.dest {
                Some(v) => {
                    out.push(1);
                    out.extend_from_slice(&v.to_le_bytes());
                }
                None => out.push(0),
            }
            out.push(inst.operands.len() as u8);
            for operand in &inst.operands {
                match *operand {
                    Operand::Const(c) => {
                        out.push(0);
                        out.extend_from_slice(&c.to_le_bytes());
                    }
                    Operand::Value(v) => {
                        out.push(1);
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                }
            }
        }
        out
    }
}
