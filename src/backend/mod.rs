//! Code Generator Interface
//!
//! The instruction-selection and register-allocation backend is an external
//! collaborator. The engine drives it through [`CodeGenerator`] and consumes
//! only its structured outputs: machine code, a [`ResourceManifest`] of the
//! resources the code references, [`StageLinkage`] for the next stage, and
//! [`BackendStats`].
//!
//! Requests only hand out shared references, so a backend can never mutate
//! the IR it is compiling; the same program is compiled many times against
//! different keys.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compose::{ExecutableUnit, FunctionUnit};
use crate::ir::{Operand, ShaderIr};
use crate::key::PipelineStateKey;
use crate::parts::{PartKey, PartKind};
use crate::program::ProgramId;
use crate::resources::{BindingTable, GroupSizes, GroupUsage, SurfaceGroup};
use crate::stage::ShaderStage;

/// Optimization level requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OptLevel {
    #[default]
    Full,
    /// Used for the single retry after a register budget overrun.
    Reduced,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{0}")]
    Failed(String),

    #[error("register budget exceeded ({needed} needed, {available} available)")]
    RegisterBudget { needed: u32, available: u32 },
}

/// Register and memory usage reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendStats {
    pub uniform_registers: u32,
    pub varying_registers: u32,
    pub spill_bytes: u32,
    pub scratch_bytes: u32,
}

// ─── Requests ────────────────────────────────────────────────────────────────

/// Everything the backend needs to compile one variant.
pub struct CompileRequest<'a> {
    pub stage: ShaderStage,
    pub program: ProgramId,
    /// Composed unit; its main bodies already address compact slots.
    pub unit: &'a ExecutableUnit,
    pub key: &'a PipelineStateKey,
    /// Declared (uncompacted) group sizes.
    pub group_sizes: GroupSizes,
    pub bindings: &'a BindingTable,
    pub opt_level: OptLevel,
}

pub struct PartRequest<'a> {
    pub kind: PartKind,
    pub key: &'a PartKey,
    pub unit: &'a FunctionUnit,
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

/// A resource reference made by generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub group: SurfaceGroup,
    /// Group-relative index, or `None` for dynamically indexed access.
    pub index: Option<u32>,
}

/// A location in the machine code that must receive a compact slot index.
///
/// The backend writes a placeholder `u32` at `offset`; the engine patches it
/// once the binding table is known. Dynamic references receive the group's
/// base offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fixup {
    pub offset: u32,
    pub reference: ResourceRef,
}

/// The structured resource-usage manifest returned with the machine code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifest {
    pub references: Vec<ResourceRef>,
    pub fixups: Vec<Fixup>,
}

impl ResourceManifest {
    /// Lists the logical references made by `ir`, in instruction order.
    ///
    /// Intended for backends that keep resource operands as they are.
    #[must_use]
    pub fn from_ir(ir: &ShaderIr) -> Self {
        let references = ir
            .instructions()
            .iter()
            .filter_map(|inst| {
                let (access, operand) = inst.resource_operand()?;
                Some(ResourceRef {
                    group: access.group,
                    index: match operand {
                        Operand::Const(index) => Some(index),
                        Operand::Value(_) => None,
                    },
                })
            })
            .collect();
        Self {
            references,
            fixups: Vec::new(),
        }
    }

    /// Usage implied by the manifest.
    #[must_use]
    pub fn usage(&self) -> GroupUsage {
        let mut usage = GroupUsage::new();
        let all = self
            .references
            .iter()
            .chain(self.fixups.iter().map(|f| &f.reference));
        for reference in all {
            match reference.index {
                Some(index) => usage.mark(reference.group, index),
                None => usage.mark_indirect(reference.group),
            }
        }
        usage
    }
}

/// Linkage metadata consumed by the next pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageLinkage {
    /// Output varying slots actually written.
    pub outputs_written: u64,
    /// Size of one vertex/patch output entry in 64-byte units.
    pub urb_entry_size: u32,
    pub writes_viewport_index: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOutput {
    pub machine_code: Vec<u8>,
    pub manifest: ResourceManifest,
    pub linkage: StageLinkage,
    pub stats: BackendStats,
}

/// A compiled prologue or epilogue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartBinary {
    pub code: Vec<u8>,
    pub stats: BackendStats,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// The backend code generator.
///
/// Implementations must be deterministic for a given request: persistent
/// cache entries are shared between sessions on the assumption that the same
/// input produces the same output.
pub trait CodeGenerator: Send + Sync {
    /// Identifies the backend build. Part of every persistent cache hash, so
    /// changing it invalidates stored variants.
    fn cache_tag(&self) -> &str;

    fn compile(&self, request: &CompileRequest<'_>) -> Result<BackendOutput, BackendError>;

    fn compile_part(&self, request: &PartRequest<'_>) -> Result<PartBinary, BackendError>;
}
