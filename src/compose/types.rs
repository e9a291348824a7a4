//! Function signatures and composed executable units.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ir::ShaderIr;

/// Register class of a parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegClass {
    /// Same value for every invocation of a wave (scalar registers).
    Uniform,
    /// Per-invocation value (vector registers).
    Varying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Int,
    Float,
    Pointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueType {
    pub kind: ScalarKind,
    /// Size in 32-bit registers.
    pub dwords: u8,
}

impl ValueType {
    pub const I32: Self = Self {
        kind: ScalarKind::Int,
        dwords: 1,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        dwords: 1,
    };
    pub const PTR: Self = Self {
        kind: ScalarKind::Pointer,
        dwords: 2,
    };

    #[must_use]
    pub const fn vec(kind: ScalarKind, dwords: u8) -> Self {
        Self { kind, dwords }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: Cow<'static, str>,
    pub class: RegClass,
    pub ty: ValueType,
}

impl Param {
    #[must_use]
    pub fn uniform(name: impl Into<Cow<'static, str>>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            class: RegClass::Uniform,
            ty,
        }
    }

    #[must_use]
    pub fn varying(name: impl Into<Cow<'static, str>>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            class: RegClass::Varying,
            ty,
        }
    }
}

/// Parameters and return values of a function unit.
///
/// Uniform entries always precede varying ones, in both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Param>,
    pub returns: Vec<Param>,
}

fn dwords_of(list: &[Param], class: RegClass) -> u32 {
    list.iter()
        .filter(|p| p.class == class)
        .map(|p| u32::from(p.ty.dwords))
        .sum()
}

fn uniform_prefix(list: &[Param]) -> bool {
    list.iter()
        .skip_while(|p| p.class == RegClass::Uniform)
        .all(|p| p.class == RegClass::Varying)
}

impl Signature {
    #[must_use]
    pub fn new(params: Vec<Param>, returns: Vec<Param>) -> Self {
        Self { params, returns }
    }

    #[must_use]
    pub fn param_dwords(&self, class: RegClass) -> u32 {
        dwords_of(&self.params, class)
    }

    #[must_use]
    pub fn return_dwords(&self, class: RegClass) -> u32 {
        dwords_of(&self.returns, class)
    }

    /// # Panics
    /// Panics if a varying entry precedes a uniform one.
    pub fn validate(&self, name: &str) {
        assert!(
            uniform_prefix(&self.params),
            "{name}: uniform parameters must precede varying parameters"
        );
        assert!(
            uniform_prefix(&self.returns),
            "{name}: uniform return values must precede varying return values"
        );
    }
}

/// A callable piece of a variant: a prologue, an epilogue or a main body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionUnit {
    pub name: String,
    pub signature: Signature,
    pub body: ShaderIr,
}

impl FunctionUnit {
    #[must_use]
    pub fn new(name: impl Into<String>, signature: Signature, body: ShaderIr) -> Self {
        Self {
            name: name.into(),
            signature,
            body,
        }
    }
}

// ─── Executable Unit ─────────────────────────────────────────────────────────

/// A single dword value flowing through the wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueRef {
    /// Dword `n` of the wrapper's own parameters.
    Initial(u32),
    /// Dword `dword` of the values returned by call step `call`.
    Returned { call: u32, dword: u32 },
}

/// Conversion applied to an argument whose producer type differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Coercion {
    None,
    Bitcast,
    IntToPtr,
    PtrToInt,
}

impl Coercion {
    #[must_use]
    pub fn between(from: ScalarKind, to: ScalarKind) -> Self {
        use ScalarKind::{Float, Int, Pointer};
        match (from, to) {
            (a, b) if a == b => Self::None,
            (Int | Float, Pointer) => Self::IntToPtr,
            (Pointer, Int | Float) => Self::PtrToInt,
            _ => Self::Bitcast,
        }
    }
}

/// One argument of a call: gathered dwords plus the conversion to apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Arg {
    pub sources: SmallVec<[ValueRef; 2]>,
    pub ty: ValueType,
    pub coercion: Coercion,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// Opens a region executed only by invocations whose index is below
    /// `(source >> shift) & 0xff`.
    BeginAdmission { source: ValueRef, shift: u8 },
    EndAdmission,
    Call { function: u32, args: Vec<Arg> },
}

/// A composed variant body: the wrapper signature, copies of every part,
/// and the ordered steps that call them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutableUnit {
    pub params: Vec<Param>,
    pub returns: Vec<Param>,
    pub functions: Vec<FunctionUnit>,
    pub steps: Vec<Step>,
    /// Index into `functions` of the main body.
    pub main: u32,
    /// Index of the first function of the second half, for merged stages.
    pub second_half_first: Option<u32>,
}

impl ExecutableUnit {
    #[must_use]
    pub fn main(&self) -> &FunctionUnit {
        &self.functions[self.main as usize]
    }

    pub fn calls(&self) -> impl Iterator<Item = (u32, &[Arg])> + '_ {
        self.steps.iter().filter_map(|step| match step {
            Step::Call { function, args } => Some((*function, args.as_slice())),
            _ => None,
        })
    }

    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.second_half_first.is_some()
    }
}
