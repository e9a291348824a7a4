//! Part Composer
//!
//! Stitches an ordered list of [`FunctionUnit`]s (prologue, main body,
//! epilogue, and for merged stages a second main body) into a single
//! [`ExecutableUnit`].
//!
//! # Forwarding
//!
//! The wrapper's parameters take their register-class dword counts from the
//! **first** part and their types from the **main** part. Every call
//! receives the values produced by the previous call, by position:
//!
//! ```text
//! wrapper params ─▶ prolog ─▶ main ─▶ epilog
//!   [u0 u1 .. | v0 v1 ..]      returned [u.. | v..] forwarded in order
//! ```
//!
//! A varying parameter never consumes a uniform value: if a part declares
//! fewer uniforms than were produced, the remainder is skipped. Values of a
//! different scalar kind are bitcast or converted between integer and
//! pointer; multi-dword parameters gather consecutive values.
//!
//! # Merged stages
//!
//! When `second_half_first_part` is given, the parts before it form the
//! first half and run under an admission guard on bits 0..7 of
//! [`MERGED_WAVE_INFO_DWORD`]; the rest run under bits 8..15. The second half
//! is fed from the wrapper's initial values, not from the first half's
//! returns, since the first half may not have executed at all for an
//! invocation.

pub mod abi;
pub mod types;

use smallvec::SmallVec;

pub use abi::{ArgLayout, MERGED_WAVE_INFO_DWORD, PartLinks};
pub use types::{
    Arg, Coercion, ExecutableUnit, FunctionUnit, Param, RegClass, ScalarKind, Signature, Step,
    ValueRef, ValueType,
};

/// A dword value live at a part boundary.
#[derive(Debug, Clone, Copy)]
struct Live {
    value: ValueRef,
    kind: ScalarKind,
    class: RegClass,
}

/// Builds the executable unit for `parts`.
///
/// # Panics
/// Panics when a part's signature cannot be satisfied by the values live at
/// its boundary. That is a programmer error in the calling conventions, not
/// a recoverable condition.
#[must_use]
pub fn compose(
    parts: &[&FunctionUnit],
    main_part: usize,
    second_half_first_part: Option<usize>,
) -> ExecutableUnit {
    assert!(!parts.is_empty(), "cannot compose an empty part list");
    assert!(
        main_part < parts.len(),
        "main part {main_part} out of range ({} parts)",
        parts.len()
    );
    if let Some(second) = second_half_first_part {
        assert!(
            second > 0 && second < parts.len(),
            "second half must start after the first part and before the end"
        );
    }
    for part in parts {
        part.signature.validate(&part.name);
    }

    let first = &parts[0].signature;
    let num_uniform = first.param_dwords(RegClass::Uniform);
    let num_varying = first.param_dwords(RegClass::Varying);
    if second_half_first_part.is_some() {
        assert!(
            num_uniform > MERGED_WAVE_INFO_DWORD,
            "merged units need the wave info uniform"
        );
    }

    let params = wrapper_params(&parts[main_part].signature, num_uniform, num_varying);
    let initial = initial_values(&params);

    let mut out = initial.clone();
    let mut out_uniform = num_uniform;
    let mut steps = Vec::with_capacity(parts.len() + 4);

    for (i, part) in parts.iter().enumerate() {
        if let Some(second) = second_half_first_part {
            if i == 0 {
                steps.push(Step::BeginAdmission {
                    source: ValueRef::Initial(MERGED_WAVE_INFO_DWORD),
                    shift: 0,
                });
            }
            if i == second {
                steps.push(Step::EndAdmission);
                out = initial.clone();
                out_uniform = num_uniform;
                steps.push(Step::BeginAdmission {
                    source: ValueRef::Initial(MERGED_WAVE_INFO_DWORD),
                    shift: 8,
                });
            }
        }

        let args = forward_args(part, &out, out_uniform);
        steps.push(Step::Call {
            function: i as u32,
            args,
        });

        let sig = &part.signature;
        if !sig.returns.is_empty() {
            out = returned_values(i as u32, sig);
            out_uniform = sig.return_dwords(RegClass::Uniform);
        }
    }
    if second_half_first_part.is_some() {
        steps.push(Step::EndAdmission);
    }

    let returns = parts[parts.len() - 1].signature.returns.clone();
    ExecutableUnit {
        params,
        returns,
        functions: parts.iter().map(|&p| p.clone()).collect(),
        steps,
        main: main_part as u32,
        second_half_first: second_half_first_part.map(|s| s as u32),
    }
}

/// Main-part types, truncated or padded to the first part's dword counts.
fn wrapper_params(main: &Signature, num_uniform: u32, num_varying: u32) -> Vec<Param> {
    let mut uniforms = Vec::new();
    let mut varyings = Vec::new();
    let (mut u, mut v) = (0u32, 0u32);

    for param in &main.params {
        let size = u32::from(param.ty.dwords);
        match param.class {
            RegClass::Uniform if u + size <= num_uniform => {
                uniforms.push(param.clone());
                u += size;
            }
            RegClass::Varying if v + size <= num_varying => {
                varyings.push(param.clone());
                v += size;
            }
            _ => {}
        }
    }
    for n in u..num_uniform {
        uniforms.push(Param::uniform(format!("uniform_pad{n}"), ValueType::I32));
    }
    for n in v..num_varying {
        varyings.push(Param::varying(format!("varying_pad{n}"), ValueType::F32));
    }

    uniforms.extend(varyings);
    uniforms
}

fn initial_values(params: &[Param]) -> Vec<Live> {
    let mut values = Vec::new();
    for param in params {
        for _ in 0..param.ty.dwords {
            values.push(Live {
                value: ValueRef::Initial(values.len() as u32),
                kind: param.ty.kind,
                class: param.class,
            });
        }
    }
    values
}

/// Returned values: uniforms as integers, varyings as floats.
fn returned_values(call: u32, sig: &Signature) -> Vec<Live> {
    let mut values = Vec::new();
    for ret in &sig.returns {
        let kind = match ret.class {
            RegClass::Uniform => ScalarKind::Int,
            RegClass::Varying => ScalarKind::Float,
        };
        for _ in 0..ret.ty.dwords {
            values.push(Live {
                value: ValueRef::Returned {
                    call,
                    dword: values.len() as u32,
                },
                kind,
                class: ret.class,
            });
        }
    }
    values
}

fn forward_args(part: &FunctionUnit, out: &[Live], out_uniform: u32) -> Vec<Arg> {
    let mut args = Vec::with_capacity(part.signature.params.len());
    let mut idx = 0usize;

    for param in &part.signature.params {
        let size = usize::from(param.ty.dwords);

        // Varying parameters never take uniform values.
        if param.class == RegClass::Varying && idx < out_uniform as usize {
            idx = out_uniform as usize;
        }

        assert!(
            idx + size <= out.len(),
            "{}: parameter `{}` needs {size} dword(s) but only {} value(s) are live",
            part.name,
            param.name,
            out.len().saturating_sub(idx)
        );
        let values = &out[idx..idx + size];
        for value in values {
            assert_eq!(
                value.class, param.class,
                "{}: parameter `{}` is {:?} but the forwarded value is {:?}",
                part.name, param.name, param.class, value.class
            );
        }

        args.push(Arg {
            sources: values.iter().map(|l| l.value).collect::<SmallVec<_>>(),
            ty: param.ty,
            coercion: Coercion::between(values[0].kind, param.ty.kind),
        });
        idx += size;
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ShaderIr;

    fn unit(name: &str, params: Vec<Param>, returns: Vec<Param>) -> FunctionUnit {
        FunctionUnit::new(name, Signature::new(params, returns), ShaderIr::new())
    }

    #[test]
    fn test_single_part_passes_params_through() {
        let main = unit(
            "main",
            vec![
                Param::uniform("ptr", ValueType::PTR),
                Param::varying("x", ValueType::F32),
            ],
            vec![],
        );
        let exe = compose(&[&main], 0, None);
        assert_eq!(exe.params, main.signature.params);
        let (_, args) = exe.calls().next().unwrap();
        assert_eq!(
            args[0].sources.as_slice(),
            &[ValueRef::Initial(0), ValueRef::Initial(1)]
        );
        assert_eq!(args[0].coercion, Coercion::None);
        assert_eq!(args[1].sources.as_slice(), &[ValueRef::Initial(2)]);
    }

    #[test]
    fn test_varying_skips_undeclared_uniforms() {
        let prolog = unit(
            "prolog",
            vec![
                Param::uniform("a", ValueType::I32),
                Param::uniform("b", ValueType::I32),
                Param::varying("v", ValueType::I32),
            ],
            vec![
                Param::uniform("a", ValueType::I32),
                Param::uniform("b", ValueType::I32),
                Param::varying("v", ValueType::F32),
            ],
        );
        let main = unit(
            "main",
            vec![
                Param::uniform("a", ValueType::I32),
                Param::varying("v", ValueType::I32),
            ],
            vec![],
        );
        let exe = compose(&[&prolog, &main], 1, None);

        // Wrapper counts come from the prolog, padded past the main's types.
        assert_eq!(exe.params.len(), 3);
        assert_eq!(exe.params[1].name, "uniform_pad1");

        let (_, args) = exe.calls().nth(1).unwrap();
        assert_eq!(
            args[1].sources.as_slice(),
            &[ValueRef::Returned { call: 0, dword: 2 }]
        );
        assert_eq!(args[1].coercion, Coercion::Bitcast);
    }

    #[test]
    fn test_merged_halves_get_guards_and_restart() {
        let uniforms = || {
            vec![
                Param::uniform("bindings", ValueType::PTR),
                Param::uniform("scratch", ValueType::I32),
                Param::uniform("wave_info", ValueType::I32),
            ]
        };
        let mut first_params = uniforms();
        first_params.push(Param::varying("vid", ValueType::I32));
        let first = unit("first", first_params.clone(), vec![]);
        let second = unit("second", first_params, vec![]);

        let exe = compose(&[&first, &second], 0, Some(1));
        assert!(matches!(
            exe.steps[0],
            Step::BeginAdmission {
                source: ValueRef::Initial(3),
                shift: 0
            }
        ));
        assert_eq!(exe.steps[2], Step::EndAdmission);
        assert!(matches!(exe.steps[3], Step::BeginAdmission { shift: 8, .. }));
        assert_eq!(exe.steps.last(), Some(&Step::EndAdmission));

        let (_, args) = exe.calls().nth(1).unwrap();
        assert_eq!(args[3].sources.as_slice(), &[ValueRef::Initial(4)]);
    }

    #[test]
    fn test_int_to_pointer_gather() {
        let prolog = unit(
            "prolog",
            vec![Param::uniform("ptr", ValueType::PTR)],
            vec![
                Param::uniform("ptr.0", ValueType::I32),
                Param::uniform("ptr.1", ValueType::I32),
            ],
        );
        let main = unit("main", vec![Param::uniform("ptr", ValueType::PTR)], vec![]);
        let exe = compose(&[&prolog, &main], 1, None);
        let (_, args) = exe.calls().nth(1).unwrap();
        assert_eq!(args[0].sources.len(), 2);
        assert_eq!(args[0].coercion, Coercion::IntToPtr);
    }

    #[test]
    #[should_panic(expected = "only 0 value(s) are live")]
    fn test_missing_values_are_fatal() {
        let prolog = unit(
            "prolog",
            vec![Param::varying("x", ValueType::F32)],
            vec![Param::varying("x", ValueType::F32)],
        );
        let main = unit(
            "main",
            vec![
                Param::varying("x", ValueType::F32),
                Param::varying("y", ValueType::F32),
            ],
            vec![],
        );
        let _ = compose(&[&prolog, &main], 1, None);
    }

    #[test]
    #[should_panic(expected = "is Uniform but the forwarded value is Varying")]
    fn test_class_mismatch_is_fatal() {
        let prolog = unit(
            "prolog",
            vec![Param::varying("x", ValueType::F32)],
            vec![Param::varying("x", ValueType::F32)],
        );
        let main = unit("main", vec![Param::uniform("u", ValueType::I32)], vec![]);
        let _ = compose(&[&prolog, &main], 1, None);
    }
}
