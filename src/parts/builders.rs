//! Part body generation.
//!
//! Produces the [`FunctionUnit`] of a part from its key alone. Input and
//! output slots in the generated IR are positional: slot `n` is the `n`th
//! varying dword of the part's signature.

use crate::compose::abi;
use crate::compose::{FunctionUnit, RegClass, Signature};
use crate::ir::{Opcode, Operand, ShaderIr, ValueId};
use crate::state::{CompareFunc, TessPrimitive};

use super::{GsPrologKey, PartKey, PsEpilogKey, PsPrologKey, TcsEpilogKey, VsPrologKey};

/// Push-constant slots read by parts.
mod push {
    pub const START_INSTANCE: u32 = 0;
    pub const ALPHA_REF: u32 = 1;
    pub const DIVISOR_BASE: u32 = 16;
}

/// Builds the function unit for `key`.
#[must_use]
pub fn build_unit(key: &PartKey) -> FunctionUnit {
    match key {
        PartKey::VertexPrologue(k) => vs_prolog(k),
        PartKey::TessControlEpilogue(k) => tcs_epilog(k),
        PartKey::GeometryPrologue(k) => gs_prolog(k),
        PartKey::FragmentPrologue(k) => ps_prolog(k),
        PartKey::FragmentEpilogue(k) => ps_epilog(k),
    }
}

fn load(ir: &mut ShaderIr, slot: u32) -> ValueId {
    push_value(ir, Opcode::LoadInput, &[Operand::Const(slot)])
}

fn push_value(ir: &mut ShaderIr, opcode: Opcode, operands: &[Operand]) -> ValueId {
    // Every opcode used here defines a value.
    ir.push(opcode, operands).unwrap_or_default()
}

fn store(ir: &mut ShaderIr, slot: u32, value: ValueId) {
    ir.push(Opcode::StoreOutput, &[Operand::Const(slot), Operand::Value(value)]);
}

/// Copies every varying parameter to the same output slot.
fn pass_through(ir: &mut ShaderIr, sig: &Signature) {
    for slot in 0..sig.param_dwords(RegClass::Varying) {
        let value = load(ir, slot);
        store(ir, slot, value);
    }
}

fn vs_prolog(key: &VsPrologKey) -> FunctionUnit {
    let sig = abi::vs_prolog_signature(u32::from(key.num_inputs), key.layout);
    let system = sig.param_dwords(RegClass::Varying);
    let mut ir = ShaderIr::new();

    pass_through(&mut ir, &sig);

    // vertex_id and instance_id follow the merged-stage prefix.
    let prefix = system - if key.layout == abi::ArgLayout::Standalone { 4 } else { 3 };
    let vertex_id = load(&mut ir, prefix);
    let instance_id = load(&mut ir, prefix + 1);
    let start = push_value(
        &mut ir,
        Opcode::LoadPushConst,
        &[Operand::Const(push::START_INSTANCE)],
    );

    for i in 0..u32::from(key.num_inputs) {
        let bit = 1u16 << i;
        let index = if key.divisor_is_one & bit != 0 {
            push_value(
                &mut ir,
                Opcode::IAdd,
                &[Operand::Value(instance_id), Operand::Value(start)],
            )
        } else if key.divisor_is_fetched & bit != 0 {
            let divisor = push_value(
                &mut ir,
                Opcode::LoadPushConst,
                &[Operand::Const(push::DIVISOR_BASE + i)],
            );
            let scaled = push_value(
                &mut ir,
                Opcode::FMul,
                &[Operand::Value(instance_id), Operand::Value(divisor)],
            );
            push_value(
                &mut ir,
                Opcode::IAdd,
                &[Operand::Value(scaled), Operand::Value(start)],
            )
        } else {
            vertex_id
        };
        store(&mut ir, system + i, index);
    }
    ir.push(Opcode::Return, &[]);

    FunctionUnit::new(format!("vs_prolog_{}i", key.num_inputs), sig, ir)
}

fn tcs_epilog(key: &TcsEpilogKey) -> FunctionUnit {
    let sig = abi::tcs_epilog_signature(key.layout);
    let mut ir = ShaderIr::new();

    let (outer, inner) = match key.prim_mode {
        TessPrimitive::Triangles => (3, 1),
        TessPrimitive::Quads => (4, 2),
        TessPrimitive::Isolines => (2, 0),
    };
    let tf_offset = load(&mut ir, 2);
    for i in 0..outer + inner {
        let factor = push_value(
            &mut ir,
            Opcode::IAdd,
            &[Operand::Value(tf_offset), Operand::Const(i * 4)],
        );
        store(&mut ir, i, factor);
        if key.tes_reads_tess_factors {
            store(&mut ir, 32 + i, factor);
        }
    }
    ir.push(Opcode::Return, &[]);

    FunctionUnit::new(format!("tcs_epilog_{:?}", key.prim_mode), sig, ir)
}

fn gs_prolog(key: &GsPrologKey) -> FunctionUnit {
    let sig = abi::gs_prolog_signature(key.layout);
    let mut ir = ShaderIr::new();
    // Merged layouts pack two offsets per dword.
    let offset_slots: &[u32] = if key.layout == abi::ArgLayout::Standalone {
        &[0, 1, 2, 3, 4, 5]
    } else {
        &[0, 1, 4]
    };

    let offsets: Vec<ValueId> = offset_slots.iter().map(|&s| load(&mut ir, s)).collect();
    let n = offset_slots.len();
    for (i, &slot) in offset_slots.iter().enumerate() {
        // Triangle strips with adjacency are rotated by two vertices on odd
        // primitives.
        let src = if key.tri_strip_adj_fix {
            (i + n / 3) % n
        } else {
            i
        };
        store(&mut ir, slot, offsets[src]);
    }
    for slot in 0..sig.param_dwords(RegClass::Varying) {
        if !offset_slots.contains(&slot) {
            let value = load(&mut ir, slot);
            store(&mut ir, slot, value);
        }
    }
    ir.push(Opcode::Return, &[]);

    FunctionUnit::new(
        if key.tri_strip_adj_fix {
            "gs_prolog_tri_strip_adj"
        } else {
            "gs_prolog"
        },
        sig,
        ir,
    )
}

fn ps_prolog(key: &PsPrologKey) -> FunctionUnit {
    let sig = abi::fs_prolog_signature(key.colors_read);
    let base = abi::fs_prolog_signature(0).param_dwords(RegClass::Varying);
    let mut ir = ShaderIr::new();

    pass_through(&mut ir, &sig);
    let front_face = load(&mut ir, base - 3);

    let mut out = base;
    for bit in 0..8u32 {
        if key.colors_read & (1 << bit) == 0 {
            continue;
        }
        // Attribute slots 0..8 hold front colors, 8..16 back colors.
        let front = load(&mut ir, bit);
        let mut color = if key.flat_shade {
            push_value(&mut ir, Opcode::Mov, &[Operand::Value(front)])
        } else {
            front
        };
        if key.color_two_side {
            let back = load(&mut ir, 8 + bit);
            color = push_value(
                &mut ir,
                Opcode::Select,
                &[
                    Operand::Value(front_face),
                    Operand::Value(color),
                    Operand::Value(back),
                ],
            );
        }
        store(&mut ir, out, color);
        out += 1;
    }
    ir.push(Opcode::Return, &[]);

    FunctionUnit::new(format!("ps_prolog_{:#04x}", key.colors_read), sig, ir)
}

fn ps_epilog(key: &PsEpilogKey) -> FunctionUnit {
    let mut outputs = crate::program::ShaderInfo::new(crate::stage::ShaderStage::Fragment);
    outputs.color_outputs_written = key.color_outputs_written;
    outputs.writes_depth = key.writes_depth;
    let sig = abi::fs_epilog_signature(&outputs);

    let mut ir = ShaderIr::new();
    let mut slot = 0u32;
    for rt in 0..8u32 {
        if key.color_outputs_written & (1 << rt) == 0 {
            continue;
        }
        let format = (key.spi_format >> (4 * rt)) & 0xf;
        for component in 0..4u32 {
            let mut value = load(&mut ir, slot + component);
            if format != 0 && (key.clamp_color || key.color_is_int8 & (1 << rt) != 0) {
                value = push_value(
                    &mut ir,
                    Opcode::FMul,
                    &[Operand::Value(value), Operand::Const(1.0f32.to_bits())],
                );
            }
            if rt == 0 && component == 3 && key.alpha_func != CompareFunc::Always {
                let alpha_ref = push_value(
                    &mut ir,
                    Opcode::LoadPushConst,
                    &[Operand::Const(push::ALPHA_REF)],
                );
                let pass = push_value(
                    &mut ir,
                    Opcode::Select,
                    &[
                        Operand::Const(key.alpha_func as u32),
                        Operand::Value(value),
                        Operand::Value(alpha_ref),
                    ],
                );
                // Slot u32::MAX is the kill mask.
                store(&mut ir, u32::MAX, pass);
                ir.push(Opcode::Discard, &[]);
            }
            if format != 0 {
                store(&mut ir, rt * 4 + component, value);
            }
        }
        slot += 4;
    }
    if key.writes_depth {
        let depth = load(&mut ir, slot);
        store(&mut ir, 32, depth);
    }
    ir.push(Opcode::Return, &[]);

    FunctionUnit::new(format!("ps_epilog_{:#010x}", key.spi_format), sig, ir)
}
