//! Two-pass resource index handling.
//!
//! 1. [`collect`] walks the IR once and records which `(group, index)`
//!    pairs are referenced.
//! 2. [`rewrite`] produces a **new** IR with every resource operand replaced
//!    by its compact slot. The input IR is never touched.
//!
//! Both passes are driven by the opcode descriptor table.

use crate::ir::{IndexSource, Instruction, Opcode, Operand, ShaderIr};

use super::binding_table::{BindingTable, GroupUsage, SurfaceGroup};

/// Gathers the resource usage of `ir`.
#[must_use]
pub fn collect(ir: &ShaderIr) -> GroupUsage {
    let mut usage = GroupUsage::new();
    for inst in ir.instructions() {
        let Some((access, operand)) = inst.resource_operand() else {
            continue;
        };
        match operand {
            Operand::Const(index) => usage.mark(access.group, index),
            Operand::Value(_) => usage.mark_indirect(access.group),
        }
    }
    usage
}

/// Returns a copy of `ir` whose resource operands address compact slots.
///
/// Constant indices are replaced directly. Dynamic indices get an `iadd`
/// of the group's base offset inserted in front of the instruction; this is
/// only valid because dynamic access marks the whole group used.
///
/// # Panics
/// Panics if a referenced index has no slot in `table`, or a dynamically
/// indexed group is not fully used.
#[must_use]
pub fn rewrite(ir: &ShaderIr, table: &BindingTable) -> ShaderIr {
    let mut out = ir.clone();
    let source = std::mem::take(out.instructions_mut());
    let mut rewritten: Vec<Instruction> = Vec::with_capacity(source.len());

    for mut inst in source {
        let Some(access) = inst.descriptor().resource else {
            rewritten.push(inst);
            continue;
        };
        let IndexSource::Operand(slot) = access.index else {
            rewritten.push(inst);
            continue;
        };
        let slot = slot as usize;

        match inst.operands[slot] {
            Operand::Const(index) => {
                let compact = table
                    .group_index_to_compact(access.group, index)
                    .unwrap_or_else(|| {
                        panic!(
                            "{} #{index} referenced but has no binding table slot",
                            access.group.name()
                        )
                    });
                inst.operands[slot] = Operand::Const(compact);
            }
            Operand::Value(value) => {
                assert!(
                    table.is_fully_used(access.group),
                    "dynamic {} access requires the whole group",
                    access.group.name()
                );
                let biased = out.alloc_value();
                rewritten.push(Instruction {
                    opcode: Opcode::IAdd,
                    dest: Some(biased),
                    operands: [Operand::Value(value), Operand::Const(table.offset(access.group))]
                        .into_iter()
                        .collect(),
                });
                inst.operands[slot] = Operand::Value(biased);
            }
        }
        rewritten.push(inst);
    }

    *out.instructions_mut() = rewritten;
    out
}

/// The logical `(group, index)` each resource instruction of a rewritten IR
/// refers to, recovered through the binding table. Dynamic accesses report
/// `None` for the index.
#[must_use]
pub fn resolve_references(
    rewritten: &ShaderIr,
    table: &BindingTable,
) -> Vec<(SurfaceGroup, Option<u32>)> {
    rewritten
        .instructions()
        .iter()
        .filter_map(|inst| {
            let (access, operand) = inst.resource_operand()?;
            let index = match (access.index, operand) {
                (IndexSource::Implicit, _) => Some(0),
                (IndexSource::Operand(_), Operand::Const(slot)) => {
                    table.compact_to_group_index(access.group, slot)
                }
                (IndexSource::Operand(_), Operand::Value(_)) => None,
            };
            Some((access.group, index))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::GroupSizes;

    fn sample_ir() -> ShaderIr {
        let mut ir = ShaderIr::new();
        let uv = ir.push(Opcode::LoadInput, &[Operand::Const(0)]).unwrap();
        ir.push(Opcode::Tex, &[Operand::Const(7), Operand::Value(uv)]);
        ir.push(Opcode::Tex, &[Operand::Const(3), Operand::Value(uv)]);
        ir.push(Opcode::LoadUbo, &[Operand::Const(1), Operand::Const(16)]);
        ir
    }

    #[test]
    fn test_collect_marks_constant_indices() {
        let usage = collect(&sample_ir());
        assert_eq!(usage.mask(SurfaceGroup::Texture), (1 << 7) | (1 << 3));
        assert_eq!(usage.mask(SurfaceGroup::Ubo), 1 << 1);
        assert!(!usage.is_indirect(SurfaceGroup::Ubo));
    }

    #[test]
    fn test_rewrite_leaves_source_untouched() {
        let ir = sample_ir();
        let usage = collect(&ir);
        let sizes = GroupSizes::new()
            .with(SurfaceGroup::Texture, 8)
            .with(SurfaceGroup::Ubo, 2);
        let bt = BindingTable::compact(&usage, &sizes, true);

        let before = ir.clone();
        let rewritten = rewrite(&ir, &bt);
        assert_eq!(ir, before);

        // texture #3 -> 0, texture #7 -> 1, ubo #1 -> 2
        let tex: Vec<_> = rewritten
            .instructions()
            .iter()
            .filter(|i| i.opcode == Opcode::Tex)
            .map(|i| i.operands[0])
            .collect();
        assert_eq!(tex, vec![Operand::Const(1), Operand::Const(0)]);
        assert_eq!(
            resolve_references(&rewritten, &bt),
            vec![
                (SurfaceGroup::Texture, Some(7)),
                (SurfaceGroup::Texture, Some(3)),
                (SurfaceGroup::Ubo, Some(1)),
            ]
        );
    }

    #[test]
    fn test_dynamic_index_gets_base_offset() {
        let mut ir = ShaderIr::new();
        let idx = ir.push(Opcode::LoadInput, &[Operand::Const(0)]).unwrap();
        ir.push(Opcode::LoadUbo, &[Operand::Const(0), Operand::Const(0)]);
        ir.push(Opcode::LoadSsbo, &[Operand::Value(idx), Operand::Const(0)]);

        let usage = collect(&ir);
        let sizes = GroupSizes::new()
            .with(SurfaceGroup::Ubo, 1)
            .with(SurfaceGroup::Ssbo, 3);
        let bt = BindingTable::compact(&usage, &sizes, true);
        let rewritten = rewrite(&ir, &bt);

        assert_eq!(rewritten.len(), ir.len() + 1);
        let add = &rewritten.instructions()[2];
        assert_eq!(add.opcode, Opcode::IAdd);
        assert_eq!(add.operands[1], Operand::Const(bt.offset(SurfaceGroup::Ssbo)));
        let load = &rewritten.instructions()[3];
        assert_eq!(load.operands[0], Operand::Value(add.dest.unwrap()));
    }
}
