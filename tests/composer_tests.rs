//! Composer Tests
//!
//! Tests for:
//! - Standalone units: prologue, main and epilogue called in order
//! - Merged units: admission regions around each half
//! - Parts shared between variants through the part library

mod common;

use myth_variants::compose::{ExecutableUnit, Step};
use myth_variants::state::RasterizerState;
use myth_variants::{CompilerSettings, ShaderStage};

use common::{device, fragment_program, tess_control_program, tess_eval_program, vertex_program};

fn call_names(unit: &ExecutableUnit) -> Vec<String> {
    unit.calls()
        .map(|(f, _)| unit.functions[f as usize].name.clone())
        .collect()
}

#[test]
fn fragment_unit_calls_main_then_epilogue() {
    let (device, backend) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    let (vs_ir, vs_info) = vertex_program(0);
    let (fs_ir, fs_info) = fragment_program(&[0]);
    ctx.bind_program(ShaderStage::Vertex, Some(device.create_program(vs_ir, vs_info)));
    let fs = device.create_program(fs_ir, fs_info);
    ctx.bind_program(ShaderStage::Fragment, Some(fs.clone()));
    ctx.draw().unwrap();

    let unit = backend.last_unit().unwrap();
    assert!(!unit.is_merged());
    assert!(unit.steps.iter().all(|s| matches!(s, Step::Call { .. })));
    let names = call_names(&unit);
    assert_eq!(names.len(), 2);
    assert_eq!(names[0], format!("fragment_main_{}", fs.id().raw()));
    assert!(names[1].starts_with("ps_epilog_"));
    assert_eq!(unit.main().name, names[0]);
}

#[test]
fn fragment_prologue_only_when_colors_need_it() {
    let (device, backend) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    let (vs_ir, vs_info) = vertex_program(0);
    let (fs_ir, mut fs_info) = fragment_program(&[]);
    fs_info.colors_read = 0b1111;
    ctx.bind_program(ShaderStage::Vertex, Some(device.create_program(vs_ir, vs_info)));
    ctx.bind_program(ShaderStage::Fragment, Some(device.create_program(fs_ir, fs_info)));
    ctx.draw().unwrap();
    assert_eq!(call_names(&backend.last_unit().unwrap()).len(), 2);

    ctx.update_state(|s| {
        s.set_rasterizer(RasterizerState {
            light_twoside: true,
            ..Default::default()
        });
    });
    ctx.draw().unwrap();
    let names = call_names(&backend.last_unit().unwrap());
    assert_eq!(names.len(), 3);
    assert!(names[0].starts_with("ps_prolog_"));
}

#[test]
fn merged_tessellation_unit_admits_each_half() {
    let settings = CompilerSettings {
        merge_stages: true,
        ..Default::default()
    };
    let (device, backend) = device(settings);
    let mut ctx = device.create_context();
    let (vs_ir, vs_info) = vertex_program(1);
    let (tcs_ir, tcs_info) = tess_control_program();
    let (tes_ir, tes_info) = tess_eval_program();
    let (fs_ir, fs_info) = fragment_program(&[]);
    let vs = device.create_program(vs_ir, vs_info);
    let tcs = device.create_program(tcs_ir, tcs_info);
    ctx.bind_program(ShaderStage::Vertex, Some(vs.clone()));
    ctx.bind_program(ShaderStage::TessControl, Some(tcs.clone()));
    ctx.bind_program(ShaderStage::TessEval, Some(device.create_program(tes_ir, tes_info)));
    ctx.bind_program(ShaderStage::Fragment, Some(device.create_program(fs_ir, fs_info)));

    ctx.draw().unwrap();
    assert!(ctx.bound_variant(ShaderStage::Vertex).is_none());
    let tcs_variant = ctx.bound_variant(ShaderStage::TessControl).unwrap();
    assert_eq!(tcs_variant.key().previous_program_id(), Some(vs.id()));

    // Only the merged unit depends on the patch size.
    ctx.update_state(|s| s.set_patch_vertices(4));
    ctx.draw().unwrap();
    let unit = backend.last_unit().unwrap();
    assert!(unit.is_merged());

    let steps = &unit.steps;
    assert!(matches!(steps[0], Step::BeginAdmission { shift: 0, .. }));
    let restart = steps
        .iter()
        .position(|s| matches!(s, Step::BeginAdmission { shift: 8, .. }))
        .unwrap();
    assert_eq!(steps[restart - 1], Step::EndAdmission);
    assert_eq!(steps.last(), Some(&Step::EndAdmission));

    let names = call_names(&unit);
    assert!(names[0].starts_with("vs_prolog_"));
    assert_eq!(names[1], format!("vertex_main_{}", vs.id().raw()));
    assert_eq!(names[2], format!("tess_ctrl_main_{}", tcs.id().raw()));
    assert!(names[3].starts_with("tcs_epilog_"));
    assert_eq!(unit.second_half_first, Some(2));
}

#[test]
fn parts_are_shared_between_variants() {
    let (device, backend) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    let (vs_ir, vs_info) = vertex_program(0);
    ctx.bind_program(ShaderStage::Vertex, Some(device.create_program(vs_ir, vs_info)));
    for textures in [&[0u32][..], &[1], &[0, 1]] {
        let (fs_ir, fs_info) = fragment_program(textures);
        ctx.bind_program(ShaderStage::Fragment, Some(device.create_program(fs_ir, fs_info)));
        ctx.draw().unwrap();
    }

    assert_eq!(backend.compiles(), 4);
    assert_eq!(backend.part_compiles(), 1);
    assert_eq!(device.parts().hits(), 2);
}
