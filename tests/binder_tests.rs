//! Binder Tests
//!
//! Tests for:
//! - Variant identity across draws without state changes
//! - Exactly one compile for an included key change, none for excluded state
//! - Dirty bits raised on variant changes and linkage changes
//! - Compile failures, the remembered failure and the reduced-optimization retry
//! - Merged stages, compute dispatch and program deletion

mod common;

use std::sync::Arc;

use smallvec::smallvec;

use myth_variants::backend::OptLevel;
use myth_variants::state::{ColorFormat, FramebufferState, RasterizerState, ScissorRect};
use myth_variants::state::{VertexElement, VertexElements};
use myth_variants::{CompilerSettings, DirtyFlags, PipelineContext, ShaderStage, VariantError};

use common::{compute_program, device, fragment_program, geometry_program, vertex_program};

fn framebuffer(targets: usize) -> FramebufferState {
    FramebufferState {
        color_formats: (0..targets).map(|_| Some(ColorFormat::Unorm8)).collect(),
        samples: 1,
        width: 64,
        height: 64,
    }
}

fn bind_basic(ctx: &mut PipelineContext, textures: &[u32]) {
    let device = ctx.device().clone();
    let (vs_ir, vs_info) = vertex_program(0);
    let (fs_ir, fs_info) = fragment_program(textures);
    ctx.bind_program(ShaderStage::Vertex, Some(device.create_program(vs_ir, vs_info)));
    ctx.bind_program(ShaderStage::Fragment, Some(device.create_program(fs_ir, fs_info)));
    ctx.update_state(|s| s.set_framebuffer(framebuffer(1)));
}

fn fs_variant(ctx: &PipelineContext) -> Arc<myth_variants::CompiledVariant> {
    ctx.bound_variant(ShaderStage::Fragment)
        .cloned()
        .expect("fragment variant bound")
}

// ============================================================================
// Identity and Recompiles
// ============================================================================

#[test]
fn same_state_keeps_variant_identity() {
    let (device, backend) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    bind_basic(&mut ctx, &[0]);

    ctx.draw().unwrap();
    let vs = ctx.bound_variant(ShaderStage::Vertex).cloned().unwrap();
    let fs = fs_variant(&ctx);
    assert_eq!(backend.compiles(), 2);

    ctx.draw().unwrap();
    assert!(Arc::ptr_eq(&vs, ctx.bound_variant(ShaderStage::Vertex).unwrap()));
    assert!(Arc::ptr_eq(&fs, &fs_variant(&ctx)));
    assert_eq!(backend.compiles(), 2);
    assert_eq!(device.compile_count(), 2);
}

#[test]
fn included_change_compiles_once_and_rebinds() {
    let (device, backend) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    bind_basic(&mut ctx, &[0]);
    ctx.draw().unwrap();
    let one_target = fs_variant(&ctx);
    ctx.take_dirty();

    ctx.update_state(|s| s.set_framebuffer(framebuffer(2)));
    let dirty = ctx.update_compiled_shaders().unwrap();

    assert_eq!(backend.compiles(), 3);
    let two_targets = fs_variant(&ctx);
    assert!(!Arc::ptr_eq(&one_target, &two_targets));
    assert!(dirty.contains(DirtyFlags::FS | DirtyFlags::BINDINGS_FS | DirtyFlags::CONSTANTS_FS));
    assert!(!dirty.contains(DirtyFlags::VS));
    assert_eq!(
        two_targets
            .bindings
            .size(myth_variants::SurfaceGroup::RenderTarget),
        2
    );

    // Back to one target: the context cache still has it.
    ctx.update_state(|s| s.set_framebuffer(framebuffer(1)));
    ctx.draw().unwrap();
    assert_eq!(backend.compiles(), 3);
    assert!(Arc::ptr_eq(&one_target, &fs_variant(&ctx)));
    assert!(ctx.stats().context_hits >= 1);
}

#[test]
fn excluded_change_compiles_nothing() {
    let (device, backend) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    bind_basic(&mut ctx, &[0]);
    ctx.draw().unwrap();
    let fs = fs_variant(&ctx);
    ctx.take_dirty();

    ctx.update_state(|s| {
        s.set_blend_color([0.5; 4]);
        s.set_scissor(ScissorRect {
            width: 16,
            height: 16,
            ..Default::default()
        });
    });
    assert!(ctx.pending_dirty().uncompiled_part().is_empty());

    // Same group as keyed state, but a field no key reads.
    ctx.update_state(|s| {
        s.set_rasterizer(RasterizerState {
            line_width: 3.0,
            ..Default::default()
        });
    });
    let dirty = ctx.update_compiled_shaders().unwrap();

    assert_eq!(backend.compiles(), 2);
    assert!(Arc::ptr_eq(&fs, &fs_variant(&ctx)));
    assert!(!dirty.intersects(DirtyFlags::FS | DirtyFlags::VS));

    let hardware = ctx.take_dirty();
    assert!(hardware.contains(DirtyFlags::BLEND | DirtyFlags::SCISSOR_RECT | DirtyFlags::RASTER));
    assert!(ctx.take_dirty().is_empty());
}

#[test]
fn contexts_share_compiled_variants() {
    let (device, backend) = device(CompilerSettings::default());
    let (vs_ir, vs_info) = vertex_program(0);
    let (fs_ir, fs_info) = fragment_program(&[1]);
    let vs = device.create_program(vs_ir, vs_info);
    let fs = device.create_program(fs_ir, fs_info);

    let mut a = device.create_context();
    let mut b = device.create_context();
    for ctx in [&mut a, &mut b] {
        ctx.bind_program(ShaderStage::Vertex, Some(vs.clone()));
        ctx.bind_program(ShaderStage::Fragment, Some(fs.clone()));
        ctx.draw().unwrap();
    }

    assert_eq!(backend.compiles(), 2);
    assert_eq!(b.stats().registry_hits, 2);
    assert!(Arc::ptr_eq(&fs_variant(&a), &fs_variant(&b)));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn draw_without_vertex_program_fails() {
    let (device, _) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    let err = ctx.draw().unwrap_err();
    assert!(matches!(err, VariantError::MissingProgram(ShaderStage::Vertex)));
}

#[test]
fn failed_compile_is_remembered() {
    let (device, backend) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    bind_basic(&mut ctx, &[0]);
    let fs_id = ctx.bound_program(ShaderStage::Fragment).unwrap().id();
    backend.fail_program(fs_id.raw());

    let err = ctx.draw().unwrap_err();
    assert!(matches!(err, VariantError::CompileFailed { stage: ShaderStage::Fragment, .. }));
    assert!(ctx.bound_variant(ShaderStage::Fragment).is_none());
    assert!(ctx.pending_dirty().contains(DirtyFlags::UNCOMPILED_FS));

    let err = ctx.draw().unwrap_err();
    assert!(matches!(
        err,
        VariantError::PreviousCompileFailed { program, .. } if program == fs_id
    ));
}

#[test]
fn register_overrun_retries_with_reduced_optimization() {
    let (device, backend) = device(CompilerSettings::default());
    backend.exceed_budget(300, 256);
    let mut ctx = device.create_context();
    bind_basic(&mut ctx, &[]);

    ctx.draw().unwrap();
    assert_eq!(fs_variant(&ctx).header.opt_level, OptLevel::Reduced);
}

#[test]
fn register_overrun_without_retry_fails() {
    let settings = CompilerSettings {
        retry_with_lower_optimization: false,
        ..Default::default()
    };
    let (device, backend) = device(settings);
    backend.exceed_budget(300, 256);
    let mut ctx = device.create_context();
    bind_basic(&mut ctx, &[]);

    let err = ctx.draw().unwrap_err();
    assert!(matches!(
        err,
        VariantError::ResourceBudgetExceeded {
            needed: 300,
            available: 256,
            ..
        }
    ));
}

// ============================================================================
// Linkage
// ============================================================================

#[test]
fn new_output_map_recompiles_dependent_fragment() {
    let (device, _) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    let (vs_ir, vs_info) = vertex_program(0);
    let (fs_ir, mut fs_info) = fragment_program(&[]);
    fs_info.depends_on_last_vue_map = true;
    ctx.bind_program(ShaderStage::Vertex, Some(device.create_program(vs_ir, vs_info)));
    ctx.bind_program(ShaderStage::Fragment, Some(device.create_program(fs_ir, fs_info)));
    ctx.draw().unwrap();
    let before = fs_variant(&ctx);
    ctx.take_dirty();

    let (gs_ir, gs_info) = geometry_program(true);
    ctx.bind_program(ShaderStage::Geometry, Some(device.create_program(gs_ir, gs_info)));
    let dirty = ctx.update_compiled_shaders().unwrap();

    assert!(!Arc::ptr_eq(&before, &fs_variant(&ctx)));
    assert!(dirty.contains(DirtyFlags::GS | DirtyFlags::SBE | DirtyFlags::FS));
    assert!(dirty.contains(DirtyFlags::SF_CL_VIEWPORT | DirtyFlags::SCISSOR_RECT));
    assert!(ctx.pending_dirty().uncompiled_part().is_empty());
}

#[test]
fn compute_dispatch_binds_work_groups() {
    let (device, _) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    assert!(matches!(
        ctx.dispatch().unwrap_err(),
        VariantError::MissingProgram(ShaderStage::Compute)
    ));

    let (ir, info) = compute_program();
    ctx.bind_program(ShaderStage::Compute, Some(device.create_program(ir, info)));
    ctx.dispatch().unwrap();

    let cs = ctx.bound_variant(ShaderStage::Compute).unwrap();
    assert_eq!(cs.bindings.len(), 2);
    assert_eq!(ctx.stats().dispatches, 1);
    assert!(ctx.take_dirty().contains(DirtyFlags::CS));
}

// ============================================================================
// Merged Stages
// ============================================================================

#[test]
fn merged_geometry_embeds_vertex_program() {
    let settings = CompilerSettings {
        merge_stages: true,
        ..Default::default()
    };
    let (device, backend) = device(settings);
    let mut ctx = device.create_context();
    let (vs_ir, vs_info) = vertex_program(2);
    let (gs_ir, gs_info) = geometry_program(false);
    let (fs_ir, fs_info) = fragment_program(&[0]);
    let vs = device.create_program(vs_ir, vs_info);
    ctx.bind_program(ShaderStage::Vertex, Some(vs.clone()));
    ctx.bind_program(ShaderStage::Geometry, Some(device.create_program(gs_ir, gs_info)));
    ctx.bind_program(ShaderStage::Fragment, Some(device.create_program(fs_ir, fs_info)));
    ctx.update_state(|s| {
        s.set_vertex_elements(VertexElements {
            elements: smallvec![VertexElement::default(), VertexElement::default()],
        });
    });

    ctx.draw().unwrap();
    assert!(ctx.bound_variant(ShaderStage::Vertex).is_none());
    let gs = ctx.bound_variant(ShaderStage::Geometry).cloned().unwrap();
    assert_eq!(gs.key().previous_program_id(), Some(vs.id()));
    assert_eq!(backend.compiles(), 2);

    // The embedded vertex prologue depends on the instance divisors.
    ctx.update_state(|s| {
        s.set_vertex_elements(VertexElements {
            elements: smallvec![
                VertexElement {
                    instance_divisor: 1,
                    ..Default::default()
                },
                VertexElement::default()
            ],
        });
    });
    ctx.draw().unwrap();
    assert_eq!(backend.compiles(), 3);
    assert!(!Arc::ptr_eq(&gs, ctx.bound_variant(ShaderStage::Geometry).unwrap()));
}

// ============================================================================
// Deletion
// ============================================================================

#[test]
fn delete_program_unbinds_and_evicts() {
    let (device, _) = device(CompilerSettings::default());
    let mut ctx = device.create_context();
    bind_basic(&mut ctx, &[0]);
    ctx.draw().unwrap();
    let fs = ctx.bound_program(ShaderStage::Fragment).cloned().unwrap();

    ctx.delete_program(&fs);
    assert!(ctx.bound_program(ShaderStage::Fragment).is_none());
    assert_eq!(ctx.cache_stats().evictions, 1);

    ctx.draw().unwrap();
    assert!(ctx.bound_variant(ShaderStage::Fragment).is_none());
    assert!(ctx.take_dirty().contains(DirtyFlags::FS));
}
