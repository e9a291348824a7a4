//! Concurrency Tests
//!
//! Tests for:
//! - At most one backend compile per key, however many contexts ask
//! - Part library builds shared across threads
//! - Different keys compiling side by side

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use myth_variants::backend::PartBinary;
use myth_variants::compose::ArgLayout;
use myth_variants::parts::{GsPrologKey, PartKey, PartKind, PartLibrary, ShaderPart, builders};
use myth_variants::state::{ColorFormat, FramebufferState};
use myth_variants::{CompiledVariant, CompilerSettings, ShaderStage};

use common::{device, fragment_program, vertex_program};

const THREADS: usize = 8;

#[test]
fn same_key_compiles_once_across_contexts() {
    let (device, backend) = device(CompilerSettings::default());
    backend.slow_down(Duration::from_millis(20));
    let (vs_ir, vs_info) = vertex_program(1);
    let (fs_ir, fs_info) = fragment_program(&[2]);
    let vs = device.create_program(vs_ir, vs_info);
    let fs = device.create_program(fs_ir, fs_info);

    let variants: Vec<Arc<CompiledVariant>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let device = device.clone();
                let (vs, fs) = (vs.clone(), fs.clone());
                s.spawn(move || {
                    let mut ctx = device.create_context();
                    ctx.bind_program(ShaderStage::Vertex, Some(vs));
                    ctx.bind_program(ShaderStage::Fragment, Some(fs));
                    ctx.draw().unwrap();
                    ctx.bound_variant(ShaderStage::Fragment).cloned().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(backend.compiles(), 2);
    assert!(variants.iter().all(|v| Arc::ptr_eq(v, &variants[0])));
    assert_eq!(fs.variant_count(), 1);
    // One vertex prologue and one fragment epilogue for everybody.
    assert_eq!(device.parts().builds(), 2);
}

#[test]
fn different_keys_all_compile() {
    let (device, backend) = device(CompilerSettings::default());
    backend.slow_down(Duration::from_millis(5));
    let (vs_ir, vs_info) = vertex_program(0);
    let (fs_ir, fs_info) = fragment_program(&[0]);
    let vs = device.create_program(vs_ir, vs_info);
    let fs = device.create_program(fs_ir, fs_info);

    thread::scope(|s| {
        for targets in 1..=4 {
            let device = device.clone();
            let (vs, fs) = (vs.clone(), fs.clone());
            s.spawn(move || {
                let mut ctx = device.create_context();
                ctx.bind_program(ShaderStage::Vertex, Some(vs));
                ctx.bind_program(ShaderStage::Fragment, Some(fs));
                ctx.update_state(|st| {
                    st.set_framebuffer(FramebufferState {
                        color_formats: (0..targets).map(|_| Some(ColorFormat::Float16)).collect(),
                        samples: 1,
                        ..Default::default()
                    });
                });
                ctx.draw().unwrap();
            });
        }
    });

    assert_eq!(fs.variant_count(), 4);
    assert_eq!(backend.compiles(), 5);
}

#[test]
fn part_library_builds_each_key_once() {
    let library = PartLibrary::new();
    let built = AtomicU64::new(0);
    let keys = [false, true].map(|fix| {
        PartKey::GeometryPrologue(GsPrologKey {
            tri_strip_adj_fix: fix,
            layout: ArgLayout::Standalone,
        })
    });

    let parts: Vec<Arc<ShaderPart>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let key = keys[i % 2];
                let (library, built) = (&library, &built);
                s.spawn(move || {
                    library
                        .get_or_build_part(PartKind::GeometryPrologue, &key, || {
                            thread::sleep(Duration::from_millis(10));
                            built.fetch_add(1, Ordering::SeqCst);
                            Ok(ShaderPart {
                                kind: key.kind(),
                                key,
                                unit: builders::build_unit(&key),
                                binary: PartBinary::default(),
                            })
                        })
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(built.load(Ordering::SeqCst), 2);
    assert_eq!(library.len(), 2);
    assert_eq!(library.builds(), 2);
    assert_eq!(library.hits(), (THREADS - 2) as u64);
    for (i, part) in parts.iter().enumerate() {
        assert!(Arc::ptr_eq(part, &parts[i % 2]));
    }
}
