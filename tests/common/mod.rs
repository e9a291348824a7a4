//! Shared fixtures for the integration tests: a deterministic backend that
//! counts its work, and small IR builders.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use myth_variants::backend::{
    BackendError, BackendOutput, BackendStats, CodeGenerator, CompileRequest, Fixup, OptLevel,
    PartBinary, PartRequest, ResourceManifest, ResourceRef, StageLinkage,
};
use myth_variants::cache::BlobStore;
use myth_variants::compose::ExecutableUnit;
use myth_variants::ir::{Opcode, Operand, ShaderIr};
use myth_variants::resources::usage;
use myth_variants::{CompilerSettings, Device, ShaderInfo, ShaderStage};

/// Bytes in front of the first patched slot of [`TestBackend`] code.
pub const CODE_HEADER_BYTES: usize = 9;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// Backend emitting one relocated `u32` per resource reference.
///
/// Code layout: `b"TB01"`, program id (u32 LE), opt level byte, then one
/// placeholder per reference, patched by the engine.
#[derive(Default)]
pub struct TestBackend {
    tag: String,
    compiles: AtomicU64,
    part_compiles: AtomicU64,
    failing_programs: Mutex<FxHashSet<u32>>,
    /// Registers needed at full optimization; reduced always fits.
    register_budget: Mutex<Option<(u32, u32)>>,
    extra_reference: Mutex<Option<ResourceRef>>,
    /// Bytes added to every fixup offset.
    fixup_skew: Mutex<u32>,
    delay: Mutex<Option<Duration>>,
    last_unit: Mutex<Option<ExecutableUnit>>,
}

impl TestBackend {
    pub fn new() -> Arc<Self> {
        Self::with_tag("test-backend/1")
    }

    pub fn with_tag(tag: &str) -> Arc<Self> {
        Arc::new(Self {
            tag: tag.to_owned(),
            ..Default::default()
        })
    }

    pub fn compiles(&self) -> u64 {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn part_compiles(&self) -> u64 {
        self.part_compiles.load(Ordering::SeqCst)
    }

    pub fn fail_program(&self, id: u32) {
        self.failing_programs.lock().insert(id);
    }

    pub fn exceed_budget(&self, needed: u32, available: u32) {
        *self.register_budget.lock() = Some((needed, available));
    }

    /// Makes every compile report an extra reference.
    pub fn report_extra_reference(&self, reference: ResourceRef) {
        *self.extra_reference.lock() = Some(reference);
    }

    /// Shifts every reported fixup `bytes` further into the code.
    pub fn skew_fixups(&self, bytes: u32) {
        *self.fixup_skew.lock() = bytes;
    }

    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// The executable unit of the most recent successful compile.
    pub fn last_unit(&self) -> Option<ExecutableUnit> {
        self.last_unit.lock().clone()
    }
}

fn output_slots(ir: &ShaderIr) -> u64 {
    ir.instructions()
        .iter()
        .filter(|inst| inst.opcode == Opcode::StoreOutput)
        .filter_map(|inst| inst.operands[0].as_const())
        .filter(|&slot| slot < 64)
        .fold(0, |mask, slot| mask | (1 << slot))
}

impl CodeGenerator for TestBackend {
    fn cache_tag(&self) -> &str {
        &self.tag
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<BackendOutput, BackendError> {
        if let Some(delay) = *self.delay.lock() {
            std::thread::sleep(delay);
        }
        if self.failing_programs.lock().contains(&request.program.raw()) {
            return Err(BackendError::Failed("unsupported instruction".into()));
        }
        if request.opt_level == OptLevel::Full
            && let Some((needed, available)) = *self.register_budget.lock()
        {
            return Err(BackendError::RegisterBudget { needed, available });
        }
        self.compiles.fetch_add(1, Ordering::SeqCst);
        *self.last_unit.lock() = Some(request.unit.clone());

        let mut code = b"TB01".to_vec();
        code.extend_from_slice(&request.program.raw().to_le_bytes());
        code.push(request.opt_level as u8);

        let mut references: Vec<ResourceRef> = request
            .unit
            .functions
            .iter()
            .flat_map(|f| usage::resolve_references(&f.body, request.bindings))
            .map(|(group, index)| ResourceRef { group, index })
            .collect();
        references.extend(*self.extra_reference.lock());

        let skew = *self.fixup_skew.lock();
        let mut fixups = Vec::with_capacity(references.len());
        for reference in references {
            fixups.push(Fixup {
                offset: code.len() as u32 + skew,
                reference,
            });
            code.extend_from_slice(&u32::MAX.to_le_bytes());
        }

        let outputs = output_slots(&request.unit.main().body);
        let linkage = if request.stage.produces_vertices() {
            StageLinkage {
                outputs_written: outputs,
                urb_entry_size: outputs.count_ones().max(1),
                writes_viewport_index: outputs & (1 << 2) != 0,
            }
        } else {
            StageLinkage::default()
        };

        Ok(BackendOutput {
            machine_code: code,
            manifest: ResourceManifest {
                references: Vec::new(),
                fixups,
            },
            linkage,
            stats: BackendStats {
                uniform_registers: 8,
                varying_registers: request.unit.params.len() as u32,
                ..Default::default()
            },
        })
    }

    fn compile_part(&self, request: &PartRequest<'_>) -> Result<PartBinary, BackendError> {
        self.part_compiles.fetch_add(1, Ordering::SeqCst);
        Ok(PartBinary {
            code: request.kind.name().as_bytes().to_vec(),
            stats: BackendStats::default(),
        })
    }
}

/// Compact slots patched into [`TestBackend`] code, in reference order.
pub fn patched_slots(code: &[u8]) -> Vec<u32> {
    code[CODE_HEADER_BYTES..]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// ─── Devices ─────────────────────────────────────────────────────────────────

pub fn device(settings: CompilerSettings) -> (Arc<Device>, Arc<TestBackend>) {
    init_logging();
    let backend = TestBackend::new();
    (Device::new(settings, backend.clone(), None), backend)
}

pub fn device_with_store(
    settings: CompilerSettings,
    store: Arc<dyn BlobStore>,
) -> (Arc<Device>, Arc<TestBackend>) {
    init_logging();
    let backend = TestBackend::new();
    (Device::new(settings, backend.clone(), Some(store)), backend)
}

// ─── Programs ────────────────────────────────────────────────────────────────

/// Reads `inputs` vertex attributes and writes position plus one varying.
pub fn vertex_program(inputs: u32) -> (ShaderIr, ShaderInfo) {
    let mut ir = ShaderIr::new();
    let pos = ir.push(Opcode::LoadInput, &[Operand::Const(0)]).unwrap_or_default();
    ir.push(Opcode::StoreOutput, &[Operand::Const(0), Operand::Value(pos)]);
    ir.push(Opcode::StoreOutput, &[Operand::Const(1), Operand::Value(pos)]);

    let mut info = ShaderInfo::new(ShaderStage::Vertex);
    info.num_vertex_inputs = inputs;
    info.inputs_read = (1 << inputs) - 1;
    info.outputs_written = 0b11;
    (ir, info)
}

/// Samples every texture in `textures` and writes render target 0.
pub fn fragment_program(textures: &[u32]) -> (ShaderIr, ShaderInfo) {
    let mut ir = ShaderIr::new();
    let uv = ir.push(Opcode::LoadInput, &[Operand::Const(1)]).unwrap_or_default();
    let mut color = uv;
    for &t in textures {
        let texel = ir
            .push(Opcode::Tex, &[Operand::Const(t), Operand::Value(uv)])
            .unwrap_or_default();
        color = ir
            .push(Opcode::FAdd, &[Operand::Value(color), Operand::Value(texel)])
            .unwrap_or_default();
    }
    ir.push(Opcode::StoreOutput, &[Operand::Const(0), Operand::Value(color)]);

    let mut info = ShaderInfo::new(ShaderStage::Fragment);
    info.textures_used = textures.iter().fold(0, |mask, &t| mask | (1 << t));
    info.inputs_read = 0b10;
    info.color_outputs_written = 1;
    (ir, info)
}

pub fn compute_program() -> (ShaderIr, ShaderInfo) {
    let mut ir = ShaderIr::new();
    let groups = ir.push(Opcode::LoadNumWorkGroups, &[]).unwrap_or_default();
    ir.push(
        Opcode::StoreSsbo,
        &[Operand::Value(groups), Operand::Const(0), Operand::Const(0)],
    );

    let mut info = ShaderInfo::new(ShaderStage::Compute);
    info.num_ssbos = 1;
    info.uses_num_work_groups = true;
    info.workgroup_size = [64, 1, 1];
    (ir, info)
}

pub fn tess_control_program() -> (ShaderIr, ShaderInfo) {
    let mut ir = ShaderIr::new();
    let v = ir.push(Opcode::LoadInput, &[Operand::Const(0)]).unwrap_or_default();
    ir.push(Opcode::StoreOutput, &[Operand::Const(0), Operand::Value(v)]);

    let mut info = ShaderInfo::new(ShaderStage::TessControl);
    info.inputs_read = 0b1;
    info.outputs_written = 0b1;
    info.tcs_vertices_out = 3;
    (ir, info)
}

pub fn tess_eval_program() -> (ShaderIr, ShaderInfo) {
    let mut ir = ShaderIr::new();
    let v = ir.push(Opcode::LoadInput, &[Operand::Const(0)]).unwrap_or_default();
    ir.push(Opcode::StoreOutput, &[Operand::Const(0), Operand::Value(v)]);
    ir.push(Opcode::StoreOutput, &[Operand::Const(1), Operand::Value(v)]);

    let mut info = ShaderInfo::new(ShaderStage::TessEval);
    info.inputs_read = 0b1;
    info.outputs_written = 0b11;
    (ir, info)
}

/// Passes one vertex through, optionally writing the viewport index.
pub fn geometry_program(writes_viewport: bool) -> (ShaderIr, ShaderInfo) {
    let mut ir = ShaderIr::new();
    let v = ir.push(Opcode::LoadInput, &[Operand::Const(0)]).unwrap_or_default();
    ir.push(Opcode::StoreOutput, &[Operand::Const(0), Operand::Value(v)]);
    ir.push(Opcode::StoreOutput, &[Operand::Const(1), Operand::Value(v)]);
    if writes_viewport {
        ir.push(Opcode::StoreOutput, &[Operand::Const(2), Operand::Value(v)]);
    }
    ir.push(Opcode::EmitVertex, &[]);

    let mut info = ShaderInfo::new(ShaderStage::Geometry);
    info.inputs_read = 0b1;
    info.outputs_written = if writes_viewport { 0b111 } else { 0b11 };
    info.gs_max_vertices = 3;
    info.writes_viewport_index = writes_viewport;
    (ir, info)
}
