//! Variant Compiler
//!
//! The miss path behind every cache level:
//!
//! ```text
//! claim slot ─▶ persistent lookup ─▶ collect usage ─▶ compact ─▶ rewrite copy
//!      ─▶ parts (library) ─▶ compose ─▶ backend ─▶ validate manifest
//!      ─▶ relocate ─▶ store in slot + persistent cache
//! ```
//!
//! Compiles are serialized per key by the program's slot lock and run in
//! parallel across keys. A failure is stored in the slot so that later
//! requests for the same key fail fast.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::backend::{CompileRequest, OptLevel, PartRequest};
use crate::cache::CacheHash;
use crate::compose::{ArgLayout, FunctionUnit, PartLinks, abi, compose};
use crate::device::Device;
use crate::errors::{Result, VariantError};
use crate::key::{PipelineStateKey, StageKey};
use crate::parts::{PartKey, ShaderPart, VsPrologKey, builders, plan_parts};
use crate::program::{ShaderProgram, SlotState};
use crate::resources::{self, BindingTable, usage};
use crate::settings::DebugFlags;
use crate::stage::ShaderStage;
use crate::variant::{CompiledVariant, StageInfo, VariantHeader, VariantSource};

/// One variant to produce.
#[derive(Clone, Copy)]
pub struct VariantRequest<'a> {
    pub program: &'a ShaderProgram,
    pub key: PipelineStateKey,
    /// Previous-stage program merged in front of `program`.
    pub first_half: Option<&'a ShaderProgram>,
    /// Bound render-target count, for fragment programs.
    pub color_regions: u32,
}

/// Returns the variant for `request`, compiling it if no level has it.
pub fn get_or_compile(
    device: &Device,
    request: &VariantRequest<'_>,
) -> Result<(Arc<CompiledVariant>, VariantSource)> {
    let program = request.program;
    let key = &request.key;
    let settings = device.settings();

    let (slot, _) = program.claim_slot(key);
    let mut state = slot.lock();
    match &*state {
        SlotState::Ready(variant) => return Ok((variant.clone(), VariantSource::Registry)),
        SlotState::Failed(message) => {
            return Err(VariantError::PreviousCompileFailed {
                stage: program.stage(),
                program: program.id(),
                message: message.clone(),
            });
        }
        SlotState::Empty => {}
    }

    if let Some(previous) = program.note_compile(key)
        && settings.debug.contains(DebugFlags::RECOMPILES)
    {
        report_recompile(program, &previous, key);
    }

    // Merged variants embed another program and are not content-addressed.
    let hash = device
        .persistent_cache()
        .filter(|_| request.first_half.is_none())
        .map(|cache| {
            let hash = CacheHash::compute(
                device.backend().cache_tag(),
                settings.binding_table_compaction,
                program.content_hash(),
                &key.portable_bytes(),
            );
            (cache, hash)
        });

    if let Some((cache, hash)) = hash {
        if let Some(variant) = cache.load_variant(hash, program.id(), key) {
            let variant = Arc::new(variant);
            *state = SlotState::Ready(variant.clone());
            return Ok((variant, VariantSource::Persistent));
        }
        if settings.debug.contains(DebugFlags::CACHE) {
            debug!("Persistent cache miss {hash} for program {}", program.id());
        }
    }

    match compile_with_retry(device, request) {
        Ok(variant) => {
            let variant = Arc::new(variant);
            *state = SlotState::Ready(variant.clone());
            if let Some((cache, hash)) = hash {
                cache.store_variant(hash, &variant);
            }
            Ok((variant, VariantSource::Compiled))
        }
        Err(err) => {
            error!("{err}");
            *state = SlotState::Failed(err.to_string().into());
            Err(err)
        }
    }
}

fn compile_with_retry(device: &Device, request: &VariantRequest<'_>) -> Result<CompiledVariant> {
    match compile_variant(device, request, OptLevel::Full) {
        Err(VariantError::ResourceBudgetExceeded {
            needed, available, ..
        }) if device.settings().retry_with_lower_optimization => {
            warn!(
                "{} shader for program {} needs {needed} registers ({available} available), \
                 retrying with reduced optimization",
                request.program.stage(),
                request.program.id()
            );
            compile_variant(device, request, OptLevel::Reduced)
        }
        other => other,
    }
}

fn report_recompile(program: &ShaderProgram, previous: &PipelineStateKey, key: &PipelineStateKey) {
    let changes = key.diff(previous);
    if changes.is_empty() {
        info!("Recompiling {} shader {}: no key change", program.stage(), program.id());
        return;
    }
    info!("Recompiling {} shader {}:", program.stage(), program.id());
    for change in changes {
        info!("  {change}");
    }
}

// ─── Compilation ─────────────────────────────────────────────────────────────

/// Register layout of `program`'s variant.
fn arg_layout(program: &ShaderProgram, first_half: Option<&ShaderProgram>) -> ArgLayout {
    match (program.stage(), first_half) {
        (ShaderStage::TessControl, Some(_)) => ArgLayout::MergedLsHs,
        (ShaderStage::Geometry, Some(first)) => ArgLayout::MergedEsGs {
            es_is_vertex: first.stage() == ShaderStage::Vertex,
        },
        _ => ArgLayout::Standalone,
    }
}

/// Vertex prologue of a vertex program running as a merged first half.
fn first_half_prolog(key: &StageKey, first: &ShaderProgram, layout: ArgLayout) -> Option<PartKey> {
    if first.stage() != ShaderStage::Vertex {
        return None;
    }
    let (num_inputs, divisor_is_one, divisor_is_fetched) = match key {
        StageKey::TessControl(k) => (
            k.ls_prolog_num_inputs,
            k.ls_prolog_divisor_is_one,
            k.ls_prolog_divisor_is_fetched,
        ),
        StageKey::Geometry(k) => (
            k.es_prolog_num_inputs,
            k.es_prolog_divisor_is_one,
            k.es_prolog_divisor_is_fetched,
        ),
        _ => return None,
    };
    (num_inputs > 0).then_some(PartKey::VertexPrologue(VsPrologKey {
        num_inputs,
        divisor_is_one,
        divisor_is_fetched,
        layout,
    }))
}

fn get_part(device: &Device, key: &PartKey) -> Result<Arc<ShaderPart>> {
    let kind = key.kind();
    device.parts().get_or_build_part(kind, key, || {
        let unit = builders::build_unit(key);
        let binary = device
            .backend()
            .compile_part(&PartRequest {
                kind,
                key,
                unit: &unit,
            })
            .map_err(|err| VariantError::PartBuildFailed {
                kind,
                message: err.to_string(),
            })?;
        Ok(ShaderPart {
            kind,
            key: *key,
            unit,
            binary,
        })
    })
}

/// Compiles one variant at `opt_level`, without touching any cache.
pub fn compile_variant(
    device: &Device,
    request: &VariantRequest<'_>,
    opt_level: OptLevel,
) -> Result<CompiledVariant> {
    let program = request.program;
    let info = program.info();
    let stage = info.stage;
    let key = &request.key;
    let stage_key = key.stage_key();
    let settings = device.settings();
    let layout = arg_layout(program, request.first_half);

    // ---- Binding table ----
    let mut sizes = resources::declared_sizes(info, request.color_regions);
    let mut usage = usage::collect(program.ir());
    usage.merge(&resources::implicit_usage(info, &sizes));
    if let Some(first) = request.first_half {
        // Both halves address one table.
        let first_sizes = resources::declared_sizes(first.info(), 0);
        for group in resources::SurfaceGroup::ALL {
            sizes.set(group, sizes.get(group).max(first_sizes.get(group)));
        }
        usage.merge(&usage::collect(first.ir()));
        usage.merge(&resources::implicit_usage(first.info(), &sizes));
    }
    let table = BindingTable::compact(&usage, &sizes, settings.binding_table_compaction);
    if settings.debug.contains(DebugFlags::BINDING_TABLES) {
        debug!("{stage} shader {}: {table}", program.id());
    }

    // ---- Parts ----
    let plan = plan_parts(info, &stage_key, layout);
    let mut units: Vec<FunctionUnit> = Vec::with_capacity(5);
    let mut parts: Vec<Arc<ShaderPart>> = Vec::new();

    let mut main_part = 0;
    let mut second_half_first = None;

    if let Some(first) = request.first_half {
        let prolog = first_half_prolog(&stage_key, first, layout);
        if let Some(part_key) = prolog {
            let part = get_part(device, &part_key)?;
            units.push(part.unit.clone());
            parts.push(part);
        }
        let links = PartLinks {
            has_prolog: prolog.is_some(),
            has_epilog: false,
        };
        main_part = units.len();
        units.push(FunctionUnit::new(
            format!("{}_main_{}", first.stage().name().replace(' ', "_"), first.id().raw()),
            abi::main_signature(first.info(), layout, links),
            usage::rewrite(first.ir(), &table),
        ));
        second_half_first = Some(units.len());
    }

    if let Some(part_key) = plan.prolog {
        let part = get_part(device, &part_key)?;
        units.push(part.unit.clone());
        parts.push(part);
    }
    let links = PartLinks {
        has_prolog: plan.prolog.is_some(),
        has_epilog: plan.epilog.is_some(),
    };
    if request.first_half.is_none() {
        main_part = units.len();
    }
    units.push(FunctionUnit::new(
        format!("{}_main_{}", stage.name().replace(' ', "_"), program.id().raw()),
        abi::main_signature(info, layout, links),
        usage::rewrite(program.ir(), &table),
    ));
    if let Some(part_key) = plan.epilog {
        let part = get_part(device, &part_key)?;
        units.push(part.unit.clone());
        parts.push(part);
    }

    let refs: Vec<&FunctionUnit> = units.iter().collect();
    let unit = compose(&refs, main_part, second_half_first);

    // ---- Backend ----
    let output = device
        .backend()
        .compile(&CompileRequest {
            stage,
            program: program.id(),
            unit: &unit,
            key,
            group_sizes: sizes,
            bindings: &table,
            opt_level,
        })
        .map_err(|err| VariantError::from_backend(stage, program.id(), err))?;
    device.note_compile();

    let manifest = &output.manifest;
    let code_len = output.machine_code.len();
    if let Some(fixup) = manifest
        .fixups
        .iter()
        .find(|f| (f.offset as usize).checked_add(4).is_none_or(|end| end > code_len))
    {
        return Err(VariantError::CompileFailed {
            stage,
            program: program.id(),
            message: format!(
                "backend fixup at {} is outside the {code_len} byte code blob",
                fixup.offset
            ),
        });
    }

    let references = manifest
        .references
        .iter()
        .chain(manifest.fixups.iter().map(|f| &f.reference));
    for reference in references {
        let group = reference.group;
        let bound = match reference.index {
            Some(index) => {
                index < table.size(group) && table.group_index_to_compact(group, index).is_some()
            }
            None => table.is_fully_used(group),
        };
        if !bound {
            return Err(VariantError::CompileFailed {
                stage,
                program: program.id(),
                message: format!(
                    "backend references {} {:?} outside the binding table",
                    group.name(),
                    reference.index
                ),
            });
        }
    }

    let code = resources::apply_fixups(&output.machine_code, &manifest.fixups, &table);
    debug!(
        "Compiled {stage} shader {} ({} bytes, {} part(s), {} binding table entries)",
        program.id(),
        code.len(),
        parts.len(),
        table.len()
    );

    Ok(CompiledVariant {
        header: VariantHeader {
            program: program.id(),
            key: *key,
            code,
            stats: output.stats,
            opt_level,
        },
        bindings: table,
        stage_info: StageInfo::new(info, key, &output.linkage),
    })
}
