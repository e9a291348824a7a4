//! Shader Parts
//!
//! Prologues and epilogues adapt a main body to state that does not deserve
//! a full recompile: vertex fetch indices, tessellation factor writes,
//! geometry input reordering, color interpolation and color export. Each
//! part is keyed by a narrow [`PartKey`] holding only the bits its code
//! depends on, so a handful of parts serves many full variants.
//!
//! The [`PartLibrary`] is owned by the device and shared by every context.
//! It only grows: parts are immutable once built and never evicted.

pub mod builders;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::backend::PartBinary;
use crate::compose::{ArgLayout, FunctionUnit};
use crate::errors::Result;
use crate::key::StageKey;
use crate::program::ShaderInfo;
use crate::state::{CompareFunc, TessPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartKind {
    VertexPrologue,
    TessControlEpilogue,
    GeometryPrologue,
    FragmentPrologue,
    FragmentEpilogue,
}

impl PartKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::VertexPrologue => "vs_prolog",
            Self::TessControlEpilogue => "tcs_epilog",
            Self::GeometryPrologue => "gs_prolog",
            Self::FragmentPrologue => "ps_prolog",
            Self::FragmentEpilogue => "ps_epilog",
        }
    }
}

// ─── Part Keys ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VsPrologKey {
    pub num_inputs: u8,
    pub divisor_is_one: u16,
    pub divisor_is_fetched: u16,
    pub layout: ArgLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcsEpilogKey {
    pub prim_mode: TessPrimitive,
    pub tes_reads_tess_factors: bool,
    pub layout: ArgLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GsPrologKey {
    pub tri_strip_adj_fix: bool,
    pub layout: ArgLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PsPrologKey {
    pub colors_read: u8,
    pub color_two_side: bool,
    pub flat_shade: bool,
    pub force_persample_interp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PsEpilogKey {
    pub spi_format: u32,
    pub color_is_int8: u8,
    pub last_cbuf: u8,
    pub alpha_func: CompareFunc,
    pub clamp_color: bool,
    pub color_outputs_written: u8,
    pub writes_depth: bool,
}

/// The narrow key of one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartKey {
    VertexPrologue(VsPrologKey),
    TessControlEpilogue(TcsEpilogKey),
    GeometryPrologue(GsPrologKey),
    FragmentPrologue(PsPrologKey),
    FragmentEpilogue(PsEpilogKey),
}

impl PartKey {
    #[must_use]
    pub fn kind(&self) -> PartKind {
        match self {
            Self::VertexPrologue(_) => PartKind::VertexPrologue,
            Self::TessControlEpilogue(_) => PartKind::TessControlEpilogue,
            Self::GeometryPrologue(_) => PartKind::GeometryPrologue,
            Self::FragmentPrologue(_) => PartKind::FragmentPrologue,
            Self::FragmentEpilogue(_) => PartKind::FragmentEpilogue,
        }
    }
}

/// Parts surrounding one main body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartPlan {
    pub prolog: Option<PartKey>,
    pub epilog: Option<PartKey>,
}

/// Selects the parts a main body needs under `key`.
///
/// `layout` is the register layout the body is compiled for; parts inherit
/// it so their signatures line up with the body's.
#[must_use]
pub fn plan_parts(info: &ShaderInfo, key: &StageKey, layout: ArgLayout) -> PartPlan {
    match key {
        StageKey::Vertex(vs) => PartPlan {
            prolog: (vs.prolog_num_inputs > 0).then_some(PartKey::VertexPrologue(VsPrologKey {
                num_inputs: vs.prolog_num_inputs,
                divisor_is_one: vs.prolog_divisor_is_one,
                divisor_is_fetched: vs.prolog_divisor_is_fetched,
                layout,
            })),
            epilog: None,
        },
        StageKey::TessControl(tcs) => PartPlan {
            prolog: None,
            epilog: Some(PartKey::TessControlEpilogue(TcsEpilogKey {
                prim_mode: tcs.tes_primitive_mode,
                tes_reads_tess_factors: tcs.tes_reads_tess_factors,
                layout,
            })),
        },
        StageKey::Geometry(gs) => PartPlan {
            prolog: gs
                .prolog_tri_strip_adj_fix
                .then_some(PartKey::GeometryPrologue(GsPrologKey {
                    tri_strip_adj_fix: true,
                    layout,
                })),
            epilog: None,
        },
        StageKey::Fragment(fs) => {
            let needs_prolog = (info.colors_read != 0 && (fs.color_two_side || fs.flat_shade))
                || fs.persample_interp;
            PartPlan {
                prolog: needs_prolog.then_some(PartKey::FragmentPrologue(PsPrologKey {
                    colors_read: info.colors_read,
                    color_two_side: fs.color_two_side,
                    flat_shade: fs.flat_shade,
                    force_persample_interp: fs.persample_interp,
                })),
                epilog: Some(PartKey::FragmentEpilogue(PsEpilogKey {
                    spi_format: fs.epilog_spi_format,
                    color_is_int8: fs.epilog_color_is_int8,
                    last_cbuf: fs.epilog_last_cbuf,
                    alpha_func: fs.alpha_test_func,
                    clamp_color: fs.clamp_fragment_color,
                    color_outputs_written: info.color_outputs_written,
                    writes_depth: info.writes_depth,
                })),
            }
        }
        StageKey::TessEval(_) | StageKey::Compute(_) => PartPlan::default(),
    }
}

// ─── Parts ───────────────────────────────────────────────────────────────────

/// An immutable compiled part.
#[derive(Debug)]
pub struct ShaderPart {
    pub kind: PartKind,
    pub key: PartKey,
    /// Source unit, copied into every executable that uses the part.
    pub unit: FunctionUnit,
    pub binary: PartBinary,
}

#[derive(Default)]
struct PartSlot {
    part: Mutex<Option<Arc<ShaderPart>>>,
}

/// Device-wide, append-only part cache.
#[derive(Default)]
pub struct PartLibrary {
    slots: Mutex<FxHashMap<(PartKind, PartKey), Arc<PartSlot>>>,
    builds: AtomicU64,
    hits: AtomicU64,
}

impl PartLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the part for `(kind, key)`, running `build` if it does not
    /// exist yet.
    ///
    /// Concurrent callers asking for the same pair wait for a single build
    /// and all receive the same `Arc`. Callers asking for other pairs are not
    /// blocked by it. A failed build leaves nothing behind, so a later request
    /// tries again.
    ///
    /// # Panics
    /// Panics if `key` is not of kind `kind`.
    pub fn get_or_build_part<F>(
        &self,
        kind: PartKind,
        key: &PartKey,
        build: F,
    ) -> Result<Arc<ShaderPart>>
    where
        F: FnOnce() -> Result<ShaderPart>,
    {
        assert_eq!(key.kind(), kind, "part key does not match part kind");

        let slot = self
            .slots
            .lock()
            .entry((kind, *key))
            .or_default()
            .clone();

        let mut part = slot.part.lock();
        if let Some(existing) = part.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(existing.clone());
        }

        let built = Arc::new(build()?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Built {} part ({} bytes): {:?}",
            kind.name(),
            built.binary.code.len(),
            key
        );
        *part = Some(built.clone());
        Ok(built)
    }

    /// Number of parts built so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.part.lock().is_some())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}
