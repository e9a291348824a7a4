//! # Myth Variants
//!
//! A shader-variant compilation and caching engine.
//!
//! Programs arrive as backend-neutral IR plus static usage info. At draw time
//! the binder projects the live pipeline state onto a compact
//! [`PipelineStateKey`] per bound stage and returns the matching
//! [`CompiledVariant`], compiling it on demand:
//!
//! ```text
//! PipelineContext ─▶ VariantCache (per context)
//!                      └─▶ program registry (per program, shared)
//!                            └─▶ PersistentCache (content-addressed, on disk)
//!                                  └─▶ compiler: compact ─▶ parts ─▶ compose ─▶ backend
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use myth_variants::{CompilerSettings, Device, DirectoryBlobStore, ShaderStage};
//!
//! let store = Arc::new(DirectoryBlobStore::open("shader-cache")?);
//! let device = Device::new(CompilerSettings::default(), backend, Some(store));
//!
//! let vs = device.create_program(vs_ir, vs_info);
//! let fs = device.create_program(fs_ir, fs_info);
//!
//! let mut ctx = device.create_context();
//! ctx.bind_program(ShaderStage::Vertex, Some(vs));
//! ctx.bind_program(ShaderStage::Fragment, Some(fs));
//! ctx.update_state(|s| s.set_blend_color([0.0, 0.0, 0.0, 1.0]));
//! ctx.draw()?;
//!
//! let dirty = ctx.take_dirty();
//! ```

pub mod backend;
pub mod cache;
pub mod compiler;
pub mod compose;
pub mod context;
pub mod device;
pub mod errors;
pub mod ir;
pub mod key;
pub mod parts;
pub mod program;
pub mod resources;
pub mod settings;
pub mod stage;
pub mod state;
pub mod variant;

pub use backend::{BackendError, BackendOutput, CodeGenerator, OptLevel};
pub use cache::{BlobStore, CacheHash, DirectoryBlobStore, MemoryBlobStore, PersistentCache};
pub use context::{ContextStats, DirtyFlags, PipelineContext};
pub use device::Device;
pub use errors::{Result, VariantError};
pub use ir::ShaderIr;
pub use key::PipelineStateKey;
pub use program::{ProgramId, ShaderInfo, ShaderProgram};
pub use resources::{BindingTable, SurfaceGroup};
pub use settings::{CompilerSettings, DebugFlags};
pub use stage::ShaderStage;
pub use state::{PipelineState, StateGroup};
pub use variant::{CompiledVariant, VariantSource};
