//! Error Types
//!
//! This module defines the error types used throughout the variant engine.
//!
//! # Overview
//!
//! The main error type [`VariantError`] covers all recoverable failure modes:
//! - Backend compilation failures (including resource budget overruns)
//! - Shader part construction failures
//! - Configuration and I/O errors surfaced by the public API
//!
//! Persistent-cache corruption and storage failures are deliberately *not*
//! represented here: they degrade to cache misses inside
//! [`PersistentCache`](crate::cache::PersistentCache) and never reach the
//! caller.
//!
//! Invariant violations (binding-table group overflow, composer signature
//! mismatches) are programmer errors in the IR producer and panic instead.
//!
//! # Usage
//!
//! ```rust,ignore
//! use myth_variants::errors::{VariantError, Result};
//!
//! fn draw(ctx: &mut PipelineContext) -> Result<()> {
//!     ctx.draw()?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::backend::BackendError;
use crate::parts::PartKind;
use crate::program::ProgramId;
use crate::stage::ShaderStage;

/// The main error type for the variant engine.
#[derive(Error, Debug, Clone)]
pub enum VariantError {
    // ========================================================================
    // Compilation Errors
    // ========================================================================
    /// The backend code generator rejected the program.
    #[error("Failed to compile {stage} shader for program {program}: {message}")]
    CompileFailed {
        stage: ShaderStage,
        program: ProgramId,
        message: String,
    },

    /// The backend needed more registers than the target provides, even after
    /// any reduced-optimization retry.
    #[error(
        "{stage} shader for program {program} exceeds the register budget ({needed} needed, {available} available)"
    )]
    ResourceBudgetExceeded {
        stage: ShaderStage,
        program: ProgramId,
        needed: u32,
        available: u32,
    },

    /// An earlier compile of the same program/key failed; the failure is
    /// remembered until the program or the key changes.
    #[error("{stage} shader for program {program} previously failed to compile: {message}")]
    PreviousCompileFailed {
        stage: ShaderStage,
        program: ProgramId,
        message: Arc<str>,
    },

    /// A prologue/epilogue part could not be built.
    #[error("Failed to build {kind:?} shader part: {message}")]
    PartBuildFailed { kind: PartKind, message: String },

    // ========================================================================
    // Binding Errors
    // ========================================================================
    /// A draw was issued without a program bound to a required stage.
    #[error("No program bound to the {0} stage")]
    MissingProgram(ShaderStage),

    // ========================================================================
    // Configuration & I/O Errors
    // ========================================================================
    /// Settings could not be parsed.
    #[error("Invalid compiler settings: {0}")]
    InvalidConfig(String),

    /// File I/O error while opening a persistent store.
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

// ============================================================================
// Convenient conversion implementations
// ============================================================================

impl From<std::io::Error> for VariantError {
    fn from(err: std::io::Error) -> Self {
        VariantError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for VariantError {
    fn from(err: serde_json::Error) -> Self {
        VariantError::InvalidConfig(err.to_string())
    }
}

impl VariantError {
    /// Converts a backend error for the given stage/program into a
    /// crate-level error.
    #[must_use]
    pub fn from_backend(stage: ShaderStage, program: ProgramId, err: BackendError) -> Self {
        match err {
            BackendError::Failed(message) => Self::CompileFailed {
                stage,
                program,
                message,
            },
            BackendError::RegisterBudget { needed, available } => Self::ResourceBudgetExceeded {
                stage,
                program,
                needed,
                available,
            },
        }
    }
}

/// Alias for `Result<T, VariantError>`.
pub type Result<T> = std::result::Result<T, VariantError>;
