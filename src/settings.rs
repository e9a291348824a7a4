//! Compiler Settings
//!
//! Device-wide configuration of the variant engine, fixed when the
//! [`Device`](crate::device::Device) is created.
//!
//! # Fields
//!
//! | Field                           | Description                                   | Default |
//! |---------------------------------|-----------------------------------------------|---------|
//! | `binding_table_compaction`      | Compact resource slots; off = identity table  | `true`  |
//! | `persistent_cache`              | Use the persistent store, if one is given     | `true`  |
//! | `persistent_cache_max_errors`   | Consecutive store errors before disabling     | `8`     |
//! | `retry_with_lower_optimization` | Retry register budget overruns once           | `true`  |
//! | `merge_stages`                  | Compile LS+HS and ES+GS as one unit           | `false` |
//! | `debug`                         | Diagnostic logging switches                   | empty   |
//!
//! # Sources
//!
//! ```rust,ignore
//! let mut settings = CompilerSettings::from_json(r#"{ "merge_stages": true }"#)?;
//! settings.apply_env_overrides();
//! ```
//!
//! Environment overrides:
//!
//! - `MYTH_VARIANTS_DISABLE_COMPACTION=1`
//! - `MYTH_VARIANTS_NO_DISK_CACHE=1`
//! - `MYTH_VARIANTS_DEBUG=bt,recompile,cache` (comma list, `all` for everything)

use bitflags::bitflags;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, VariantError};

pub const ENV_DISABLE_COMPACTION: &str = "MYTH_VARIANTS_DISABLE_COMPACTION";
pub const ENV_NO_DISK_CACHE: &str = "MYTH_VARIANTS_NO_DISK_CACHE";
pub const ENV_DEBUG: &str = "MYTH_VARIANTS_DEBUG";

bitflags! {
    /// Diagnostic output switches.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct DebugFlags: u32 {
        /// Dump every new binding table at `debug!`.
        const BINDING_TABLES = 1 << 0;
        /// Report recompiles of an already compiled program with a key diff.
        const RECOMPILES     = 1 << 1;
        /// Log variant, registry and persistent cache hits and misses.
        const CACHE          = 1 << 2;
    }
}

impl DebugFlags {
    /// Parses a comma-separated list of flag names.
    ///
    /// Unknown names are reported and skipped.
    #[must_use]
    pub fn parse_list(list: &str) -> Self {
        let mut flags = Self::empty();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name.to_ascii_lowercase().as_str() {
                "bt" | "binding_tables" => flags |= Self::BINDING_TABLES,
                "recompile" | "recompiles" | "perf" => flags |= Self::RECOMPILES,
                "cache" => flags |= Self::CACHE,
                "all" => flags = Self::all(),
                other => warn!("Ignoring unknown debug flag `{other}`"),
            }
        }
        flags
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// When `false` every declared slot of every group is kept, which is
    /// useful to rule out compaction bugs.
    pub binding_table_compaction: bool,
    pub persistent_cache: bool,
    /// `0` keeps the persistent cache enabled regardless of errors.
    pub persistent_cache_max_errors: u32,
    pub retry_with_lower_optimization: bool,
    pub merge_stages: bool,
    pub debug: DebugFlags,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            binding_table_compaction: true,
            persistent_cache: true,
            persistent_cache_max_errors: 8,
            retry_with_lower_optimization: true,
            merge_stages: false,
            debug: DebugFlags::empty(),
        }
    }
}

impl CompilerSettings {
    /// Parses settings from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| VariantError::InvalidConfig(e.to_string()))
    }

    /// Applies the `MYTH_VARIANTS_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if lookup(ENV_DISABLE_COMPACTION).is_some_and(|v| is_truthy(&v)) {
            self.binding_table_compaction = false;
        }
        if lookup(ENV_NO_DISK_CACHE).is_some_and(|v| is_truthy(&v)) {
            self.persistent_cache = false;
        }
        if let Some(list) = lookup(ENV_DEBUG) {
            self.debug |= DebugFlags::parse_list(&list);
        }
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings = CompilerSettings::from_json(r#"{ "merge_stages": true }"#).unwrap();
        assert!(settings.merge_stages);
        assert!(settings.binding_table_compaction);
        assert_eq!(settings.persistent_cache_max_errors, 8);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = CompilerSettings::from_json("{ nope").unwrap_err();
        assert!(matches!(err, VariantError::InvalidConfig(_)));
    }

    #[test]
    fn test_overrides() {
        let mut settings = CompilerSettings::default();
        settings.apply_overrides(|name| match name {
            ENV_DISABLE_COMPACTION => Some("1".into()),
            ENV_NO_DISK_CACHE => Some("off".into()),
            ENV_DEBUG => Some("bt, cache,bogus".into()),
            _ => None,
        });
        assert!(!settings.binding_table_compaction);
        assert!(settings.persistent_cache);
        assert_eq!(settings.debug, DebugFlags::BINDING_TABLES | DebugFlags::CACHE);
    }

    #[test]
    fn test_parse_all() {
        assert_eq!(DebugFlags::parse_list("all"), DebugFlags::all());
        assert_eq!(DebugFlags::parse_list(""), DebugFlags::empty());
    }
}
