//! FFU engine configuration.
//!
//! Loaded from TOML. Default location: /etc/sonic/ffu.conf
//!
//! ```toml
//! [geometry]
//! slice_count = 32
//! rules_per_slice = 1024
//! egress_chunks = 32
//!
//! [cache]
//! enabled = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{FfuError, FfuResult};
use crate::regs;

/// Hardware geometry of the slice bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Number of TCAM/SRAM slices
    #[serde(default = "default_slice_count")]
    pub slice_count: usize,

    /// TCAM depth of each slice
    #[serde(default = "default_rules_per_slice")]
    pub rules_per_slice: usize,

    /// Number of egress ACL chunks gated by the master-valid register
    #[serde(default = "default_egress_chunks")]
    pub egress_chunks: usize,
}

/// Register cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Serve reads from the shadow copy and skip unchanged writes
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
}

/// Complete FFU configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfuConfig {
    #[serde(default)]
    pub geometry: GeometryConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_slice_count() -> usize {
    32
}

fn default_rules_per_slice() -> usize {
    1024
}

fn default_egress_chunks() -> usize {
    32
}

fn default_cache_enabled() -> bool {
    true
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            slice_count: default_slice_count(),
            rules_per_slice: default_rules_per_slice(),
            egress_chunks: default_egress_chunks(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
        }
    }
}

impl FfuConfig {
    /// Default configuration file location.
    pub const DEFAULT_PATH: &'static str = "/etc/sonic/ffu.conf";

    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> FfuResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    FfuError::config(
                        path.display().to_string(),
                        format!("failed to parse: {}", e),
                    )
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "FFU config not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(FfuError::config(path.display().to_string(), e.to_string())),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> FfuResult<Self> {
        Self::load_or_default(Self::DEFAULT_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> FfuResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| FfuError::config("ffu", format!("failed to serialize: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| FfuError::config(path.display().to_string(), e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> FfuResult<()> {
        let g = &self.geometry;

        if g.slice_count == 0 || g.slice_count > regs::MAX_SLICES {
            return Err(FfuError::config(
                "geometry.slice_count",
                format!("must be 1-{}", regs::MAX_SLICES),
            ));
        }

        if g.rules_per_slice == 0 || g.rules_per_slice > regs::MAX_RULES_PER_SLICE {
            return Err(FfuError::config(
                "geometry.rules_per_slice",
                format!("must be 1-{}", regs::MAX_RULES_PER_SLICE),
            ));
        }

        if g.egress_chunks > regs::MAX_EGRESS_CHUNKS {
            return Err(FfuError::config(
                "geometry.egress_chunks",
                format!("must be at most {}", regs::MAX_EGRESS_CHUNKS),
            ));
        }

        Ok(())
    }
}
