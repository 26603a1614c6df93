// config.rs — Runtime configuration
//
// `SimConfig` gathers the knobs a session needs before compiling anything:
// the default tick length, the preferred backend, and the native toolchain
// settings. Every field has a default, so an empty JSON object is valid.
//
// Preconditions: none.
// Postconditions: a loaded config has a positive, finite `dt`.
// Failure modes: `ConfigError` on unreadable files, malformed JSON, bad `dt`.
// Side effects: `load` reads the filesystem; `with_env` reads `EQSIM_CC`;
//               `available_backends` probes the toolchain.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codeobject::Backend;
use crate::native::NativeToolchain;

/// Environment variable that overrides the C++ compiler command.
pub const CC_ENV: &str = "EQSIM_CC";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("dt must be positive and finite, got {0}")]
    InvalidDt(f64),
}

// ── Toolchain ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub cc: String,
    pub cflags: Vec<String>,
    pub cache_dir: PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            cc: "c++".to_string(),
            cflags: ["-O2", "-ffp-contract=off", "-std=c++17"]
                .into_iter()
                .map(String::from)
                .collect(),
            cache_dir: std::env::temp_dir().join("eqsim-cache"),
        }
    }
}

// ── Session config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Tick length in seconds.
    pub dt: f64,
    pub backend: Backend,
    pub toolchain: ToolchainConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            dt: 1e-4,
            backend: Backend::Interpreted,
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(text)?;
        config.validate()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Apply `EQSIM_CC` from the process environment.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(cc) = lookup(CC_ENV).filter(|cc| !cc.trim().is_empty()) {
            self.toolchain.cc = cc;
        }
        self
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.dt.is_finite() && self.dt > 0.0 {
            Ok(self)
        } else {
            Err(ConfigError::InvalidDt(self.dt))
        }
    }

    /// The native toolchain, if one can be found on this host.
    pub fn toolchain(&self) -> Option<NativeToolchain> {
        NativeToolchain::detect(&self.toolchain)
    }

    pub fn available_backends(&self) -> Vec<Backend> {
        let native = self.toolchain().is_some();
        Backend::ALL
            .into_iter()
            .filter(|b| *b == Backend::Interpreted || native)
            .collect()
    }
}
