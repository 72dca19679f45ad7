//! # Co-simulation Configuration
//!
//! Hierarchical configuration for co-simulation links.
//!
//! ## Features
//! - **Layered sources**: defaults, a YAML file, then `COSIM_*` environment overrides
//! - **Validation**: every loaded configuration is checked before use
//! - **Human-friendly durations**: `"500ns"`, `"2us"`, `"1ms"` via humantime

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod link;
mod telemetry;
pub mod validation;

pub use error::ConfigError;
pub use link::{LinkConfig, MAX_TRUNK_PORTS};
pub use telemetry::TelemetryConfig;

/// Top-level configuration for one co-simulation endpoint.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq)]
pub struct CosimConfig {
    /// The channel to the peer simulator.
    #[validate(nested)]
    #[serde(default)]
    pub link: LinkConfig,

    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl CosimConfig {
    /// Load configuration from defaults and environment only.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `COSIM_*` environment variables (`COSIM_LINK__SOCKET_PATH=...`)
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(CosimConfig::default())))
    }

    /// Load configuration from a YAML file layered over the defaults, with
    /// environment overrides on top.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        Self::extract(
            Figment::from(Serialized::defaults(CosimConfig::default())).merge(Yaml::file(path)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed("COSIM_").split("__"))
            .extract()?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        self.link.check()
    }
}
