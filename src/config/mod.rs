//! Project configuration management for `mailforge.toml`.
//!
//! # Sections
//!
//! | Section     | Purpose                                        |
//! |-------------|------------------------------------------------|
//! | `[build]`   | Source, data and output directories            |
//! | `[serve]`   | Preview server (interface, ports, watch)       |
//!
//! # Example
//!
//! ```toml
//! [build]
//! src = "src"
//! data = "data"
//! output = "output"
//!
//! [serve]
//! interface = "127.0.0.1"
//! port = 3000
//! reload_port = 35700
//! watch = true
//! ```

mod build;
pub mod defaults;
mod error;
mod serve;

pub use build::BuildConfig;
pub use error::ConfigError;
pub use serve::ServeConfig;

use crate::cli::{Cli, Commands};
use anyhow::{Result, bail};
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
};

/// Root configuration structure representing mailforge.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Preview server settings
    #[serde(default)]
    pub serve: ServeConfig,
}

impl ProjectConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: ProjectConfig = toml::from_str(content).map_err(ConfigError::Toml)?;
        Ok(config)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content)
    }

    /// Get the project root directory path
    pub fn get_root(&self) -> &Path {
        self.build.root.as_deref().unwrap_or(Path::new("./"))
    }

    /// Set the project root directory path
    pub fn set_root(&mut self, path: &Path) {
        self.build.root = Some(path.to_path_buf());
    }

    /// Overlay CLI arguments onto the loaded configuration and normalize
    /// every directory path to an absolute path under the project root.
    pub fn update_with_cli(&mut self, cli: &Cli) {
        let root = cli
            .root
            .clone()
            .unwrap_or_else(|| self.get_root().to_owned());
        let root = crate::paths::normalize_path(&root);

        self.set_root(&root);
        self.config_path = crate::paths::normalize_path(&root.join(&cli.config));

        // Apply CLI overrides first, then anchor everything to the root
        Self::update_option(&mut self.build.src, cli.src.as_ref());
        Self::update_option(&mut self.build.data, cli.data.as_ref());
        Self::update_option(&mut self.build.output, cli.output.as_ref());

        self.build.src = crate::paths::normalize_path(&root.join(&self.build.src));
        self.build.data = crate::paths::normalize_path(&root.join(&self.build.data));
        self.build.output = crate::paths::normalize_path(&root.join(&self.build.output));

        if let Commands::Serve {
            interface,
            port,
            reload_port,
            watch,
        } = &cli.command
        {
            Self::update_option(&mut self.serve.interface, interface.as_ref());
            Self::update_option(&mut self.serve.port, port.as_ref());
            Self::update_option(&mut self.serve.reload_port, reload_port.as_ref());
            Self::update_option(&mut self.serve.watch, watch.as_ref());
        }
    }

    /// Update config option if CLI value is provided
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Validate configuration before running
    pub fn validate(&self) -> Result<()> {
        if !self.build.src.is_dir() {
            bail!(ConfigError::Validation(format!(
                "[build.src] directory not found: {}",
                self.build.src.display()
            )));
        }

        if self.serve.interface.parse::<IpAddr>().is_err() {
            bail!(ConfigError::Validation(format!(
                "[serve.interface] is not a valid IP address: {}",
                self.serve.interface
            )));
        }

        if self.serve.port == self.serve.reload_port {
            bail!(ConfigError::Validation(
                "[serve.port] and [serve.reload_port] must differ".into()
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
