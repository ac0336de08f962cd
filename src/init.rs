//! Initialization for embedders and the CLI
//!
//! Loads configuration and installs the tracing subscriber. Call once before
//! building a [`Scheduler`](crate::scheduler::Scheduler).
//!
//! # Example
//!
//! ```rust,no_run
//! use shardscript_core::init::InitBuilder;
//!
//! let config = InitBuilder::new()
//!     .config_path("shardscript.toml")
//!     .init()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

static INIT_STATE: OnceLock<Config> = OnceLock::new();

/// Options for initializing the script core
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<PathBuf>,

    /// Log filter directives used when `RUST_LOG` is unset (overrides `logging.filter`)
    pub log_filter: Option<String>,

    /// Leave the global tracing subscriber alone
    pub skip_tracing: bool,
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.options.log_filter = Some(filter.into());
        self
    }

    pub fn skip_tracing(mut self, skip: bool) -> Self {
        self.options.skip_tracing = skip;
        self
    }

    pub fn init(self) -> Result<Config> {
        initialize(self.options)
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration and set up logging.
///
/// Calling this more than once returns the configuration from the first call.
pub fn initialize(options: InitOptions) -> Result<Config> {
    if let Some(config) = INIT_STATE.get() {
        return Ok(config.clone());
    }

    let mut builder = Config::builder();
    if let Some(path) = &options.config_path {
        builder = builder.config_path(path);
    }
    let config = builder.build().context("Failed to load configuration")?;

    if !options.skip_tracing {
        let directives = options
            .log_filter
            .clone()
            .unwrap_or_else(|| config.logging.filter.clone());
        init_tracing(&directives);
    }

    Ok(INIT_STATE.get_or_init(|| config).clone())
}

/// Install the fmt subscriber. `RUST_LOG` wins over `default_directives`.
/// A second install is a no-op.
pub fn init_tracing(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn is_initialized() -> bool {
    INIT_STATE.get().is_some()
}

/// The configuration from [`initialize`], if it has run
pub fn get_config() -> Option<&'static Config> {
    INIT_STATE.get()
}
