//! Configuration
//!
//! Layered in this order, later layers winning:
//! 1. built-in defaults
//! 2. a TOML file: the explicit builder path, else `SHARDSCRIPT_CONFIG_PATH`,
//!    else `shardscript.toml` in the working directory if it exists
//! 3. `SHARDSCRIPT__<SECTION>__<KEY>` environment variables
//!
//! `.env` is loaded with `dotenvy` before the environment is read.
//!
//! ```toml
//! [scheduler]
//! default_event_queue_size = 20
//! runaway_script_threshold = 5000
//! max_runaway_cycles = 1000000
//!
//! [logging]
//! filter = "shardscript_core=debug"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "SHARDSCRIPT_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "shardscript.toml";
const ENV_PREFIX: &str = "SHARDSCRIPT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
}

/// Scheduler and executor defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Event queue bound for new bytecode executors
    pub default_event_queue_size: usize,
    pub default_priority: u8,
    /// Instructions per slice are `priority / priority_divide`, at least one
    pub priority_divide: u32,
    /// Cycles without blocking before a runaway warning
    pub runaway_script_threshold: u64,
    /// Terminate non-critical scripts past this many runaway cycles
    pub max_runaway_cycles: Option<u64>,
    pub profile_scripts: bool,
    pub profile_min_cycles: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_event_queue_size: 20,
            default_priority: 1,
            priority_divide: 1,
            runaway_script_threshold: 5000,
            max_runaway_cycles: None,
            profile_scripts: false,
            profile_min_cycles: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Simulated server loop used by the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Clock advance per tick, in milliseconds
    pub tick_ms: u64,
    /// Upper bound on a single idle wait
    pub idle_clocks: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            idle_clocks: 1000,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default locations
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;
        if scheduler.default_event_queue_size == 0 {
            bail!("scheduler.default_event_queue_size must be at least 1");
        }
        if scheduler.runaway_script_threshold == 0 {
            bail!("scheduler.runaway_script_threshold must be at least 1");
        }
        if scheduler.priority_divide == 0 {
            bail!("scheduler.priority_divide must be at least 1");
        }
        if self.server.tick_ms == 0 {
            bail!("server.tick_ms must be at least 1");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigBuilder {
    /// Read this file instead of searching; it must exist
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Ignore `.env` and environment overrides
    pub fn skip_env(mut self, skip: bool) -> Self {
        self.skip_env = skip;
        self
    }

    pub fn build(self) -> Result<Config> {
        if !self.skip_env {
            // Missing .env is fine
            let _ = dotenvy::dotenv();
        }

        let mut builder = config::Config::builder();

        let explicit = self.config_path.or_else(|| {
            if self.skip_env {
                None
            } else {
                std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from)
            }
        });
        match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                builder = builder.add_source(file_source(&path).required(true));
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                builder = builder.add_source(file_source(path).required(false));
            }
        }

        if !self.skip_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn file_source(path: &Path) -> config::File<config::FileSourceFile, config::FileFormat> {
    config::File::from(path).format(config::FileFormat::Toml)
}
