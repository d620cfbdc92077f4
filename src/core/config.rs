//! Configuration management

use clap::{Parser, Subcommand};
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::plugin::scheduler::RetryPolicy;
use crate::plugin::types::ModuleLayout;

/// Library name fragments that are never modules
pub const DEFAULT_DENY_LIST: &[&str] = &[
    "wasi_snapshot",
    "wasi-libc",
    "wasi_libc",
    "compiler_builtins",
    "wasm-bindgen",
    "wasm_bindgen",
    "emscripten",
    "libstd",
    "modswitch-host",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid modules configuration: {0}")]
    InvalidModules(String),

    #[error("Invalid retry configuration: {0}")]
    InvalidRetry(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub modules: ModulesConfig,
    pub retry: RetryConfig,
    pub host: HostConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Example: MODSWITCH_RETRY__MAX_ATTEMPTS=5
        builder = builder.add_source(
            Environment::with_prefix("MODSWITCH")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(root) = &cli_args.root {
            builder = builder.set_override("modules.root_dir", root.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.modules.validate()?;
        self.retry.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Ok(builder
        .set_default("modules.root_dir", ".")?
        .set_default("modules.extension", "wasm")?
        .set_default("modules.disabled_suffix", "disabled")?
        .set_default("modules.deny_list", DEFAULT_DENY_LIST.to_vec())?
        .set_default("retry.grace_period_ms", 1000)?
        .set_default("retry.max_attempts", 3)?
        .set_default("retry.attempt_interval_ms", 250)?
        .set_default("host.preload", true)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")?)
}

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "modswitch")]
#[command(about = "Discover WebAssembly extension modules and switch them on or off", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Root directory containing the `modules` folder
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// List every module found under the root
    List {
        /// Print records as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Enable a disabled module or disable an enabled one
    Toggle {
        /// Module key (file name without extension)
        module: String,
    },
    /// Show toggles waiting for a file lock to be released
    Pending,
    /// Load active modules and accept JSON commands on stdin
    Serve,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModulesConfig {
    pub root_dir: PathBuf,
    pub extension: String,
    pub disabled_suffix: String,
    pub deny_list: Vec<String>,
}

impl ModulesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidModules("root_dir cannot be empty".to_string()));
        }

        if self.extension.is_empty() || self.extension.contains('.') {
            return Err(ConfigError::InvalidModules(
                "extension must be a non-empty name without dots".to_string(),
            ));
        }

        if self.disabled_suffix.is_empty() || self.disabled_suffix.contains('.') {
            return Err(ConfigError::InvalidModules(
                "disabled_suffix must be a non-empty name without dots".to_string(),
            ));
        }

        if self.extension.eq_ignore_ascii_case(&self.disabled_suffix) {
            return Err(ConfigError::InvalidModules(
                "disabled_suffix must differ from extension".to_string(),
            ));
        }

        Ok(())
    }

    pub fn layout(&self) -> ModuleLayout {
        ModuleLayout::new(
            self.root_dir.join("modules"),
            self.extension.clone(),
            self.disabled_suffix.clone(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub grace_period_ms: u64,
    pub max_attempts: u32,
    pub attempt_interval_ms: u64,
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry("max_attempts must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            grace_period: Duration::from_millis(self.grace_period_ms),
            max_attempts: self.max_attempts,
            attempt_interval: Duration::from_millis(self.attempt_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Load every active module into the host when serving
    pub preload: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        // stdout carries the command surface, so logs never go there
        let valid_outputs = ["stderr", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        Ok(())
    }
}
