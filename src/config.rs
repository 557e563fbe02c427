//! Runtime configuration for device-arbiter.
//!
//! Configuration is loaded from a JSON file (every field optional) and then
//! overridden by command-line flags. Lock layout, retry budgets, the
//! platform/device selection and the simulated inventory all live here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::backend::simulated::SimulatedInventory;
use crate::lock::retry::RetryPolicy;
use crate::lock::store::LockStore;
use crate::platform::registry::{RegistryOptions, DEFAULT_LOCK_PREFIX};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "device-arbiter",
    about = "Exclusive compute device arbitration between processes on one node"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "device-arbiter.json")]
    pub config: PathBuf,

    /// Platform key (amd, apple, intel, nvidia) or "default" for the first one.
    #[arg(short, long)]
    pub platform: Option<String>,

    /// Pin a device index instead of picking the best ranked device.
    #[arg(short, long)]
    pub device: Option<usize>,

    /// Disable file locking (devices are assigned by a queueing system).
    #[arg(long)]
    pub no_locking: bool,

    /// Directory holding the lock files.
    #[arg(long)]
    pub lock_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show every platform and its devices in order of preference.
    List {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Acquire a device and hold it until interrupted.
    Acquire,

    /// Acquire a device, run a command while holding it, then release it.
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lock files and lock retry budget.
    pub lock: LockConfig,

    /// Context establishment retry budget.
    pub context: ContextConfig,

    /// Which platform and device to use.
    pub selection: SelectionConfig,

    /// Platforms served by the simulated backend.
    pub inventory: SimulatedInventory,
}

/// Lock-file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Directory shared by every process on the node.
    pub dir: PathBuf,

    /// Lock-file name prefix.
    pub prefix: String,

    /// Use file locking at all.
    pub enabled: bool,

    /// Attempts before a held lock is reported busy.
    pub max_attempts: u32,

    /// Backoff window between attempts, in milliseconds.
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
            prefix: DEFAULT_LOCK_PREFIX.to_string(),
            enabled: true,
            max_attempts: 5,
            backoff_min_ms: 1_000,
            backoff_max_ms: 10_000,
        }
    }
}

impl LockConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_min_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn lock_store(&self) -> LockStore {
        LockStore::new(self.dir.clone(), self.prefix.clone(), self.retry_policy())
    }
}

/// Context establishment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_attempts: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_min_ms: 1_000,
            backoff_max_ms: 10_000,
        }
    }
}

impl ContextConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_min_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

/// Platform and device selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Platform key, or "default" for the first platform.
    pub platform: String,

    /// Pinned device index.
    pub device: Option<usize>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            platform: "default".to_string(),
            device: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults if the
    /// file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(platform) = &cli.platform {
            self.selection.platform = platform.clone();
        }
        if cli.device.is_some() {
            self.selection.device = cli.device;
        }
        if cli.no_locking {
            self.lock.enabled = false;
        }
        if let Some(dir) = &cli.lock_dir {
            self.lock.dir = dir.clone();
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            lock_store: self.lock.lock_store(),
            locking: self.lock.enabled,
            context_policy: self.context.retry_policy(),
        }
    }
}
