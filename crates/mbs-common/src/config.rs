//! ---
//! mbs_section: "01-core-functionality"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Shared configuration and tracing setup."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Reference pool size for the membarrier stressor.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Upper bound accepted for `workers.count`.
pub const MAX_WORKER_COUNT: usize = 64;

/// Upper bound accepted for a non-zero `workers.alt_stack_size`.
pub const MAX_ALT_STACK_SIZE: usize = 16 * 1024 * 1024;

fn default_instance() -> String {
    "membarrier".to_owned()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_enabled() -> bool {
    true
}

/// Primary configuration object for a stress run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    /// Instance name used to prefix every log message.
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where a [`StressConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedStressConfig {
    pub config: StressConfig,
    /// `None` when no file was found and defaults were used.
    pub source: Option<PathBuf>,
}

impl StressConfig {
    pub const ENV_CONFIG_PATH: &str = "MBS_CONFIG";

    /// Load configuration from disk, respecting the `MBS_CONFIG` override.
    ///
    /// Unlike the env override, missing candidates are not an error: the
    /// stressor is fully usable on defaults.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedStressConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedStressConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedStressConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedStressConfig {
            config: Self::default(),
            source: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<StressConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.instance.trim().is_empty() {
            return Err(anyhow!("instance name cannot be empty"));
        }
        self.workers.validate()?;
        self.run.validate()?;
        Ok(())
    }
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            run: RunConfig::default(),
            workers: WorkerConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for StressConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: StressConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Budget limiting how long the stressor keeps going.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Bogo-op budget; `0` leaves the run unbounded by count.
    #[serde(default)]
    pub ops: u64,
    /// Wall-clock budget; zero leaves the run unbounded by time.
    #[serde(default = "default_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl RunConfig {
    pub fn max_ops(&self) -> Option<u64> {
        (self.ops > 0).then_some(self.ops)
    }

    pub fn deadline(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_ops().is_none() && self.deadline().is_none() {
            return Err(anyhow!(
                "run must be bounded: set run.ops or run.timeout to a non-zero value"
            ));
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ops: 0,
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Alternate signal stack size in bytes; `0` selects the platform minimum.
    #[serde(default)]
    pub alt_stack_size: usize,
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 || self.count > MAX_WORKER_COUNT {
            return Err(anyhow!(
                "workers.count must be between 1 and {} (got {})",
                MAX_WORKER_COUNT,
                self.count
            ));
        }
        if self.alt_stack_size != 0
            && !(libc::MINSIGSTKSZ..=MAX_ALT_STACK_SIZE).contains(&self.alt_stack_size)
        {
            return Err(anyhow!(
                "workers.alt_stack_size must be 0 or between {} and {} bytes (got {})",
                libc::MINSIGSTKSZ,
                MAX_ALT_STACK_SIZE,
                self.alt_stack_size
            ));
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            alt_stack_size: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Mirror events into a daily rolling file under `directory`.
    #[serde(default)]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Prometheus text exposition written once the run completes.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            output: None,
        }
    }
}
