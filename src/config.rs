//! Configuration: `.shipfill/shipfill.toml`, environment, CLI flags.
//!
//! Every field has a serde default, so an empty or missing file is a valid
//! configuration. Settings are layered file → environment → CLI.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::inspect::Tolerance;
use crate::pipeline::{PipelineSettings, PollPolicy};
use crate::reconcile::{ConvergenceMode, ReconcileSettings};

pub const CONFIG_DIR: &str = ".shipfill";
pub const CONFIG_FILE: &str = "shipfill.toml";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

/// Polling and timing for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Interval between conveyor status polls.
    #[serde(default = "default_arrival_poll_ms")]
    pub arrival_poll_ms: u64,
    /// Give up waiting for arrival after this many polls. Unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival_max_polls: Option<u32>,
    #[serde(default = "default_dispatch_retry_ms")]
    pub dispatch_retry_ms: u64,
    /// Unbounded when unset; dispatch is retried until acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_max_attempts: Option<u32>,
    #[serde(default = "default_order_poll_ms")]
    pub order_poll_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_max_polls: Option<u32>,
    /// Nominal run budget. Exceeding it is reported, never enforced.
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,
    /// Log a progress line every this many unsuccessful polls.
    #[serde(default = "default_report_every")]
    pub report_every: u32,
}

fn default_arrival_poll_ms() -> u64 {
    100
}

fn default_dispatch_retry_ms() -> u64 {
    500
}

fn default_order_poll_ms() -> u64 {
    500
}

fn default_time_budget_secs() -> u64 {
    500
}

fn default_report_every() -> u32 {
    10
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            arrival_poll_ms: default_arrival_poll_ms(),
            arrival_max_polls: None,
            dispatch_retry_ms: default_dispatch_retry_ms(),
            dispatch_max_attempts: None,
            order_poll_ms: default_order_poll_ms(),
            order_max_polls: None,
            time_budget_secs: default_time_budget_secs(),
            report_every: default_report_every(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSection {
    #[serde(default)]
    pub convergence: ConvergenceMode,
    /// Extra attempts per actuator call. Zero fails on the first error.
    #[serde(default)]
    pub actuation_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write logs to this file (relative to the project directory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
            file: None,
        }
    }
}

/// The complete shipfill.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipfillToml {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub reconcile: ReconcileSection,
    /// Match tolerances used by the simulated inspection oracle.
    #[serde(default)]
    pub inspection: Tolerance,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ShipfillToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse shipfill.toml")
    }

    /// Load `shipfill.toml` from `config_dir`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize shipfill.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        let p = &self.pipeline;
        PipelineSettings {
            arrival: PollPolicy::every(Duration::from_millis(p.arrival_poll_ms))
                .bounded(p.arrival_max_polls)
                .reporting_every(p.report_every),
            dispatch: PollPolicy::every(Duration::from_millis(p.dispatch_retry_ms))
                .bounded(p.dispatch_max_attempts)
                .reporting_every(p.report_every),
            time_budget: Duration::from_secs(p.time_budget_secs),
        }
    }

    pub fn order_policy(&self) -> PollPolicy {
        PollPolicy::every(Duration::from_millis(self.pipeline.order_poll_ms))
            .bounded(self.pipeline.order_max_polls)
            .reporting_every(self.pipeline.report_every)
    }

    /// Check the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let p = &self.pipeline;

        for (name, ms) in [
            ("arrival_poll_ms", p.arrival_poll_ms),
            ("dispatch_retry_ms", p.dispatch_retry_ms),
            ("order_poll_ms", p.order_poll_ms),
        ] {
            if ms == 0 {
                warnings.push(format!("{} is 0: polling will spin without pausing", name));
            }
        }

        for (name, bound) in [
            ("arrival_max_polls", p.arrival_max_polls),
            ("dispatch_max_attempts", p.dispatch_max_attempts),
            ("order_max_polls", p.order_max_polls),
        ] {
            if bound == Some(0) {
                warnings.push(format!("{} is 0: at least one attempt is always made", name));
            }
        }

        if p.time_budget_secs == 0 {
            warnings.push("time_budget_secs is 0: every run will be reported over budget".into());
        }

        if self.inspection.position <= 0.0 || self.inspection.orientation <= 0.0 {
            warnings.push(format!(
                "Inspection tolerances must be positive (position = {}, orientation = {})",
                self.inspection.position, self.inspection.orientation
            ));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging level '{}': expected a filter such as 'info' or 'shipfill=debug'",
                self.logging.level
            ));
        }

        warnings
    }
}

/// Configuration with environment and CLI overrides applied.
#[derive(Debug, Clone)]
pub struct ShipfillConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: ShipfillToml,
    pub verbose: bool,
    cli_convergence: Option<ConvergenceMode>,
    cli_log_format: Option<LogFormat>,
}

impl ShipfillConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = ShipfillToml::load_or_default(&config_dir)?;

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
            cli_convergence: None,
            cli_log_format: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        convergence: Option<ConvergenceMode>,
        log_format: Option<LogFormat>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_convergence = convergence;
        config.cli_log_format = log_format;
        Ok(config)
    }

    /// CLI → `SHIPFILL_CONVERGENCE` → file.
    pub fn convergence(&self) -> ConvergenceMode {
        self.cli_convergence
            .or_else(|| env_override("SHIPFILL_CONVERGENCE"))
            .unwrap_or(self.toml.reconcile.convergence)
    }

    /// CLI → `SHIPFILL_LOG_FORMAT` → file.
    pub fn log_format(&self) -> LogFormat {
        self.cli_log_format
            .or_else(|| env_override("SHIPFILL_LOG_FORMAT"))
            .unwrap_or(self.toml.logging.format)
    }

    pub fn log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.toml.logging.level
        }
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.toml
            .logging
            .file
            .as_ref()
            .map(|file| self.project_dir.join(file))
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            convergence: self.convergence(),
            actuation_retries: self.toml.reconcile.actuation_retries,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        self.toml.pipeline_settings()
    }

    pub fn order_policy(&self) -> PollPolicy {
        self.toml.order_policy()
    }

    pub fn tolerance(&self) -> Tolerance {
        self.toml.inspection
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.config_dir.join("audit")
    }

    /// File warnings plus unusable environment overrides.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        for (var, valid) in [
            ("SHIPFILL_CONVERGENCE", "staged, full"),
            ("SHIPFILL_LOG_FORMAT", "pretty, json"),
        ] {
            if let Ok(value) = std::env::var(var) {
                let parses = match var {
                    "SHIPFILL_CONVERGENCE" => value.parse::<ConvergenceMode>().is_ok(),
                    _ => value.parse::<LogFormat>().is_ok(),
                };
                if !parses {
                    warnings.push(format!(
                        "Ignoring {}='{}'. Valid values: {}",
                        var, value, valid
                    ));
                }
            }
        }
        warnings
    }
}

/// Parse an environment override, ignoring unset or unparsable values.
fn env_override<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}
