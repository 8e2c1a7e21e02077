//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `run`     | `Run`            |
//! | `inspect` | `Inspect`        |
//! | `config`  | `Config`         |

pub mod config;
pub mod inspect;
pub mod run;

pub use config::cmd_config;
pub use inspect::cmd_inspect;
pub use run::cmd_run;

use anyhow::Result;
use shipfill::config::ShipfillConfig;
use tracing_appender::non_blocking::WorkerGuard;

/// Install logging per the layered configuration and surface config warnings.
pub fn init_logging(config: &ShipfillConfig) -> Result<Option<WorkerGuard>> {
    let log_file = config.log_file();
    let guard = shipfill::telemetry::init(
        config.log_format(),
        config.log_level(),
        log_file.as_deref(),
    )?;
    for warning in config.validate() {
        tracing::warn!("Config: {}", warning);
    }
    Ok(guard)
}
