//! Operator confirmation before each corrective action.
//!
//! The engine asks its gate before acting. `AutoApprove` never blocks;
//! `ConsoleGate` pauses for an operator at the terminal (`--step`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::{Select, theme::ColorfulTheme};
use std::sync::atomic::{AtomicBool, Ordering};

use super::Correction;
use crate::model::Station;

#[async_trait]
pub trait ActionGate: Send + Sync {
    /// `Ok(true)` to proceed, `Ok(false)` to abort the reconciliation.
    async fn confirm(&self, station: Station, correction: &Correction) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ActionGate for AutoApprove {
    async fn confirm(&self, _station: Station, _correction: &Correction) -> Result<bool> {
        Ok(true)
    }
}

/// Interactive gate. Choosing "continue without asking" turns it into
/// `AutoApprove` for the rest of the run.
#[derive(Debug, Default)]
pub struct ConsoleGate {
    skip_all: AtomicBool,
}

impl ConsoleGate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionGate for ConsoleGate {
    async fn confirm(&self, station: Station, correction: &Correction) -> Result<bool> {
        if self.skip_all.load(Ordering::Relaxed) {
            return Ok(true);
        }

        let prompt = format!("{}: {}?", station, correction);
        let selection = tokio::task::spawn_blocking(move || {
            let options = &[
                "Yes, perform this correction",
                "Yes, and stop asking for this run",
                "Abort",
            ];
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .items(options)
                .default(0)
                .interact()
        })
        .await
        .context("Confirmation prompt task failed")?
        .context("Failed to read operator confirmation")?;

        match selection {
            0 => Ok(true),
            1 => {
                self.skip_all.store(true, Ordering::Relaxed);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Location, Part, Pose};

    #[tokio::test]
    async fn test_auto_approve_always_proceeds() {
        let correction = Correction::RemoveOrphan {
            part: Part::new("gear_part", Pose::identity(), Location::Container(Station::Q1)),
        };
        assert!(AutoApprove.confirm(Station::Q1, &correction).await.unwrap());
    }

    #[tokio::test]
    async fn test_console_gate_skips_prompt_once_skip_all_is_set() {
        let gate = ConsoleGate::new();
        gate.skip_all.store(true, Ordering::Relaxed);
        let correction = Correction::RemoveOrphan {
            part: Part::new("gear_part", Pose::identity(), Location::Container(Station::Q2)),
        };
        assert!(gate.confirm(Station::Q2, &correction).await.unwrap());
    }
}
