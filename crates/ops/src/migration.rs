//! One-shot upgrade steps across app versions
//!
//! Steps are applied in ascending version order starting after the stored
//! migration counter. A successful step advances the counter to its own
//! version; a failed one is logged and skipped so later steps still run.

use async_trait::async_trait;
use orchard_config::{keys, PrefValue};
use orchard_errors::{Error, OpsError};
use orchard_events::{EventEmitter, GeneralEvent};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::update::UpdateHelper;
use crate::OpsCtx;

#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Counter value this step migrates to
    fn version(&self) -> u32;

    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error if the step could not complete.
    async fn apply(&self, ctx: &Arc<OpsCtx>) -> Result<(), Error>;
}

/// What one run of the migration runner did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Counter before the run
    pub from: i64,
    /// Counter after the run
    pub version: i64,
    pub applied: Vec<u32>,
    pub failed: Vec<u32>,
}

/// Introduces the periodic update check
struct ScheduleAutomatedCheck;

#[async_trait]
impl MigrationStep for ScheduleAutomatedCheck {
    fn version(&self) -> u32 {
        1
    }

    fn name(&self) -> &str {
        "schedule_automated_update_check"
    }

    async fn apply(&self, ctx: &Arc<OpsCtx>) -> Result<(), Error> {
        UpdateHelper::new(Arc::clone(ctx)).schedule_automated_check()?;
        Ok(())
    }
}

/// Drops an update interval that is not a positive number of hours
struct ResetUpdateInterval;

#[async_trait]
impl MigrationStep for ResetUpdateInterval {
    fn version(&self) -> u32 {
        2
    }

    fn name(&self) -> &str {
        "reset_invalid_update_interval"
    }

    async fn apply(&self, ctx: &Arc<OpsCtx>) -> Result<(), Error> {
        let stored = ctx.preferences.get(keys::UPDATE_CHECK_INTERVAL);
        if stored.is_some() && ctx.preferences.update_interval_hours().is_none() {
            info!(value = ?stored, "Resetting invalid update interval");
            ctx.preferences.remove(keys::UPDATE_CHECK_INTERVAL)?;
            UpdateHelper::new(Arc::clone(ctx)).update_automated_check()?;
        }
        Ok(())
    }
}

/// Steps shipped with this build
#[must_use]
pub fn default_steps() -> Vec<Box<dyn MigrationStep>> {
    vec![Box::new(ScheduleAutomatedCheck), Box::new(ResetUpdateInterval)]
}

pub struct MigrationRunner {
    ctx: Arc<OpsCtx>,
    steps: Vec<Box<dyn MigrationStep>>,
}

impl MigrationRunner {
    #[must_use]
    pub fn new(ctx: Arc<OpsCtx>) -> Self {
        Self::with_steps(ctx, default_steps())
    }

    #[must_use]
    pub fn with_steps(ctx: Arc<OpsCtx>, mut steps: Vec<Box<dyn MigrationStep>>) -> Self {
        steps.sort_by_key(|step| step.version());
        Self { ctx, steps }
    }

    /// Highest version any step migrates to
    #[must_use]
    pub fn target_version(&self) -> u32 {
        self.steps.last().map_or(0, |step| step.version())
    }

    /// Apply every step newer than the stored counter
    pub async fn run(&self) -> MigrationReport {
        let from = self.ctx.preferences.migration_version();
        let mut report = MigrationReport {
            from,
            version: from,
            applied: Vec::new(),
            failed: Vec::new(),
        };

        for step in self
            .steps
            .iter()
            .filter(|step| i64::from(step.version()) > from)
        {
            let version = step.version();
            debug!(version, step = step.name(), "Applying migration");
            if let Err(e) = step.apply(&self.ctx).await {
                let failure = OpsError::MigrationStepFailed {
                    version,
                    message: e.to_string(),
                };
                warn!(step = step.name(), error = %failure, "Migration step failed; continuing");
                report.failed.push(version);
                continue;
            }

            match self
                .ctx
                .preferences
                .set(keys::MIGRATION_VERSION, PrefValue::Int(i64::from(version)))
            {
                Ok(()) => {
                    report.version = i64::from(version);
                    report.applied.push(version);
                }
                Err(e) => {
                    warn!(version, error = %e, "Could not advance migration counter");
                    report.failed.push(version);
                }
            }
        }

        if !report.applied.is_empty() || !report.failed.is_empty() {
            info!(
                from = report.from,
                to = report.version,
                applied = report.applied.len(),
                failed = report.failed.len(),
                "Migrations finished"
            );
            self.ctx.emit(GeneralEvent::MigrationsApplied {
                from: report.from,
                to: report.version,
                failed: report.failed.clone(),
            });
        }
        report
    }
}
