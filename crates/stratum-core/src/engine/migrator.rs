//! The migrator: drives a driver through the steps computed from a source.

use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use super::plan::{self, Step, Target};
use super::report::{AppliedStep, RunReport};
use crate::cancel::CancellationToken;
use crate::driver::{Driver, VersionState, NIL_VERSION};
use crate::error::Error;
use crate::registry::Registry;
use crate::source::Source;

/// Applies migrations from one source to one store.
///
/// Every apply request holds the store lock for its whole duration and
/// releases it on every exit path. Before each step the persisted state is
/// re-read; a dirty flag aborts the request. Each step marks its landing
/// version dirty, runs the script, then clears the flag, so a crash at any
/// point leaves a dirty record naming the version that was being attempted.
pub struct Migrator {
    source: Box<dyn Source>,
    driver: Box<dyn Driver>,
    cancel: CancellationToken,
}

impl Migrator {
    /// Create a migrator over an opened source and driver.
    pub fn new(source: Box<dyn Source>, driver: Box<dyn Driver>) -> Self {
        Self {
            source,
            driver,
            cancel: CancellationToken::new(),
        }
    }

    /// Open a source and a driver through the registry.
    pub async fn open(
        registry: &Registry,
        source_location: &str,
        database_location: &str,
    ) -> Result<Self, Error> {
        let mut source = registry.open_source(source_location).await?;
        let driver = match registry.open_driver(database_location).await {
            Ok(driver) => driver,
            Err(e) => {
                if let Err(close_err) = source.close().await {
                    warn!(error = %close_err, "failed to close source after driver open failure");
                }
                return Err(e);
            }
        };
        Ok(Self::new(source, driver))
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token polled between steps.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The source migrations are read from.
    pub fn source(&self) -> &dyn Source {
        self.source.as_ref()
    }

    /// Apply every pending up migration.
    pub async fn up(&self) -> Result<RunReport, Error> {
        self.apply(Target::Up).await
    }

    /// Revert every applied migration.
    pub async fn down(&self) -> Result<RunReport, Error> {
        self.apply(Target::Down).await
    }

    /// Move `n` steps: up when positive, down when negative.
    pub async fn steps(&self, n: i64) -> Result<RunReport, Error> {
        self.apply(Target::Steps(n)).await
    }

    /// Move to exactly `version`, applying or reverting as needed.
    pub async fn migrate(&self, version: u64) -> Result<RunReport, Error> {
        self.apply(Target::Version(version)).await
    }

    /// Run an apply request.
    #[instrument(skip(self))]
    pub async fn apply(&self, target: Target) -> Result<RunReport, Error> {
        target.validate(self.source.index())?;

        self.driver.lock().await?;
        let outcome = self.run_locked(target).await;
        let outcome = self.release(outcome).await;

        if let Ok(report) = &outcome {
            if report.is_noop() {
                info!(state = %report.final_state, "no change");
            } else {
                info!(
                    applied = report.applied.len(),
                    state = %report.final_state,
                    cancelled = report.cancelled,
                    duration_ms = report.elapsed().as_millis() as u64,
                    "migration run finished"
                );
            }
        }
        outcome
    }

    /// The steps `target` would take from the current state, without running them.
    pub async fn plan(&self, target: Target) -> Result<Vec<Step>, Error> {
        let state = self.clean_state().await?;
        plan::plan(self.source.index(), state.version, target)
    }

    /// Record `version` as clean without running any script.
    ///
    /// This is how an operator resolves a dirty store after repairing it by hand.
    #[instrument(skip(self))]
    pub async fn force(&self, version: i64) -> Result<(), Error> {
        if version < NIL_VERSION {
            return Err(Error::InvalidVersion(version));
        }

        self.driver.lock().await?;
        let outcome = self.driver.set_version(version, false).await;
        self.release(outcome).await?;
        info!(version, "forced version");
        Ok(())
    }

    /// The persisted state of the store.
    pub async fn version(&self) -> Result<VersionState, Error> {
        self.driver.version().await
    }

    /// Remove everything in the store, including the migration state.
    #[instrument(skip(self))]
    pub async fn drop_all(&self) -> Result<(), Error> {
        self.driver.lock().await?;
        let outcome = self.driver.drop_all().await;
        self.release(outcome).await?;
        warn!("dropped all managed state");
        Ok(())
    }

    /// Close the source and the driver.
    pub async fn close(mut self) -> Result<(), Error> {
        let source = self.source.close().await;
        let driver = self.driver.close().await;
        source.and(driver)
    }

    async fn run_locked(&self, target: Target) -> Result<RunReport, Error> {
        let index = self.source.index();
        let limit = target.step_limit();
        let mut report = RunReport::starting_at(self.clean_state().await?);

        loop {
            if limit.is_some_and(|limit| report.applied.len() as u64 >= limit) {
                break;
            }

            let Some(step) = plan::next_step(index, report.final_state.version, target)? else {
                break;
            };

            if self.cancel.is_cancelled() {
                warn!(next = %step, "stop requested, not starting next migration");
                report.cancelled = true;
                break;
            }

            let applied = self.apply_step(&step, report.applied.len()).await?;
            report.applied.push(applied);
            report.final_state = self.clean_state().await?;
        }

        Ok(report)
    }

    async fn apply_step(&self, step: &Step, completed: usize) -> Result<AppliedStep, Error> {
        let script = self.source.read(step.script, step.direction).await?;

        self.driver.set_version(step.to, true).await?;

        debug!(%step, "executing migration");
        let started = Instant::now();
        if let Err(e) = self.driver.run(script.body).await {
            error!(
                version = step.script,
                direction = %step.direction,
                error = %e,
                "migration failed, store left dirty"
            );
            return Err(Error::Execution {
                version: step.script,
                direction: step.direction,
                completed,
                source: Box::new(e),
            });
        }
        let elapsed = started.elapsed();

        self.driver.set_version(step.to, false).await?;

        info!(
            version = step.script,
            direction = %step.direction,
            label = script.label.as_deref().unwrap_or(""),
            duration_ms = elapsed.as_millis() as u64,
            "applied migration"
        );
        Ok(AppliedStep::new(step, script.label, elapsed))
    }

    async fn clean_state(&self) -> Result<VersionState, Error> {
        let state = self.driver.version().await?;
        if state.dirty {
            return Err(Error::DirtyDatabase {
                version: state.version,
            });
        }
        Ok(state)
    }

    /// Unlock after a locked operation, keeping the operation's error if both fail.
    async fn release<T>(&self, outcome: Result<T, Error>) -> Result<T, Error> {
        match (outcome, self.driver.unlock().await) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(unlock_err)) => Err(unlock_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unlock_err)) => {
                warn!(error = %unlock_err, "failed to release lock after error");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("migrations", &self.source.index().len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
