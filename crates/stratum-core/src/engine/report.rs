//! Outcome of an apply request.

use super::plan::Step;
use crate::driver::VersionState;
use crate::migration::Direction;
use std::time::Duration;

/// A step that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedStep {
    /// Version of the script that ran.
    pub version: u64,
    /// Direction of the script that ran.
    pub direction: Direction,
    /// Recorded version before the step.
    pub from: i64,
    /// Recorded version after the step.
    pub to: i64,
    /// Label of the script, if any.
    pub label: Option<String>,
    /// Time spent executing the script body.
    pub elapsed: Duration,
}

impl AppliedStep {
    pub(crate) fn new(step: &Step, label: Option<String>, elapsed: Duration) -> Self {
        Self {
            version: step.script,
            direction: step.direction,
            from: step.from,
            to: step.to,
            label,
            elapsed,
        }
    }
}

/// Everything an apply request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Steps applied, in order.
    pub applied: Vec<AppliedStep>,
    /// State of the store when the request ended.
    pub final_state: VersionState,
    /// Whether the run stopped early because cancellation was requested.
    pub cancelled: bool,
}

impl RunReport {
    pub(crate) fn starting_at(state: VersionState) -> Self {
        Self {
            applied: Vec::new(),
            final_state: state,
            cancelled: false,
        }
    }

    /// Whether the request found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && !self.cancelled
    }

    /// Total time spent executing script bodies.
    pub fn elapsed(&self) -> Duration {
        self.applied.iter().map(|s| s.elapsed).sum()
    }
}
