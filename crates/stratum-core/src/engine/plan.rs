//! Step planning over the migration index.
//!
//! Planning is pure: given the index, the currently recorded version and a
//! target, it yields the single next step to take. The migrator re-reads the
//! store before every step and asks again, so a plan never goes stale.

use crate::driver::{as_recorded, VersionState, NIL_VERSION};
use crate::error::Error;
use crate::migration::{Direction, MigrationIndex};

/// What an apply request is trying to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Apply every pending up migration.
    Up,
    /// Revert every applied migration.
    Down,
    /// Move `n` steps: up when positive, down when negative.
    Steps(i64),
    /// Move up or down until the recorded version is exactly this one.
    Version(u64),
}

impl Target {
    /// Maximum number of steps the request may take, if bounded by a count.
    pub fn step_limit(&self) -> Option<u64> {
        match self {
            Target::Steps(n) => Some(n.unsigned_abs()),
            _ => None,
        }
    }

    /// Reject targets the index cannot satisfy before any lock is taken.
    pub fn validate(&self, index: &MigrationIndex) -> Result<(), Error> {
        match *self {
            Target::Version(version) if !index.has_up(version) => {
                Err(Error::NotFound { version })
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Up => f.write_str("up"),
            Target::Down => f.write_str("down"),
            Target::Steps(n) => write!(f, "{n:+} step(s)"),
            Target::Version(v) => write!(f, "version {v}"),
        }
    }
}

/// One transition of the recorded version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Version of the script to execute.
    pub script: u64,
    /// Direction of the script.
    pub direction: Direction,
    /// Recorded version before the step.
    pub from: i64,
    /// Recorded version after the step; also the version marked dirty while it runs.
    pub to: i64,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({} -> {})",
            self.direction,
            self.script,
            VersionState::new(self.from, false),
            VersionState::new(self.to, false)
        )
    }
}

/// The next step from `current` towards `target`, or `None` when there is nothing to do.
pub fn next_step(
    index: &MigrationIndex,
    current: i64,
    target: Target,
) -> Result<Option<Step>, Error> {
    match target {
        Target::Up => step_up(index, current),
        Target::Down => step_down(index, current),
        Target::Steps(0) => Ok(None),
        Target::Steps(n) if n > 0 => step_up(index, current),
        Target::Steps(_) => step_down(index, current),
        Target::Version(version) => {
            let wanted = as_recorded(version)?;
            if current == wanted {
                Ok(None)
            } else if current < wanted {
                Ok(step_up(index, current)?.filter(|step| step.to <= wanted))
            } else {
                step_down(index, current)
            }
        }
    }
}

/// Every step from `current` towards `target`, without executing anything.
pub fn plan(index: &MigrationIndex, current: i64, target: Target) -> Result<Vec<Step>, Error> {
    target.validate(index)?;

    let limit = target.step_limit();
    let mut steps = Vec::new();
    let mut position = current;
    while limit.map_or(true, |limit| (steps.len() as u64) < limit) {
        match next_step(index, position, target)? {
            Some(step) => {
                position = step.to;
                steps.push(step);
            }
            None => break,
        }
    }
    Ok(steps)
}

fn step_up(index: &MigrationIndex, current: i64) -> Result<Option<Step>, Error> {
    let next = match u64::try_from(current) {
        Ok(version) => index.next(version),
        Err(_) => index.first(),
    };
    let Some(next) = next else {
        return Ok(None);
    };
    Ok(Some(Step {
        script: next,
        direction: Direction::Up,
        from: current,
        to: as_recorded(next)?,
    }))
}

fn step_down(index: &MigrationIndex, current: i64) -> Result<Option<Step>, Error> {
    let Ok(version) = u64::try_from(current) else {
        return Ok(None);
    };
    if !index.has_down(version) {
        return Err(Error::MissingScript {
            version,
            direction: Direction::Down,
        });
    }
    let to = match index.predecessor(version) {
        Some(landing) => as_recorded(landing)?,
        None => NIL_VERSION,
    };
    Ok(Some(Step {
        script: version,
        direction: Direction::Down,
        from: current,
        to,
    }))
}
