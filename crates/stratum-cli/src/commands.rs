//! Command execution.

use std::io::Write;

use stratum_core::{Error, Migrator, Registry, RunReport};
use thiserror::Error as ThisError;

use crate::config::Action;

/// Errors surfaced to the user.
#[derive(Debug, ThisError)]
pub enum CliError {
    /// Migration engine or adapter failure.
    #[error(transparent)]
    Migration(#[from] Error),

    /// Terminal I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A registry with every bundled source and driver.
pub fn registry() -> Result<Registry, Error> {
    let mut registry = Registry::new();
    stratum_sources::register(&mut registry)?;
    stratum_stores::register(&mut registry)?;
    Ok(registry)
}

/// Perform `action`, writing human-readable output to `out`.
pub async fn execute(
    migrator: &Migrator,
    action: Action,
    dry_run: bool,
    out: &mut impl Write,
) -> Result<(), CliError> {
    match action {
        Action::Apply(target) if dry_run => {
            let steps = migrator.plan(target).await?;
            if steps.is_empty() {
                writeln!(out, "no change")?;
            }
            for step in steps {
                writeln!(out, "would apply {step}")?;
            }
        }
        Action::Apply(target) => {
            let report = migrator.apply(target).await?;
            print_report(&report, out)?;
        }
        Action::Force(version) if dry_run => writeln!(out, "would force version {version}")?,
        Action::Force(version) => {
            migrator.force(version).await?;
            writeln!(out, "forced version {version}")?;
        }
        Action::Drop if dry_run => writeln!(out, "would drop everything in the store")?,
        Action::Drop => {
            migrator.drop_all().await?;
            writeln!(out, "dropped")?;
        }
        Action::Version => {
            let state = migrator.version().await?;
            writeln!(out, "{state}")?;
        }
    }
    Ok(())
}

fn print_report(report: &RunReport, out: &mut impl Write) -> Result<(), CliError> {
    for step in &report.applied {
        let arrow = match step.direction {
            stratum_core::Direction::Up => 'u',
            stratum_core::Direction::Down => 'd',
        };
        writeln!(
            out,
            "{}/{} {} ({:.1?})",
            step.version,
            arrow,
            step.label.as_deref().unwrap_or(""),
            step.elapsed
        )?;
    }
    if report.cancelled {
        writeln!(out, "stopped at {} before the next migration", report.final_state)?;
    } else if report.is_noop() {
        writeln!(out, "no change")?;
    }
    Ok(())
}

/// Ask `question` on the terminal; only `y` or `yes` confirms.
pub fn confirm(question: &str) -> std::io::Result<bool> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{question} ")?;
    stdout.flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
