//! Command-line arguments.

use clap::{Parser, Subcommand};
use stratum_core::Target;

/// Stratum migration tool
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(version, about = "Apply versioned migrations to a store", long_about = None)]
pub struct Args {
    /// Location of the migration scripts (e.g. file://./migrations, s3://bucket/prefix)
    #[arg(short, long)]
    pub source: String,

    /// Location of the store (e.g. sqlite://app.db, sled:///var/lib/app)
    #[arg(short, long)]
    pub database: String,

    /// Print the steps that would run without applying them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Apply all or N up migrations
    Up {
        /// Number of migrations to apply
        n: Option<u64>,
    },
    /// Apply all or N down migrations
    Down {
        /// Number of migrations to revert
        n: Option<u64>,
        /// Revert everything without asking
        #[arg(long, conflicts_with = "n")]
        all: bool,
    },
    /// Migrate up or down to version V
    Goto {
        /// Target version
        version: u64,
    },
    /// Record version V as clean without running anything
    Force {
        /// Version to record; -1 clears the record
        #[arg(allow_negative_numbers = true)]
        version: i64,
    },
    /// Drop everything in the store
    Drop {
        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
    },
    /// Print the current version
    Version,
}

/// What the tool will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Move the store toward a target.
    Apply(Target),
    /// Overwrite the recorded version.
    Force(i64),
    /// Remove everything in the store.
    Drop,
    /// Report the recorded version.
    Version,
}

/// Resolved CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Source location.
    pub source: String,
    /// Store location.
    pub database: String,
    /// The action to perform.
    pub action: Action,
    /// Question to confirm before acting, if the action is destructive and unforced.
    pub confirm: Option<&'static str>,
    /// Plan only.
    pub dry_run: bool,
    /// Debug logging.
    pub verbose: bool,
}

impl Args {
    /// Convert arguments into a configuration.
    pub fn into_config(self) -> CliConfig {
        let (action, confirm) = match self.command {
            Command::Up { n: None } => (Action::Apply(Target::Up), None),
            Command::Up { n: Some(n) } => (Action::Apply(Target::Steps(steps(n))), None),
            Command::Down { n: Some(n), .. } => (Action::Apply(Target::Steps(-steps(n))), None),
            Command::Down { n: None, all } => (
                Action::Apply(Target::Down),
                (!all).then_some("Are you sure you want to revert all migrations? [y/N]"),
            ),
            Command::Goto { version } => (Action::Apply(Target::Version(version)), None),
            Command::Force { version } => (Action::Force(version), None),
            Command::Drop { force } => (
                Action::Drop,
                (!force).then_some("Are you sure you want to drop the entire store? [y/N]"),
            ),
            Command::Version => (Action::Version, None),
        };

        CliConfig {
            source: self.source,
            database: self.database,
            action,
            confirm: if self.dry_run { None } else { confirm },
            dry_run: self.dry_run,
            verbose: self.verbose,
        }
    }
}

fn steps(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliConfig {
        let mut argv = vec!["stratum", "-s", "file://m", "-d", "sqlite://a.db"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap().into_config()
    }

    #[test]
    fn test_up_variants() {
        assert_eq!(parse(&["up"]).action, Action::Apply(Target::Up));
        assert_eq!(parse(&["up", "2"]).action, Action::Apply(Target::Steps(2)));
    }

    #[test]
    fn test_down_asks_unless_all_or_counted() {
        let config = parse(&["down"]);
        assert_eq!(config.action, Action::Apply(Target::Down));
        assert!(config.confirm.is_some());

        assert!(parse(&["down", "--all"]).confirm.is_none());

        let config = parse(&["down", "3"]);
        assert_eq!(config.action, Action::Apply(Target::Steps(-3)));
        assert!(config.confirm.is_none());
    }

    #[test]
    fn test_down_all_conflicts_with_count() {
        let argv = ["stratum", "-s", "x://", "-d", "y://", "down", "2", "--all"];
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_force_nil() {
        assert_eq!(parse(&["force", "-1"]).action, Action::Force(-1));
    }

    #[test]
    fn test_drop_and_dry_run() {
        assert!(parse(&["drop"]).confirm.is_some());
        assert!(parse(&["drop", "-f"]).confirm.is_none());

        let config = parse(&["goto", "4", "--dry-run"]);
        assert!(config.dry_run);
        assert_eq!(config.action, Action::Apply(Target::Version(4)));
    }
}
