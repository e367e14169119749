//! Driver configuration.

use std::path::PathBuf;
use std::time::Duration;

use stratum_core::{Error, Location};

/// Name of the table or tree holding migration state unless overridden.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Location option overriding the SQLite state table.
pub const MIGRATIONS_TABLE_OPTION: &str = "x-migrations-table";

/// Location option setting the SQLite busy timeout in milliseconds.
pub const BUSY_TIMEOUT_OPTION: &str = "x-busy-timeout-ms";

/// Location option overriding the sled state tree.
pub const STATE_TREE_OPTION: &str = "x-state-tree";

/// Location option opening a throwaway sled database.
pub const TEMPORARY_OPTION: &str = "x-temporary";

/// Configuration for the SQLite driver.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file name or `file:` URI.
    pub path: String,

    /// Table holding the migration state.
    pub migrations_table: String,

    /// How long to wait on a locked database file.
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteConfig {
    /// Configuration for the database at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Configuration for a private in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Build a configuration from a `sqlite://` location.
    ///
    /// Options without the `x-` prefix are passed to SQLite as URI parameters.
    pub fn from_location(location: &Location) -> Result<Self, Error> {
        let stripped = location.without_custom_options();
        let path = match stripped.split_once("://") {
            Some((_, rest)) if !rest.is_empty() => format!("file:{rest}"),
            _ => ":memory:".to_string(),
        };

        let mut config = Self::new(path);
        if let Some(table) = location.option(MIGRATIONS_TABLE_OPTION) {
            config.migrations_table = table.to_string();
        }
        if let Some(ms) = location.parsed_option::<u64>(BUSY_TIMEOUT_OPTION)? {
            config.busy_timeout = Duration::from_millis(ms);
        }

        config.validate().map_err(|reason| Error::InvalidLocation {
            location: location.to_string(),
            reason,
        })?;
        Ok(config)
    }

    /// Set the migrations table.
    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Check the table name is a plain identifier.
    pub fn validate(&self) -> Result<(), String> {
        validate_name(&self.migrations_table, "migrations table")
    }
}

/// Configuration for the sled driver.
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Database directory.
    pub path: PathBuf,

    /// Tree holding the migration state and the lock.
    pub state_tree: String,

    /// Temporary database (deleted on drop).
    pub temporary: bool,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./stratum_data"),
            state_tree: DEFAULT_MIGRATIONS_TABLE.to_string(),
            temporary: false,
        }
    }
}

impl SledConfig {
    /// Configuration for the database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Configuration for a throwaway database.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::new(),
            temporary: true,
            ..Default::default()
        }
    }

    /// Build a configuration from a `sled://` location.
    pub fn from_location(location: &Location) -> Result<Self, Error> {
        let temporary = location
            .parsed_option::<bool>(TEMPORARY_OPTION)?
            .unwrap_or(false);

        let mut config = if temporary {
            Self::temporary()
        } else if location.details().is_empty() {
            return Err(Error::InvalidLocation {
                location: location.to_string(),
                reason: "missing database path".to_string(),
            });
        } else {
            Self::new(location.details())
        };

        if let Some(tree) = location.option(STATE_TREE_OPTION) {
            config.state_tree = tree.to_string();
        }
        config.validate().map_err(|reason| Error::InvalidLocation {
            location: location.to_string(),
            reason,
        })?;
        Ok(config)
    }

    /// Set the state tree.
    pub fn with_state_tree(mut self, tree: impl Into<String>) -> Self {
        self.state_tree = tree.into();
        self
    }

    /// Check the state tree name is usable.
    pub fn validate(&self) -> Result<(), String> {
        validate_name(&self.state_tree, "state tree")
    }
}

fn validate_name(name: &str, what: &str) -> Result<(), String> {
    let valid = name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(format!("{what} name {name:?} must be a plain identifier"))
    }
}
