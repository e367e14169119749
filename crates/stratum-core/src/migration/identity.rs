//! Parsing of migration script keys.
//!
//! A key looks like `<version>_<label>.<up|down>.<ext>`, for example
//! `0004_add_users_email.up.sql`. The label and the extension are optional,
//! so `4.down` is a valid key too.

use crate::driver::MAX_VERSION;
use crate::error::Error;
use regex::Regex;
use std::sync::LazyLock;

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<version>[0-9]+)(?:_(?P<label>.*?))?\.(?P<direction>up|down)(?P<suffix>\..*)?$")
        .expect("migration key pattern is valid")
});

const RECORD_OVERFLOW: &str = "version does not fit in a signed 64-bit store record";

/// Direction a migration script moves the store in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// Applies a version.
    Up,
    /// Reverts a version.
    Down,
}

impl Direction {
    /// The token used in script keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured identity of a single migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationIdentity {
    version: u64,
    direction: Direction,
    label: Option<String>,
    raw_key: String,
}

impl MigrationIdentity {
    /// Build an identity directly, without a key to parse.
    ///
    /// Fails when `version` is larger than [`MAX_VERSION`].
    pub fn new(
        version: u64,
        direction: Direction,
        label: Option<String>,
        raw_key: impl Into<String>,
    ) -> Result<Self, Error> {
        let raw_key = raw_key.into();
        if version > MAX_VERSION {
            return Err(Error::MalformedIdentity {
                key: raw_key,
                reason: RECORD_OVERFLOW,
            });
        }
        Ok(Self {
            version,
            direction,
            label,
            raw_key,
        })
    }

    /// Parse a script key.
    ///
    /// Callers scanning a whole listing should use [`MigrationIdentity::scan`]
    /// instead, which skips keys that are not migrations.
    pub fn parse(key: &str) -> Result<Self, Error> {
        let malformed = |reason| Error::MalformedIdentity {
            key: key.to_string(),
            reason,
        };

        if !key.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(malformed("missing version prefix"));
        }

        let caps = KEY_PATTERN
            .captures(key)
            .ok_or_else(|| malformed("missing up/down direction"))?;

        let version = caps["version"]
            .parse::<u64>()
            .ok()
            .filter(|v| *v <= MAX_VERSION)
            .ok_or_else(|| malformed(RECORD_OVERFLOW))?;

        let direction = match &caps["direction"] {
            "up" => Direction::Up,
            _ => Direction::Down,
        };

        let label = caps
            .name("label")
            .map(|m| m.as_str())
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        Ok(Self {
            version,
            direction,
            label,
            raw_key: key.to_string(),
        })
    }

    /// Lenient parse for bulk listings: keys that are not migrations yield `None`.
    pub fn scan(key: &str) -> Option<Self> {
        match Self::parse(key) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::trace!(key, error = %e, "skipping non-migration key");
                None
            }
        }
    }

    /// Version number.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Human label, if the key carried one.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The key exactly as it was discovered.
    pub fn raw_key(&self) -> &str {
        &self.raw_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_key() {
        let id = MigrationIdentity::parse("0004_add_users_email.up.sql").unwrap();
        assert_eq!(id.version(), 4);
        assert_eq!(id.direction(), Direction::Up);
        assert_eq!(id.label(), Some("add_users_email"));
        assert_eq!(id.raw_key(), "0004_add_users_email.up.sql");
    }

    #[test]
    fn test_parse_without_label_or_suffix() {
        let id = MigrationIdentity::parse("12.down").unwrap();
        assert_eq!(id.version(), 12);
        assert_eq!(id.direction(), Direction::Down);
        assert_eq!(id.label(), None);

        let id = MigrationIdentity::parse("1.up.cypher").unwrap();
        assert_eq!(id.direction(), Direction::Up);
        assert_eq!(id.label(), None);
    }

    #[test]
    fn test_label_may_contain_dots() {
        let id = MigrationIdentity::parse("1_v1.2_rename.down.sql").unwrap();
        assert_eq!(id.label(), Some("v1.2_rename"));
        assert_eq!(id.direction(), Direction::Down);
    }

    #[test]
    fn test_timestamp_versions() {
        let id = MigrationIdentity::parse("20240131120000_init.up.sql").unwrap();
        assert_eq!(id.version(), 20240131120000);
    }

    #[test]
    fn test_malformed_keys() {
        for key in [
            "abc_bad_migration.sql",
            "README.md",
            "1_init.sql",
            "1_init.sideways.sql",
            "",
            "99999999999999999999999_big.up.sql",
        ] {
            let err = MigrationIdentity::parse(key).unwrap_err();
            assert!(
                matches!(err, Error::MalformedIdentity { .. }),
                "expected malformed identity for {key:?}"
            );
            assert!(MigrationIdentity::scan(key).is_none());
        }
    }

    #[test]
    fn test_versions_must_fit_store_record() {
        let id = MigrationIdentity::parse("9223372036854775807_last.up.sql").unwrap();
        assert_eq!(id.version(), MAX_VERSION);

        for key in [
            "9223372036854775808_over.up.sql",
            "10000000000000000000_big.up.sql",
            "18446744073709551615.down",
        ] {
            match MigrationIdentity::parse(key) {
                Err(Error::MalformedIdentity { reason, .. }) => {
                    assert_eq!(reason, RECORD_OVERFLOW)
                }
                other => panic!("expected malformed identity for {key:?}, got {other:?}"),
            }
            assert!(MigrationIdentity::scan(key).is_none());
        }

        assert!(MigrationIdentity::new(MAX_VERSION + 1, Direction::Up, None, "x").is_err());
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::Down.to_string(), "down");
    }
}
