//! Ordered index over parsed migration identities.

use super::identity::{Direction, MigrationIdentity};
use crate::error::Error;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

/// Up and down scripts authored for one version.
#[derive(Debug, Clone, Default)]
struct VersionEntry {
    up: Option<MigrationIdentity>,
    down: Option<MigrationIdentity>,
}

impl VersionEntry {
    fn slot(&mut self, direction: Direction) -> &mut Option<MigrationIdentity> {
        match direction {
            Direction::Up => &mut self.up,
            Direction::Down => &mut self.down,
        }
    }
}

/// Sorted, gap-tolerant collection of migrations keyed by `(version, direction)`.
///
/// The up and down tracks are independent: a version may have only one
/// direction authored, and [`next`](Self::next) / [`prev`](Self::prev) skip
/// versions that only exist in the opposite direction.
#[derive(Debug, Clone, Default)]
pub struct MigrationIndex {
    entries: BTreeMap<u64, VersionEntry>,
}

impl MigrationIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from already-parsed identities.
    ///
    /// Any `(version, direction)` conflict rejects the whole set.
    pub fn from_identities(
        identities: impl IntoIterator<Item = MigrationIdentity>,
    ) -> Result<Self, Error> {
        let mut index = Self::new();
        for identity in identities {
            let version = identity.version();
            let direction = identity.direction();
            let key = identity.raw_key().to_string();
            if !index.append(identity) {
                return Err(Error::DuplicateMigration {
                    version,
                    direction,
                    key,
                });
            }
        }
        Ok(index)
    }

    /// Build an index from a raw key listing.
    ///
    /// Keys that are not migrations are skipped; duplicates are fatal.
    pub fn scan<I, S>(keys: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_identities(
            keys.into_iter()
                .filter_map(|key| MigrationIdentity::scan(key.as_ref())),
        )
    }

    /// Insert an identity. Returns `false` if its `(version, direction)` is taken.
    pub fn append(&mut self, identity: MigrationIdentity) -> bool {
        let slot = self
            .entries
            .entry(identity.version())
            .or_default()
            .slot(identity.direction());
        if slot.is_some() {
            return false;
        }
        *slot = Some(identity);
        true
    }

    /// Smallest version with an up migration.
    pub fn first(&self) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.up.is_some())
            .map(|(version, _)| *version)
    }

    /// Smallest version strictly greater than `version` with an up migration.
    pub fn next(&self, version: u64) -> Option<u64> {
        self.entries
            .range((Excluded(version), Unbounded))
            .find(|(_, entry)| entry.up.is_some())
            .map(|(version, _)| *version)
    }

    /// Largest version strictly smaller than `version` with a down migration.
    pub fn prev(&self, version: u64) -> Option<u64> {
        self.entries
            .range(..version)
            .rev()
            .find(|(_, entry)| entry.down.is_some())
            .map(|(version, _)| *version)
    }

    /// Largest version strictly smaller than `version` with an up migration.
    ///
    /// This is the version a store is left at after reverting `version`:
    /// the last one below it that an up run would have applied.
    pub fn predecessor(&self, version: u64) -> Option<u64> {
        self.entries
            .range(..version)
            .rev()
            .find(|(_, entry)| entry.up.is_some())
            .map(|(version, _)| *version)
    }

    /// Whether `version` has an up migration.
    pub fn has_up(&self, version: u64) -> bool {
        self.up(version).is_some()
    }

    /// Whether `version` has a down migration.
    pub fn has_down(&self, version: u64) -> bool {
        self.down(version).is_some()
    }

    /// The up migration for `version`.
    pub fn up(&self, version: u64) -> Option<&MigrationIdentity> {
        self.entries.get(&version).and_then(|e| e.up.as_ref())
    }

    /// The down migration for `version`.
    pub fn down(&self, version: u64) -> Option<&MigrationIdentity> {
        self.entries.get(&version).and_then(|e| e.down.as_ref())
    }

    /// The migration for `version` in `direction`.
    pub fn get(&self, version: u64, direction: Direction) -> Option<&MigrationIdentity> {
        match direction {
            Direction::Up => self.up(version),
            Direction::Down => self.down(version),
        }
    }

    /// All indexed versions in increasing order, regardless of direction.
    pub fn versions(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    /// Number of distinct versions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no migrations at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(version: u64, direction: Direction) -> MigrationIdentity {
        MigrationIdentity::new(version, direction, None, format!("{version}.{direction}")).unwrap()
    }

    fn index_of(keys: &[&str]) -> MigrationIndex {
        MigrationIndex::scan(keys.iter().copied()).unwrap()
    }

    #[test]
    fn test_append_detects_conflicts() {
        let mut index = MigrationIndex::new();
        assert!(index.append(id(1, Direction::Up)));
        assert!(index.append(id(1, Direction::Down)));
        assert!(index.append(id(2, Direction::Up)));
        assert!(!index.append(id(1, Direction::Up)));
        assert!(!index.append(id(2, Direction::Up)));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_unique_keys_never_conflict() {
        let mut index = MigrationIndex::new();
        for version in (0..50).step_by(3) {
            assert!(index.append(id(version, Direction::Up)));
            assert!(index.append(id(version, Direction::Down)));
        }
    }

    #[test]
    fn test_scan_rejects_duplicates() {
        let err = MigrationIndex::scan(["1_a.up.sql", "1_b.up.sql"]).unwrap_err();
        match err {
            Error::DuplicateMigration {
                version, direction, ..
            } => {
                assert_eq!(version, 1);
                assert_eq!(direction, Direction::Up);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scan_skips_foreign_keys() {
        let index = index_of(&["abc_bad_migration.sql", "1_init.up.sql", "README.md"]);
        assert_eq!(index.len(), 1);
        assert!(index.has_up(1));
    }

    #[test]
    fn test_navigation_with_gaps() {
        let index = index_of(&[
            "1_a.up.sql",
            "1_a.down.sql",
            "3_b.up.sql",
            "3_b.down.sql",
            "7_c.up.sql",
            "7_c.down.sql",
        ]);
        assert_eq!(index.first(), Some(1));
        assert_eq!(index.next(1), Some(3));
        assert_eq!(index.next(2), Some(3));
        assert_eq!(index.next(3), Some(7));
        assert_eq!(index.next(7), None);
        assert_eq!(index.prev(7), Some(3));
        assert_eq!(index.prev(3), Some(1));
        assert_eq!(index.prev(1), None);
        assert_eq!(index.prev(100), Some(7));
    }

    #[test]
    fn test_tracks_are_independent() {
        let index = index_of(&[
            "1_a.up.sql",
            "1_a.down.sql",
            "2_up_only.up.sql",
            "3_down_only.down.sql",
            "4_d.up.sql",
            "4_d.down.sql",
        ]);
        assert_eq!(index.next(1), Some(2));
        assert_eq!(index.next(2), Some(4));
        assert_eq!(index.prev(4), Some(3));
        assert_eq!(index.prev(3), Some(1));
        assert_eq!(index.predecessor(4), Some(2));
        assert!(index.has_up(2) && !index.has_down(2));
        assert!(index.has_down(3) && !index.has_up(3));
    }

    #[test]
    fn test_first_skips_down_only_versions() {
        let index = index_of(&["1_x.down.sql", "5_y.up.sql"]);
        assert_eq!(index.first(), Some(5));
    }

    #[test]
    fn test_next_from_first_visits_every_up_version_once() {
        let index = index_of(&[
            "2.up", "2.down", "3.down", "5.up", "8.up", "8.down", "13.up",
        ]);
        let mut visited = Vec::new();
        let mut current = index.first();
        while let Some(version) = current {
            visited.push(version);
            current = index.next(version);
        }
        assert_eq!(visited, vec![2, 5, 8, 13]);
    }

    #[test]
    fn test_empty_index() {
        let index = MigrationIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.first(), None);
        assert_eq!(index.next(0), None);
        assert_eq!(index.prev(10), None);
    }

    #[test]
    fn test_lookup_by_direction() {
        let index = index_of(&["1_init.up.sql", "1_init.down.sql"]);
        assert_eq!(
            index.get(1, Direction::Down).map(|m| m.raw_key()),
            Some("1_init.down.sql")
        );
        assert_eq!(index.up(1).and_then(|m| m.label()), Some("init"));
        assert!(index.get(2, Direction::Up).is_none());
    }
}
