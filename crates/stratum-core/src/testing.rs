//! Conformance checks shared by every driver and source adapter.
//!
//! Adapter crates call these from their own tests so each backend is held
//! to the same contract. The functions panic on the first violation.

use std::io::Cursor;

use crate::driver::{Driver, VersionState, NIL_VERSION};
use crate::error::Error;
use crate::migration::Direction;
use crate::source::Source;
use tokio::io::AsyncReadExt;

/// Script set every source adapter is tested against.
///
/// Version 3 is up-only, 4 and 5 are down-only, and the README is not a migration.
pub const SOURCE_FIXTURE: &[(&str, &str)] = &[
    ("1_foobar.up.sql", "1 up"),
    ("1_foobar.down.sql", "1 down"),
    ("3_foobar.up.sql", "3 up"),
    ("4_foobar.down.sql", "4 down"),
    ("5_foobar.down.sql", "5 down"),
    ("7_foobar.up.sql", "7 up"),
    ("7_foobar.down.sql", "7 down"),
    ("README.md", "not a migration"),
];

/// Check lock discipline, script execution, version bookkeeping and drop.
///
/// `script` must be a body the driver accepts.
pub async fn exercise_driver(driver: &dyn Driver, script: &'static [u8]) {
    // Lock discipline.
    driver.lock().await.expect("first lock succeeds");
    assert!(
        matches!(driver.lock().await, Err(Error::AlreadyLocked)),
        "second lock must fail with AlreadyLocked"
    );
    driver.unlock().await.expect("unlock succeeds");
    assert!(
        matches!(driver.unlock().await, Err(Error::NotLocked)),
        "unlocking twice must fail with NotLocked"
    );

    driver.lock().await.expect("lock after unlock succeeds");

    driver
        .run(Box::new(Cursor::new(script)))
        .await
        .expect("valid script runs");

    // Version bookkeeping, including the nil + dirty record.
    let cases = [
        VersionState::NIL,
        VersionState::new(0, false),
        VersionState::new(1, true),
        VersionState::new(1, false),
        VersionState::new(NIL_VERSION, true),
        VersionState::NIL,
        VersionState::new(42, false),
    ];
    for expected in cases {
        driver
            .set_version(expected.version, expected.dirty)
            .await
            .expect("set_version succeeds");
        let actual = driver.version().await.expect("version succeeds");
        assert_eq!(actual, expected, "version after set_version({expected:?})");
    }

    driver.drop_all().await.expect("drop succeeds");
    assert_eq!(
        driver.version().await.expect("version after drop"),
        VersionState::NIL,
        "drop must clear the recorded version"
    );

    driver.unlock().await.expect("final unlock succeeds");
}

/// Check navigation and reads of a source opened over [`SOURCE_FIXTURE`].
pub async fn exercise_source(source: &dyn Source) {
    assert_eq!(source.first(), Some(1), "first");

    assert_eq!(source.next(0), Some(1));
    assert_eq!(source.next(1), Some(3));
    assert_eq!(source.next(3), Some(7));
    assert_eq!(source.next(7), None);

    assert_eq!(source.prev(8), Some(7));
    assert_eq!(source.prev(7), Some(5));
    assert_eq!(source.prev(5), Some(4));
    assert_eq!(source.prev(4), Some(1));
    assert_eq!(source.prev(1), None);

    let readable = [
        (1, Direction::Up, "1 up"),
        (1, Direction::Down, "1 down"),
        (3, Direction::Up, "3 up"),
        (4, Direction::Down, "4 down"),
        (5, Direction::Down, "5 down"),
        (7, Direction::Up, "7 up"),
        (7, Direction::Down, "7 down"),
    ];
    for (version, direction, expected) in readable {
        let mut script = source
            .read(version, direction)
            .await
            .unwrap_or_else(|e| panic!("read {version} {direction}: {e}"));
        let mut body = String::new();
        script
            .body
            .read_to_string(&mut body)
            .await
            .expect("script body is readable");
        assert_eq!(body, expected, "body of {version} {direction}");
        assert_eq!(script.label.as_deref(), Some("foobar"));
    }

    let missing = [
        (0, Direction::Up),
        (2, Direction::Down),
        (3, Direction::Down),
        (4, Direction::Up),
        (5, Direction::Up),
        (6, Direction::Up),
        (8, Direction::Down),
    ];
    for (version, direction) in missing {
        assert!(
            matches!(
                source.read(version, direction).await,
                Err(Error::MissingScript { .. })
            ),
            "read {version} {direction} must fail with MissingScript"
        );
    }
}
