//! End-to-end behavior of the migrator against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use stratum_core::stub::{MemoryDriver, MemorySource, MemoryStore};
use stratum_core::{
    CancellationToken, Direction, Driver, Error, Migrator, ScriptReader, Target, VersionState,
    NIL_VERSION,
};
use tokio::sync::Notify;

/// Up and down scripts for every version, with bodies "up N" / "down N".
fn scripts(versions: &[u64]) -> Vec<(String, String)> {
    versions
        .iter()
        .flat_map(|v| {
            [
                (format!("{v}_step.up.sql"), format!("up {v}")),
                (format!("{v}_step.down.sql"), format!("down {v}")),
            ]
        })
        .collect()
}

fn migrator(scripts: Vec<(String, String)>, driver: impl Driver + 'static) -> Migrator {
    let source = MemorySource::new(scripts).unwrap();
    Migrator::new(Box::new(source), Box::new(driver))
}

/// Cancels a token once `after` scripts have run.
struct CancelAfter {
    inner: MemoryDriver,
    token: CancellationToken,
    after: usize,
    runs: AtomicUsize,
}

#[async_trait]
impl Driver for CancelAfter {
    async fn close(&mut self) -> Result<(), Error> {
        self.inner.close().await
    }
    async fn lock(&self) -> Result<(), Error> {
        self.inner.lock().await
    }
    async fn unlock(&self) -> Result<(), Error> {
        self.inner.unlock().await
    }
    async fn run(&self, script: ScriptReader) -> Result<(), Error> {
        self.inner.run(script).await?;
        if self.runs.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.token.cancel();
        }
        Ok(())
    }
    async fn set_version(&self, version: i64, dirty: bool) -> Result<(), Error> {
        self.inner.set_version(version, dirty).await
    }
    async fn version(&self) -> Result<VersionState, Error> {
        self.inner.version().await
    }
    async fn drop_all(&self) -> Result<(), Error> {
        self.inner.drop_all().await
    }
}

/// Blocks inside `run` until released, so a second request can race it.
struct Gated {
    inner: MemoryDriver,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Driver for Gated {
    async fn close(&mut self) -> Result<(), Error> {
        self.inner.close().await
    }
    async fn lock(&self) -> Result<(), Error> {
        self.inner.lock().await
    }
    async fn unlock(&self) -> Result<(), Error> {
        self.inner.unlock().await
    }
    async fn run(&self, script: ScriptReader) -> Result<(), Error> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.run(script).await
    }
    async fn set_version(&self, version: i64, dirty: bool) -> Result<(), Error> {
        self.inner.set_version(version, dirty).await
    }
    async fn version(&self) -> Result<VersionState, Error> {
        self.inner.version().await
    }
    async fn drop_all(&self) -> Result<(), Error> {
        self.inner.drop_all().await
    }
}

#[tokio::test]
async fn test_single_step_up_records_clean_version() {
    let store = MemoryStore::new();
    store.set_record(Some(VersionState::new(1, false)));
    let m = migrator(scripts(&[1, 2]), store.driver());

    let report = m.steps(1).await.unwrap();

    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].version, 2);
    assert_eq!(report.applied[0].label.as_deref(), Some("step"));
    assert_eq!(m.version().await.unwrap(), VersionState::new(2, false));
    assert_eq!(store.executed(), vec!["up 2"]);
}

#[tokio::test]
async fn test_target_is_marked_dirty_before_running() {
    let store = MemoryStore::new();
    let m = migrator(scripts(&[1]), store.driver());

    m.up().await.unwrap();

    assert_eq!(
        store.history(),
        vec![VersionState::new(1, true), VersionState::new(1, false)]
    );
}

#[tokio::test]
async fn test_failed_script_leaves_store_dirty() {
    let store = MemoryStore::new();
    let mut set = scripts(&[1, 2, 3]);
    set[2].1 = "up 2 FAIL".to_string();
    store.fail_scripts_containing("FAIL");
    let m = migrator(set, store.driver());

    let err = m.up().await.unwrap_err();
    match err {
        Error::Execution {
            version,
            direction,
            completed,
            ..
        } => {
            assert_eq!(version, 2);
            assert_eq!(direction, Direction::Up);
            assert_eq!(completed, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(m.version().await.unwrap(), VersionState::new(2, true));
    assert!(!store.is_locked(), "lock must be released after a failure");
    assert_eq!(store.executed(), vec!["up 1"]);

    // Every kind of request is refused until an operator intervenes.
    assert!(m.up().await.unwrap_err().is_dirty());
    assert!(m.steps(-1).await.unwrap_err().is_dirty());
    assert!(m.migrate(1).await.unwrap_err().is_dirty());
    assert!(m.plan(Target::Up).await.unwrap_err().is_dirty());
    assert!(!store.is_locked());

    m.force(1).await.unwrap();
    assert_eq!(m.version().await.unwrap(), VersionState::new(1, false));

    store.fail_scripts_containing("NOTHING MATCHES");
    let report = m.up().await.unwrap();
    assert_eq!(report.final_state, VersionState::new(3, false));
}

#[tokio::test]
async fn test_failed_first_down_keeps_dirty_nil_record() {
    let store = MemoryStore::new();
    store.set_record(Some(VersionState::new(1, false)));
    store.fail_scripts_containing("down 1");
    let m = migrator(scripts(&[1]), store.driver());

    let err = m.down().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Execution {
            version: 1,
            direction: Direction::Down,
            ..
        }
    ));
    assert_eq!(store.record(), Some(VersionState::new(NIL_VERSION, true)));
    assert!(m.up().await.unwrap_err().is_dirty());
}

#[tokio::test]
async fn test_locked_store_rejects_request_without_changes() {
    let store = MemoryStore::new();
    let other = store.driver();
    other.lock().await.unwrap();

    let m = migrator(scripts(&[1, 2]), store.driver());
    assert!(matches!(m.up().await, Err(Error::AlreadyLocked)));
    assert!(store.executed().is_empty());
    assert!(store.history().is_empty());
    assert_eq!(store.record(), None);

    other.unlock().await.unwrap();
    m.up().await.unwrap();
    assert_eq!(m.version().await.unwrap(), VersionState::new(2, false));
}

#[tokio::test]
async fn test_concurrent_request_fails_while_first_holds_lock() {
    let store = MemoryStore::new();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let first = Arc::new(migrator(
        scripts(&[1]),
        Gated {
            inner: store.driver(),
            entered: entered.clone(),
            release: release.clone(),
        },
    ));
    let second = migrator(scripts(&[1]), store.driver());

    let running = tokio::spawn({
        let first = first.clone();
        async move { first.up().await }
    });
    entered.notified().await;

    assert!(matches!(second.up().await, Err(Error::AlreadyLocked)));
    assert_eq!(store.history(), vec![VersionState::new(1, true)]);

    release.notify_one();
    running.await.unwrap().unwrap();
    assert!(!store.is_locked());
    assert!(second.up().await.unwrap().is_noop());
}

#[tokio::test]
async fn test_goto_skips_unauthored_version() {
    let store = MemoryStore::new();
    let m = migrator(scripts(&[1, 2, 4]), store.driver());

    let report = m.migrate(4).await.unwrap();

    let visited: Vec<u64> = report.applied.iter().map(|s| s.version).collect();
    assert_eq!(visited, vec![1, 2, 4]);
    assert_eq!(store.executed(), vec!["up 1", "up 2", "up 4"]);
    assert_eq!(report.final_state, VersionState::new(4, false));
}

#[tokio::test]
async fn test_bulk_scan_skips_malformed_keys() {
    let store = MemoryStore::new();
    let m = migrator(
        vec![
            ("abc_bad_migration.sql".to_string(), "garbage".to_string()),
            ("1_init.up.sql".to_string(), "create".to_string()),
        ],
        store.driver(),
    );

    assert_eq!(m.source().index().len(), 1);
    m.up().await.unwrap();
    assert_eq!(store.executed(), vec!["create"]);
}

#[tokio::test]
async fn test_unrecordable_versions_are_never_applied() {
    let store = MemoryStore::new();
    let m = migrator(
        vec![
            ("1_a.up.sql".to_string(), "up 1".to_string()),
            ("9223372036854775807_last.up.sql".to_string(), "up last".to_string()),
            ("10000000000000000000_big.up.sql".to_string(), "up big".to_string()),
        ],
        store.driver(),
    );

    let report = m.steps(5).await.unwrap();

    let applied: Vec<u64> = report.applied.iter().map(|s| s.version).collect();
    assert_eq!(applied, vec![1, 9223372036854775807]);
    assert_eq!(store.executed(), vec!["up 1", "up last"]);
    assert_eq!(report.final_state, VersionState::new(i64::MAX, false));
    assert!(m.up().await.unwrap().is_noop());
    assert_eq!(store.executed().len(), 2);
}

#[tokio::test]
async fn test_down_one_step_lands_on_previous_version() {
    let store = MemoryStore::new();
    store.set_record(Some(VersionState::new(2, false)));
    let m = migrator(scripts(&[1, 2]), store.driver());

    m.steps(-1).await.unwrap();
    assert_eq!(store.executed(), vec!["down 2"]);
    assert_eq!(m.version().await.unwrap(), VersionState::new(1, false));
}

#[tokio::test]
async fn test_down_past_first_version_clears_record() {
    let store = MemoryStore::new();
    store.set_record(Some(VersionState::new(2, false)));
    let m = migrator(scripts(&[2]), store.driver());

    m.steps(-1).await.unwrap();
    assert_eq!(store.executed(), vec!["down 2"]);
    assert_eq!(m.version().await.unwrap(), VersionState::NIL);
    assert_eq!(store.record(), None);
}

#[tokio::test]
async fn test_cancel_between_steps_leaves_clean_state() {
    let store = MemoryStore::new();
    let token = CancellationToken::new();
    let driver = CancelAfter {
        inner: store.driver(),
        token: token.clone(),
        after: 1,
        runs: AtomicUsize::new(0),
    };
    let m = migrator(scripts(&[1, 2, 3]), driver).with_cancellation(token);

    let report = m.steps(3).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.final_state, VersionState::new(1, false));
    assert_eq!(m.version().await.unwrap(), VersionState::new(1, false));
    assert!(!store.is_locked());
}

#[tokio::test]
async fn test_exhausted_index_is_not_an_error() {
    let store = MemoryStore::new();
    let m = migrator(scripts(&[1, 2]), store.driver());

    let report = m.steps(5).await.unwrap();
    assert_eq!(report.applied.len(), 2);
    assert!(!report.cancelled);

    let report = m.up().await.unwrap();
    assert!(report.is_noop());

    let report = m.down().await.unwrap();
    assert_eq!(report.final_state, VersionState::NIL);
    assert!(m.down().await.unwrap().is_noop());
}

#[tokio::test]
async fn test_goto_unknown_version_takes_no_lock() {
    let store = MemoryStore::new();
    let m = migrator(scripts(&[1, 2]), store.driver());

    assert!(matches!(m.migrate(9).await, Err(Error::NotFound { version: 9 })));
    assert!(store.history().is_empty());
    assert!(!store.is_locked());
}

#[tokio::test]
async fn test_goto_down_stops_at_target() {
    let store = MemoryStore::new();
    store.set_record(Some(VersionState::new(5, false)));
    let m = migrator(scripts(&[1, 3, 5]), store.driver());

    m.migrate(1).await.unwrap();
    assert_eq!(store.executed(), vec!["down 5", "down 3"]);
    assert_eq!(m.version().await.unwrap(), VersionState::new(1, false));
}

#[tokio::test]
async fn test_plan_does_not_touch_store() {
    let store = MemoryStore::new();
    let m = migrator(scripts(&[1, 2, 3]), store.driver());

    let steps = m.plan(Target::Steps(2)).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[1].to, 2);
    assert!(store.history().is_empty());
    assert!(!store.is_locked());
}

#[tokio::test]
async fn test_force_and_drop() {
    let store = MemoryStore::new();
    let m = migrator(scripts(&[1, 2]), store.driver());

    assert!(matches!(m.force(-2).await, Err(Error::InvalidVersion(-2))));

    m.force(NIL_VERSION).await.unwrap();
    assert_eq!(store.record(), None);

    m.up().await.unwrap();
    m.drop_all().await.unwrap();
    assert_eq!(m.version().await.unwrap(), VersionState::NIL);
    assert!(store.executed().is_empty());
    assert!(!store.is_locked());

    m.close().await.unwrap();
}
