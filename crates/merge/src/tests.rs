use super::*;
use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

fn append_to(path: &Path, data: &[u8]) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(data).unwrap();
}

fn injected() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "injected fault")
}

/// Appends the first `limit` bytes of the source, optionally lets a
/// "producer" write into the fresh cache file, then fails.
struct FailingAppender {
    limit: usize,
    producer: Option<(PathBuf, Vec<u8>)>,
}

impl FailingAppender {
    fn after(limit: usize) -> Self {
        Self {
            limit,
            producer: None,
        }
    }
}

impl Appender for FailingAppender {
    fn append(&self, source: &Path, dest: &Path) -> Result<u64, AppendFailure> {
        let data = fs::read(source).unwrap();
        let n = self.limit.min(data.len());
        append_to(dest, &data[..n]);
        if let Some((cache, new_bytes)) = &self.producer {
            append_to(cache, new_bytes);
        }
        Err(AppendFailure {
            written: n as u64,
            error: injected(),
        })
    }
}

/// Deletes the staging file before failing, so the restore has nothing to
/// rename.
struct VanishingAppender;

impl Appender for VanishingAppender {
    fn append(&self, source: &Path, _dest: &Path) -> Result<u64, AppendFailure> {
        fs::remove_file(source).unwrap();
        Err(AppendFailure {
            written: 0,
            error: injected(),
        })
    }
}

struct PanickingAppender;

impl Appender for PanickingAppender {
    fn append(&self, _source: &Path, _dest: &Path) -> Result<u64, AppendFailure> {
        panic!("appender blew up");
    }
}

// -------------------- Probe --------------------

#[test]
fn probe_reports_size() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("a.log");
    fs::write(&path, bytes(1234, 0))?;
    assert_eq!(SizeProbe::size(&path)?, 1234);
    Ok(())
}

#[test]
fn probe_threshold_is_inclusive() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("a.log");
    fs::write(&path, bytes(1000, 0))?;
    assert!(SizeProbe::at_or_above(&path, 1000)?);
    assert!(SizeProbe::at_or_above(&path, 999)?);
    assert!(!SizeProbe::at_or_above(&path, 1001)?);
    Ok(())
}

#[test]
fn probe_missing_file_is_not_found() {
    let dir = tempdir().unwrap();
    let err = SizeProbe::size(dir.path().join("nope.log")).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn io_errors_are_classified() {
    let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
    assert!(matches!(
        MergeError::io("a.log", denied),
        MergeError::Access { .. }
    ));
    let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
    assert!(MergeError::io("a.log", missing).is_not_found());
    assert!(matches!(
        MergeError::io("a.log", injected()),
        MergeError::Io { .. }
    ));
}

// -------------------- Successful merges --------------------

#[test]
fn merge_appends_cache_to_aggregate() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    let old = bytes(500, 7);
    let new = bytes(2000, 100);
    fs::write(&aggregate, &old)?;
    fs::write(&cache, &new)?;

    let job = MergeJob::new(&cache, &aggregate, 1);
    let report = MergeExecutor::new(false).merge(&job)?;

    assert_eq!(report.bytes_moved, 2000);
    assert_eq!(report.aggregate_size, 2500);
    assert_eq!(report.reconciled_bytes, 0);
    assert_eq!(fs::metadata(&cache)?.len(), 0);
    assert_eq!(fs::read(&aggregate)?, [old, new].concat());
    assert!(!job.staging_path.exists());
    Ok(())
}

#[test]
fn merge_creates_missing_aggregate() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(&cache, b"first batch\n")?;

    let report = MergeExecutor::new(true).merge(&MergeJob::new(&cache, &aggregate, 1))?;

    assert_eq!(report.aggregate_size, 12);
    assert_eq!(fs::read(&aggregate)?, b"first batch\n");
    assert_eq!(fs::read(&cache)?, b"");
    Ok(())
}

#[test]
fn repeated_merges_concatenate_in_order() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    let exec = MergeExecutor::new(false);

    for batch in ["one\n", "two\n", "three\n"] {
        append_to(&cache, batch.as_bytes());
        exec.merge(&MergeJob::new(&cache, &aggregate, 1))?;
    }

    assert_eq!(fs::read_to_string(&aggregate)?, "one\ntwo\nthree\n");
    assert_eq!(fs::metadata(&cache)?.len(), 0);
    Ok(())
}

#[test]
fn merge_of_missing_cache_is_not_found() {
    let dir = tempdir().unwrap();
    let job = MergeJob::new(dir.path().join("a.log"), dir.path().join("a.big"), 1);
    let err = MergeExecutor::new(false).merge(&job).unwrap_err();
    assert!(err.is_not_found());
    assert!(!dir.path().join("a.big").exists());
}

#[test]
fn job_derives_staging_path() {
    let job = MergeJob::new("/logs/a.log", "/archive/a.big", 10);
    assert_eq!(job.staging_path, PathBuf::from("/logs/a.log.tmp"));
    assert_eq!(job.aggregate_path, PathBuf::from("/archive/a.big"));
    assert_eq!(job.threshold, 10);
}

// -------------------- Append failures --------------------

#[test]
fn fault_after_full_append_restores_cache() -> Result<()> {
    // append wrote 2000 of 2000 bytes, then reported failure
    let dir = tempdir()?;
    let cache = dir.path().join("b.log");
    let aggregate = dir.path().join("b.big");
    let data = bytes(2000, 3);
    fs::write(&cache, &data)?;

    let exec = MergeExecutor::with_appender(FailingAppender::after(2000), false);
    let err = exec.merge(&MergeJob::new(&cache, &aggregate, 1000)).unwrap_err();

    match err {
        MergeError::PartialAppend { bytes_written, .. } => assert_eq!(bytes_written, 2000),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fs::read(&cache)?, data, "cache must hold every original byte");
    // duplicate prefix allowed, never short
    assert_eq!(fs::read(&aggregate)?, data);
    assert!(!dir.path().join("b.log.tmp").exists());
    Ok(())
}

#[test]
fn fault_before_any_byte_leaves_aggregate_unchanged() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(&cache, b"payload")?;
    fs::write(&aggregate, b"existing")?;

    let exec = MergeExecutor::with_appender(FailingAppender::after(0), false);
    assert!(exec.merge(&MergeJob::new(&cache, &aggregate, 1)).is_err());

    assert_eq!(fs::read(&aggregate)?, b"existing");
    assert_eq!(fs::read(&cache)?, b"payload");
    Ok(())
}

#[test]
fn partial_append_duplicates_prefix_on_retry() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(&cache, b"abcdefgh")?;

    let failing = MergeExecutor::with_appender(FailingAppender::after(3), false);
    assert!(failing.merge(&MergeJob::new(&cache, &aggregate, 1)).is_err());
    assert_eq!(fs::read(&aggregate)?, b"abc");
    assert_eq!(fs::read(&cache)?, b"abcdefgh");

    MergeExecutor::new(false).merge(&MergeJob::new(&cache, &aggregate, 1))?;
    assert_eq!(fs::read(&aggregate)?, b"abcabcdefgh");
    assert_eq!(fs::read(&cache)?, b"");
    Ok(())
}

#[test]
fn restore_keeps_bytes_written_after_detach() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(&cache, b"old-")?;

    let appender = FailingAppender {
        limit: 0,
        producer: Some((cache.clone(), b"new".to_vec())),
    };
    let exec = MergeExecutor::with_appender(appender, true);
    assert!(exec.merge(&MergeJob::new(&cache, &aggregate, 1)).is_err());

    assert_eq!(fs::read(&cache)?, b"old-new");
    Ok(())
}

#[test]
fn unusable_aggregate_restores_cache() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::create_dir(&aggregate)?;
    fs::write(&cache, b"keep me")?;

    let err = MergeExecutor::new(false)
        .merge(&MergeJob::new(&cache, &aggregate, 1))
        .unwrap_err();

    assert!(matches!(err, MergeError::PartialAppend { bytes_written: 0, .. }));
    assert_eq!(fs::read(&cache)?, b"keep me");
    assert!(!dir.path().join("a.log.tmp").exists());
    Ok(())
}

#[test]
fn failed_restore_is_reported() {
    let dir = tempdir().unwrap();
    let cache = dir.path().join("a.log");
    fs::write(&cache, b"data").unwrap();

    let exec = MergeExecutor::with_appender(VanishingAppender, false);
    let err = exec
        .merge(&MergeJob::new(&cache, dir.path().join("a.big"), 1))
        .unwrap_err();
    assert!(matches!(err, MergeError::Restore { .. }), "got {err}");
}

#[test]
fn panic_during_append_restores_cache() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(&cache, b"survives a panic")?;

    let exec = MergeExecutor::with_appender(PanickingAppender, false);
    let job = MergeJob::new(&cache, &aggregate, 1);
    let result = panic::catch_unwind(AssertUnwindSafe(|| exec.merge(&job)));

    assert!(result.is_err());
    assert_eq!(fs::read(&cache)?, b"survives a panic");
    assert!(!job.staging_path.exists());
    assert!(!aggregate.exists());
    Ok(())
}

// -------------------- Restore --------------------

#[test]
fn restore_keeps_writes_racing_the_rename() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let staging = dir.path().join("a.log.tmp");
    fs::write(&staging, b"old-")?;
    fs::write(&cache, b"new-")?;

    // a producer thread appends by path after the copy, before the rename
    let producer_path = cache.clone();
    guard::restore_staging_with(&staging, &cache, false, move || {
        std::thread::spawn(move || append_to(&producer_path, b"late"))
            .join()
            .unwrap();
    })?;

    assert_eq!(fs::read(&cache)?, b"old-new-late");
    assert!(!staging.exists());
    Ok(())
}

#[test]
fn restore_without_cache_file_renames_staging() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let staging = dir.path().join("a.log.tmp");
    fs::write(&staging, b"only copy")?;

    guard::restore_staging(&staging, &cache, true)?;

    assert_eq!(fs::read(&cache)?, b"only copy");
    assert!(!staging.exists());
    Ok(())
}

#[test]
fn synced_merge_creates_aggregate_and_removes_staging() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("nested.big");
    fs::write(&cache, b"durable")?;

    let report = MergeExecutor::new(true).merge(&MergeJob::new(&cache, &aggregate, 1))?;

    assert_eq!(report.bytes_moved, 7);
    assert_eq!(fs::read(&aggregate)?, b"durable");
    assert_eq!(fs::read(&cache)?, b"");
    assert!(!dir.path().join("a.log.tmp").exists());
    Ok(())
}

#[test]
fn synced_restore_after_failed_append() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(&cache, b"abcdef")?;

    let exec = MergeExecutor::with_appender(FailingAppender::after(2), true);
    let err = exec.merge(&MergeJob::new(&cache, &aggregate, 1)).unwrap_err();

    assert!(matches!(err, MergeError::PartialAppend { bytes_written: 2, .. }));
    assert_eq!(fs::read(&cache)?, b"abcdef");
    assert!(!dir.path().join("a.log.tmp").exists());
    Ok(())
}

#[test]
fn parent_dir_sync_tolerates_bare_and_missing_paths() {
    executor::sync_parent_dir(Path::new("a.log"));
    executor::sync_parent_dir(Path::new("/definitely/not/here/a.log"));
    executor::sync_parent_dir(Path::new("/"));
}

// -------------------- Reconciliation --------------------

#[test]
fn reconcile_without_staging_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(&cache, b"x")?;

    let out = MergeExecutor::new(false).reconcile(&cache, &aggregate)?;
    assert_eq!(out, None);
    assert!(!aggregate.exists());
    assert_eq!(fs::read(&cache)?, b"x");
    Ok(())
}

#[test]
fn reconcile_folds_staging_and_keeps_new_cache_bytes() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(&aggregate, b"archived|")?;
    fs::write(dir.path().join("a.log.tmp"), b"dangling|")?;
    fs::write(&cache, b"fresh")?;

    let out = MergeExecutor::new(false).reconcile(&cache, &aggregate)?;

    assert_eq!(out, Some(9));
    assert_eq!(fs::read(&aggregate)?, b"archived|dangling|");
    assert_eq!(fs::read(&cache)?, b"fresh");
    assert!(!dir.path().join("a.log.tmp").exists());
    Ok(())
}

#[test]
fn crash_after_detach_is_recovered() -> Result<()> {
    // crashed between rename and recreate: only the staging file exists
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(dir.path().join("a.log.tmp"), b"detached")?;

    MergeExecutor::new(false).reconcile(&cache, &aggregate)?;

    assert_eq!(fs::read(&aggregate)?, b"detached");
    assert!(cache.exists(), "cache file must be recreated");
    assert_eq!(fs::metadata(&cache)?.len(), 0);
    Ok(())
}

#[test]
fn crash_after_append_duplicates_but_never_loses() -> Result<()> {
    // crashed after a complete append but before the staging file was deleted
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(&aggregate, b"batch")?;
    fs::write(dir.path().join("a.log.tmp"), b"batch")?;
    fs::write(&cache, b"")?;

    MergeExecutor::new(false).reconcile(&cache, &aggregate)?;

    assert_eq!(fs::read(&aggregate)?, b"batchbatch");
    Ok(())
}

#[test]
fn crash_during_restore_is_recovered() -> Result<()> {
    // crashed after copying the new cache bytes into staging but before the
    // rename: both files hold "new"
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(dir.path().join("a.log.tmp"), b"old+new")?;
    fs::write(&cache, b"new")?;

    let report = MergeExecutor::new(false).merge(&MergeJob::new(&cache, &aggregate, 1))?;

    assert_eq!(report.reconciled_bytes, 7);
    assert_eq!(report.bytes_moved, 3);
    assert_eq!(fs::read(&aggregate)?, b"old+newnew");
    Ok(())
}

#[test]
fn merge_reconciles_before_detaching() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::write(dir.path().join("a.log.tmp"), b"older ")?;
    fs::write(&cache, b"newer")?;

    let report = MergeExecutor::new(false).merge(&MergeJob::new(&cache, &aggregate, 1))?;

    assert_eq!(report.reconciled_bytes, 6);
    assert_eq!(report.bytes_moved, 5);
    assert_eq!(report.aggregate_size, 11);
    assert_eq!(fs::read(&aggregate)?, b"older newer");
    Ok(())
}

#[test]
fn failed_reconcile_aborts_job() -> Result<()> {
    let dir = tempdir()?;
    let cache = dir.path().join("a.log");
    let aggregate = dir.path().join("a.big");
    fs::create_dir(&aggregate)?;
    fs::write(dir.path().join("a.log.tmp"), b"stuck")?;
    fs::write(&cache, b"waiting")?;

    let err = MergeExecutor::new(false)
        .merge(&MergeJob::new(&cache, &aggregate, 1))
        .unwrap_err();

    assert!(matches!(err, MergeError::Reconcile { .. }), "got {err}");
    assert_eq!(fs::read(dir.path().join("a.log.tmp"))?, b"stuck");
    assert_eq!(fs::read(&cache)?, b"waiting");
    Ok(())
}
