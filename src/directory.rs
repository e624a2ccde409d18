//! Arbitration of the driver's state directory: detect a live peer, salvage
//! the error log a dead one left behind, then reclaim the directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};

use crate::cnc_descriptor::CNC_FILE;
use crate::cnc::CncFile;
use crate::concurrent::ringbuffer::ManyToOneRingBuffer;
use crate::error::{DriverError, Result};
use crate::error_log::read_error_log;
use crate::time::EpochClock;

/// Decide whether the driver that owns `cnc` is still alive: the file is
/// marked ready and its consumer heartbeat is fresher than `timeout_ms`.
pub fn is_driver_active(cnc: &CncFile, now_ms: i64, timeout_ms: i64) -> bool {
    if !cnc.is_ready() {
        return false;
    }

    match ManyToOneRingBuffer::new(cnc.to_driver_buffer()) {
        Ok(ring) => now_ms - ring.consumer_heartbeat_time() <= timeout_ms,
        Err(_) => false,
    }
}

/// Dump any recorded distinct errors from `cnc` to a timestamped file beside
/// the state directory. Returns the file path, or `None` when the log holds
/// no observations.
pub fn save_existing_errors(dir: &Path, cnc: &CncFile, now_ms: i64) -> Result<Option<PathBuf>> {
    let mut records = Vec::new();
    read_error_log(&cnc.error_log_buffer(), |record| records.push(record));

    if records.is_empty() {
        return Ok(None);
    }

    let timestamp = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d-%H-%M-%S-%3fZ");
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "driver".to_string());
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    let path = parent.join(format!("{}-{}-error.log", dir_name, timestamp));

    let mut file = fs::File::create(&path)
        .map_err(|e| DriverError::io(format!("creating error dump {}", path.display()), e))?;

    for record in &records {
        writeln!(
            file,
            "***\n{} observations from {} to {} for:\n{}",
            record.observation_count,
            record.first_observation_timestamp,
            record.last_observation_timestamp,
            record.encoded_error,
        )
        .map_err(|e| DriverError::io(format!("writing error dump {}", path.display()), e))?;
    }

    tracing::info!(
        count = records.len(),
        path = %path.display(),
        "salvaged error log from previous driver"
    );
    Ok(Some(path))
}

/// Locate, arbitrate, and recreate the driver's state directory.
///
/// An existing directory is probed through its CnC file: a live peer is fatal
/// and mutates nothing; a dead one has its distinct errors handed to
/// `salvage` before the directory is removed and recreated.
pub fn ensure_directory_is_recreated<F>(
    dir: &Path,
    driver_timeout_ms: i64,
    warn_if_exists: bool,
    delete_on_start: bool,
    epoch_clock: &dyn EpochClock,
    salvage: F,
) -> Result<()>
where
    F: FnOnce(&CncFile) -> Result<()>,
{
    if !dir.exists() {
        return create_dir(dir);
    }

    if warn_if_exists {
        eprintln!("WARNING: {} exists", dir.display());
    }

    if !delete_on_start {
        let cnc_path = dir.join(CNC_FILE);
        if let Ok(cnc) = CncFile::map_existing(&cnc_path) {
            if is_driver_active(&cnc, epoch_clock.time_ms(), driver_timeout_ms) {
                return Err(DriverError::ActiveDriver {
                    dir: dir.to_path_buf(),
                });
            }
            salvage(&cnc)?;
        }
    }

    fs::remove_dir_all(dir)
        .map_err(|e| DriverError::io(format!("removing state dir {}", dir.display()), e))?;
    create_dir(dir)
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| DriverError::io(format!("creating state dir {}", dir.display()), e))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::cnc::CncLengths;
    use crate::concurrent::broadcast;
    use crate::concurrent::ringbuffer::buffer_descriptor;
    use crate::error_log::DistinctErrorLog;
    use crate::time::ManualClock;

    fn small_lengths() -> CncLengths {
        CncLengths {
            to_driver: 1024 + buffer_descriptor::TRAILER_LENGTH,
            to_clients: 1024 + broadcast::buffer_descriptor::TRAILER_LENGTH,
            counters_metadata: 2048,
            counters_values: 1024,
            error_log: 4096,
        }
    }

    fn seeded_cnc(dir: &Path, ready: bool, heartbeat_ms: i64) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let cnc_path = dir.join(CNC_FILE);
        let mut cnc = CncFile::create(&cnc_path, &small_lengths(), 0, 0).unwrap();

        let mut ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer()).unwrap();
        ring.update_consumer_heartbeat_time(heartbeat_ms);
        if ready {
            cnc.signal_ready();
        }
        cnc_path
    }

    #[test]
    fn fresh_heartbeat_is_fatal_and_mutates_nothing() {
        let parent = tempdir().unwrap();
        let dir = parent.path().join("driver");
        let cnc_path = seeded_cnc(&dir, true, 1_000_000);

        let clock = ManualClock::new(1_000_500);
        let result = ensure_directory_is_recreated(&dir, 5_000, false, false, &*clock, |_| Ok(()));

        match result {
            Err(DriverError::ActiveDriver { dir: reported }) => assert_eq!(reported, dir),
            other => panic!("expected ActiveDriver, got {:?}", other.map(|_| ())),
        }
        assert!(cnc_path.exists());
    }

    #[test]
    fn stale_heartbeat_is_salvaged_and_reclaimed() {
        let parent = tempdir().unwrap();
        let dir = parent.path().join("driver");
        let cnc_path = seeded_cnc(&dir, true, 1_000_000);

        // Seed two distinct errors for the salvager
        {
            let cnc = CncFile::map_existing(&cnc_path).unwrap();
            let log = DistinctErrorLog::new(cnc.error_log_buffer());
            assert!(log.record(1_000_000, "first failure"));
            assert!(log.record(1_000_001, "second failure"));
        }

        let clock = ManualClock::new(1_000_000 + 50_000);
        let mut salvaged = None;
        ensure_directory_is_recreated(&dir, 5_000, false, false, &*clock, |cnc| {
            salvaged = save_existing_errors(&dir, cnc, 1_050_000)?;
            Ok(())
        })
        .unwrap();

        let dump = salvaged.expect("errors should have been salvaged");
        let content = fs::read_to_string(&dump).unwrap();
        assert!(content.contains("first failure"));
        assert!(content.contains("second failure"));

        // Directory recreated empty
        assert!(dir.exists());
        assert!(!cnc_path.exists());
    }

    #[test]
    fn unready_cnc_is_reclaimed_without_liveness_check() {
        let parent = tempdir().unwrap();
        let dir = parent.path().join("driver");
        seeded_cnc(&dir, false, i64::max_value());

        let clock = ManualClock::new(0);
        ensure_directory_is_recreated(&dir, 5_000, false, false, &*clock, |_| Ok(()))
            .unwrap();
        assert!(dir.exists());
        assert!(!dir.join(CNC_FILE).exists());
    }

    #[test]
    fn delete_on_start_skips_probing() {
        let parent = tempdir().unwrap();
        let dir = parent.path().join("driver");
        // A live-looking peer is still removed when delete_on_start is set
        seeded_cnc(&dir, true, i64::max_value() / 2);

        let clock = ManualClock::new(i64::max_value() / 2);
        ensure_directory_is_recreated(&dir, 5_000, false, true, &*clock, |_| {
            panic!("salvage must not run when delete_on_start is set")
        })
        .unwrap();
        assert!(!dir.join(CNC_FILE).exists());
    }
}
