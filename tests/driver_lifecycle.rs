//! End-to-end lifecycle scenarios: fresh start, peer arbitration, salvage,
//! configuration rejection, and clean shutdown.
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tempfile::tempdir;

use rivulet_driver::cnc::{CncFile, CncLengths};
use rivulet_driver::cnc_descriptor::CNC_FILE;
use rivulet_driver::concurrent::broadcast;
use rivulet_driver::concurrent::ringbuffer::{buffer_descriptor, ManyToOneRingBuffer};
use rivulet_driver::config::ThreadingMode;
use rivulet_driver::context::DriverContext;
use rivulet_driver::driver::MediaDriver;
use rivulet_driver::error::DriverError;
use rivulet_driver::error_log::DistinctErrorLog;
use rivulet_driver::time::{EpochClock, SystemEpochClock};

fn test_context(dir: &Path) -> DriverContext {
    DriverContext::default()
        .set_dir(dir)
        .set_to_driver_buffer_length(64 * 1024)
        .set_to_clients_buffer_length(64 * 1024)
        .set_counters_values_buffer_length(64 * 1024)
        .set_error_buffer_length(64 * 1024)
        .set_loss_report_buffer_length(64 * 1024)
        .set_publication_term_buffer_length(64 * 1024)
        .set_ipc_publication_term_buffer_length(64 * 1024)
        .set_max_term_buffer_length(1024 * 1024)
}

fn seeded_cnc(dir: &Path, heartbeat_ms: i64) -> CncFile {
    fs::create_dir_all(dir).unwrap();
    let lengths = CncLengths {
        to_driver: 4096 + buffer_descriptor::TRAILER_LENGTH,
        to_clients: 4096 + broadcast::buffer_descriptor::TRAILER_LENGTH,
        counters_metadata: 8192,
        counters_values: 4096,
        error_log: 8192,
    };
    let mut cnc = CncFile::create(&dir.join(CNC_FILE), &lengths, 0, 0).unwrap();
    let mut ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer()).unwrap();
    ring.update_consumer_heartbeat_time(heartbeat_ms);
    cnc.signal_ready();
    cnc
}

#[test]
fn fresh_start_dedicated() {
    let parent = tempdir().unwrap();
    let dir = parent.path().join("driver");

    let mut driver =
        MediaDriver::launch(test_context(&dir).set_threading_mode(ThreadingMode::Dedicated))
            .unwrap();

    assert_eq!(driver.runner_count(), 3);

    // A second process mapping the file sees it ready, with the header
    // lengths matching the file's actual size
    let cnc = CncFile::map_existing(&dir.join(CNC_FILE)).unwrap();
    assert!(cnc.is_ready());
    let metadata = cnc.metadata();
    assert_eq!(
        metadata.to_driver_buffer_length,
        64 * 1024 + buffer_descriptor::TRAILER_LENGTH
    );
    assert_eq!(
        metadata.expected_file_length() as u64,
        fs::metadata(dir.join(CNC_FILE)).unwrap().len()
    );
    assert!(dir.join("loss-report.dat").exists());

    assert_eq!(driver.context().system_counters().errors().get(), 0);
    driver.close();
}

#[test]
fn conductor_refreshes_the_heartbeat() {
    let parent = tempdir().unwrap();
    let dir = parent.path().join("driver");

    let mut driver =
        MediaDriver::launch(test_context(&dir).set_threading_mode(ThreadingMode::Dedicated))
            .unwrap();

    let cnc = CncFile::map_existing(&dir.join(CNC_FILE)).unwrap();
    let ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer()).unwrap();
    let first = ring.consumer_heartbeat_time();
    assert!(first > 0);

    let mut advanced = false;
    for _ in 0..200 {
        if ring.consumer_heartbeat_time() > first {
            advanced = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(advanced, "heartbeat should advance while the conductor runs");
    driver.close();
}

#[test]
fn live_peer_is_refused_without_mutation() {
    let parent = tempdir().unwrap();
    let dir = parent.path().join("driver");

    let now_ms = SystemEpochClock::default().time_ms();
    drop(seeded_cnc(&dir, now_ms));
    let length_before = fs::metadata(dir.join(CNC_FILE)).unwrap().len();

    match MediaDriver::launch(test_context(&dir)) {
        Err(DriverError::ActiveDriver { dir: reported }) => assert_eq!(reported, dir),
        other => panic!("expected ActiveDriver, got {:?}", other.map(|_| ())),
    }

    // Nothing was deleted or resized, and the peer still reads as ready
    assert_eq!(
        fs::metadata(dir.join(CNC_FILE)).unwrap().len(),
        length_before
    );
    assert!(CncFile::map_existing(&dir.join(CNC_FILE)).unwrap().is_ready());
}

#[test]
fn stale_peer_errors_are_salvaged_before_relaunch() {
    let parent = tempdir().unwrap();
    let dir = parent.path().join("driver");

    let now_ms = SystemEpochClock::default().time_ms();
    {
        let cnc = seeded_cnc(&dir, now_ms - 100_000);
        let log = DistinctErrorLog::new(cnc.error_log_buffer());
        assert!(log.record(now_ms - 100_000, "socket bind failed"));
        assert!(log.record(now_ms - 99_000, "endpoint did not resolve"));
    }

    let mut driver = MediaDriver::launch(
        test_context(&dir).set_warn_if_directory_exists(true),
    )
    .unwrap();
    driver.close();

    let dump = fs::read_dir(parent.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            name.starts_with("driver-") && name.ends_with("-error.log")
        })
        .expect("salvaged error log file should exist");

    let content = fs::read_to_string(&dump).unwrap();
    assert!(content.contains("socket bind failed"));
    assert!(content.contains("endpoint did not resolve"));
}

#[test]
fn configuration_rejection_cites_both_values_and_touches_nothing() {
    let parent = tempdir().unwrap();
    let dir = parent.path().join("driver");

    let result = MediaDriver::launch(
        test_context(&dir)
            .set_max_term_buffer_length(1024 * 1024)
            .set_publication_term_buffer_length(2 * 1024 * 1024),
    );

    match result {
        Err(DriverError::Configuration(message)) => {
            assert!(message.contains("2097152"));
            assert!(message.contains("1048576"));
        }
        other => panic!("expected Configuration, got {:?}", other.map(|_| ())),
    }
    assert!(!dir.exists());
}

#[test]
fn clean_shutdown_is_bounded_and_idempotent() {
    let parent = tempdir().unwrap();
    let dir = parent.path().join("driver");

    let mut driver =
        MediaDriver::launch(test_context(&dir).set_threading_mode(ThreadingMode::Dedicated))
            .unwrap();
    assert_eq!(driver.runner_count(), 3);

    driver.close();
    assert_eq!(driver.runner_count(), 0);
    driver.close();
    drop(driver);

    // Every mapping is released; the directory can be fully reclaimed
    fs::remove_dir_all(&dir).unwrap();
}
