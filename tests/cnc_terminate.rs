//! A client process can command driver termination through the CnC file.
use std::path::Path;
use std::thread;
use std::time::Duration;

use tempfile::tempdir;

use rivulet_driver::cnc::CncFile;
use rivulet_driver::cnc_descriptor::CNC_FILE;
use rivulet_driver::command::correlated_message::CorrelatedMessageDefn;
use rivulet_driver::command::flyweight::Flyweight;
use rivulet_driver::concurrent::ringbuffer::ManyToOneRingBuffer;
use rivulet_driver::config::ThreadingMode;
use rivulet_driver::context::DriverContext;
use rivulet_driver::control_protocol::ClientCommand;
use rivulet_driver::driver::MediaDriver;
use rivulet_driver::util::IndexT;

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

#[test]
fn cnc_terminate() {
    let parent = tempdir().unwrap();
    let dir = parent.path().join("driver");

    let mut driver =
        MediaDriver::launch(test_context(&dir).set_threading_mode(ThreadingMode::Shared))
            .unwrap();
    assert!(!driver.is_terminated());

    // A second mapping of the CnC file stands in for a client process
    let cnc = CncFile::map_existing(&dir.join(CNC_FILE)).unwrap();
    assert!(cnc.is_ready());

    let mut ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer()).unwrap();
    let client_id = ring.next_correlation_id();

    let mut body = vec![0u8; 16];
    {
        let buffer = &mut body[..];
        let mut message = Flyweight::new::<CorrelatedMessageDefn>(buffer, 0).unwrap();
        message.put_client_id(client_id).put_correlation_id(-1);
    }
    assert!(ring
        .write(
            ClientCommand::TerminateDriver as i32,
            &body,
            0,
            body.len() as IndexT,
        )
        .unwrap());

    let mut terminated = false;
    for _ in 0..500 {
        if driver.is_terminated() {
            terminated = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(terminated, "driver should observe the termination command");

    driver.close();
}
