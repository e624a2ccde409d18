//! Agent hosting per threading mode, and the inline-dispatch invariant of
//! the single-threaded modes.
use std::mem::size_of;
use std::path::Path;

use tempfile::tempdir;

use rivulet_driver::cnc::CncFile;
use rivulet_driver::cnc_descriptor::CNC_FILE;
use rivulet_driver::command::flyweight::Flyweight;
use rivulet_driver::command::subscription_message::SubscriptionMessageDefn;
use rivulet_driver::concurrent::broadcast::BroadcastReceiver;
use rivulet_driver::concurrent::ringbuffer::ManyToOneRingBuffer;
use rivulet_driver::config::ThreadingMode;
use rivulet_driver::context::DriverContext;
use rivulet_driver::control_protocol::{ClientCommand, DriverEvent};
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
fn runner_counts_match_threading_mode() {
    let cases = [
        (ThreadingMode::Dedicated, 3, false),
        (ThreadingMode::SharedNetwork, 2, false),
        (ThreadingMode::Shared, 1, false),
        (ThreadingMode::Invoker, 0, true),
    ];

    for &(mode, expected_runners, expect_invoker) in cases.iter() {
        let parent = tempdir().unwrap();
        let dir = parent.path().join("driver");

        let mut driver =
            MediaDriver::launch(test_context(&dir).set_threading_mode(mode)).unwrap();

        assert_eq!(driver.runner_count(), expected_runners, "mode {:?}", mode);
        assert_eq!(driver.invoker().is_some(), expect_invoker, "mode {:?}", mode);
        driver.close();
    }
}

#[test]
fn invoker_mode_dispatches_inline_without_queueing() {
    let parent = tempdir().unwrap();
    let dir = parent.path().join("driver");

    let mut driver =
        MediaDriver::launch(test_context(&dir).set_threading_mode(ThreadingMode::Invoker))
            .unwrap();

    // Client side: map the CnC file, watch the broadcast, write a command
    let cnc = CncFile::map_existing(&dir.join(CNC_FILE)).unwrap();
    assert!(cnc.is_ready());
    let mut events = BroadcastReceiver::new(cnc.to_clients_buffer()).unwrap();
    let mut ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer()).unwrap();

    let channel = "udp://127.0.0.1:0";
    let mut body = vec![0u8; 128];
    let length = {
        let buffer = &mut body[..];
        let mut message = Flyweight::new::<SubscriptionMessageDefn>(buffer, 0).unwrap();
        message
            .put_client_id(ring.next_correlation_id())
            .put_correlation_id(ring.next_correlation_id())
            .put_registration_correlation_id(-1)
            .put_stream_id(1001);
        message.put_channel(channel).unwrap();
        size_of::<SubscriptionMessageDefn>() as IndexT + 4 + channel.len() as IndexT
    };
    assert!(ring
        .write(ClientCommand::AddSubscription as i32, &body, 0, length)
        .unwrap());

    // The caller's thread is the only duty cycle: the command is consumed
    // and the subscription handed to the receiver synchronously
    let invoker = driver.invoker().unwrap();
    let mut work = 0;
    for _ in 0..10 {
        work += invoker.invoke();
    }
    assert!(work > 0);

    // The inter-agent queues never saw the command
    assert_eq!(driver.command_queue_depths(), (0, 0, 0));
    let counters = driver.context().system_counters();
    assert_eq!(counters.sender_proxy_fails().get(), 0);
    assert_eq!(counters.receiver_proxy_fails().get(), 0);
    assert_eq!(counters.conductor_proxy_fails().get(), 0);
    assert_eq!(counters.errors().get(), 0);

    // The client observes the registration event
    assert_eq!(events.receive_next(), Ok(true));
    assert_eq!(
        events.msg_type_id(),
        Ok(DriverEvent::OnSubscriptionReady as i32)
    );

    driver.close();
}
