//! The sender agent: owns every egress channel endpoint and reacts to
//! publication commands from the conductor. Frame encoding, pacing, and
//! retransmission live with the wire-protocol components; the lifecycle core
//! gives them a home, a duty cycle, and their command plumbing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::Agent;
use crate::concurrent::queue::OneToOneQueue;
use crate::counters::SystemCounters;
use crate::error::{DriverError, ErrorHandler, Result};
use crate::media::{
    ChannelFlowControlSupplier, FlowControl, SendChannelEndpoint, SendChannelEndpointSupplier,
};
use crate::proxy::{CommandConsumer, DriverConductorProxy, SenderCommand};
use crate::time::NanoClock;

/// How often an idle publication emits a liveness heartbeat
const HEARTBEAT_INTERVAL_NS: i64 = 100_000_000;

/// A zero-length data frame header; the protocol layer owns real encoding
const HEARTBEAT_FRAME_LENGTH: usize = 8;

struct SenderPublication {
    endpoint: Box<dyn SendChannelEndpoint>,
    flow_control: Box<dyn FlowControl>,
    position_limit: i64,
    destinations: Vec<String>,
    last_heartbeat_ns: i64,
}

/// Egress agent. Consumes the to-sender command queue; in the shared
/// threading modes the conductor dispatches into it directly instead.
pub struct Sender {
    command_queue: Arc<OneToOneQueue<SenderCommand>>,
    endpoint_supplier: SendChannelEndpointSupplier,
    flow_control_supplier: ChannelFlowControlSupplier,
    nano_clock: Arc<dyn NanoClock>,
    counters: Arc<SystemCounters>,
    publications: HashMap<i64, SenderPublication>,
    conductor_proxy: Option<DriverConductorProxy>,
    error_handler: ErrorHandler,
    initial_window_length: i64,
}

impl Sender {
    /// Create a sender draining `command_queue`
    pub fn new(
        command_queue: Arc<OneToOneQueue<SenderCommand>>,
        endpoint_supplier: SendChannelEndpointSupplier,
        flow_control_supplier: ChannelFlowControlSupplier,
        initial_window_length: i64,
        nano_clock: Arc<dyn NanoClock>,
        counters: Arc<SystemCounters>,
        error_handler: ErrorHandler,
    ) -> Sender {
        Sender {
            command_queue,
            endpoint_supplier,
            flow_control_supplier,
            nano_clock,
            counters,
            publications: HashMap::new(),
            conductor_proxy: None,
            error_handler,
            initial_window_length,
        }
    }

    /// Hand the sender its producer handle onto the conductor's command flow.
    /// Called once during driver assembly, after all three agents exist.
    pub fn wire(&mut self, conductor_proxy: DriverConductorProxy) {
        self.conductor_proxy = Some(conductor_proxy);
    }

    /// Number of live publications
    pub fn publication_count(&self) -> usize {
        self.publications.len()
    }

    /// Fold a receiver status message into a publication's flow control.
    /// Called by the wire-protocol layer when a status frame arrives.
    pub fn on_status_message(&mut self, registration_id: i64, position: i64, window_length: i64) {
        if let Some(publication) = self.publications.get_mut(&registration_id) {
            publication.position_limit = publication
                .flow_control
                .on_status_message(position, window_length);
            self.counters
                .get(crate::counters::SystemCounterId::StatusMessagesReceived)
                .increment();
        }
    }

    /// Current sender position limit for a publication, if it exists
    pub fn position_limit(&self, registration_id: i64) -> Option<i64> {
        self.publications
            .get(&registration_id)
            .map(|p| p.position_limit)
    }

    fn on_add_publication(&mut self, registration_id: i64, channel: String) {
        match (self.endpoint_supplier)(&channel) {
            Ok(endpoint) => {
                let flow_control = (self.flow_control_supplier)(&channel);
                let position_limit = flow_control.initial_position_limit(self.initial_window_length);
                self.publications.insert(
                    registration_id,
                    SenderPublication {
                        endpoint,
                        flow_control,
                        position_limit,
                        destinations: Vec::new(),
                        last_heartbeat_ns: self.nano_clock.nano_time(),
                    },
                );
            }
            Err(e) => (self.error_handler)(&DriverError::io(
                format!("creating send endpoint for {}", channel),
                e,
            )),
        }
    }

    fn heartbeat_idle_publications(&mut self) -> usize {
        let now_ns = self.nano_clock.nano_time();
        let mut work_count = 0;
        let frame = [0u8; HEARTBEAT_FRAME_LENGTH];

        for (&registration_id, publication) in self.publications.iter_mut() {
            if now_ns - publication.last_heartbeat_ns < HEARTBEAT_INTERVAL_NS {
                continue;
            }
            publication.last_heartbeat_ns = now_ns;

            match publication.endpoint.send(&frame) {
                Ok(sent) => {
                    self.counters
                        .get(crate::counters::SystemCounterId::BytesSent)
                        .add(sent as i64);
                    self.counters
                        .get(crate::counters::SystemCounterId::HeartbeatsSent)
                        .increment();
                    if sent < frame.len() {
                        self.counters
                            .get(crate::counters::SystemCounterId::ShortSends)
                            .increment();
                    }
                    work_count += 1;
                }
                Err(e) => {
                    // A dead endpoint is the conductor's problem to repair
                    if let Some(proxy) = &self.conductor_proxy {
                        proxy.re_resolve_endpoint(registration_id, publication.endpoint.channel());
                    }
                    (self.error_handler)(&DriverError::io(
                        format!("sending heartbeat on {}", publication.endpoint.channel()),
                        e,
                    ));
                }
            }
        }

        work_count
    }
}

impl CommandConsumer<SenderCommand> for Sender {
    fn accept(&mut self, command: SenderCommand) {
        match command {
            SenderCommand::AddPublication {
                registration_id,
                channel,
            } => self.on_add_publication(registration_id, channel),
            SenderCommand::RemovePublication { registration_id } => {
                self.publications.remove(&registration_id);
            }
            SenderCommand::AddDestination {
                registration_id,
                destination,
            } => {
                if let Some(publication) = self.publications.get_mut(&registration_id) {
                    publication.destinations.push(destination);
                }
            }
            SenderCommand::RemoveDestination {
                registration_id,
                destination,
            } => {
                if let Some(publication) = self.publications.get_mut(&registration_id) {
                    publication.destinations.retain(|d| d != &destination);
                }
            }
        }
    }
}

impl Agent for Sender {
    fn role_name(&self) -> &str {
        "sender"
    }

    fn do_work(&mut self) -> Result<usize> {
        let queue = Arc::clone(&self.command_queue);
        let mut work_count = queue.drain(|command| self.accept(command));
        work_count += self.heartbeat_idle_publications();
        Ok(work_count)
    }

    fn on_close(&mut self) {
        self.publications.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::concurrent::RawBuffer;
    use crate::counters::{CountersManager, COUNTER_LENGTH, METADATA_LENGTH};
    use crate::media::{udp_send_channel_endpoint_supplier, FlowControl, MaxFlowControl};
    use crate::time::SystemNanoClock;

    fn test_counters(bytes: &mut Vec<u8>) -> Arc<SystemCounters> {
        bytes.resize(64 * (METADATA_LENGTH + COUNTER_LENGTH), 0);
        let whole = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };
        let split = 64 * METADATA_LENGTH;
        let mut manager = CountersManager::new(
            whole.view(0, split),
            whole.view(split, bytes.len() - split),
            false,
        );
        Arc::new(SystemCounters::new(&mut manager).unwrap())
    }

    fn test_sender(
        queue: Arc<OneToOneQueue<SenderCommand>>,
        counters: Arc<SystemCounters>,
        error_handler: ErrorHandler,
    ) -> Sender {
        let flow_control: ChannelFlowControlSupplier =
            Arc::new(|_channel: &str| Box::new(MaxFlowControl::new(false)) as Box<dyn FlowControl>);
        Sender::new(
            queue,
            udp_send_channel_endpoint_supplier(),
            flow_control,
            128 * 1024,
            Arc::new(SystemNanoClock::default()),
            counters,
            error_handler,
        )
    }

    #[test]
    fn queued_commands_manage_publications() {
        let mut bytes = Vec::new();
        let counters = test_counters(&mut bytes);
        let queue = Arc::new(OneToOneQueue::with_capacity(8).unwrap());
        let mut sender = test_sender(Arc::clone(&queue), counters, Arc::new(|_e| {}));

        queue
            .offer(SenderCommand::AddPublication {
                registration_id: 1,
                channel: "udp://127.0.0.1:40123".to_string(),
            })
            .unwrap();
        assert_eq!(sender.do_work().unwrap(), 1);
        assert_eq!(sender.publication_count(), 1);
        assert_eq!(sender.position_limit(1), Some(128 * 1024));

        sender.on_status_message(1, 1_000_000, 64 * 1024);
        assert_eq!(sender.position_limit(1), Some(1_000_000 + 64 * 1024));

        queue
            .offer(SenderCommand::RemovePublication { registration_id: 1 })
            .unwrap();
        sender.do_work().unwrap();
        assert_eq!(sender.publication_count(), 0);
    }

    #[test]
    fn bad_channel_reports_instead_of_panicking() {
        let mut bytes = Vec::new();
        let counters = test_counters(&mut bytes);
        let queue = Arc::new(OneToOneQueue::with_capacity(8).unwrap());

        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let mut sender = test_sender(
            Arc::clone(&queue),
            counters,
            Arc::new(move |_e| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        queue
            .offer(SenderCommand::AddPublication {
                registration_id: 1,
                channel: "bogus://nowhere".to_string(),
            })
            .unwrap();
        sender.do_work().unwrap();

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(sender.publication_count(), 0);
    }
}
