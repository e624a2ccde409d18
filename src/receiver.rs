//! The receiver agent: owns every ingress channel endpoint, polls them
//! without blocking, and hands stream setup back to the conductor. Frame
//! reassembly and loss repair live with the wire-protocol components.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::agent::Agent;
use crate::concurrent::queue::OneToOneQueue;
use crate::counters::{SystemCounterId, SystemCounters};
use crate::error::{DriverError, ErrorHandler, Result};
use crate::media::{ReceiveChannelEndpoint, ReceiveChannelEndpointSupplier};
use crate::proxy::{CommandConsumer, DriverConductorProxy, ReceiverCommand};

struct ReceiverSubscription {
    stream_id: i32,
    endpoint: Box<dyn ReceiveChannelEndpoint>,
    destinations: Vec<String>,
    /// Sources an image has already been requested for
    known_sources: HashSet<String>,
}

/// Ingress agent. Consumes the to-receiver command queue; in the shared
/// threading modes the conductor dispatches into it directly instead.
pub struct Receiver {
    command_queue: Arc<OneToOneQueue<ReceiverCommand>>,
    endpoint_supplier: ReceiveChannelEndpointSupplier,
    counters: Arc<SystemCounters>,
    subscriptions: HashMap<i64, ReceiverSubscription>,
    conductor_proxy: Option<DriverConductorProxy>,
    error_handler: ErrorHandler,
    scratch: Vec<u8>,
}

impl Receiver {
    /// Create a receiver draining `command_queue`. `mtu_length` sizes the
    /// datagram scratch buffer.
    pub fn new(
        command_queue: Arc<OneToOneQueue<ReceiverCommand>>,
        endpoint_supplier: ReceiveChannelEndpointSupplier,
        mtu_length: usize,
        counters: Arc<SystemCounters>,
        error_handler: ErrorHandler,
    ) -> Receiver {
        Receiver {
            command_queue,
            endpoint_supplier,
            counters,
            subscriptions: HashMap::new(),
            conductor_proxy: None,
            error_handler,
            scratch: vec![0u8; mtu_length],
        }
    }

    /// Hand the receiver its producer handle onto the conductor's command
    /// flow. Called once during driver assembly, after all three agents
    /// exist.
    pub fn wire(&mut self, conductor_proxy: DriverConductorProxy) {
        self.conductor_proxy = Some(conductor_proxy);
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn on_add_subscription(&mut self, registration_id: i64, stream_id: i32, channel: String) {
        match (self.endpoint_supplier)(&channel) {
            Ok(endpoint) => {
                self.subscriptions.insert(
                    registration_id,
                    ReceiverSubscription {
                        stream_id,
                        endpoint,
                        destinations: Vec::new(),
                        known_sources: HashSet::new(),
                    },
                );
            }
            Err(e) => (self.error_handler)(&DriverError::io(
                format!("creating receive endpoint for {}", channel),
                e,
            )),
        }
    }

    fn poll_endpoints(&mut self) -> usize {
        let mut work_count = 0;
        let bytes_received = self.counters.get(SystemCounterId::BytesReceived);

        for subscription in self.subscriptions.values_mut() {
            loop {
                match subscription.endpoint.poll(&mut self.scratch) {
                    Ok(Some((length, source))) => {
                        work_count += 1;
                        bytes_received.add(length as i64);

                        // First sight of a source starts image setup with the
                        // conductor; the session identity inside the frames
                        // belongs to the protocol codec.
                        let source = source.to_string();
                        if subscription.known_sources.insert(source.clone()) {
                            if let Some(proxy) = &self.conductor_proxy {
                                proxy.create_publication_image(
                                    0,
                                    subscription.stream_id,
                                    &source,
                                );
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        self.counters.get(SystemCounterId::InvalidPackets).increment();
                        (self.error_handler)(&DriverError::io(
                            format!("polling {}", subscription.endpoint.channel()),
                            e,
                        ));
                        break;
                    }
                }
            }
        }

        work_count
    }
}

impl CommandConsumer<ReceiverCommand> for Receiver {
    fn accept(&mut self, command: ReceiverCommand) {
        match command {
            ReceiverCommand::AddSubscription {
                registration_id,
                stream_id,
                channel,
            } => self.on_add_subscription(registration_id, stream_id, channel),
            ReceiverCommand::RemoveSubscription { registration_id } => {
                self.subscriptions.remove(&registration_id);
            }
            ReceiverCommand::AddDestination {
                registration_id,
                destination,
            } => {
                if let Some(subscription) = self.subscriptions.get_mut(&registration_id) {
                    subscription.destinations.push(destination);
                }
            }
            ReceiverCommand::RemoveDestination {
                registration_id,
                destination,
            } => {
                if let Some(subscription) = self.subscriptions.get_mut(&registration_id) {
                    subscription.destinations.retain(|d| d != &destination);
                }
            }
        }
    }
}

impl Agent for Receiver {
    fn role_name(&self) -> &str {
        "receiver"
    }

    fn do_work(&mut self) -> Result<usize> {
        let queue = Arc::clone(&self.command_queue);
        let mut work_count = queue.drain(|command| self.accept(command));
        work_count += self.poll_endpoints();
        Ok(work_count)
    }

    fn on_close(&mut self) {
        self.subscriptions.clear();
    }
}
