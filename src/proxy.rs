//! Typed command traffic between the three driver agents.
//!
//! Each agent consumes one bounded SPSC queue; the other agents hold a proxy
//! over the producer end. In the threading modes where producer and consumer
//! share a duty cycle (shared and invoker), a proxy dispatches straight into
//! the consumer instead — nothing is ever queued. The dispatch target encodes
//! that choice structurally, so a proxy can only ever be built to match the
//! threading mode it serves.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::concurrent::queue::OneToOneQueue;
use crate::counters::Counter;

/// Commands consumed by the sender agent
#[derive(Debug, Clone, PartialEq)]
pub enum SenderCommand {
    /// Register a network publication for egress
    AddPublication {
        /// Registration id assigned by the conductor
        registration_id: i64,
        /// Channel URI the publication sends on
        channel: String,
    },
    /// Retire a network publication
    RemovePublication {
        /// Registration id assigned by the conductor
        registration_id: i64,
    },
    /// Add a manual destination to a multi-destination publication
    AddDestination {
        /// Publication the destination attaches to
        registration_id: i64,
        /// Destination endpoint URI
        destination: String,
    },
    /// Remove a manual destination from a publication
    RemoveDestination {
        /// Publication the destination detaches from
        registration_id: i64,
        /// Destination endpoint URI
        destination: String,
    },
}

/// Commands consumed by the receiver agent
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverCommand {
    /// Register interest in a stream
    AddSubscription {
        /// Registration id assigned by the conductor
        registration_id: i64,
        /// Stream within the channel
        stream_id: i32,
        /// Channel URI the subscription listens on
        channel: String,
    },
    /// Retire a subscription
    RemoveSubscription {
        /// Registration id assigned by the conductor
        registration_id: i64,
    },
    /// Add a manual destination to a multi-destination subscription
    AddDestination {
        /// Subscription the destination attaches to
        registration_id: i64,
        /// Destination endpoint URI
        destination: String,
    },
    /// Remove a manual destination from a subscription
    RemoveDestination {
        /// Subscription the destination detaches from
        registration_id: i64,
        /// Destination endpoint URI
        destination: String,
    },
}

/// Commands consumed by the conductor agent
#[derive(Debug, Clone, PartialEq)]
pub enum ConductorCommand {
    /// A first frame arrived for an unknown stream: set up its image
    CreatePublicationImage {
        /// Session carried in the frame
        session_id: i32,
        /// Stream carried in the frame
        stream_id: i32,
        /// Source address the frame arrived from
        source: String,
    },
    /// The receiver observed a gap it gave up repairing
    LossDetected {
        /// Session the loss was observed on
        session_id: i32,
        /// Stream the loss was observed on
        stream_id: i32,
        /// Bytes covered by the unrepaired gap
        bytes_lost: i64,
        /// Channel URI of the stream
        channel: String,
        /// Source address of the stream
        source: String,
    },
    /// Release a per-image counter back to the manager
    FreeCounter {
        /// Counter id to reclaim
        counter_id: i32,
    },
    /// The sender failed to reach a publication endpoint; re-resolve it
    ReResolveEndpoint {
        /// Publication whose endpoint went stale
        registration_id: i64,
        /// Channel URI to resolve again
        channel: String,
    },
}

/// Consumer side of a command flow; implemented by each agent for its own
/// command type.
pub trait CommandConsumer<C> {
    /// Apply one command against the agent's state
    fn accept(&mut self, command: C);
}

/// Where a proxy delivers its commands.
pub enum CommandTarget<C> {
    /// Consumer runs on another thread; commands go through its SPSC queue
    Concurrent(Arc<OneToOneQueue<C>>),
    /// Producer and consumer share a duty cycle; commands dispatch inline.
    /// Deliberately not `Send`: a direct target can only be built on the
    /// thread that hosts both ends.
    Direct(Rc<RefCell<dyn CommandConsumer<C>>>),
}

impl<C> Clone for CommandTarget<C> {
    fn clone(&self) -> Self {
        match self {
            CommandTarget::Concurrent(queue) => CommandTarget::Concurrent(Arc::clone(queue)),
            CommandTarget::Direct(consumer) => CommandTarget::Direct(Rc::clone(consumer)),
        }
    }
}

/// Producer handle over one agent's command flow. Cheap to clone; every
/// failed queue offer increments the owning agent's fail counter and drops
/// the command.
pub struct CommandProxy<C> {
    target: CommandTarget<C>,
    fails: Counter,
}

impl<C> Clone for CommandProxy<C> {
    fn clone(&self) -> Self {
        CommandProxy {
            target: self.target.clone(),
            fails: self.fails,
        }
    }
}

impl<C> CommandProxy<C> {
    /// Create a proxy delivering to `target`, charging failures to `fails`
    pub fn new(target: CommandTarget<C>, fails: Counter) -> CommandProxy<C> {
        CommandProxy { target, fails }
    }

    /// Deliver one command: inline for a direct target, fail-fast offer for a
    /// concurrent one.
    pub fn send(&self, command: C) {
        match &self.target {
            CommandTarget::Direct(consumer) => consumer.borrow_mut().accept(command),
            CommandTarget::Concurrent(queue) => {
                if queue.offer(command).is_err() {
                    self.fails.increment();
                }
            }
        }
    }
}

/// Proxy over the sender's command flow
#[derive(Clone)]
pub struct SenderProxy {
    proxy: CommandProxy<SenderCommand>,
}

impl SenderProxy {
    /// Wrap a dispatch target for the sender
    pub fn new(target: CommandTarget<SenderCommand>, fails: Counter) -> SenderProxy {
        SenderProxy {
            proxy: CommandProxy::new(target, fails),
        }
    }

    /// Register a publication for egress
    pub fn new_publication(&self, registration_id: i64, channel: &str) {
        self.proxy.send(SenderCommand::AddPublication {
            registration_id,
            channel: channel.to_string(),
        });
    }

    /// Retire a publication
    pub fn remove_publication(&self, registration_id: i64) {
        self.proxy
            .send(SenderCommand::RemovePublication { registration_id });
    }

    /// Attach a manual destination
    pub fn add_destination(&self, registration_id: i64, destination: &str) {
        self.proxy.send(SenderCommand::AddDestination {
            registration_id,
            destination: destination.to_string(),
        });
    }

    /// Detach a manual destination
    pub fn remove_destination(&self, registration_id: i64, destination: &str) {
        self.proxy.send(SenderCommand::RemoveDestination {
            registration_id,
            destination: destination.to_string(),
        });
    }
}

/// Proxy over the receiver's command flow
#[derive(Clone)]
pub struct ReceiverProxy {
    proxy: CommandProxy<ReceiverCommand>,
}

impl ReceiverProxy {
    /// Wrap a dispatch target for the receiver
    pub fn new(target: CommandTarget<ReceiverCommand>, fails: Counter) -> ReceiverProxy {
        ReceiverProxy {
            proxy: CommandProxy::new(target, fails),
        }
    }

    /// Register a subscription for ingress
    pub fn add_subscription(&self, registration_id: i64, stream_id: i32, channel: &str) {
        self.proxy.send(ReceiverCommand::AddSubscription {
            registration_id,
            stream_id,
            channel: channel.to_string(),
        });
    }

    /// Retire a subscription
    pub fn remove_subscription(&self, registration_id: i64) {
        self.proxy
            .send(ReceiverCommand::RemoveSubscription { registration_id });
    }

    /// Attach a manual destination
    pub fn add_destination(&self, registration_id: i64, destination: &str) {
        self.proxy.send(ReceiverCommand::AddDestination {
            registration_id,
            destination: destination.to_string(),
        });
    }

    /// Detach a manual destination
    pub fn remove_destination(&self, registration_id: i64, destination: &str) {
        self.proxy.send(ReceiverCommand::RemoveDestination {
            registration_id,
            destination: destination.to_string(),
        });
    }
}

/// Proxy over the conductor's command flow
#[derive(Clone)]
pub struct DriverConductorProxy {
    proxy: CommandProxy<ConductorCommand>,
}

impl DriverConductorProxy {
    /// Wrap a dispatch target for the conductor
    pub fn new(target: CommandTarget<ConductorCommand>, fails: Counter) -> DriverConductorProxy {
        DriverConductorProxy {
            proxy: CommandProxy::new(target, fails),
        }
    }

    /// Ask the conductor to set up an image for a newly seen stream
    pub fn create_publication_image(&self, session_id: i32, stream_id: i32, source: &str) {
        self.proxy.send(ConductorCommand::CreatePublicationImage {
            session_id,
            stream_id,
            source: source.to_string(),
        });
    }

    /// Report an unrepaired loss gap for the loss report
    pub fn loss_detected(
        &self,
        session_id: i32,
        stream_id: i32,
        bytes_lost: i64,
        channel: &str,
        source: &str,
    ) {
        self.proxy.send(ConductorCommand::LossDetected {
            session_id,
            stream_id,
            bytes_lost,
            channel: channel.to_string(),
            source: source.to_string(),
        });
    }

    /// Release a counter id back to the manager
    pub fn free_counter(&self, counter_id: i32) {
        self.proxy.send(ConductorCommand::FreeCounter { counter_id });
    }

    /// Ask the conductor to re-resolve a publication endpoint that stopped
    /// accepting sends
    pub fn re_resolve_endpoint(&self, registration_id: i64, channel: &str) {
        self.proxy.send(ConductorCommand::ReResolveEndpoint {
            registration_id,
            channel: channel.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::RawBuffer;
    use crate::counters::{CountersManager, COUNTER_LENGTH, METADATA_LENGTH};

    fn test_counter(bytes: &mut Vec<u8>) -> Counter {
        bytes.resize(METADATA_LENGTH + COUNTER_LENGTH, 0);
        let whole = unsafe { RawBuffer::new(bytes.as_mut_ptr(), bytes.len()) };
        let mut manager = CountersManager::new(
            whole.view(0, METADATA_LENGTH),
            whole.view(METADATA_LENGTH, COUNTER_LENGTH),
            false,
        );
        let id = manager.allocate(0, &[], "proxy fails").unwrap();
        manager.counter(id).unwrap()
    }

    #[test]
    fn queued_offer_failure_increments_fail_counter() {
        let mut bytes = Vec::new();
        let fails = test_counter(&mut bytes);

        let queue = Arc::new(OneToOneQueue::with_capacity(4).unwrap());
        let proxy = SenderProxy::new(CommandTarget::Concurrent(Arc::clone(&queue)), fails);

        for id in 0..4 {
            proxy.new_publication(id, "udp://localhost:40123");
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(fails.get(), 0);

        proxy.new_publication(5, "udp://localhost:40123");
        assert_eq!(queue.len(), 4);
        assert_eq!(fails.get(), 1);
    }

    #[test]
    fn direct_target_dispatches_inline() {
        struct Recording {
            seen: Vec<ReceiverCommand>,
        }
        impl CommandConsumer<ReceiverCommand> for Recording {
            fn accept(&mut self, command: ReceiverCommand) {
                self.seen.push(command);
            }
        }

        let mut bytes = Vec::new();
        let fails = test_counter(&mut bytes);
        let consumer = Rc::new(RefCell::new(Recording { seen: Vec::new() }));

        let proxy = ReceiverProxy::new(CommandTarget::Direct(consumer.clone()), fails);
        proxy.add_subscription(7, 1001, "udp://localhost:40124");

        assert_eq!(fails.get(), 0);
        assert_eq!(
            consumer.borrow().seen,
            vec![ReceiverCommand::AddSubscription {
                registration_id: 7,
                stream_id: 1001,
                channel: "udp://localhost:40124".to_string(),
            }]
        );
    }
}
