//! The conductor agent: the driver's control plane. Reads client commands
//! off the to-driver ring, manages the publication/subscription/image
//! registries and their log buffers, directs the sender and receiver through
//! their proxies, tracks client liveness, and stamps the consumer heartbeat
//! that peer processes probe for.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent::Agent;
use crate::client_proxy::ClientProxy;
use crate::command::counter_message::CounterMessageDefn;
use crate::command::correlated_message::CorrelatedMessageDefn;
use crate::command::destination_message::DestinationMessageDefn;
use crate::command::flyweight::Flyweight;
use crate::command::publication_message::PublicationMessageDefn;
use crate::command::remove_message::RemoveMessageDefn;
use crate::command::subscription_message::SubscriptionMessageDefn;
use crate::concurrent::queue::OneToOneQueue;
use crate::concurrent::ringbuffer::ManyToOneRingBuffer;
use crate::concurrent::RawBuffer;
use crate::control_protocol::ClientCommand;
use crate::counters::{CountersManager, SystemCounters};
use crate::error::{DriverError, ErrorHandler, Result};
use crate::loss_report::{LossEntry, LossReport};
use crate::media::{parse_udp_channel, CongestionControl, CongestionControlSupplier};
use crate::proxy::{CommandConsumer, ConductorCommand, ReceiverProxy, SenderProxy};
use crate::raw_log::{RawLog, RawLogFactory};
use crate::time::EpochClock;
use crate::util::IndexT;

struct PublicationRecord {
    channel: String,
    stream_id: i32,
    session_id: i32,
    client_id: i64,
    raw_log: RawLog,
}

struct SubscriptionRecord {
    channel: String,
    stream_id: i32,
    client_id: i64,
}

struct ImageRecord {
    session_id: i32,
    stream_id: i32,
    source: String,
    raw_log: RawLog,
    congestion_control: Box<dyn CongestionControl>,
}

/// Control-plane agent. Single consumer of the to-driver ring and of the
/// to-conductor command queue; single writer of new counter registrations,
/// the loss report, and the to-clients broadcast.
pub struct DriverConductor {
    to_driver_ring: ManyToOneRingBuffer<RawBuffer>,
    client_proxy: ClientProxy,
    command_queue: Arc<OneToOneQueue<ConductorCommand>>,
    counters_manager: CountersManager,
    counters: Arc<SystemCounters>,
    loss_report: LossReport,
    loss_entries: HashMap<(i32, i32), LossEntry>,
    raw_log_factory: RawLogFactory,
    epoch_clock: Arc<dyn EpochClock>,
    client_liveness_timeout_ms: i64,
    publication_term_length: IndexT,
    ipc_publication_term_length: IndexT,
    initial_window_length: i32,
    congestion_control_supplier: CongestionControlSupplier,
    publications: HashMap<i64, PublicationRecord>,
    subscriptions: HashMap<i64, SubscriptionRecord>,
    images: HashMap<i64, ImageRecord>,
    clients: HashMap<i64, i64>,
    next_session_id: i32,
    next_image_correlation_id: i64,
    sender_proxy: Option<SenderProxy>,
    receiver_proxy: Option<ReceiverProxy>,
    pending_endpoint_refresh: Vec<(i64, String)>,
    shutdown: Arc<AtomicBool>,
    error_handler: ErrorHandler,
}

impl DriverConductor {
    /// Create a conductor over its consumer endpoints and owned resources.
    /// Proxies onto the sender and receiver arrive later through
    /// [`DriverConductor::wire`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        to_driver_ring: ManyToOneRingBuffer<RawBuffer>,
        client_proxy: ClientProxy,
        command_queue: Arc<OneToOneQueue<ConductorCommand>>,
        counters_manager: CountersManager,
        counters: Arc<SystemCounters>,
        loss_report: LossReport,
        raw_log_factory: RawLogFactory,
        epoch_clock: Arc<dyn EpochClock>,
        client_liveness_timeout_ns: i64,
        publication_term_length: IndexT,
        ipc_publication_term_length: IndexT,
        initial_window_length: i32,
        congestion_control_supplier: CongestionControlSupplier,
        shutdown: Arc<AtomicBool>,
        error_handler: ErrorHandler,
    ) -> DriverConductor {
        DriverConductor {
            to_driver_ring,
            client_proxy,
            command_queue,
            counters_manager,
            counters,
            loss_report,
            loss_entries: HashMap::new(),
            raw_log_factory,
            epoch_clock,
            client_liveness_timeout_ms: client_liveness_timeout_ns / 1_000_000,
            publication_term_length,
            ipc_publication_term_length,
            initial_window_length,
            congestion_control_supplier,
            publications: HashMap::new(),
            subscriptions: HashMap::new(),
            images: HashMap::new(),
            clients: HashMap::new(),
            next_session_id: 1,
            next_image_correlation_id: 1,
            sender_proxy: None,
            receiver_proxy: None,
            pending_endpoint_refresh: Vec::new(),
            shutdown,
            error_handler,
        }
    }

    /// Hand the conductor its producer handles onto the sender and receiver
    /// command flows. Called once during driver assembly.
    pub fn wire(&mut self, sender_proxy: SenderProxy, receiver_proxy: ReceiverProxy) {
        self.sender_proxy = Some(sender_proxy);
        self.receiver_proxy = Some(receiver_proxy);
    }

    /// Number of live publications
    pub fn publication_count(&self) -> usize {
        self.publications.len()
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of live images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Number of clients currently considered live
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn process_client_commands(&mut self) -> Result<usize> {
        let mut commands: Vec<(i32, Vec<u8>)> = Vec::new();
        self.to_driver_ring
            .read(|msg_type_id, body| commands.push((msg_type_id, body.to_vec())))?;

        let count = commands.len();
        for (msg_type_id, body) in commands {
            if let Err(e) = self.on_client_command(msg_type_id, body) {
                (self.error_handler)(&e);
            }
        }
        Ok(count)
    }

    fn on_client_command(&mut self, msg_type_id: i32, body: Vec<u8>) -> Result<()> {
        let now_ms = self.epoch_clock.time_ms();
        let command = ClientCommand::try_from(msg_type_id)
            .map_err(|_| DriverError::UnsupportedCommand(msg_type_id))?;

        match command {
            ClientCommand::ClientKeepalive => {
                let message = Flyweight::new::<CorrelatedMessageDefn>(body, 0)?;
                self.clients.insert(message.client_id(), now_ms);
                self.counters.client_keep_alives().increment();
            }
            ClientCommand::ClientClose => {
                let message = Flyweight::new::<CorrelatedMessageDefn>(body, 0)?;
                let client_id = message.client_id();
                self.clients.remove(&client_id);
                self.release_client_resources(client_id);
            }
            ClientCommand::TerminateDriver => {
                self.shutdown.store(true, Ordering::Release);
            }
            ClientCommand::AddPublication | ClientCommand::AddExclusivePublication => {
                let message = Flyweight::new::<PublicationMessageDefn>(body, 0)?;
                let channel = message.channel()?;
                self.on_add_publication(
                    message.client_id(),
                    message.correlation_id(),
                    message.stream_id(),
                    channel,
                );
            }
            ClientCommand::RemovePublication => {
                let message = Flyweight::new::<RemoveMessageDefn>(body, 0)?;
                self.on_remove_publication(message.correlation_id(), message.registration_id());
            }
            ClientCommand::AddSubscription => {
                let message = Flyweight::new::<SubscriptionMessageDefn>(body, 0)?;
                let channel = message.channel()?;
                self.on_add_subscription(
                    message.client_id(),
                    message.correlation_id(),
                    message.stream_id(),
                    channel,
                );
            }
            ClientCommand::RemoveSubscription => {
                let message = Flyweight::new::<RemoveMessageDefn>(body, 0)?;
                self.on_remove_subscription(message.correlation_id(), message.registration_id());
            }
            ClientCommand::AddDestination | ClientCommand::RemoveDestination => {
                let message = Flyweight::new::<DestinationMessageDefn>(body, 0)?;
                let destination = message.channel()?;
                let registration_id = message.registration_correlation_id();
                if let Some(proxy) = &self.sender_proxy {
                    if command == ClientCommand::AddDestination {
                        proxy.add_destination(registration_id, &destination);
                    } else {
                        proxy.remove_destination(registration_id, &destination);
                    }
                }
                self.client_proxy.on_operation_success(message.correlation_id());
            }
            ClientCommand::AddRcvDestination | ClientCommand::RemoveRcvDestination => {
                let message = Flyweight::new::<DestinationMessageDefn>(body, 0)?;
                let destination = message.channel()?;
                let registration_id = message.registration_correlation_id();
                if let Some(proxy) = &self.receiver_proxy {
                    if command == ClientCommand::AddRcvDestination {
                        proxy.add_destination(registration_id, &destination);
                    } else {
                        proxy.remove_destination(registration_id, &destination);
                    }
                }
                self.client_proxy.on_operation_success(message.correlation_id());
            }
            ClientCommand::AddCounter => {
                let message = Flyweight::new::<CounterMessageDefn>(body, 0)?;
                let label = message.label()?;
                match self.counters_manager.allocate(message.type_id(), &[], &label) {
                    Ok(counter_id) => self
                        .client_proxy
                        .on_counter_ready(message.correlation_id(), counter_id),
                    Err(e) => {
                        self.client_proxy
                            .on_error(message.correlation_id(), "unable to allocate counter");
                        return Err(e.into());
                    }
                }
            }
            ClientCommand::RemoveCounter => {
                let message = Flyweight::new::<RemoveMessageDefn>(body, 0)?;
                self.counters_manager
                    .free(message.registration_id() as i32)?;
                self.client_proxy.on_operation_success(message.correlation_id());
            }
        }
        Ok(())
    }

    fn on_add_publication(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: String,
    ) {
        let registration_id = correlation_id;
        let is_ipc = channel.starts_with("ipc");
        let term_length = if is_ipc {
            self.ipc_publication_term_length
        } else {
            self.publication_term_length
        };

        let raw_log = match self
            .raw_log_factory
            .new_publication_log(registration_id, term_length)
        {
            Ok(raw_log) => raw_log,
            Err(e) => {
                self.client_proxy
                    .on_error(correlation_id, "unable to create publication log");
                (self.error_handler)(&e);
                return;
            }
        };

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let log_file = raw_log.path().display().to_string();
        self.publications.insert(
            registration_id,
            PublicationRecord {
                channel: channel.clone(),
                stream_id,
                session_id,
                client_id,
                raw_log,
            },
        );
        let now_ms = self.epoch_clock.time_ms();
        self.clients.entry(client_id).or_insert(now_ms);

        if !is_ipc {
            if let Some(proxy) = &self.sender_proxy {
                proxy.new_publication(registration_id, &channel);
            }
        }

        self.client_proxy.on_publication_ready(
            correlation_id,
            registration_id,
            stream_id,
            session_id,
            &log_file,
        );
    }

    fn on_remove_publication(&mut self, correlation_id: i64, registration_id: i64) {
        match self.publications.remove(&registration_id) {
            Some(record) => {
                if !record.channel.starts_with("ipc") {
                    if let Some(proxy) = &self.sender_proxy {
                        proxy.remove_publication(registration_id);
                    }
                }
                tracing::debug!(
                    registration_id,
                    session_id = record.session_id,
                    stream_id = record.stream_id,
                    "publication removed"
                );
                if let Err(e) = record.raw_log.free() {
                    (self.error_handler)(&e);
                }
                self.client_proxy.on_operation_success(correlation_id);
            }
            None => self
                .client_proxy
                .on_error(correlation_id, "unknown publication registration id"),
        }
    }

    fn on_add_subscription(
        &mut self,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: String,
    ) {
        let registration_id = correlation_id;
        self.subscriptions.insert(
            registration_id,
            SubscriptionRecord {
                channel: channel.clone(),
                stream_id,
                client_id,
            },
        );
        let now_ms = self.epoch_clock.time_ms();
        self.clients.entry(client_id).or_insert(now_ms);

        if !channel.starts_with("ipc") {
            if let Some(proxy) = &self.receiver_proxy {
                proxy.add_subscription(registration_id, stream_id, &channel);
            }
        }
        self.client_proxy
            .on_subscription_ready(correlation_id, registration_id);
    }

    fn on_remove_subscription(&mut self, correlation_id: i64, registration_id: i64) {
        match self.subscriptions.remove(&registration_id) {
            Some(record) => {
                if !record.channel.starts_with("ipc") {
                    if let Some(proxy) = &self.receiver_proxy {
                        proxy.remove_subscription(registration_id);
                    }
                }
                tracing::debug!(registration_id, stream_id = record.stream_id, "subscription removed");
                self.client_proxy.on_operation_success(correlation_id);
            }
            None => self
                .client_proxy
                .on_error(correlation_id, "unknown subscription registration id"),
        }
    }

    fn release_client_resources(&mut self, client_id: i64) {
        let publications: Vec<i64> = self
            .publications
            .iter()
            .filter(|(_, record)| record.client_id == client_id)
            .map(|(&id, _)| id)
            .collect();
        for registration_id in publications {
            self.on_remove_publication(-1, registration_id);
        }

        let subscriptions: Vec<i64> = self
            .subscriptions
            .iter()
            .filter(|(_, record)| record.client_id == client_id)
            .map(|(&id, _)| id)
            .collect();
        for registration_id in subscriptions {
            self.on_remove_subscription(-1, registration_id);
        }
    }

    fn on_create_publication_image(&mut self, session_id: i32, stream_id: i32, source: String) {
        let correlation_id = self.next_image_correlation_id;
        self.next_image_correlation_id += 1;

        let raw_log = match self.raw_log_factory.new_image_log(
            session_id,
            stream_id,
            correlation_id,
            self.publication_term_length,
        ) {
            Ok(raw_log) => raw_log,
            Err(e) => {
                (self.error_handler)(&e);
                return;
            }
        };

        let log_file = raw_log.path().display().to_string();
        self.images.insert(
            correlation_id,
            ImageRecord {
                session_id,
                stream_id,
                source: source.clone(),
                raw_log,
                congestion_control: (self.congestion_control_supplier)(
                    self.initial_window_length,
                ),
            },
        );

        self.client_proxy.on_available_image(
            correlation_id,
            session_id,
            stream_id,
            &source,
            &log_file,
        );
    }

    fn on_loss_detected(
        &mut self,
        session_id: i32,
        stream_id: i32,
        bytes_lost: i64,
        channel: &str,
        source: &str,
    ) {
        let now_ms = self.epoch_clock.time_ms();
        match self.loss_entries.get(&(session_id, stream_id)) {
            Some(&entry) => self.loss_report.record_observation(entry, bytes_lost, now_ms),
            None => {
                if let Some(entry) = self.loss_report.create_entry(
                    bytes_lost,
                    now_ms,
                    session_id,
                    stream_id,
                    channel,
                    source,
                ) {
                    self.loss_entries.insert((session_id, stream_id), entry);
                }
            }
        }

        if let Some(image) = self
            .images
            .values_mut()
            .find(|i| i.session_id == session_id && i.stream_id == stream_id)
        {
            image.congestion_control.on_rebuild(true);
        }
    }

    fn drain_command_queue(&mut self) -> usize {
        let queue = Arc::clone(&self.command_queue);
        queue.drain(|command| self.accept(command))
    }

    fn dispatch_pending_refresh(&mut self) -> usize {
        let pending: Vec<(i64, String)> = self.pending_endpoint_refresh.drain(..).collect();
        let count = pending.len();
        for (registration_id, channel) in pending {
            if let Some(proxy) = &self.sender_proxy {
                proxy.new_publication(registration_id, &channel);
            }
        }
        count
    }

    fn check_client_liveness(&mut self, now_ms: i64) -> usize {
        let timeout_ms = self.client_liveness_timeout_ms;
        let expired: Vec<i64> = self
            .clients
            .iter()
            .filter(|(_, &last_ms)| now_ms - last_ms > timeout_ms)
            .map(|(&client_id, _)| client_id)
            .collect();

        for &client_id in &expired {
            self.clients.remove(&client_id);
            self.counters.client_timeouts().increment();
            self.client_proxy.on_client_timeout(client_id);
            self.release_client_resources(client_id);
            tracing::warn!(client_id, "client timed out");
        }

        expired.len()
    }
}

impl CommandConsumer<ConductorCommand> for DriverConductor {
    fn accept(&mut self, command: ConductorCommand) {
        match command {
            ConductorCommand::CreatePublicationImage {
                session_id,
                stream_id,
                source,
            } => self.on_create_publication_image(session_id, stream_id, source),
            ConductorCommand::LossDetected {
                session_id,
                stream_id,
                bytes_lost,
                channel,
                source,
            } => self.on_loss_detected(session_id, stream_id, bytes_lost, &channel, &source),
            ConductorCommand::FreeCounter { counter_id } => {
                if let Err(e) = self.counters_manager.free(counter_id) {
                    (self.error_handler)(&e.into());
                }
            }
            // Dispatching back toward the sender is deferred to the next duty
            // cycle: in the shared threading modes this command arrives
            // inline from within the sender's own duty cycle.
            ConductorCommand::ReResolveEndpoint {
                registration_id,
                channel,
            } => match parse_udp_channel(&channel) {
                Ok(_address) => self.pending_endpoint_refresh.push((registration_id, channel)),
                Err(e) => {
                    (self.error_handler)(&DriverError::io(
                        format!("re-resolving {}", channel),
                        e,
                    ));
                }
            },
        }
    }
}

impl Agent for DriverConductor {
    fn role_name(&self) -> &str {
        "driver-conductor"
    }

    fn do_work(&mut self) -> Result<usize> {
        let mut work_count = self.process_client_commands()?;
        work_count += self.drain_command_queue();
        work_count += self.dispatch_pending_refresh();

        let now_ms = self.epoch_clock.time_ms();
        self.to_driver_ring.update_consumer_heartbeat_time(now_ms);
        work_count += self.check_client_liveness(now_ms);

        Ok(work_count)
    }

    fn on_close(&mut self) {
        for (_, record) in self.images.drain() {
            tracing::debug!(source = %record.source, "releasing image log");
            if let Err(e) = record.raw_log.free() {
                (self.error_handler)(&e);
            }
        }
        self.publications.clear();
        self.subscriptions.clear();
        self.clients.clear();
    }
}
