//! Driver configuration and the `conclude` step that validates it, builds
//! the CnC file, and binds every component the agents will run on.
//!
//! A [`DriverContext`] is a mutable record of overrides with defaults filled
//! in lazily; [`DriverContext::conclude`] consumes it and produces an
//! immutable [`ConcludedContext`]. Nothing downstream accepts the mutable
//! form, which removes the use-before-conclude and conclude-twice classes of
//! mistakes by construction.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use memmap::{MmapMut, MmapOptions};

use crate::agent::{default_thread_factory, ThreadFactory};
use crate::client_proxy::ClientProxy;
use crate::cnc::{CncFile, CncLengths};
use crate::cnc_descriptor::{CNC_FILE, LOSS_REPORT_FILE};
use crate::concurrent::broadcast::{self, BroadcastTransmitter};
use crate::concurrent::queue::OneToOneQueue;
use crate::concurrent::ringbuffer::{buffer_descriptor, ManyToOneRingBuffer};
use crate::concurrent::RawBuffer;
use crate::config::{self, ThreadingMode};
use crate::counters::{CountersManager, SystemCounters, COUNTER_LENGTH, METADATA_LENGTH};
use crate::directory::{ensure_directory_is_recreated, save_existing_errors};
use crate::error::{DriverError, ErrorHandler, Result};
use crate::error_log::DistinctErrorLog;
use crate::idle::IdleStrategy;
use crate::loss_report::LossReport;
use crate::media::{
    udp_receive_channel_endpoint_supplier, udp_send_channel_endpoint_supplier,
    CongestionControlSupplier, FlowControl, FlowControlSupplier, MaxFlowControl,
    ReceiveChannelEndpointSupplier, SendChannelEndpointSupplier, StaticWindowCongestionControl,
};
use crate::proxy::{ConductorCommand, ReceiverCommand, SenderCommand};
use crate::raw_log::RawLogFactory;
use crate::time::{EpochClock, NanoClock, SystemEpochClock, SystemNanoClock};
use crate::util::bit::is_power_of_two;
use crate::util::IndexT;

/// Mutable driver configuration. Unset optional slots are resolved to the
/// stock implementations during conclude.
pub struct DriverContext {
    dir: PathBuf,
    warn_if_directory_exists: bool,
    dir_delete_on_start: bool,
    use_windows_high_res_timer: bool,
    term_buffer_sparse_file: bool,
    spies_simulate_connection: bool,
    concurrent_counters_manager: bool,
    driver_timeout_ms: i64,
    client_liveness_timeout_ns: i64,
    image_liveness_timeout_ns: i64,
    publication_unblock_timeout_ns: i64,
    status_message_timeout_ns: i64,
    max_term_buffer_length: IndexT,
    publication_term_buffer_length: IndexT,
    ipc_publication_term_buffer_length: IndexT,
    initial_window_length: IndexT,
    socket_rcvbuf_length: IndexT,
    mtu_length: IndexT,
    ipc_mtu_length: IndexT,
    to_driver_buffer_length: IndexT,
    to_clients_buffer_length: IndexT,
    counters_values_buffer_length: IndexT,
    error_buffer_length: IndexT,
    loss_report_buffer_length: IndexT,
    cmd_queue_capacity: usize,
    threading_mode: ThreadingMode,
    conductor_idle_strategy: Option<IdleStrategy>,
    sender_idle_strategy: Option<IdleStrategy>,
    receiver_idle_strategy: Option<IdleStrategy>,
    shared_idle_strategy: Option<IdleStrategy>,
    shared_network_idle_strategy: Option<IdleStrategy>,
    conductor_thread_factory: Option<ThreadFactory>,
    sender_thread_factory: Option<ThreadFactory>,
    receiver_thread_factory: Option<ThreadFactory>,
    shared_thread_factory: Option<ThreadFactory>,
    epoch_clock: Arc<dyn EpochClock>,
    nano_clock: Arc<dyn NanoClock>,
    error_handler: Option<ErrorHandler>,
    send_channel_endpoint_supplier: Option<SendChannelEndpointSupplier>,
    receive_channel_endpoint_supplier: Option<ReceiveChannelEndpointSupplier>,
    unicast_flow_control_supplier: Option<FlowControlSupplier>,
    multicast_flow_control_supplier: Option<FlowControlSupplier>,
    congestion_control_supplier: Option<CongestionControlSupplier>,
}

impl Default for DriverContext {
    fn default() -> Self {
        DriverContext {
            dir: config::default_dir(),
            warn_if_directory_exists: false,
            dir_delete_on_start: false,
            use_windows_high_res_timer: false,
            term_buffer_sparse_file: true,
            spies_simulate_connection: false,
            concurrent_counters_manager: false,
            driver_timeout_ms: config::DRIVER_TIMEOUT_MS_DEFAULT,
            client_liveness_timeout_ns: config::CLIENT_LIVENESS_TIMEOUT_NS_DEFAULT,
            image_liveness_timeout_ns: config::IMAGE_LIVENESS_TIMEOUT_NS_DEFAULT,
            publication_unblock_timeout_ns: config::PUBLICATION_UNBLOCK_TIMEOUT_NS_DEFAULT,
            status_message_timeout_ns: config::STATUS_MESSAGE_TIMEOUT_NS_DEFAULT,
            max_term_buffer_length: config::MAX_TERM_BUFFER_LENGTH_DEFAULT,
            publication_term_buffer_length: config::TERM_BUFFER_LENGTH_DEFAULT,
            ipc_publication_term_buffer_length: config::IPC_TERM_BUFFER_LENGTH_DEFAULT,
            initial_window_length: config::INITIAL_WINDOW_LENGTH_DEFAULT,
            socket_rcvbuf_length: config::SOCKET_RCVBUF_LENGTH_DEFAULT,
            mtu_length: config::MTU_LENGTH_DEFAULT,
            ipc_mtu_length: config::IPC_MTU_LENGTH_DEFAULT,
            to_driver_buffer_length: config::TO_DRIVER_BUFFER_LENGTH_DEFAULT,
            to_clients_buffer_length: config::TO_CLIENTS_BUFFER_LENGTH_DEFAULT,
            counters_values_buffer_length: config::COUNTERS_VALUES_BUFFER_LENGTH_DEFAULT,
            error_buffer_length: config::ERROR_BUFFER_LENGTH_DEFAULT,
            loss_report_buffer_length: config::LOSS_REPORT_BUFFER_LENGTH_DEFAULT,
            cmd_queue_capacity: config::CMD_QUEUE_CAPACITY_DEFAULT,
            threading_mode: ThreadingMode::Dedicated,
            conductor_idle_strategy: None,
            sender_idle_strategy: None,
            receiver_idle_strategy: None,
            shared_idle_strategy: None,
            shared_network_idle_strategy: None,
            conductor_thread_factory: None,
            sender_thread_factory: None,
            receiver_thread_factory: None,
            shared_thread_factory: None,
            epoch_clock: Arc::new(SystemEpochClock::default()),
            nano_clock: Arc::new(SystemNanoClock::default()),
            error_handler: None,
            send_channel_endpoint_supplier: None,
            receive_channel_endpoint_supplier: None,
            unicast_flow_control_supplier: None,
            multicast_flow_control_supplier: None,
            congestion_control_supplier: None,
        }
    }
}

impl DriverContext {
    /// Set the state directory the driver owns
    pub fn set_dir(mut self, dir: &Path) -> Self {
        self.dir = dir.to_path_buf();
        self
    }

    /// Warn on stderr when the state directory already exists
    pub fn set_warn_if_directory_exists(mut self, value: bool) -> Self {
        self.warn_if_directory_exists = value;
        self
    }

    /// Force-clean the state directory on startup without probing liveness
    pub fn set_dir_delete_on_start(mut self, value: bool) -> Self {
        self.dir_delete_on_start = value;
        self
    }

    /// Enable the Windows high-resolution timer while the driver runs
    pub fn set_use_windows_high_res_timer(mut self, value: bool) -> Self {
        self.use_windows_high_res_timer = value;
        self
    }

    /// Allocate term buffer files sparsely
    pub fn set_term_buffer_sparse_file(mut self, value: bool) -> Self {
        self.term_buffer_sparse_file = value;
        self
    }

    /// Treat local spy subscriptions as live receivers for flow control
    pub fn set_spies_simulate_connection(mut self, value: bool) -> Self {
        self.spies_simulate_connection = value;
        self
    }

    /// Use the CAS-based counters manager so producers besides the conductor
    /// may register counters
    pub fn set_concurrent_counters_manager(mut self, value: bool) -> Self {
        self.concurrent_counters_manager = value;
        self
    }

    /// Heartbeat age beyond which peers consider this driver dead
    pub fn set_driver_timeout_ms(mut self, value: i64) -> Self {
        self.driver_timeout_ms = value;
        self
    }

    /// Nanoseconds a silent client stays live
    pub fn set_client_liveness_timeout_ns(mut self, value: i64) -> Self {
        self.client_liveness_timeout_ns = value;
        self
    }

    /// Nanoseconds an image survives without data
    pub fn set_image_liveness_timeout_ns(mut self, value: i64) -> Self {
        self.image_liveness_timeout_ns = value;
        self
    }

    /// Nanoseconds before a stalled publication claim is unblocked
    pub fn set_publication_unblock_timeout_ns(mut self, value: i64) -> Self {
        self.publication_unblock_timeout_ns = value;
        self
    }

    /// Nanoseconds between forced status messages
    pub fn set_status_message_timeout_ns(mut self, value: i64) -> Self {
        self.status_message_timeout_ns = value;
        self
    }

    /// Ceiling for any term buffer length
    pub fn set_max_term_buffer_length(mut self, value: IndexT) -> Self {
        self.max_term_buffer_length = value;
        self
    }

    /// Term buffer length for network publications
    pub fn set_publication_term_buffer_length(mut self, value: IndexT) -> Self {
        self.publication_term_buffer_length = value;
        self
    }

    /// Term buffer length for IPC publications
    pub fn set_ipc_publication_term_buffer_length(mut self, value: IndexT) -> Self {
        self.ipc_publication_term_buffer_length = value;
        self
    }

    /// Initial receiver window advertised to senders
    pub fn set_initial_window_length(mut self, value: IndexT) -> Self {
        self.initial_window_length = value;
        self
    }

    /// Socket receive buffer the window must fit inside
    pub fn set_socket_rcvbuf_length(mut self, value: IndexT) -> Self {
        self.socket_rcvbuf_length = value;
        self
    }

    /// MTU for network channels
    pub fn set_mtu_length(mut self, value: IndexT) -> Self {
        self.mtu_length = value;
        self
    }

    /// MTU for IPC channels
    pub fn set_ipc_mtu_length(mut self, value: IndexT) -> Self {
        self.ipc_mtu_length = value;
        self
    }

    /// Data capacity of the to-driver command ring, trailer excluded
    pub fn set_to_driver_buffer_length(mut self, value: IndexT) -> Self {
        self.to_driver_buffer_length = value;
        self
    }

    /// Data capacity of the to-clients broadcast, trailer excluded
    pub fn set_to_clients_buffer_length(mut self, value: IndexT) -> Self {
        self.to_clients_buffer_length = value;
        self
    }

    /// Length of the counters values region; the metadata region scales from
    /// it
    pub fn set_counters_values_buffer_length(mut self, value: IndexT) -> Self {
        self.counters_values_buffer_length = value;
        self
    }

    /// Length of the error log region
    pub fn set_error_buffer_length(mut self, value: IndexT) -> Self {
        self.error_buffer_length = value;
        self
    }

    /// Length of the loss report file
    pub fn set_loss_report_buffer_length(mut self, value: IndexT) -> Self {
        self.loss_report_buffer_length = value;
        self
    }

    /// Capacity of each inter-agent command queue; must be a power of two
    pub fn set_cmd_queue_capacity(mut self, value: usize) -> Self {
        self.cmd_queue_capacity = value;
        self
    }

    /// Threading mode hosting the three agents
    pub fn set_threading_mode(mut self, value: ThreadingMode) -> Self {
        self.threading_mode = value;
        self
    }

    /// Idle strategy for a dedicated conductor thread
    pub fn set_conductor_idle_strategy(mut self, value: IdleStrategy) -> Self {
        self.conductor_idle_strategy = Some(value);
        self
    }

    /// Idle strategy for a dedicated sender thread
    pub fn set_sender_idle_strategy(mut self, value: IdleStrategy) -> Self {
        self.sender_idle_strategy = Some(value);
        self
    }

    /// Idle strategy for a dedicated receiver thread
    pub fn set_receiver_idle_strategy(mut self, value: IdleStrategy) -> Self {
        self.receiver_idle_strategy = Some(value);
        self
    }

    /// Idle strategy for the single shared thread
    pub fn set_shared_idle_strategy(mut self, value: IdleStrategy) -> Self {
        self.shared_idle_strategy = Some(value);
        self
    }

    /// Idle strategy for the shared network thread
    pub fn set_shared_network_idle_strategy(mut self, value: IdleStrategy) -> Self {
        self.shared_network_idle_strategy = Some(value);
        self
    }

    /// Thread factory for the conductor thread
    pub fn set_conductor_thread_factory(mut self, value: ThreadFactory) -> Self {
        self.conductor_thread_factory = Some(value);
        self
    }

    /// Thread factory for the sender thread
    pub fn set_sender_thread_factory(mut self, value: ThreadFactory) -> Self {
        self.sender_thread_factory = Some(value);
        self
    }

    /// Thread factory for the receiver thread
    pub fn set_receiver_thread_factory(mut self, value: ThreadFactory) -> Self {
        self.receiver_thread_factory = Some(value);
        self
    }

    /// Thread factory for the shared threads
    pub fn set_shared_thread_factory(mut self, value: ThreadFactory) -> Self {
        self.shared_thread_factory = Some(value);
        self
    }

    /// Wall clock used for timestamps and liveness
    pub fn set_epoch_clock(mut self, value: Arc<dyn EpochClock>) -> Self {
        self.epoch_clock = value;
        self
    }

    /// Monotonic clock used for intervals
    pub fn set_nano_clock(mut self, value: Arc<dyn NanoClock>) -> Self {
        self.nano_clock = value;
        self
    }

    /// Override the default error handler
    pub fn set_error_handler(mut self, value: ErrorHandler) -> Self {
        self.error_handler = Some(value);
        self
    }

    /// Supplier of egress channel endpoints
    pub fn set_send_channel_endpoint_supplier(mut self, value: SendChannelEndpointSupplier) -> Self {
        self.send_channel_endpoint_supplier = Some(value);
        self
    }

    /// Supplier of ingress channel endpoints
    pub fn set_receive_channel_endpoint_supplier(
        mut self,
        value: ReceiveChannelEndpointSupplier,
    ) -> Self {
        self.receive_channel_endpoint_supplier = Some(value);
        self
    }

    /// Supplier of unicast flow control strategies
    pub fn set_unicast_flow_control_supplier(mut self, value: FlowControlSupplier) -> Self {
        self.unicast_flow_control_supplier = Some(value);
        self
    }

    /// Supplier of multicast flow control strategies
    pub fn set_multicast_flow_control_supplier(mut self, value: FlowControlSupplier) -> Self {
        self.multicast_flow_control_supplier = Some(value);
        self
    }

    /// Supplier of congestion control strategies
    pub fn set_congestion_control_supplier(mut self, value: CongestionControlSupplier) -> Self {
        self.congestion_control_supplier = Some(value);
        self
    }

    /// State directory currently configured
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn validate(&self) -> Result<()> {
        config::validate_mtu_length("mtu length", self.mtu_length)?;
        config::validate_mtu_length("ipc mtu length", self.ipc_mtu_length)?;
        config::validate_term_length(
            "max term buffer length",
            self.max_term_buffer_length,
            config::TERM_MAX_LENGTH,
        )?;
        config::validate_term_length(
            "publication term buffer length",
            self.publication_term_buffer_length,
            self.max_term_buffer_length,
        )?;
        config::validate_term_length(
            "ipc publication term buffer length",
            self.ipc_publication_term_buffer_length,
            self.max_term_buffer_length,
        )?;
        config::validate_initial_window_length(
            self.initial_window_length,
            self.socket_rcvbuf_length,
        )?;
        config::validate_buffer_capacity("to-driver buffer length", self.to_driver_buffer_length)?;
        config::validate_buffer_capacity(
            "to-clients buffer length",
            self.to_clients_buffer_length,
        )?;
        if !is_power_of_two(self.cmd_queue_capacity as IndexT) {
            return Err(DriverError::Configuration(format!(
                "command queue capacity of {} is not a power of two",
                self.cmd_queue_capacity
            )));
        }
        Ok(())
    }

    fn cnc_lengths(&self) -> CncLengths {
        let counters_metadata_length = (self.counters_values_buffer_length as usize
            / COUNTER_LENGTH
            * METADATA_LENGTH) as IndexT;

        CncLengths {
            to_driver: self.to_driver_buffer_length + buffer_descriptor::TRAILER_LENGTH,
            to_clients: self.to_clients_buffer_length
                + broadcast::buffer_descriptor::TRAILER_LENGTH,
            counters_metadata: counters_metadata_length,
            counters_values: self.counters_values_buffer_length,
            error_log: self.error_buffer_length,
        }
    }

    /// Validate the configuration, arbitrate the state directory, build and
    /// publish the CnC file, and bind every component. Fails atomically:
    /// partial state unwinds through drops and no ready signal is published.
    pub fn conclude(self) -> Result<ConcludedContext> {
        self.validate()?;

        let epoch_clock = Arc::clone(&self.epoch_clock);
        ensure_directory_is_recreated(
            &self.dir,
            self.driver_timeout_ms,
            self.warn_if_directory_exists,
            self.dir_delete_on_start,
            &*epoch_clock,
            |cnc| save_existing_errors(&self.dir, cnc, epoch_clock.time_ms()).map(|_| ()),
        )?;

        let now_ms = self.epoch_clock.time_ms();
        let mut cnc = CncFile::create(
            &self.dir.join(CNC_FILE),
            &self.cnc_lengths(),
            self.client_liveness_timeout_ns,
            now_ms,
        )?;

        // The conductor's consumer instance of the to-driver ring; also
        // carries the heartbeat peers probe.
        let mut to_driver_ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer())?;

        let to_clients_transmitter = BroadcastTransmitter::new(cnc.to_clients_buffer())?;

        let error_log = Arc::new(DistinctErrorLog::new(cnc.error_log_buffer()));

        let mut counters_manager = CountersManager::new(
            cnc.counters_metadata_buffer(),
            cnc.counters_values_buffer(),
            self.concurrent_counters_manager,
        );
        let system_counters = Arc::new(SystemCounters::new(&mut counters_manager)?);

        let error_handler = match self.error_handler {
            Some(handler) => handler,
            None => default_error_handler(
                Arc::clone(&error_log),
                Arc::clone(&self.epoch_clock),
                Arc::clone(&system_counters),
            ),
        };

        let client_proxy = ClientProxy::new(to_clients_transmitter, Arc::clone(&error_handler));

        let to_conductor_queue = Arc::new(OneToOneQueue::with_capacity(self.cmd_queue_capacity)?);
        let to_sender_queue = Arc::new(OneToOneQueue::with_capacity(self.cmd_queue_capacity)?);
        let to_receiver_queue = Arc::new(OneToOneQueue::with_capacity(self.cmd_queue_capacity)?);

        let raw_log_factory = RawLogFactory::new(
            &self.dir,
            self.max_term_buffer_length,
            self.term_buffer_sparse_file,
        )?;

        let loss_report_mmap = map_new_file(
            &self.dir.join(LOSS_REPORT_FILE),
            self.loss_report_buffer_length as usize,
        )?;
        let loss_report_buffer =
            unsafe { RawBuffer::new(loss_report_mmap.as_ptr() as *mut u8, loss_report_mmap.len()) };
        let loss_report = LossReport::new(loss_report_buffer);

        let spies = self.spies_simulate_connection;
        let unicast_flow_control = self.unicast_flow_control_supplier.unwrap_or_else(|| {
            Arc::new(move || Box::new(MaxFlowControl::new(spies)) as Box<dyn FlowControl>)
        });
        let multicast_flow_control = self.multicast_flow_control_supplier.unwrap_or_else(|| {
            Arc::new(move || Box::new(MaxFlowControl::new(spies)) as Box<dyn FlowControl>)
        });
        let congestion_control = self.congestion_control_supplier.unwrap_or_else(|| {
            Arc::new(|initial_window| {
                Box::new(StaticWindowCongestionControl::new(initial_window))
                    as Box<dyn crate::media::CongestionControl>
            })
        });
        let send_endpoints = self
            .send_channel_endpoint_supplier
            .unwrap_or_else(udp_send_channel_endpoint_supplier);
        let receive_endpoints = self
            .receive_channel_endpoint_supplier
            .unwrap_or_else(udp_receive_channel_endpoint_supplier);

        let stock_idle = || {
            IdleStrategy::backoff(
                10,
                20,
                Duration::from_micros(1),
                Duration::from_millis(1),
            )
        };
        let idle_strategies = IdleStrategies {
            conductor: self.conductor_idle_strategy.unwrap_or_else(stock_idle),
            sender: self.sender_idle_strategy.unwrap_or_else(stock_idle),
            receiver: self.receiver_idle_strategy.unwrap_or_else(stock_idle),
            shared: self.shared_idle_strategy.unwrap_or_else(stock_idle),
            shared_network: self.shared_network_idle_strategy.unwrap_or_else(stock_idle),
        };
        let thread_factories = ThreadFactories {
            conductor: self
                .conductor_thread_factory
                .unwrap_or_else(default_thread_factory),
            sender: self
                .sender_thread_factory
                .unwrap_or_else(default_thread_factory),
            receiver: self
                .receiver_thread_factory
                .unwrap_or_else(default_thread_factory),
            shared: self
                .shared_thread_factory
                .unwrap_or_else(default_thread_factory),
        };

        // Heartbeat first, ready signal last: a peer that observes ready must
        // also observe a heartbeat it can judge.
        to_driver_ring.update_consumer_heartbeat_time(now_ms);

        cnc.signal_ready();
        tracing::info!(dir = %self.dir.display(), "CnC file ready");

        Ok(ConcludedContext {
            dir: self.dir,
            cnc,
            loss_report_mmap,
            system_counters,
            error_log,
            error_handler,
            epoch_clock: self.epoch_clock,
            nano_clock: self.nano_clock,
            threading_mode: self.threading_mode,
            shutdown: Arc::new(AtomicBool::new(false)),
            use_windows_high_res_timer: self.use_windows_high_res_timer,
            assembly: Some(AssemblyParts {
                to_driver_ring,
                client_proxy,
                counters_manager,
                loss_report,
                raw_log_factory,
                to_conductor_queue,
                to_sender_queue,
                to_receiver_queue,
                idle_strategies,
                thread_factories,
                send_channel_endpoint_supplier: send_endpoints,
                receive_channel_endpoint_supplier: receive_endpoints,
                unicast_flow_control_supplier: unicast_flow_control,
                multicast_flow_control_supplier: multicast_flow_control,
                congestion_control_supplier: congestion_control,
                client_liveness_timeout_ns: self.client_liveness_timeout_ns,
                publication_term_buffer_length: self.publication_term_buffer_length,
                ipc_publication_term_buffer_length: self.ipc_publication_term_buffer_length,
                initial_window_length: self.initial_window_length,
                mtu_length: self.mtu_length,
            }),
        })
    }
}

/// Build the stock error handler: record to the distinct error log, bump the
/// errors counter, and fall back to stderr when the log region is full. The
/// overflow warning prints once per overflow episode.
fn default_error_handler(
    error_log: Arc<DistinctErrorLog>,
    epoch_clock: Arc<dyn EpochClock>,
    system_counters: Arc<SystemCounters>,
) -> ErrorHandler {
    let overflowed = AtomicBool::new(false);
    Arc::new(move |error| {
        system_counters.errors().increment();
        let text = error.to_string();
        if error_log.record(epoch_clock.time_ms(), &text) {
            overflowed.store(false, ::std::sync::atomic::Ordering::Relaxed);
        } else {
            if !overflowed.swap(true, ::std::sync::atomic::Ordering::Relaxed) {
                eprintln!("WARNING: error log is full, reporting to stderr");
            }
            eprintln!("{}", text);
        }
    })
}

fn map_new_file(path: &Path, length: usize) -> Result<MmapMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| DriverError::io(format!("creating {}", path.display()), e))?;
    file.set_len(length as u64)
        .map_err(|e| DriverError::io(format!("sizing {}", path.display()), e))?;
    unsafe { MmapOptions::new().map_mut(&file) }
        .map_err(|e| DriverError::io(format!("mapping {}", path.display()), e))
}

/// Idle strategies resolved for every hosting arrangement
pub(crate) struct IdleStrategies {
    pub conductor: IdleStrategy,
    pub sender: IdleStrategy,
    pub receiver: IdleStrategy,
    pub shared: IdleStrategy,
    pub shared_network: IdleStrategy,
}

/// Thread factories resolved for every hosting arrangement
pub(crate) struct ThreadFactories {
    pub conductor: ThreadFactory,
    pub sender: ThreadFactory,
    pub receiver: ThreadFactory,
    pub shared: ThreadFactory,
}

/// Everything the driver assembly consumes exactly once to build and wire
/// the agents.
pub(crate) struct AssemblyParts {
    pub to_driver_ring: ManyToOneRingBuffer<RawBuffer>,
    pub client_proxy: ClientProxy,
    pub counters_manager: CountersManager,
    pub loss_report: LossReport,
    pub raw_log_factory: RawLogFactory,
    pub to_conductor_queue: Arc<OneToOneQueue<ConductorCommand>>,
    pub to_sender_queue: Arc<OneToOneQueue<SenderCommand>>,
    pub to_receiver_queue: Arc<OneToOneQueue<ReceiverCommand>>,
    pub idle_strategies: IdleStrategies,
    pub thread_factories: ThreadFactories,
    pub send_channel_endpoint_supplier: SendChannelEndpointSupplier,
    pub receive_channel_endpoint_supplier: ReceiveChannelEndpointSupplier,
    pub unicast_flow_control_supplier: FlowControlSupplier,
    pub multicast_flow_control_supplier: FlowControlSupplier,
    pub congestion_control_supplier: CongestionControlSupplier,
    pub client_liveness_timeout_ns: i64,
    pub publication_term_buffer_length: IndexT,
    pub ipc_publication_term_buffer_length: IndexT,
    pub initial_window_length: IndexT,
    pub mtu_length: IndexT,
}

/// Immutable, fully-bound driver state. Owns every mapping created during
/// conclude; dropping it unmaps them all.
pub struct ConcludedContext {
    dir: PathBuf,
    cnc: CncFile,
    #[allow(dead_code)]
    loss_report_mmap: MmapMut,
    system_counters: Arc<SystemCounters>,
    error_log: Arc<DistinctErrorLog>,
    error_handler: ErrorHandler,
    epoch_clock: Arc<dyn EpochClock>,
    nano_clock: Arc<dyn NanoClock>,
    threading_mode: ThreadingMode,
    shutdown: Arc<AtomicBool>,
    use_windows_high_res_timer: bool,
    assembly: Option<AssemblyParts>,
}

impl ConcludedContext {
    /// State directory the driver owns
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The mapped CnC file
    pub fn cnc_file(&self) -> &CncFile {
        &self.cnc
    }

    /// The system counter registry
    pub fn system_counters(&self) -> &Arc<SystemCounters> {
        &self.system_counters
    }

    /// The distinct error log in the CnC file
    pub fn error_log(&self) -> &Arc<DistinctErrorLog> {
        &self.error_log
    }

    /// The bound error handler
    pub fn error_handler(&self) -> &ErrorHandler {
        &self.error_handler
    }

    /// Wall clock bound at conclude
    pub fn epoch_clock(&self) -> &Arc<dyn EpochClock> {
        &self.epoch_clock
    }

    /// Monotonic clock bound at conclude
    pub fn nano_clock(&self) -> &Arc<dyn NanoClock> {
        &self.nano_clock
    }

    /// Threading mode the driver will assemble under
    pub fn threading_mode(&self) -> ThreadingMode {
        self.threading_mode
    }

    /// Flag set when a client commands driver termination
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Whether the Windows high-resolution timer was requested
    pub fn use_windows_high_res_timer(&self) -> bool {
        self.use_windows_high_res_timer
    }

    pub(crate) fn take_assembly(&mut self) -> Option<AssemblyParts> {
        self.assembly.take()
    }
}
