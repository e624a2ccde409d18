//! Driver launch and shutdown: concludes the context, assembles the three
//! agents under the configured threading mode, wires their command proxies,
//! and hosts them until closed.
//!
//! Proxy dispatch targets are chosen with the threading mode: the dedicated
//! and shared-network modes queue between threads, while the shared and
//! invoker modes build every agent on one thread and dispatch inline. The
//! single-threaded wiring is deliberately constructed on the thread that
//! hosts it, which is what makes the inline targets sound.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent::{Agent, AgentInvoker, AgentRunner, CompositeAgent};
use crate::conductor::DriverConductor;
use crate::concurrent::queue::OneToOneQueue;
use crate::config::ThreadingMode;
use crate::context::{AssemblyParts, ConcludedContext, DriverContext};
use crate::counters::SystemCounters;
use crate::error::{DriverError, ErrorHandler, Result};
use crate::media::channel_flow_control_supplier;
use crate::proxy::{
    CommandTarget, ConductorCommand, DriverConductorProxy, ReceiverCommand, ReceiverProxy,
    SenderCommand, SenderProxy,
};
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::time::{EpochClock, NanoClock};
use crate::timer::HighResTimerGuard;
use crate::util::BufferError;

/// The `Send` slice of the concluded context that agent construction needs;
/// shared-mode factories carry it onto the hosting thread.
struct BuildDeps {
    system_counters: Arc<SystemCounters>,
    error_handler: ErrorHandler,
    epoch_clock: Arc<dyn EpochClock>,
    nano_clock: Arc<dyn NanoClock>,
    shutdown: Arc<AtomicBool>,
}

impl BuildDeps {
    fn capture(context: &ConcludedContext) -> BuildDeps {
        BuildDeps {
            system_counters: Arc::clone(context.system_counters()),
            error_handler: Arc::clone(context.error_handler()),
            epoch_clock: Arc::clone(context.epoch_clock()),
            nano_clock: Arc::clone(context.nano_clock()),
            shutdown: context.shutdown_signal(),
        }
    }
}

struct AgentSet {
    conductor: DriverConductor,
    sender: Sender,
    receiver: Receiver,
}

fn build_agents(parts: AssemblyParts, deps: &BuildDeps) -> AgentSet {
    let counters = Arc::clone(&deps.system_counters);

    let conductor = DriverConductor::new(
        parts.to_driver_ring,
        parts.client_proxy,
        Arc::clone(&parts.to_conductor_queue),
        parts.counters_manager,
        Arc::clone(&counters),
        parts.loss_report,
        parts.raw_log_factory,
        Arc::clone(&deps.epoch_clock),
        parts.client_liveness_timeout_ns,
        parts.publication_term_buffer_length,
        parts.ipc_publication_term_buffer_length,
        parts.initial_window_length,
        parts.congestion_control_supplier,
        Arc::clone(&deps.shutdown),
        Arc::clone(&deps.error_handler),
    );

    let sender = Sender::new(
        Arc::clone(&parts.to_sender_queue),
        parts.send_channel_endpoint_supplier,
        channel_flow_control_supplier(
            parts.unicast_flow_control_supplier,
            parts.multicast_flow_control_supplier,
        ),
        i64::from(parts.initial_window_length),
        Arc::clone(&deps.nano_clock),
        Arc::clone(&counters),
        Arc::clone(&deps.error_handler),
    );

    let receiver = Receiver::new(
        Arc::clone(&parts.to_receiver_queue),
        parts.receive_channel_endpoint_supplier,
        parts.mtu_length as usize,
        Arc::clone(&counters),
        Arc::clone(&deps.error_handler),
    );

    AgentSet {
        conductor,
        sender,
        receiver,
    }
}

struct QueueHandles {
    to_conductor: Arc<OneToOneQueue<ConductorCommand>>,
    to_sender: Arc<OneToOneQueue<SenderCommand>>,
    to_receiver: Arc<OneToOneQueue<ReceiverCommand>>,
}

impl QueueHandles {
    fn from_parts(parts: &AssemblyParts) -> QueueHandles {
        QueueHandles {
            to_conductor: Arc::clone(&parts.to_conductor_queue),
            to_sender: Arc::clone(&parts.to_sender_queue),
            to_receiver: Arc::clone(&parts.to_receiver_queue),
        }
    }
}

/// Wire the agents through their SPSC queues for the multi-threaded modes.
fn wire_concurrent(set: &mut AgentSet, queues: &QueueHandles, counters: &SystemCounters) {
    let sender_proxy = SenderProxy::new(
        CommandTarget::Concurrent(Arc::clone(&queues.to_sender)),
        counters.sender_proxy_fails(),
    );
    let receiver_proxy = ReceiverProxy::new(
        CommandTarget::Concurrent(Arc::clone(&queues.to_receiver)),
        counters.receiver_proxy_fails(),
    );
    let conductor_proxy = DriverConductorProxy::new(
        CommandTarget::Concurrent(Arc::clone(&queues.to_conductor)),
        counters.conductor_proxy_fails(),
    );

    set.conductor.wire(sender_proxy, receiver_proxy);
    set.sender.wire(conductor_proxy.clone());
    set.receiver.wire(conductor_proxy);
}

/// Agent adapter over shared single-threaded ownership; the inline proxy
/// targets hold the same cells.
struct CellAgent<A: Agent> {
    cell: Rc<RefCell<A>>,
    name: String,
}

impl<A: Agent> CellAgent<A> {
    fn new(cell: Rc<RefCell<A>>) -> CellAgent<A> {
        let name = cell.borrow().role_name().to_string();
        CellAgent { cell, name }
    }
}

impl<A: Agent> Agent for CellAgent<A> {
    fn role_name(&self) -> &str {
        &self.name
    }

    fn do_work(&mut self) -> Result<usize> {
        self.cell.borrow_mut().do_work()
    }

    fn on_close(&mut self) {
        self.cell.borrow_mut().on_close()
    }
}

/// Build all three agents on the current thread and wire them with inline
/// dispatch targets. Returns the composite hosting them.
fn build_shared_composite(parts: AssemblyParts, deps: &BuildDeps) -> CompositeAgent {
    let counters = Arc::clone(&deps.system_counters);
    let set = build_agents(parts, deps);

    let sender = Rc::new(RefCell::new(set.sender));
    let receiver = Rc::new(RefCell::new(set.receiver));
    let conductor = Rc::new(RefCell::new(set.conductor));

    let sender_proxy = SenderProxy::new(
        CommandTarget::Direct(sender.clone()),
        counters.sender_proxy_fails(),
    );
    let receiver_proxy = ReceiverProxy::new(
        CommandTarget::Direct(receiver.clone()),
        counters.receiver_proxy_fails(),
    );
    let conductor_proxy = DriverConductorProxy::new(
        CommandTarget::Direct(conductor.clone()),
        counters.conductor_proxy_fails(),
    );

    conductor.borrow_mut().wire(sender_proxy, receiver_proxy);
    sender.borrow_mut().wire(conductor_proxy.clone());
    receiver.borrow_mut().wire(conductor_proxy);

    CompositeAgent::new(vec![
        Box::new(CellAgent::new(sender)),
        Box::new(CellAgent::new(receiver)),
        Box::new(CellAgent::new(conductor)),
    ])
}

/// A running media driver. Owns the concluded context, the agent hosts, and
/// the optional platform timer; closing reverses launch.
pub struct MediaDriver {
    context: ConcludedContext,
    runners: Vec<AgentRunner>,
    invoker: Option<AgentInvoker>,
    queues: QueueHandles,
    timer: Option<HighResTimerGuard>,
    closed: bool,
}

impl MediaDriver {
    /// Conclude `context` and start the driver under its threading mode.
    pub fn launch(context: DriverContext) -> Result<MediaDriver> {
        Self::launch_concluded(context.conclude()?)
    }

    fn launch_concluded(mut context: ConcludedContext) -> Result<MediaDriver> {
        let timer = if context.use_windows_high_res_timer() {
            Some(HighResTimerGuard::enable())
        } else {
            None
        };

        let parts = context
            .take_assembly()
            .ok_or(DriverError::Buffer(BufferError::IllegalState))?;

        let mut runners = Vec::new();
        let mut invoker = None;
        let error_handler = Arc::clone(context.error_handler());
        let deps = BuildDeps::capture(&context);
        let queues = QueueHandles::from_parts(&parts);

        match context.threading_mode() {
            ThreadingMode::Dedicated => {
                let conductor_idle = parts.idle_strategies.conductor.clone();
                let sender_idle = parts.idle_strategies.sender.clone();
                let receiver_idle = parts.idle_strategies.receiver.clone();
                let conductor_factory = Arc::clone(&parts.thread_factories.conductor);
                let sender_factory = Arc::clone(&parts.thread_factories.sender);
                let receiver_factory = Arc::clone(&parts.thread_factories.receiver);

                let mut set = build_agents(parts, &deps);
                wire_concurrent(&mut set, &queues, &deps.system_counters);

                let AgentSet {
                    conductor,
                    sender,
                    receiver,
                } = set;

                runners.push(AgentRunner::start(
                    "driver-conductor",
                    &conductor_factory,
                    conductor_idle,
                    Arc::clone(&error_handler),
                    move || conductor,
                )?);
                runners.push(AgentRunner::start(
                    "sender",
                    &sender_factory,
                    sender_idle,
                    Arc::clone(&error_handler),
                    move || sender,
                )?);
                runners.push(AgentRunner::start(
                    "receiver",
                    &receiver_factory,
                    receiver_idle,
                    Arc::clone(&error_handler),
                    move || receiver,
                )?);
            }
            ThreadingMode::SharedNetwork => {
                let network_idle = parts.idle_strategies.shared_network.clone();
                let conductor_idle = parts.idle_strategies.conductor.clone();
                let shared_factory = Arc::clone(&parts.thread_factories.shared);
                let conductor_factory = Arc::clone(&parts.thread_factories.conductor);

                let mut set = build_agents(parts, &deps);
                wire_concurrent(&mut set, &queues, &deps.system_counters);

                let AgentSet {
                    conductor,
                    sender,
                    receiver,
                } = set;

                runners.push(AgentRunner::start(
                    "sender:receiver",
                    &shared_factory,
                    network_idle,
                    Arc::clone(&error_handler),
                    move || CompositeAgent::new(vec![Box::new(sender), Box::new(receiver)]),
                )?);
                runners.push(AgentRunner::start(
                    "driver-conductor",
                    &conductor_factory,
                    conductor_idle,
                    Arc::clone(&error_handler),
                    move || conductor,
                )?);
            }
            ThreadingMode::Shared => {
                let shared_idle = parts.idle_strategies.shared.clone();
                let shared_factory = Arc::clone(&parts.thread_factories.shared);

                // The factory runs on the new thread: the composite and its
                // inline proxy wiring never exist anywhere else.
                runners.push(AgentRunner::start(
                    "sender:receiver:driver-conductor",
                    &shared_factory,
                    shared_idle,
                    Arc::clone(&error_handler),
                    move || build_shared_composite(parts, &deps),
                )?);
            }
            ThreadingMode::Invoker => {
                let composite = build_shared_composite(parts, &deps);
                invoker = Some(AgentInvoker::new(
                    Box::new(composite),
                    Arc::clone(&error_handler),
                ));
            }
        }

        tracing::info!(
            mode = ?context.threading_mode(),
            runners = runners.len(),
            "media driver started"
        );

        Ok(MediaDriver {
            context,
            runners,
            invoker,
            queues,
            timer,
            closed: false,
        })
    }

    /// The concluded context backing this driver
    pub fn context(&self) -> &ConcludedContext {
        &self.context
    }

    /// Number of runner threads hosting agents
    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    /// The caller-pumped invoker, present only in invoker mode
    pub fn invoker(&mut self) -> Option<&mut AgentInvoker> {
        self.invoker.as_mut()
    }

    /// Whether a client has commanded termination
    pub fn is_terminated(&self) -> bool {
        self.context.shutdown_signal().load(Ordering::Acquire)
    }

    /// Depth of each inter-agent command queue as
    /// `(to_conductor, to_sender, to_receiver)`. Diagnostics only; values
    /// are racy while agents run.
    pub fn command_queue_depths(&self) -> (usize, usize, usize) {
        (
            self.queues.to_conductor.len(),
            self.queues.to_sender.len(),
            self.queues.to_receiver.len(),
        )
    }

    /// Stop every runner, close the invoker, release the platform timer, and
    /// unmap the driver's files. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for runner in self.runners.iter_mut() {
            runner.close();
        }
        self.runners.clear();

        if let Some(mut invoker) = self.invoker.take() {
            invoker.close();
        }

        self.timer.take();
        tracing::info!("media driver closed");
    }
}

impl Drop for MediaDriver {
    fn drop(&mut self) {
        self.close();
    }
}
