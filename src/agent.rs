//! Agents and the runners that host them.
//!
//! An agent is a cooperatively-scheduled worker: `do_work` performs one duty
//! cycle and reports how much it did, and must never block beyond what its
//! idle strategy permits. A runner owns one OS thread, loops the duty cycle,
//! and applies the idle strategy whenever a cycle comes back empty.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::{DriverError, ErrorHandler, Result};
use crate::idle::IdleStrategy;

/// A cooperatively-scheduled worker hosted by a runner or invoker.
pub trait Agent {
    /// Name used for the hosting thread and diagnostics
    fn role_name(&self) -> &str;

    /// Perform one duty cycle, returning how many items of work were done.
    /// Implementations must not block indefinitely.
    fn do_work(&mut self) -> Result<usize>;

    /// Release resources owned by the agent. Called exactly once, after the
    /// final duty cycle.
    fn on_close(&mut self) {}
}

/// Produces the `thread::Builder` used to host an agent thread; injectable so
/// embedders can pin or rename driver threads.
pub type ThreadFactory = Arc<dyn Fn() -> thread::Builder + Send + Sync>;

/// The stock thread factory
pub fn default_thread_factory() -> ThreadFactory {
    Arc::new(thread::Builder::new)
}

/// Several agents sharing one duty cycle. Work counts are summed, so shared
/// back-off only applies when every member comes back empty.
pub struct CompositeAgent {
    agents: Vec<Box<dyn Agent>>,
    name: String,
}

impl CompositeAgent {
    /// Compose `agents` under a single duty cycle; the composite's name joins
    /// the member names.
    pub fn new(agents: Vec<Box<dyn Agent>>) -> CompositeAgent {
        let name = agents
            .iter()
            .map(|a| a.role_name())
            .collect::<Vec<_>>()
            .join(":");
        CompositeAgent { agents, name }
    }
}

impl Agent for CompositeAgent {
    fn role_name(&self) -> &str {
        &self.name
    }

    fn do_work(&mut self) -> Result<usize> {
        let mut work_count = 0;
        for agent in self.agents.iter_mut() {
            work_count += agent.do_work()?;
        }
        Ok(work_count)
    }

    fn on_close(&mut self) {
        for agent in self.agents.iter_mut() {
            agent.on_close();
        }
    }
}

/// Hosts one agent on a dedicated OS thread until stopped.
///
/// A duty cycle returning an error reports it and keeps running; a panicking
/// duty cycle reports and terminates that agent only. Either way `on_close`
/// runs before the thread exits.
pub struct AgentRunner {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    name: String,
}

impl AgentRunner {
    /// Spawn a thread for the agent produced by `factory`. The factory runs
    /// on the new thread, so agents wired with thread-local structure (the
    /// shared threading modes) are built where they live.
    pub fn start<A, F>(
        name: &str,
        thread_factory: &ThreadFactory,
        idle: IdleStrategy,
        error_handler: ErrorHandler,
        factory: F,
    ) -> Result<AgentRunner>
    where
        A: Agent + 'static,
        F: FnOnce() -> A + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let thread = thread_factory()
            .name(name.to_string())
            .spawn(move || run_agent(factory(), idle, thread_running, error_handler))
            .map_err(|e| DriverError::io(format!("spawning agent thread {}", name), e))?;

        Ok(AgentRunner {
            running,
            thread: Some(thread),
            name: name.to_string(),
        })
    }

    /// Name of the hosted agent thread
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the duty-cycle loop to stop and join the thread. Bounded by the
    /// idle strategy's longest park. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            // A panicking agent has already reported through the error
            // handler; nothing further to do with the join result.
            let _ = thread.join();
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_agent<A>(
    mut agent: A,
    mut idle: IdleStrategy,
    running: Arc<AtomicBool>,
    error_handler: ErrorHandler,
) where
    A: Agent,
{
    while running.load(Ordering::Acquire) {
        match catch_unwind(AssertUnwindSafe(|| agent.do_work())) {
            Ok(Ok(work_count)) => idle.idle(work_count),
            Ok(Err(error)) => {
                error_handler(&error);
                idle.idle(0);
            }
            Err(panic) => {
                error_handler(&DriverError::AgentPanic(panic_text(panic)));
                break;
            }
        }
    }

    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| agent.on_close())) {
        error_handler(&DriverError::AgentPanic(panic_text(panic)));
    }
}

fn panic_text(panic: Box<dyn ::std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// Caller-pumped host for the composite agent in invoker mode: no thread is
/// started, `invoke` runs one duty cycle on the calling thread.
pub struct AgentInvoker {
    agent: Box<dyn Agent>,
    error_handler: ErrorHandler,
    closed: bool,
}

impl AgentInvoker {
    /// Wrap `agent` for caller-driven duty cycles
    pub fn new(agent: Box<dyn Agent>, error_handler: ErrorHandler) -> AgentInvoker {
        AgentInvoker {
            agent,
            error_handler,
            closed: false,
        }
    }

    /// Run one duty cycle, reporting any error through the handler. Returns
    /// the work count (zero after close or on error).
    pub fn invoke(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        match self.agent.do_work() {
            Ok(work_count) => work_count,
            Err(error) => {
                (self.error_handler)(&error);
                0
            }
        }
    }

    /// Close the hosted agent. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.agent.on_close();
        }
    }
}

impl Drop for AgentInvoker {
    fn drop(&mut self) {
        self.close();
    }
}
