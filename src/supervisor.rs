//! Supervisors: rest-for-one supervision trees.
//!
//! A supervisor is an actor whose state is an ordered chain of started
//! children plus a restart governor. Children are described by
//! [`ChildSpec`]s and started oldest-first during init, threading a composed
//! argument through the chain: each spec's `returning` maps the argument it
//! was started with (plus its subject) into the argument for the next child.
//!
//! When a child exits abnormally, the supervisor walks the chain with
//! [`Instruction::StartFrom`]: older siblings are left alone, the failed
//! child is restarted, and every younger sibling is shut down and restarted
//! (rest-for-one). Restart rate is governed by an [`IntensityTracker`]; too
//! many restarts within the period stop the supervisor. A restart that
//! itself fails is retried asynchronously through a subject the supervisor
//! owns, so inspection and suspend requests interleave with retries instead
//! of starving behind them.
//!
//! # Example
//!
//! ```ignore
//! let tree = supervisor::start(|children| {
//!     children
//!         .add(supervisor::worker(|()| actor::start(0, pool::handler)))
//!         .add(supervisor::worker(|()| actor::start((), session::handler)))
//! })?;
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::actor::{self, InitResult, Next, StartError};
use crate::pid::Pid;
use crate::process::{self, ExitMessage, ExitReason};
use crate::selector::Selector;
use crate::subject::Subject;

/// Default restart intensity limit.
pub const DEFAULT_MAX_FREQUENCY: usize = 5;
/// Default restart intensity period.
pub const DEFAULT_FREQUENCY_PERIOD: Duration = Duration::from_secs(1);
/// Default time the whole child chain may take to start.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Intensity tracking
// ============================================================================

/// The supervisor exceeded its restart intensity and must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("too many restarts within the intensity period")]
pub struct TooManyRestarts;

/// Sliding-window restart counter.
///
/// Tracks event timestamps within `period`; exceeding `limit` events in any
/// window fails. A limit of zero means any event is fatal.
#[derive(Debug, Clone)]
pub struct IntensityTracker {
    limit: usize,
    period: Duration,
    events: VecDeque<Instant>,
}

impl IntensityTracker {
    /// Creates a tracker allowing `limit` events per `period`.
    #[must_use]
    pub fn new(limit: usize, period: Duration) -> Self {
        Self {
            limit,
            period,
            events: VecDeque::new(),
        }
    }

    /// Records an event at `now`, pruning events older than the period.
    ///
    /// Fails when the window now holds more than `limit` events.
    pub fn add_event(&mut self, now: Instant) -> Result<(), TooManyRestarts> {
        if let Some(cutoff) = now.checked_sub(self.period) {
            while self.events.front().is_some_and(|&event| event < cutoff) {
                self.events.pop_front();
            }
        }
        self.events.push_back(now);
        if self.events.len() > self.limit {
            Err(TooManyRestarts)
        } else {
            Ok(())
        }
    }

    /// Events currently inside the window.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

// ============================================================================
// Child specs
// ============================================================================

/// How a child is stopped during a restart pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Kill immediately.
    BrutalKill,
    /// Ask politely, then kill when the grace window expires.
    Timeout(Duration),
    /// Ask politely and wait however long it takes.
    Infinity,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::Timeout(Duration::from_secs(5))
    }
}

/// Description of one child: how to start it and how it transforms the
/// composed argument for its younger siblings.
///
/// A spec is pure description — the supervisor invokes `start` once at boot
/// and again on every restart of the child.
pub struct ChildSpec<M, A, B> {
    start: Box<dyn Fn(A) -> Result<Subject<M>, StartError> + Send + 'static>,
    returning: Box<dyn Fn(A, Subject<M>) -> B + Send + 'static>,
    shutdown: Shutdown,
}

impl<M, A, B> std::fmt::Debug for ChildSpec<M, A, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSpec")
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

/// Creates a worker spec: the child passes the argument through unchanged.
pub fn worker<M, A, F>(start: F) -> ChildSpec<M, A, A>
where
    M: Send + 'static,
    A: Clone + Send + 'static,
    F: Fn(A) -> Result<Subject<M>, StartError> + Send + 'static,
{
    ChildSpec {
        start: Box::new(start),
        returning: Box::new(|argument, _subject| argument),
        shutdown: Shutdown::default(),
    }
}

impl<M, A, B> ChildSpec<M, A, B>
where
    M: Send + 'static,
    A: Clone + Send + 'static,
{
    /// Replaces how this child transforms the composed argument.
    #[must_use]
    pub fn returning<C, F>(self, updater: F) -> ChildSpec<M, A, C>
    where
        C: Clone + Send + 'static,
        F: Fn(A, Subject<M>) -> C + Send + 'static,
    {
        ChildSpec {
            start: self.start,
            returning: Box::new(updater),
            shutdown: self.shutdown,
        }
    }

    /// Sets how this child is stopped during restarts.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }
}

// ============================================================================
// Starter chain
// ============================================================================

/// Drives a restart traversal of the starter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Restart every child.
    StartAll,
    /// Leave children older than the named child alone; restart it and every
    /// younger sibling.
    StartFrom(Pid),
}

/// A child failed to start.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to start child (previously {previous_pid:?}): {error}")]
pub struct ChildStartError {
    /// The failed child's pid from the previous pass, when it had one.
    pub previous_pid: Option<Pid>,
    /// Why the start failed.
    pub error: StartError,
}

/// Clone-able type-erased child argument.
trait ArgValue: Send {
    fn clone_value(&self) -> DynArg;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Clone + Send + 'static> ArgValue for T {
    fn clone_value(&self) -> DynArg {
        Box::new(self.clone())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

type DynArg = Box<dyn ArgValue>;

/// One started child in the chain.
struct Slot {
    pid: Pid,
    shutdown: Shutdown,
    /// The composed argument this child produced on its most recent start;
    /// the next slot's input when this child is left alone.
    last_output: DynArg,
    restart: Box<dyn FnMut(DynArg) -> Result<(Pid, DynArg), StartError> + Send>,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("pid", &self.pid)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

/// The supervisor's chain of started children.
struct StarterCore {
    initial_argument: DynArg,
    slots: Vec<Slot>,
}

impl std::fmt::Debug for StarterCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StarterCore")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl StarterCore {
    /// The argument the next `add` would start its child with.
    fn next_argument(&self) -> DynArg {
        self.slots.last().map_or_else(
            || self.initial_argument.clone_value(),
            |slot| slot.last_output.clone_value(),
        )
    }

    /// Child pids in start order.
    fn child_pids(&self) -> Vec<Pid> {
        self.slots.iter().map(|slot| slot.pid).collect()
    }

    /// Walks the chain oldest-first applying `instruction`.
    ///
    /// `StartFrom` escalates to `StartAll` at the matching slot, restarting
    /// it and everything younger. Returns the instruction as rewritten by the
    /// walk. On failure the already-restarted older slots keep their new
    /// pids, and the error names the failed child's previous pid so a retry
    /// can resume from it.
    fn exec(&mut self, instruction: Instruction) -> Result<Instruction, ChildStartError> {
        let mut argument = self.initial_argument.clone_value();
        let mut instruction = instruction;
        for slot in &mut self.slots {
            let restart_this = match instruction {
                Instruction::StartAll => true,
                Instruction::StartFrom(pid) if pid == slot.pid => {
                    instruction = Instruction::StartAll;
                    true
                }
                Instruction::StartFrom(_) => false,
            };
            if restart_this {
                shutdown_child(slot.pid, slot.shutdown);
                match (slot.restart)(argument) {
                    Ok((pid, output)) => {
                        tracing::debug!(old = %slot.pid, new = %pid, "child restarted");
                        slot.pid = pid;
                        slot.last_output = output;
                    }
                    Err(error) => {
                        return Err(ChildStartError {
                            previous_pid: Some(slot.pid),
                            error,
                        });
                    }
                }
            }
            argument = slot.last_output.clone_value();
        }
        Ok(instruction)
    }
}

/// Stops a child according to its shutdown policy and waits for it to die.
///
/// Unlinking first keeps the deliberate death out of the supervisor's
/// trapped-exit path. An already-dead child completes immediately through
/// the monitor's `noproc` notification.
fn shutdown_child(pid: Pid, shutdown: Shutdown) {
    process::unlink(pid);
    let monitor = process::monitor_process(pid);
    let down = Selector::new().selecting_process_down(monitor, |down| down);
    match shutdown {
        Shutdown::BrutalKill => {
            process::kill(pid);
            let _ = down.select_forever();
        }
        Shutdown::Timeout(grace) => {
            process::send_exit(pid, ExitReason::Normal);
            if down.select(grace).is_err() {
                tracing::warn!(pid = %pid, "child ignored shutdown, killing");
                process::kill(pid);
                let _ = down.select_forever();
            }
        }
        Shutdown::Infinity => {
            process::send_exit(pid, ExitReason::Normal);
            let _ = down.select_forever();
        }
    }
    process::demonitor(monitor, true);
}

/// The chain under construction during supervisor init.
///
/// Obtained inside the `init` callback of [`start`]/[`start_spec`]; each
/// [`add`](Self::add) starts its child immediately and threads the composed
/// argument. Once an add fails, later adds are no-ops and the supervisor's
/// init fails.
#[derive(Debug)]
pub struct Children<A> {
    inner: ChildrenInner,
    _argument: std::marker::PhantomData<fn(A) -> A>,
}

#[derive(Debug)]
enum ChildrenInner {
    Ready(StarterCore),
    Failed(ChildStartError),
}

impl<A: Clone + Send + 'static> Children<A> {
    fn ready(argument: A) -> Self {
        Self {
            inner: ChildrenInner::Ready(StarterCore {
                initial_argument: Box::new(argument),
                slots: Vec::new(),
            }),
            _argument: std::marker::PhantomData,
        }
    }

    /// Starts `spec`'s child with the current composed argument and appends
    /// it to the chain.
    #[must_use]
    pub fn add<M, B>(self, spec: ChildSpec<M, A, B>) -> Children<B>
    where
        M: Send + 'static,
        B: Clone + Send + 'static,
    {
        let core = match self.inner {
            ChildrenInner::Failed(error) => {
                return Children {
                    inner: ChildrenInner::Failed(error),
                    _argument: std::marker::PhantomData,
                }
            }
            ChildrenInner::Ready(core) => core,
        };

        let ChildSpec {
            start,
            returning,
            shutdown,
        } = spec;
        let mut restart: Box<dyn FnMut(DynArg) -> Result<(Pid, DynArg), StartError> + Send> =
            Box::new(move |argument| {
                let argument = *argument
                    .into_any()
                    .downcast::<A>()
                    .expect("child argument type is preserved along the chain");
                let subject = start(argument.clone())?;
                let pid = subject.owner();
                let output = returning(argument, subject);
                Ok((pid, Box::new(output) as DynArg))
            });

        let mut core = core;
        let argument = core.next_argument();
        let inner = match restart(argument) {
            Ok((pid, output)) => {
                core.slots.push(Slot {
                    pid,
                    shutdown,
                    last_output: output,
                    restart,
                });
                ChildrenInner::Ready(core)
            }
            Err(error) => ChildrenInner::Failed(ChildStartError {
                previous_pid: None,
                error,
            }),
        };
        Children {
            inner,
            _argument: std::marker::PhantomData,
        }
    }
}

// ============================================================================
// The supervisor actor
// ============================================================================

/// The supervisor's message type. Opaque: it exists so the supervisor can be
/// addressed (and inspected through [`crate::system`]) like any other actor.
#[derive(Debug)]
pub struct Message {
    inner: Protocol,
}

#[derive(Debug)]
enum Protocol {
    Exit(ExitMessage),
    Retry(Pid),
}

/// Supervisor state: the chain, the governor, and the retry channel.
struct State {
    starter: StarterCore,
    restarts: IntensityTracker,
    retry: Subject<Pid>,
    parent: Pid,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("children", &self.starter.child_pids())
            .field("recent_restarts", &self.restarts.event_count())
            .finish_non_exhaustive()
    }
}

/// Everything needed to start a supervisor.
pub struct Spec<A, R> {
    argument: A,
    max_frequency: usize,
    frequency_period: Duration,
    init_timeout: Duration,
    init: Box<dyn FnOnce(Children<A>) -> Children<R> + Send + 'static>,
}

impl<A, R> std::fmt::Debug for Spec<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spec")
            .field("max_frequency", &self.max_frequency)
            .field("frequency_period", &self.frequency_period)
            .field("init_timeout", &self.init_timeout)
            .finish_non_exhaustive()
    }
}

impl<A, R> Spec<A, R>
where
    A: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Creates a spec with the given initial argument and child chain
    /// builder, and default limits.
    pub fn new<I>(argument: A, init: I) -> Self
    where
        I: FnOnce(Children<A>) -> Children<R> + Send + 'static,
    {
        Self {
            argument,
            max_frequency: DEFAULT_MAX_FREQUENCY,
            frequency_period: DEFAULT_FREQUENCY_PERIOD,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            init: Box::new(init),
        }
    }

    /// Sets how many restarts the period may hold.
    #[must_use]
    pub fn with_max_frequency(mut self, limit: usize) -> Self {
        self.max_frequency = limit;
        self
    }

    /// Sets the restart counting period.
    #[must_use]
    pub fn with_frequency_period(mut self, period: Duration) -> Self {
        self.frequency_period = period;
        self
    }

    /// Sets how long starting the whole child chain may take.
    #[must_use]
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }
}

/// Starts a supervisor with default limits and a unit argument.
pub fn start<R, I>(init: I) -> Result<Subject<Message>, StartError>
where
    R: Clone + Send + 'static,
    I: FnOnce(Children<()>) -> Children<R> + Send + 'static,
{
    start_spec(Spec::new((), init))
}

/// Starts a supervisor from a [`Spec`], waiting for every child to start.
pub fn start_spec<A, R>(spec: Spec<A, R>) -> Result<Subject<Message>, StartError>
where
    A: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    let Spec {
        argument,
        max_frequency,
        frequency_period,
        init_timeout,
        init,
    } = spec;
    let parent = process::self_pid();

    let actor_init = move || {
        // Trap first: children spawned below are linked, and their deaths
        // must arrive as messages.
        let exits = process::trap_exits();
        let retry: Subject<Pid> = process::new_subject();
        match init(Children::ready(argument)).inner {
            ChildrenInner::Ready(starter) => {
                tracing::debug!(children = ?starter.child_pids(), "supervisor initialized");
                let selector = Selector::new()
                    .merge(exits.map(|exit| Message {
                        inner: Protocol::Exit(exit),
                    }))
                    .selecting(&retry, |pid| Message {
                        inner: Protocol::Retry(pid),
                    });
                let state = State {
                    starter,
                    restarts: IntensityTracker::new(max_frequency, frequency_period),
                    retry,
                    parent,
                };
                InitResult::Ready { state, selector }
            }
            ChildrenInner::Failed(error) => {
                InitResult::Failed(format!("failed to start children: {error}"))
            }
        }
    };

    actor::start_spec(
        actor::Spec::new(actor_init, handle_message)
            .named("supervisor")
            .with_init_timeout(init_timeout),
    )
}

fn handle_message(message: Message, state: State) -> Next<State> {
    match message.inner {
        Protocol::Exit(exit) => {
            if exit.reason == ExitReason::Normal {
                tracing::debug!(pid = %exit.pid, "linked process exited normally");
                return Next::Continue(state);
            }
            if exit.pid == state.parent {
                tracing::debug!(reason = %exit.reason, "parent exited, following");
                return Next::Stop(exit.reason);
            }
            tracing::warn!(pid = %exit.pid, reason = %exit.reason, "child exited");
            handle_exit(exit.pid, state)
        }
        Protocol::Retry(pid) => handle_exit(pid, state),
    }
}

/// Restart path shared by trapped exits and asynchronous retries.
fn handle_exit(pid: Pid, mut state: State) -> Next<State> {
    if state.restarts.add_event(Instant::now()).is_err() {
        tracing::error!(pid = %pid, "restart intensity exceeded, stopping");
        return Next::Stop(ExitReason::Abnormal("too many restarts".into()));
    }
    match state.starter.exec(Instruction::StartFrom(pid)) {
        Ok(_) => Next::Continue(state),
        Err(error) => {
            // Retry through our own mailbox so queued system messages get a
            // turn between attempts.
            let target = error.previous_pid.unwrap_or(pid);
            tracing::warn!(pid = %target, error = %error, "restart failed, queueing retry");
            state.retry.send(target);
            Next::Continue(state)
        }
    }
}
