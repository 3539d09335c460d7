//! Processes: spawning, exit signals, links, monitors, and trap-exit.
//!
//! A process is an isolated unit of concurrency with a private mailbox. Every
//! OS thread that touches the process API becomes a process: spawned threads
//! are registered by [`start`], and any other thread is registered lazily on
//! first use, so tests and `main` can create subjects and receive messages
//! without ceremony.
//!
//! # Exit delivery
//!
//! Exit signals are cooperative: [`kill`] and [`send_exit`] park an
//! [`ExitReason`] on the target's mailbox, and the target observes it at its
//! next suspension point (`select`, `select_forever`, [`sleep`], `call`). A
//! process that never suspends delays its own death. Termination is realized
//! as a panic unwind carrying a private payload; the process wrapper converts
//! it into the exit reason, and a chained panic hook keeps these unwinds out
//! of the panic report.

use std::any::Any;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use crate::mailbox::Mailbox;
use crate::pid::{Pid, Ref};
use crate::registry;
use crate::selector::Selector;
use crate::subject::Subject;

// ============================================================================
// ExitReason
// ============================================================================

/// Why a process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Clean termination. Ignored by linked peers that do not trap exits.
    Normal,
    /// Terminated by [`kill`]. Untrappable.
    Killed,
    /// Any other termination: a crash, a failed init, a user stop reason.
    Abnormal(String),
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Killed => write!(f, "killed"),
            Self::Abnormal(reason) => write!(f, "abnormal: {reason}"),
        }
    }
}

/// A trapped exit signal from a linked process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitMessage {
    /// The process the signal originated from.
    pub pid: Pid,
    /// Why it exited.
    pub reason: ExitReason,
}

/// Notification that a monitored process terminated.
///
/// Exactly one is delivered per monitor, correlated by `monitor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDown {
    /// The reference returned when the monitor was established.
    pub monitor: Ref,
    /// The process that terminated.
    pub pid: Pid,
    /// Why it terminated. Monitoring an already-dead pid yields
    /// `Abnormal("noproc")`.
    pub reason: ExitReason,
}

/// A one-shot monitor on a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorRef {
    reference: Ref,
    target: Pid,
}

impl MonitorRef {
    /// The reference carried by this monitor's [`ProcessDown`].
    #[must_use]
    pub fn reference(self) -> Ref {
        self.reference
    }

    /// The monitored pid.
    #[must_use]
    pub fn pid(self) -> Pid {
        self.target
    }
}

// ============================================================================
// Current process
// ============================================================================

/// Handle to the process owning the current thread.
#[derive(Debug, Clone)]
pub(crate) struct ProcessHandle {
    pub(crate) pid: Pid,
    pub(crate) mailbox: Arc<Mailbox>,
}

thread_local! {
    static CURRENT: RefCell<Option<ProcessHandle>> = const { RefCell::new(None) };
}

/// Returns the current process handle, registering the calling thread as a
/// process on first use.
pub(crate) fn current() -> ProcessHandle {
    CURRENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if let Some(handle) = slot.as_ref() {
            return handle.clone();
        }
        install_exit_unwind_hook();
        let pid = Pid::new();
        let mailbox = Arc::new(Mailbox::new());
        registry::register(pid, Arc::clone(&mailbox));
        let handle = ProcessHandle { pid, mailbox };
        *slot = Some(handle.clone());
        handle
    })
}

/// The pid of the calling process.
#[must_use]
pub fn self_pid() -> Pid {
    current().pid
}

/// Returns `true` if `pid` refers to a live process.
///
/// A pid that was never spawned is never alive.
#[must_use]
pub fn is_alive(pid: Pid) -> bool {
    registry::is_alive(pid)
}

// ============================================================================
// Termination by unwinding
// ============================================================================

/// Private unwind payload carrying an exit reason through `catch_unwind`.
pub(crate) struct ExitUnwind(pub(crate) ExitReason);

/// Terminates the calling process with `reason` by unwinding.
pub(crate) fn exit_unwind(reason: ExitReason) -> ! {
    std::panic::panic_any(ExitUnwind(reason));
}

/// Renders an arbitrary panic payload for an `Abnormal` exit reason.
pub(crate) fn payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_owned()
    }
}

/// Chains a panic hook that suppresses the report for [`ExitUnwind`] panics.
/// Real panics still reach the previously installed hook.
fn install_exit_unwind_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if info.payload().is::<ExitUnwind>() {
                return;
            }
            previous(info);
        }));
    });
}

// ============================================================================
// Spawning
// ============================================================================

/// Spawns a new process running `f`.
///
/// With `linked = true` a bidirectional link between the caller and the child
/// is installed before the child runs. The child's exit reason is `Normal`
/// when `f` returns, the parked reason when it was terminated by an exit
/// signal, and `Abnormal` with the panic message when `f` panics.
pub fn start<F>(linked: bool, f: F) -> Pid
where
    F: FnOnce() + Send + 'static,
{
    let parent = current();
    let pid = Pid::new();
    let mailbox = Arc::new(Mailbox::new());
    registry::register(pid, Arc::clone(&mailbox));
    if linked {
        registry::link(parent.pid, pid);
    }
    let handle = ProcessHandle { pid, mailbox };

    std::thread::Builder::new()
        .name(format!("arbor-{}", pid.id()))
        .spawn(move || {
            CURRENT.with(|cell| *cell.borrow_mut() = Some(handle));
            tracing::trace!(pid = %pid, "process started");
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(f));
            let reason = match outcome {
                Ok(()) => ExitReason::Normal,
                Err(payload) => match payload.downcast::<ExitUnwind>() {
                    Ok(unwound) => unwound.0,
                    Err(payload) => ExitReason::Abnormal(payload_to_string(payload.as_ref())),
                },
            };
            registry::terminate(pid, reason);
        })
        .expect("failed to spawn process thread");
    pid
}

/// Spawns a linked process.
pub fn spawn<F>(f: F) -> Pid
where
    F: FnOnce() + Send + 'static,
{
    start(true, f)
}

/// Spawns an unlinked process.
pub fn spawn_unlinked<F>(f: F) -> Pid
where
    F: FnOnce() + Send + 'static,
{
    start(false, f)
}

// ============================================================================
// Subjects, selectors, sleep
// ============================================================================

/// Creates a new subject owned by the calling process.
#[must_use]
pub fn new_subject<M: Send + 'static>() -> Subject<M> {
    Subject::for_owner(&current())
}

/// Creates an empty selector (matches nothing).
#[must_use]
pub fn new_selector<M: Send + 'static>() -> Selector<M> {
    Selector::new()
}

/// Blocks the calling process for `duration`.
///
/// Implemented as a selective receive on an empty selector, so a sleeping
/// process still observes exit signals promptly.
pub fn sleep(duration: Duration) {
    let _ = Selector::<()>::new().select(duration);
}

// ============================================================================
// Exit signals, links, monitors
// ============================================================================

/// Sends an exit signal to `pid`.
///
/// A trapping target receives the signal as an [`ExitMessage`]; a non-trapping
/// target is terminated with `reason` — including `Normal`, which is the
/// mechanism a parent uses to cancel a child. Reason [`ExitReason::Killed`]
/// behaves as [`kill`]. Dead targets are ignored.
pub fn send_exit(pid: Pid, reason: ExitReason) {
    registry::send_exit(self_pid(), pid, reason);
}

/// Terminates `pid` with reason [`ExitReason::Killed`]. Untrappable.
pub fn kill(pid: Pid) {
    registry::send_exit(self_pid(), pid, ExitReason::Killed);
}

/// Removes the link between the calling process and `pid`, if any.
pub fn unlink(pid: Pid) {
    registry::unlink(self_pid(), pid);
}

/// Enables trap-exit for the calling process and returns the selector clause
/// for trapped exits.
///
/// While trapping, exit signals from linked peers (and non-kill [`send_exit`]
/// signals) are delivered as [`ExitMessage`]s instead of terminating the
/// process.
#[must_use]
pub fn trap_exits() -> Selector<ExitMessage> {
    registry::set_trap_exits(self_pid(), true);
    Selector::new().selecting_trapped_exits(|exit| exit)
}

/// Monitors `pid`: when it terminates, exactly one [`ProcessDown`] carrying
/// the returned reference is delivered to the calling process. Monitoring an
/// already-dead pid delivers `Abnormal("noproc")` immediately.
#[must_use]
pub fn monitor_process(pid: Pid) -> MonitorRef {
    MonitorRef {
        reference: registry::monitor(self_pid(), pid),
        target: pid,
    }
}

/// Removes a monitor. With `flush = true`, any [`ProcessDown`] for the
/// monitor already in the mailbox is purged as well.
pub fn demonitor(monitor: MonitorRef, flush: bool) {
    registry::demonitor(&current().mailbox, monitor.reference(), flush);
}
