//! System messages: out-of-band inspection and control of processes.
//!
//! Any process whose receive loop includes [`system_selector`] answers the
//! operator protocol: state and status inspection, suspend and resume. Actors
//! built by [`crate::actor`] do this automatically; the client half of the
//! protocol ([`get_state`], [`get_status`], [`suspend`], [`resume`]) works
//! against any compliant process.
//!
//! # Wire shape
//!
//! A request is a raw three-field record `("system", (caller_pid, ref),
//! request)`; the reply is `(ref, value)`. Replies to suspend and resume are
//! fixed to `()` by the protocol regardless of what the handler does — here
//! that substitution is enforced by the `Reply<()>` type. Requests that fail
//! to decode normalize to [`SystemMessage::Unsupported`], which receive loops
//! log and drop; they never terminate the process.

use std::time::Duration;

use crate::call::{self, CallError, Reply};
use crate::message::{Atom, Dynamic, Frame};
use crate::pid::{Pid, Ref};
use crate::process;
use crate::registry;
use crate::selector::Selector;

/// Whether a receive loop is processing user messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// User and system messages are both processed.
    Running,
    /// Only system messages are processed; user messages wait in the mailbox.
    Suspended,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

/// Opaque carrier for debug options. Empty is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugState(());

impl DebugState {
    /// Creates an empty debug state.
    #[must_use]
    pub fn new() -> Self {
        Self(())
    }
}

/// Status snapshot returned by [`get_status`].
#[derive(Debug)]
pub struct StatusInfo {
    /// What kind of loop is running (e.g. `actor`, `supervisor`).
    pub module: Atom,
    /// The process that spawned this one.
    pub parent: Pid,
    /// Current mode.
    pub mode: Mode,
    /// Debug options in effect.
    pub debug_state: DebugState,
    /// The process state, rendered for inspection.
    pub state: Dynamic,
}

/// A normalized system message.
///
/// Each variant carries the reply handle bound to the requester; handlers
/// must consume it exactly once (consumption is enforced by `Reply`).
#[derive(Debug)]
pub enum SystemMessage {
    /// Reply with the current state.
    GetState(Reply<Dynamic>),
    /// Reply with a [`StatusInfo`] snapshot.
    GetStatus(Reply<StatusInfo>),
    /// Acknowledge and stop processing user messages.
    Suspend(Reply<()>),
    /// Acknowledge and resume processing user messages.
    Resume(Reply<()>),
    /// A system record that did not decode. Log and drop.
    Unsupported(Dynamic),
}

/// Requests understood by the system protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SysRequest {
    GetState,
    GetStatus,
    Suspend,
    Resume,
}

fn system_atom() -> Atom {
    Atom::new("system")
}

/// Returns the selector clause for system requests.
///
/// The clause consumes every `"system"` record: well-formed requests become
/// their [`SystemMessage`] variant, anything else becomes
/// [`SystemMessage::Unsupported`] so that garbage cannot pile up in the
/// mailbox.
#[must_use]
pub fn system_selector() -> Selector<SystemMessage> {
    Selector::new().selecting_record3(system_atom(), |from_field, request_field| {
        Ok(normalize(from_field, request_field))
    })
}

fn normalize(from_field: Dynamic, request_field: Dynamic) -> SystemMessage {
    let (caller, reference) = match from_field.downcast::<(Pid, Ref)>() {
        Ok(pair) => pair,
        Err(from_field) => {
            tracing::warn!(from = ?from_field, "system request with malformed reply address");
            return SystemMessage::Unsupported(request_field);
        }
    };
    match request_field.downcast::<SysRequest>() {
        Ok(SysRequest::GetState) => SystemMessage::GetState(Reply::new(caller, reference)),
        Ok(SysRequest::GetStatus) => SystemMessage::GetStatus(Reply::new(caller, reference)),
        Ok(SysRequest::Suspend) => SystemMessage::Suspend(Reply::new(caller, reference)),
        Ok(SysRequest::Resume) => SystemMessage::Resume(Reply::new(caller, reference)),
        Err(other) => SystemMessage::Unsupported(other),
    }
}

fn sys_call<R: Send + 'static>(
    pid: Pid,
    request: SysRequest,
    timeout: Duration,
) -> Result<R, CallError> {
    let monitor = process::monitor_process(pid);
    registry::send_frame(
        pid,
        Frame::Record {
            atom: system_atom(),
            field1: Dynamic::new((process::self_pid(), monitor.reference())),
            field2: Dynamic::new(request),
        },
    );
    call::await_reply(monitor, timeout)
}

/// Fetches the state of `pid`, rendered for inspection.
pub fn get_state(pid: Pid, timeout: Duration) -> Result<Dynamic, CallError> {
    sys_call(pid, SysRequest::GetState, timeout)
}

/// Fetches a [`StatusInfo`] snapshot of `pid`.
pub fn get_status(pid: Pid, timeout: Duration) -> Result<StatusInfo, CallError> {
    sys_call(pid, SysRequest::GetStatus, timeout)
}

/// Suspends `pid`: it stops processing user messages until [`resume`]d.
/// User messages sent meanwhile wait in its mailbox.
pub fn suspend(pid: Pid, timeout: Duration) -> Result<(), CallError> {
    sys_call(pid, SysRequest::Suspend, timeout)
}

/// Resumes a [`suspend`]ed process.
pub fn resume(pid: Pid, timeout: Duration) -> Result<(), CallError> {
    sys_call(pid, SysRequest::Resume, timeout)
}
