//! Synchronous call: request/reply with monitor-backed failure detection.
//!
//! A call monitors the callee before sending, so the caller cannot hang if
//! the callee dies between send and reply; the monitor's reference doubles as
//! the reply correlation tag. On success or timeout the monitor is removed
//! with flush, so no stray down notification pollutes the caller's mailbox.
//!
//! [`Subject::try_call`] surfaces failures as a [`CallError`];
//! [`Subject::call`] is the variant that terminates the caller instead, which
//! is what supervised code usually wants — a missing or dead callee is the
//! callee's supervisor's problem, not something to handle inline.

use std::marker::PhantomData;
use std::time::Duration;

use crate::message::{Dynamic, Frame};
use crate::pid::{Pid, Ref};
use crate::process::{self, ExitReason, MonitorRef};
use crate::registry;
use crate::selector::{SelectTimeout, Selector};
use crate::subject::Subject;

/// Error returned when a call fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The callee did not reply within the timeout.
    #[error("callee did not reply within the timeout")]
    Timeout,
    /// The callee terminated before replying.
    #[error("callee exited: {0}")]
    CalleeDown(ExitReason),
    /// The connection to the callee's node was lost. Single-host builds only
    /// observe this when a transport surfaces it as a local exit reason.
    #[error("connection to the callee's node was lost")]
    NodeDown,
}

/// Handle for sending exactly one reply to a caller.
///
/// Consuming `self` in [`send`](Self::send) makes the at-most-once reply
/// invariant structural. The handle holds only the caller's pid and the
/// correlation reference — never the caller's mailbox — so an abandoned
/// handle keeps nothing of the caller alive. Send failures (the caller timed
/// out or died) are swallowed.
pub struct Reply<R> {
    caller: Pid,
    reference: Ref,
    _reply: PhantomData<fn(R)>,
}

impl<R: Send + 'static> Reply<R> {
    pub(crate) fn new(caller: Pid, reference: Ref) -> Self {
        Self {
            caller,
            reference,
            _reply: PhantomData,
        }
    }

    /// Sends the reply to the caller. The caller may be gone; that is fine.
    pub fn send(self, value: R) {
        registry::send_frame(
            self.caller,
            Frame::Reply {
                reference: self.reference,
                payload: Dynamic::new(value),
            },
        );
    }

    /// The pid the reply will be sent to.
    #[must_use]
    pub fn caller(&self) -> Pid {
        self.caller
    }
}

impl<R> std::fmt::Debug for Reply<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("caller", &self.caller)
            .field("reference", &self.reference)
            .finish()
    }
}

enum CallOutcome<R> {
    Reply(R),
    Down(crate::process::ProcessDown),
}

/// Awaits the reply (or the callee's death) for an in-flight call.
///
/// Clause priority: the reply first, then the monitor — a callee that
/// replies and immediately exits still completes the call.
pub(crate) fn await_reply<R: Send + 'static>(
    monitor: MonitorRef,
    timeout: Duration,
) -> Result<R, CallError> {
    let selector = Selector::new()
        .selecting_reply(monitor.reference(), CallOutcome::Reply)
        .selecting_process_down(monitor, CallOutcome::Down);
    match selector.select(timeout) {
        Ok(CallOutcome::Reply(reply)) => {
            process::demonitor(monitor, true);
            Ok(reply)
        }
        Ok(CallOutcome::Down(down)) => match down.reason {
            ExitReason::Abnormal(reason) if reason == "noconnection" => Err(CallError::NodeDown),
            reason => Err(CallError::CalleeDown(reason)),
        },
        Err(SelectTimeout) => {
            process::demonitor(monitor, true);
            Err(CallError::Timeout)
        }
    }
}

impl<M: Send + 'static> Subject<M> {
    /// Sends a request built by `make_request` and waits for the reply.
    ///
    /// `make_request` receives the [`Reply`] handle to embed in the message;
    /// the callee must consume it with [`Reply::send`].
    pub fn try_call<R, F>(&self, make_request: F, timeout: Duration) -> Result<R, CallError>
    where
        R: Send + 'static,
        F: FnOnce(Reply<R>) -> M,
    {
        let monitor = process::monitor_process(self.owner());
        let reply = Reply::new(process::self_pid(), monitor.reference());
        self.send(make_request(reply));
        await_reply(monitor, timeout)
    }

    /// Like [`try_call`](Self::try_call), but a failed call terminates the
    /// calling process with an `Abnormal` reason instead of returning.
    pub fn call<R, F>(&self, make_request: F, timeout: Duration) -> R
    where
        R: Send + 'static,
        F: FnOnce(Reply<R>) -> M,
    {
        match self.try_call(make_request, timeout) {
            Ok(reply) => reply,
            Err(error) => {
                process::exit_unwind(ExitReason::Abnormal(format!("call failed: {error}")))
            }
        }
    }
}
