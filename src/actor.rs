//! The actor state machine.
//!
//! An actor is a process owning private state, driven by a sequential message
//! handler. Starting an actor is a handshake: the parent spawns the child
//! linked, the child runs the user's `init`, and only once the child has
//! acknowledged with its inbox subject does `start_spec` return — so a
//! returned subject always points at a fully initialized actor.
//!
//! The run loop multiplexes three sources through one selector: system
//! messages (inspection, suspend/resume), the typed inbox plus any user
//! selector from `init`, and a catch-all for everything else. System clauses
//! come first, the catch-all last; within the mailbox, arrival order decides.
//!
//! # Example
//!
//! ```ignore
//! enum Msg {
//!     Add(u64),
//!     Total(arbor::Reply<u64>),
//! }
//!
//! let counter = actor::start(0_u64, |msg, total| match msg {
//!     Msg::Add(n) => Next::Continue(total + n),
//!     Msg::Total(reply) => {
//!         reply.send(total);
//!         Next::Continue(total)
//!     }
//! })?;
//! counter.send(Msg::Add(2));
//! let total: u64 = counter.call(Msg::Total, Duration::from_millis(100));
//! ```

use std::time::Duration;

use crate::message::{Atom, Dynamic};
use crate::pid::Pid;
use crate::process::{self, ExitReason, ProcessDown};
use crate::selector::Selector;
use crate::subject::Subject;
use crate::system::{self, DebugState, Mode, StatusInfo, SystemMessage};

/// Default time an actor's `init` may take before the parent gives up.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// What the handler wants next.
#[derive(Debug)]
pub enum Next<S> {
    /// Keep running with the given state.
    Continue(S),
    /// Terminate the actor with the given reason.
    Stop(ExitReason),
}

/// Outcome of an actor's `init`.
#[derive(Debug)]
pub enum InitResult<S, M> {
    /// Initialization succeeded; run with this state, receiving user messages
    /// through the actor's inbox and through `selector`.
    Ready {
        /// Initial state.
        state: S,
        /// Extra user message sources beyond the inbox subject.
        selector: Selector<M>,
    },
    /// Initialization failed; the actor exits `Abnormal` with this reason and
    /// the parent receives [`StartError::InitFailed`].
    Failed(String),
}

/// Error starting an actor or supervisor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    /// `init` did not complete within the init timeout; the child was killed.
    #[error("initialization did not complete within the timeout")]
    InitTimeout,
    /// `init` reported failure.
    #[error("initialization failed: {0}")]
    InitFailed(ExitReason),
    /// The child died before acknowledging initialization.
    #[error("crashed during initialization: {0}")]
    InitCrashed(ExitReason),
}

/// What to do with mailbox frames no clause matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnexpectedMessagePolicy {
    /// Log a warning and keep running.
    #[default]
    WarnAndContinue,
    /// Terminate the actor with an `Abnormal` reason.
    Stop,
}

/// Everything needed to start an actor.
///
/// Built with [`Spec::new`] and refined with the `with_*` methods:
///
/// ```ignore
/// let spec = Spec::new(init, handler)
///     .named("session")
///     .with_init_timeout(Duration::from_secs(1));
/// let subject = actor::start_spec(spec)?;
/// ```
pub struct Spec<S, M> {
    init: Box<dyn FnOnce() -> InitResult<S, M> + Send + 'static>,
    init_timeout: Duration,
    handler: Box<dyn FnMut(M, S) -> Next<S> + Send + 'static>,
    module: Atom,
    on_unexpected: UnexpectedMessagePolicy,
}

impl<S, M> std::fmt::Debug for Spec<S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spec")
            .field("module", &self.module)
            .field("init_timeout", &self.init_timeout)
            .field("on_unexpected", &self.on_unexpected)
            .finish_non_exhaustive()
    }
}

impl<S, M> Spec<S, M>
where
    S: std::fmt::Debug + Send + 'static,
    M: Send + 'static,
{
    /// Creates a spec with default timeout, module name, and policies.
    pub fn new<I, H>(init: I, handler: H) -> Self
    where
        I: FnOnce() -> InitResult<S, M> + Send + 'static,
        H: FnMut(M, S) -> Next<S> + Send + 'static,
    {
        Self {
            init: Box::new(init),
            init_timeout: DEFAULT_INIT_TIMEOUT,
            handler: Box::new(handler),
            module: Atom::new("actor"),
            on_unexpected: UnexpectedMessagePolicy::default(),
        }
    }

    /// Sets how long `init` may take.
    #[must_use]
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Names the actor for status reports.
    #[must_use]
    pub fn named(mut self, module: &str) -> Self {
        self.module = Atom::new(module);
        self
    }

    /// Sets the policy for unmatched mailbox frames.
    #[must_use]
    pub fn on_unexpected(mut self, policy: UnexpectedMessagePolicy) -> Self {
        self.on_unexpected = policy;
        self
    }
}

/// Starts an actor with the given state and handler.
///
/// The actor receives messages only through the returned subject. For a
/// custom init, extra selectors, or timeouts, use [`start_spec`].
pub fn start<S, M, H>(state: S, handler: H) -> Result<Subject<M>, StartError>
where
    S: std::fmt::Debug + Send + 'static,
    M: Send + 'static,
    H: FnMut(M, S) -> Next<S> + Send + 'static,
{
    start_spec(Spec::new(
        move || InitResult::Ready {
            state,
            selector: Selector::new(),
        },
        handler,
    ))
}

/// Starts an actor from a [`Spec`], waiting for its init handshake.
///
/// On [`StartError::InitTimeout`] the child has been killed; on any error no
/// stray ack or down frame is left in the caller's mailbox.
pub fn start_spec<S, M>(spec: Spec<S, M>) -> Result<Subject<M>, StartError>
where
    S: std::fmt::Debug + Send + 'static,
    M: Send + 'static,
{
    let Spec {
        init,
        init_timeout,
        handler,
        module,
        on_unexpected,
    } = spec;

    let ack: Subject<Result<Subject<M>, ExitReason>> = process::new_subject();
    let parent = process::self_pid();
    let ack_for_child = ack.clone();
    let child = process::start(true, move || {
        run_actor(init, handler, &module, on_unexpected, &ack_for_child, parent);
    });
    let monitor = process::monitor_process(child);

    enum Boot<M> {
        Ack(Result<Subject<M>, ExitReason>),
        Down(ProcessDown),
    }
    let selector = Selector::new()
        .selecting(&ack, Boot::Ack)
        .selecting_process_down(monitor, Boot::Down);

    match selector.select(init_timeout) {
        Ok(Boot::Ack(Ok(subject))) => {
            process::demonitor(monitor, true);
            Ok(subject)
        }
        Ok(Boot::Ack(Err(reason))) => {
            process::demonitor(monitor, true);
            Err(StartError::InitFailed(reason))
        }
        Ok(Boot::Down(down)) => Err(StartError::InitCrashed(down.reason)),
        Err(_) => {
            process::kill(child);
            process::demonitor(monitor, true);
            ack.flush();
            Err(StartError::InitTimeout)
        }
    }
}

/// Multiplexed input of the run loop.
enum Incoming<M> {
    System(SystemMessage),
    Message(M),
    Unexpected(Dynamic),
}

/// Child-side body: init, acknowledge, loop.
fn run_actor<S, M>(
    init: Box<dyn FnOnce() -> InitResult<S, M> + Send>,
    handler: Box<dyn FnMut(M, S) -> Next<S> + Send>,
    module: &Atom,
    on_unexpected: UnexpectedMessagePolicy,
    ack: &Subject<Result<Subject<M>, ExitReason>>,
    parent: Pid,
) where
    S: std::fmt::Debug + Send + 'static,
    M: Send + 'static,
{
    match init() {
        InitResult::Ready {
            state,
            selector: user_selector,
        } => {
            let inbox: Subject<M> = process::new_subject();
            // System clauses first, then user sources, catch-all last:
            // within one frame, system beats user beats unexpected.
            let running = Selector::new()
                .merge(system::system_selector().map(Incoming::System))
                .selecting(&inbox, Incoming::Message)
                .merge(user_selector.map(Incoming::Message))
                .selecting_anything(Incoming::Unexpected);
            let suspended = system::system_selector().map(Incoming::System);

            ack.send(Ok(inbox.clone()));
            tracing::debug!(module = %module, parent = %parent, "actor initialized");

            let reason = run_loop(
                state,
                handler,
                module,
                parent,
                on_unexpected,
                &running,
                &suspended,
            );
            tracing::debug!(module = %module, reason = %reason, "actor stopping");
            if reason != ExitReason::Normal {
                process::exit_unwind(reason);
            }
        }
        InitResult::Failed(message) => {
            let reason = ExitReason::Abnormal(message);
            ack.send(Err(reason.clone()));
            process::exit_unwind(reason);
        }
    }
}

fn run_loop<S, M>(
    mut state: S,
    mut handler: Box<dyn FnMut(M, S) -> Next<S> + Send>,
    module: &Atom,
    parent: Pid,
    on_unexpected: UnexpectedMessagePolicy,
    running: &Selector<Incoming<M>>,
    suspended: &Selector<Incoming<M>>,
) -> ExitReason
where
    S: std::fmt::Debug + Send + 'static,
    M: Send + 'static,
{
    let mut mode = Mode::Running;
    let debug_state = DebugState::new();
    loop {
        let selector = match mode {
            Mode::Running => running,
            Mode::Suspended => suspended,
        };
        match selector.select_forever() {
            Incoming::System(message) => match message {
                SystemMessage::GetState(reply) => {
                    reply.send(Dynamic::new(format!("{state:?}")));
                }
                SystemMessage::GetStatus(reply) => {
                    reply.send(StatusInfo {
                        module: module.clone(),
                        parent,
                        mode,
                        debug_state: debug_state.clone(),
                        state: Dynamic::new(format!("{state:?}")),
                    });
                }
                SystemMessage::Suspend(reply) => {
                    reply.send(());
                    mode = Mode::Suspended;
                    tracing::debug!(module = %module, "actor suspended");
                }
                SystemMessage::Resume(reply) => {
                    reply.send(());
                    mode = Mode::Running;
                    tracing::debug!(module = %module, "actor resumed");
                }
                SystemMessage::Unsupported(payload) => {
                    tracing::warn!(module = %module, payload = ?payload, "unsupported system message");
                }
            },
            Incoming::Unexpected(payload) => match on_unexpected {
                UnexpectedMessagePolicy::WarnAndContinue => {
                    tracing::warn!(module = %module, payload = ?payload, "unexpected message");
                }
                UnexpectedMessagePolicy::Stop => {
                    return ExitReason::Abnormal("unexpected message".into());
                }
            },
            Incoming::Message(message) => match handler(message, state) {
                Next::Continue(next) => state = next,
                Next::Stop(reason) => return reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Reply;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    enum Echo {
        Value(Reply<u32>, u32),
    }

    fn echo_actor() -> Subject<Echo> {
        start((), |Echo::Value(reply, value), ()| {
            reply.send(value);
            Next::Continue(())
        })
        .expect("echo actor starts")
    }

    #[test]
    fn echo_call_round_trips() {
        init_test("echo_call_round_trips");

        let subject = echo_actor();
        let got: u32 = subject.call(|reply| Echo::Value(reply, 42), Duration::from_millis(100));
        assert_eq!(got, 42);

        crate::test_complete!("echo_call_round_trips");
    }

    #[test]
    fn suspend_parks_user_messages_resume_releases_them() {
        init_test("suspend_parks_user_messages_resume_releases_them");

        let handled = Arc::new(AtomicUsize::new(0));
        let handled_by_actor = Arc::clone(&handled);
        let subject = start((), move |(), ()| {
            handled_by_actor.fetch_add(1, Ordering::SeqCst);
            Next::Continue(())
        })
        .expect("actor starts");
        let pid = subject.owner();

        system::suspend(pid, Duration::from_secs(1)).expect("suspend acknowledged");
        subject.send(());
        process::sleep(Duration::from_millis(50));
        assert_eq!(handled.load(Ordering::SeqCst), 0, "suspended actor is idle");

        system::resume(pid, Duration::from_secs(1)).expect("resume acknowledged");
        process::sleep(Duration::from_millis(50));
        assert_eq!(handled.load(Ordering::SeqCst), 1, "parked message delivered");

        let status = system::get_status(pid, Duration::from_secs(1)).expect("status");
        assert_eq!(status.mode, Mode::Running);

        crate::test_complete!("suspend_parks_user_messages_resume_releases_them");
    }

    #[test]
    fn get_status_reports_suspension_and_parent() {
        init_test("get_status_reports_suspension_and_parent");

        let parent = process::self_pid();
        let subject = echo_actor();
        let pid = subject.owner();

        system::suspend(pid, Duration::from_secs(1)).expect("suspend");
        let status = system::get_status(pid, Duration::from_secs(1)).expect("status");
        assert_eq!(status.mode, Mode::Suspended);
        assert_eq!(status.parent, parent);
        assert_eq!(status.module, Atom::new("actor"));
        system::resume(pid, Duration::from_secs(1)).expect("resume");

        crate::test_complete!("get_status_reports_suspension_and_parent");
    }

    #[test]
    fn get_state_renders_the_state() {
        init_test("get_state_renders_the_state");

        let subject = start(41_u32, |(), state| Next::Continue(state + 1)).expect("actor starts");
        subject.send(());

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        loop {
            let state = system::get_state(subject.owner(), Duration::from_secs(1))
                .expect("get_state")
                .downcast::<String>()
                .expect("state renders as a string");
            if state == "42" {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "state never reached 42, last {state}"
            );
            process::sleep(Duration::from_millis(5));
        }

        crate::test_complete!("get_state_renders_the_state");
    }

    #[test]
    fn failed_init_reports_init_failed() {
        init_test("failed_init_reports_init_failed");

        let exits = process::trap_exits();
        let result: Result<Subject<()>, StartError> = start_spec(Spec::new(
            || InitResult::Failed("bad".into()),
            |(), ()| Next::Continue(()),
        ));
        assert_eq!(
            result.expect_err("init fails"),
            StartError::InitFailed(ExitReason::Abnormal("bad".into()))
        );
        // The linked child's death is trapped, not fatal to this test.
        let exit = exits.select(Duration::from_secs(1)).expect("trapped exit");
        assert_eq!(exit.reason, ExitReason::Abnormal("bad".into()));

        crate::test_complete!("failed_init_reports_init_failed");
    }

    #[test]
    fn panicking_init_reports_init_crashed() {
        init_test("panicking_init_reports_init_crashed");

        let _exits = process::trap_exits();
        let result: Result<Subject<()>, StartError> = start_spec(Spec::new(
            || -> InitResult<(), ()> { panic!("init blew up") },
            |(), ()| Next::Continue(()),
        ));
        match result.expect_err("init crashes") {
            StartError::InitCrashed(ExitReason::Abnormal(reason)) => {
                assert!(reason.contains("init blew up"), "got {reason}");
            }
            other => unreachable!("expected InitCrashed, got {other:?}"),
        }

        crate::test_complete!("panicking_init_reports_init_crashed");
    }

    #[test]
    fn slow_init_reports_init_timeout_and_kills_the_child() {
        init_test("slow_init_reports_init_timeout_and_kills_the_child");

        let _exits = process::trap_exits();
        let result: Result<Subject<()>, StartError> = start_spec(
            Spec::new(
                || {
                    process::sleep(Duration::from_secs(30));
                    InitResult::Ready {
                        state: (),
                        selector: Selector::new(),
                    }
                },
                |(), ()| Next::Continue(()),
            )
            .with_init_timeout(Duration::from_millis(50)),
        );
        assert_eq!(result.expect_err("init times out"), StartError::InitTimeout);

        crate::test_complete!("slow_init_reports_init_timeout_and_kills_the_child");
    }

    #[test]
    fn stop_terminates_with_the_given_reason() {
        init_test("stop_terminates_with_the_given_reason");

        let _exits = process::trap_exits();
        let subject = start((), |(), ()| {
            Next::Stop(ExitReason::Abnormal("done here".into()))
        })
        .expect("actor starts");
        let monitor = process::monitor_process(subject.owner());
        subject.send(());

        let down = Selector::new()
            .selecting_process_down(monitor, |down| down)
            .select(Duration::from_secs(1))
            .expect("actor stopped");
        assert_eq!(down.reason, ExitReason::Abnormal("done here".into()));

        crate::test_complete!("stop_terminates_with_the_given_reason");
    }

    #[test]
    fn unexpected_messages_are_skipped_by_default() {
        init_test("unexpected_messages_are_skipped_by_default");

        let subject = echo_actor();
        // Raw garbage the catch-all must swallow without disturbing the loop.
        crate::registry::send_frame(
            subject.owner(),
            crate::message::Frame::Record {
                atom: Atom::new("gossip"),
                field1: Dynamic::new(1_u8),
                field2: Dynamic::new(2_u8),
            },
        );
        // Still alive and still answering.
        let got: u32 = subject.call(|reply| Echo::Value(reply, 7), Duration::from_secs(1));
        assert_eq!(got, 7);

        crate::test_complete!("unexpected_messages_are_skipped_by_default");
    }

    #[test]
    fn unexpected_message_policy_stop_terminates() {
        init_test("unexpected_message_policy_stop_terminates");

        let _exits = process::trap_exits();
        let subject: Subject<()> = start_spec(
            Spec::new(
                || InitResult::Ready {
                    state: (),
                    selector: Selector::new(),
                },
                |(), ()| Next::Continue(()),
            )
            .on_unexpected(UnexpectedMessagePolicy::Stop),
        )
        .expect("actor starts");
        let monitor = process::monitor_process(subject.owner());

        crate::registry::send_frame(
            subject.owner(),
            crate::message::Frame::Record {
                atom: Atom::new("gossip"),
                field1: Dynamic::new(1_u8),
                field2: Dynamic::new(2_u8),
            },
        );

        let down = Selector::new()
            .selecting_process_down(monitor, |down| down)
            .select(Duration::from_secs(1))
            .expect("actor stopped on unexpected input");
        assert_eq!(
            down.reason,
            ExitReason::Abnormal("unexpected message".into())
        );

        crate::test_complete!("unexpected_message_policy_stop_terminates");
    }

    #[test]
    fn user_selector_from_init_is_merged() {
        init_test("user_selector_from_init_is_merged");

        // init opens a side channel and exposes it through the user selector.
        let handoff: Subject<Subject<u32>> = process::new_subject();
        let handoff_for_init = handoff.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_actor = Arc::clone(&seen);

        let _subject: Subject<u32> = start_spec(Spec::new(
            move || {
                let side: Subject<u32> = process::new_subject();
                handoff_for_init.send(side.clone());
                InitResult::Ready {
                    state: (),
                    selector: Selector::new().selecting(&side, |n| n),
                }
            },
            move |n, ()| {
                seen_by_actor.fetch_add(n as usize, Ordering::SeqCst);
                Next::Continue(())
            },
        ))
        .expect("actor starts");

        let side = handoff
            .receive(Duration::from_secs(1))
            .expect("side channel");
        side.send(5);

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while seen.load(Ordering::SeqCst) < 5 && std::time::Instant::now() < deadline {
            process::sleep(Duration::from_millis(5));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        crate::test_complete!("user_selector_from_init_is_merged");
    }
}
