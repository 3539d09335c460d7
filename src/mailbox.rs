//! Per-process mailbox with selective receive.
//!
//! Each process owns exactly one mailbox: an unbounded FIFO of [`Frame`]s
//! guarded by a mutex, with a condvar for blocking receives. Selective
//! receive scans the queue in arrival order and dequeues the first frame the
//! caller's matcher accepts; rejected frames keep their positions (save-queue
//! semantics). Senders never block and sends to a closed mailbox are silently
//! dropped.
//!
//! The mailbox also carries the pending-exit slot: `kill` and exit signals to
//! non-trapping processes park an [`ExitReason`] here, and the owner observes
//! it at its next blocking receive.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::message::Frame;
use crate::process::ExitReason;

/// Result of a selective receive attempt.
#[derive(Debug)]
pub(crate) enum SelectOutcome<M> {
    /// A frame matched and was dequeued.
    Matched(M),
    /// The deadline passed with no matching frame. Nothing was dequeued.
    TimedOut,
    /// An exit was requested for the owner; the caller must unwind.
    ExitRequested(ExitReason),
}

#[derive(Debug)]
struct MailboxInner {
    queue: VecDeque<Frame>,
    open: bool,
    pending_exit: Option<ExitReason>,
}

/// A process mailbox.
#[derive(Debug)]
pub(crate) struct Mailbox {
    inner: Mutex<MailboxInner>,
    available: Condvar,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(MailboxInner {
                queue: VecDeque::new(),
                open: true,
                pending_exit: None,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueues a frame. Never blocks; dropped silently if the owner is dead.
    pub(crate) fn push(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        if !inner.open {
            return;
        }
        inner.queue.push_back(frame);
        self.available.notify_all();
    }

    /// Parks an exit request for the owner and wakes it.
    ///
    /// `Killed` overrides any previously parked reason; otherwise the first
    /// signal wins.
    pub(crate) fn request_exit(&self, reason: ExitReason) {
        let mut inner = self.inner.lock();
        if !inner.open {
            return;
        }
        match inner.pending_exit {
            Some(ExitReason::Killed) => {}
            Some(_) if reason != ExitReason::Killed => {}
            _ => inner.pending_exit = Some(reason),
        }
        self.available.notify_all();
    }

    /// Closes the mailbox and discards all queued frames.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.open = false;
        inner.queue.clear();
        self.available.notify_all();
    }

    /// Removes queued frames the predicate rejects.
    pub(crate) fn retain(&self, keep: impl FnMut(&Frame) -> bool) {
        self.inner.lock().queue.retain(keep);
    }

    /// Number of queued frames.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Selective receive: dequeue the first frame `matcher` accepts.
    ///
    /// Frames are offered in mailbox order; `matcher` returns the rejected
    /// frame back so it can be reinserted at its original position. The
    /// matcher runs with the mailbox lock released, so clauses are free to
    /// send — including to this mailbox — without deadlocking. With
    /// `deadline = None` the receive blocks until a frame matches or an exit
    /// is requested.
    pub(crate) fn select<M>(
        &self,
        matcher: impl Fn(Frame) -> Result<M, Frame>,
        deadline: Option<Instant>,
    ) -> SelectOutcome<M> {
        // Frames before the cursor have already been rejected by this
        // matcher; only the owner dequeues, so the prefix stays stable across
        // lock releases.
        let mut cursor = 0_usize;
        let mut inner = self.inner.lock();
        loop {
            if let Some(reason) = inner.pending_exit.take() {
                return SelectOutcome::ExitRequested(reason);
            }
            while cursor < inner.queue.len() {
                let frame = inner.queue.remove(cursor).expect("cursor in bounds");
                drop(inner);
                match matcher(frame) {
                    Ok(message) => return SelectOutcome::Matched(message),
                    Err(frame) => {
                        inner = self.inner.lock();
                        inner.queue.insert(cursor, frame);
                        cursor += 1;
                        if let Some(reason) = inner.pending_exit.take() {
                            return SelectOutcome::ExitRequested(reason);
                        }
                    }
                }
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return SelectOutcome::TimedOut;
                    }
                    let _ = self.available.wait_until(&mut inner, deadline);
                }
                None => self.available.wait(&mut inner),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Dynamic;
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn tagged(tag: u64, value: u32) -> Frame {
        Frame::Tagged {
            tag,
            payload: Dynamic::new(value),
        }
    }

    fn match_tag(wanted: u64) -> impl Fn(Frame) -> Result<u32, Frame> {
        move |frame| match frame {
            Frame::Tagged { tag, payload } if tag == wanted => match payload.downcast::<u32>() {
                Ok(value) => Ok(value),
                Err(payload) => Err(Frame::Tagged { tag, payload }),
            },
            other => Err(other),
        }
    }

    #[test]
    fn select_dequeues_first_match_in_mailbox_order() {
        init_test("select_dequeues_first_match_in_mailbox_order");

        let mailbox = Mailbox::new();
        mailbox.push(tagged(1, 10));
        mailbox.push(tagged(2, 20));
        mailbox.push(tagged(2, 21));

        match mailbox.select(match_tag(2), Some(Instant::now())) {
            SelectOutcome::Matched(value) => assert_eq!(value, 20),
            other => unreachable!("expected match, got {other:?}"),
        }
        // The non-matching frame and the later match keep their order.
        assert_eq!(mailbox.len(), 2);
        match mailbox.select(match_tag(1), Some(Instant::now())) {
            SelectOutcome::Matched(value) => assert_eq!(value, 10),
            other => unreachable!("expected match, got {other:?}"),
        }

        crate::test_complete!("select_dequeues_first_match_in_mailbox_order");
    }

    #[test]
    fn select_timeout_dequeues_nothing() {
        init_test("select_timeout_dequeues_nothing");

        let mailbox = Mailbox::new();
        mailbox.push(tagged(1, 10));

        let deadline = Instant::now() + Duration::from_millis(10);
        match mailbox.select(match_tag(9), Some(deadline)) {
            SelectOutcome::TimedOut => {}
            other => unreachable!("expected timeout, got {other:?}"),
        }
        assert_eq!(mailbox.len(), 1, "rejected frame stays queued");

        crate::test_complete!("select_timeout_dequeues_nothing");
    }

    #[test]
    fn zero_timeout_still_scans_once() {
        init_test("zero_timeout_still_scans_once");

        let mailbox = Mailbox::new();
        mailbox.push(tagged(7, 70));

        match mailbox.select(match_tag(7), Some(Instant::now())) {
            SelectOutcome::Matched(value) => assert_eq!(value, 70),
            other => unreachable!("expected match, got {other:?}"),
        }

        crate::test_complete!("zero_timeout_still_scans_once");
    }

    #[test]
    fn pending_exit_interrupts_select() {
        init_test("pending_exit_interrupts_select");

        let mailbox = Mailbox::new();
        mailbox.request_exit(ExitReason::Killed);

        match mailbox.select(match_tag(1), None) {
            SelectOutcome::ExitRequested(ExitReason::Killed) => {}
            other => unreachable!("expected exit request, got {other:?}"),
        }

        crate::test_complete!("pending_exit_interrupts_select");
    }

    #[test]
    fn kill_overrides_parked_reason() {
        init_test("kill_overrides_parked_reason");

        let mailbox = Mailbox::new();
        mailbox.request_exit(ExitReason::Abnormal("first".into()));
        mailbox.request_exit(ExitReason::Killed);
        mailbox.request_exit(ExitReason::Abnormal("late".into()));

        match mailbox.select(match_tag(1), None) {
            SelectOutcome::ExitRequested(ExitReason::Killed) => {}
            other => unreachable!("expected kill, got {other:?}"),
        }

        crate::test_complete!("kill_overrides_parked_reason");
    }

    #[test]
    fn closed_mailbox_drops_sends() {
        init_test("closed_mailbox_drops_sends");

        let mailbox = Mailbox::new();
        mailbox.close();
        mailbox.push(tagged(1, 10));
        assert_eq!(mailbox.len(), 0);

        crate::test_complete!("closed_mailbox_drops_sends");
    }
}
