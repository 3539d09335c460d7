//! Composable selective receive.
//!
//! A [`Selector`] is a value describing which raw mailbox frames map to typed
//! messages. Clauses are tried against frames **in mailbox order**: the first
//! frame any clause accepts is dequeued and its clause's transform applied;
//! frames that match no clause keep their positions. When one frame matches
//! several clauses, the earlier-added clause wins.
//!
//! Selectors are plain values: composition does not touch the mailbox, and
//! `select` / `select_forever` borrow the selector, so a composed selector
//! can drive a receive loop indefinitely.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::mailbox::SelectOutcome;
use crate::message::{Atom, Dynamic, Frame};
use crate::pid::Ref;
use crate::process::{self, ExitMessage, MonitorRef, ProcessDown};
use crate::subject::Subject;

/// No frame matched within the timeout. Nothing was dequeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no matching message within the timeout")]
pub struct SelectTimeout;

type Clause<M> = Box<dyn Fn(Frame) -> Result<M, Frame> + Send>;

/// A composable specifier of which mailbox frames map to values of `M`.
pub struct Selector<M> {
    clauses: Vec<Clause<M>>,
}

impl<M> std::fmt::Debug for Selector<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("clauses", &self.clauses.len())
            .finish()
    }
}

impl<M: Send + 'static> Default for Selector<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Send + 'static> Selector<M> {
    /// Creates an empty selector. It matches nothing; selecting on it only
    /// ever times out (or observes an exit request).
    #[must_use]
    pub fn new() -> Self {
        Self {
            clauses: Vec::new(),
        }
    }

    /// Adds a clause matching messages sent to `subject`, transformed by
    /// `tag`.
    #[must_use]
    pub fn selecting<X, F>(mut self, subject: &Subject<X>, tag: F) -> Self
    where
        X: Send + 'static,
        F: Fn(X) -> M + Send + 'static,
    {
        let wanted = subject.tag();
        self.clauses.push(Box::new(move |frame| match frame {
            Frame::Tagged { tag: t, payload } if t == wanted => match payload.downcast::<X>() {
                Ok(message) => Ok(tag(message)),
                Err(payload) => Err(Frame::Tagged { tag: t, payload }),
            },
            other => Err(other),
        }));
        self
    }

    /// Adds a catch-all clause: any frame matches, erased to a [`Dynamic`].
    ///
    /// Clauses added earlier still win, so a trailing catch-all only sees
    /// frames nothing else matched.
    #[must_use]
    pub fn selecting_anything<F>(mut self, tag: F) -> Self
    where
        F: Fn(Dynamic) -> M + Send + 'static,
    {
        self.clauses
            .push(Box::new(move |frame| Ok(tag(frame.into_dynamic()))));
        self
    }

    /// Adds a clause matching the [`ProcessDown`] of the given monitor.
    #[must_use]
    pub fn selecting_process_down<F>(mut self, monitor: MonitorRef, tag: F) -> Self
    where
        F: Fn(ProcessDown) -> M + Send + 'static,
    {
        let wanted = monitor.reference();
        self.clauses.push(Box::new(move |frame| match frame {
            Frame::Down(down) if down.monitor == wanted => Ok(tag(down)),
            other => Err(other),
        }));
        self
    }

    /// Adds a clause matching raw three-field records starting with `atom`.
    ///
    /// The decoder receives the two payload fields and either produces a
    /// message or hands the fields back, leaving the frame in the mailbox.
    #[must_use]
    pub fn selecting_record3<F>(mut self, atom: Atom, decoder: F) -> Self
    where
        F: Fn(Dynamic, Dynamic) -> Result<M, (Dynamic, Dynamic)> + Send + 'static,
    {
        self.clauses.push(Box::new(move |frame| match frame {
            Frame::Record {
                atom: frame_atom,
                field1,
                field2,
            } if frame_atom == atom => match decoder(field1, field2) {
                Ok(message) => Ok(message),
                Err((field1, field2)) => Err(Frame::Record {
                    atom: frame_atom,
                    field1,
                    field2,
                }),
            },
            other => Err(other),
        }));
        self
    }

    /// Adds a clause matching call replies correlated by `reference`.
    #[must_use]
    pub(crate) fn selecting_reply<R, F>(mut self, reference: Ref, tag: F) -> Self
    where
        R: Send + 'static,
        F: Fn(R) -> M + Send + 'static,
    {
        self.clauses.push(Box::new(move |frame| match frame {
            Frame::Reply {
                reference: r,
                payload,
            } if r == reference => match payload.downcast::<R>() {
                Ok(reply) => Ok(tag(reply)),
                Err(payload) => Err(Frame::Reply {
                    reference: r,
                    payload,
                }),
            },
            other => Err(other),
        }));
        self
    }

    /// Adds a clause matching trapped exit signals.
    #[must_use]
    pub(crate) fn selecting_trapped_exits<F>(mut self, tag: F) -> Self
    where
        F: Fn(ExitMessage) -> M + Send + 'static,
    {
        self.clauses.push(Box::new(move |frame| match frame {
            Frame::Exit(exit) => Ok(tag(exit)),
            other => Err(other),
        }));
        self
    }

    /// Appends all of `other`'s clauses after this selector's clauses.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    /// Transforms every matched message with `f`.
    #[must_use]
    pub fn map<N, F>(self, f: F) -> Selector<N>
    where
        N: Send + 'static,
        F: Fn(M) -> N + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Selector {
            clauses: self
                .clauses
                .into_iter()
                .map(|clause| {
                    let f = Arc::clone(&f);
                    Box::new(move |frame| clause(frame).map(|message| (*f)(message))) as Clause<N>
                })
                .collect(),
        }
    }

    /// Tries the clauses in order against one frame.
    fn try_match(&self, mut frame: Frame) -> Result<M, Frame> {
        for clause in &self.clauses {
            match clause(frame) {
                Ok(message) => return Ok(message),
                Err(rejected) => frame = rejected,
            }
        }
        Err(frame)
    }

    /// Blocks up to `timeout` for a matching message. On timeout nothing has
    /// been dequeued. A zero timeout still scans the mailbox once.
    pub fn select(&self, timeout: Duration) -> Result<M, SelectTimeout> {
        // An unrepresentable deadline means, in effect, forever.
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.run(Some(deadline)),
            None => self.run(None),
        }
    }

    /// Blocks indefinitely for a matching message.
    pub fn select_forever(&self) -> M {
        match self.run(None) {
            Ok(message) => message,
            Err(SelectTimeout) => unreachable!("no deadline was set"),
        }
    }

    fn run(&self, deadline: Option<Instant>) -> Result<M, SelectTimeout> {
        let handle = process::current();
        match handle
            .mailbox
            .select(|frame| self.try_match(frame), deadline)
        {
            SelectOutcome::Matched(message) => Ok(message),
            SelectOutcome::TimedOut => Err(SelectTimeout),
            SelectOutcome::ExitRequested(reason) => process::exit_unwind(reason),
        }
    }
}
