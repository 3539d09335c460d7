//! Typed inbox endpoints.
//!
//! A [`Subject`] names one destination mailbox and one message type. It is
//! owned by exactly one process (its receiver); any number of senders hold
//! clones. Sending never blocks, is unbounded, preserves FIFO order per
//! sender–receiver pair, and silently drops when the owner is dead.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::mailbox::Mailbox;
use crate::message::{Dynamic, Frame};
use crate::pid::Pid;
use crate::process::ProcessHandle;
use crate::selector::{SelectTimeout, Selector};

/// Monotonic counter for subject channel tags.
static TAG_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A typed inbox endpoint for messages of type `M`.
///
/// Only the owner's selective receives can observe messages sent to a
/// subject; selecting on a subject owned by another process matches nothing.
pub struct Subject<M> {
    owner: Pid,
    tag: u64,
    mailbox: Arc<Mailbox>,
    _message: PhantomData<fn(M) -> M>,
}

impl<M> Clone for Subject<M> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner,
            tag: self.tag,
            mailbox: Arc::clone(&self.mailbox),
            _message: PhantomData,
        }
    }
}

impl<M> PartialEq for Subject<M> {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}

impl<M> Eq for Subject<M> {}

impl<M> std::fmt::Debug for Subject<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subject")
            .field("owner", &self.owner)
            .field("tag", &self.tag)
            .finish()
    }
}

impl<M: Send + 'static> Subject<M> {
    /// Creates a subject owned by the given process.
    pub(crate) fn for_owner(handle: &ProcessHandle) -> Self {
        Self {
            owner: handle.pid,
            tag: TAG_COUNTER.fetch_add(1, Ordering::Relaxed),
            mailbox: Arc::clone(&handle.mailbox),
            _message: PhantomData,
        }
    }

    /// The pid of the owning (receiving) process.
    #[must_use]
    pub fn owner(&self) -> Pid {
        self.owner
    }

    /// The channel tag identifying this subject in raw frames.
    pub(crate) fn tag(&self) -> u64 {
        self.tag
    }

    /// Sends a message. Infallible; dead recipients silently drop.
    pub fn send(&self, message: M) {
        self.mailbox.push(Frame::Tagged {
            tag: self.tag,
            payload: Dynamic::new(message),
        });
    }

    /// Receives the next message on this subject alone, waiting up to
    /// `timeout`. Owner-side convenience for a single-clause select.
    pub fn receive(&self, timeout: Duration) -> Result<M, SelectTimeout> {
        Selector::new().selecting(self, |message| message).select(timeout)
    }

    /// Receives the next message on this subject alone, blocking forever.
    pub fn receive_forever(&self) -> M {
        Selector::new()
            .selecting(self, |message| message)
            .select_forever()
    }

    /// Discards every frame queued for this subject in the owner's mailbox.
    pub(crate) fn flush(&self) {
        let wanted = self.tag;
        self.mailbox
            .retain(|frame| !matches!(frame, Frame::Tagged { tag, .. } if *tag == wanted));
    }
}
