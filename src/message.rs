//! Untyped message payloads and mailbox frames.
//!
//! The mailbox is untyped: every enqueued message is a [`Frame`], and typed
//! delivery is recovered on the receive side by selector clauses. [`Dynamic`]
//! is the type-erased payload carrier; [`Atom`] tags raw record frames so
//! protocols like the system-message protocol can be matched without knowing
//! the payload types up front.

use std::any::Any;
use std::sync::Arc;

use crate::pid::Ref;
use crate::process::{ExitMessage, ProcessDown};

// ============================================================================
// Atom
// ============================================================================

/// Interned-string tag for raw record frames.
///
/// Atoms are cheap to clone and compare; two atoms are equal iff their names
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom(Arc<str>);

impl Atom {
    /// Creates an atom with the given name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// Returns the atom's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Dynamic
// ============================================================================

/// A type-erased message payload.
///
/// Wraps any `Send + 'static` value together with its type name, so that
/// unexpected messages can at least be logged meaningfully. Recover the value
/// with [`downcast`](Self::downcast).
pub struct Dynamic {
    value: Box<dyn Any + Send>,
    type_name: &'static str,
}

impl Dynamic {
    /// Erases a value.
    #[must_use]
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns `true` if the payload is a `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Returns the type name captured when the payload was erased.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Recovers the payload as a `T`, or returns `self` unchanged.
    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        match self.value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Self {
                value,
                type_name: self.type_name,
            }),
        }
    }
}

impl std::fmt::Debug for Dynamic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Dynamic({})", self.type_name)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A raw mailbox entry.
///
/// Frames are matched against selector clauses in mailbox order; frames that
/// match no clause stay in the mailbox in their original relative order.
#[derive(Debug)]
pub(crate) enum Frame {
    /// A message sent through a typed subject. The tag identifies the subject.
    Tagged { tag: u64, payload: Dynamic },
    /// A raw three-field record: an atom followed by two payload fields.
    Record {
        atom: Atom,
        field1: Dynamic,
        field2: Dynamic,
    },
    /// A call reply, correlated by reference.
    Reply { reference: Ref, payload: Dynamic },
    /// A monitor fired: the monitored process terminated.
    Down(ProcessDown),
    /// A trapped exit signal from a linked process.
    Exit(ExitMessage),
}

impl Frame {
    /// Erases the frame into a [`Dynamic`] for catch-all clauses.
    pub(crate) fn into_dynamic(self) -> Dynamic {
        match self {
            Self::Tagged { payload, .. } | Self::Reply { payload, .. } => payload,
            Self::Record {
                atom,
                field1,
                field2,
            } => Dynamic::new((atom, field1, field2)),
            Self::Down(down) => Dynamic::new(down),
            Self::Exit(exit) => Dynamic::new(exit),
        }
    }
}
