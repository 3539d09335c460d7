//! Arbor: a typed actor and supervision runtime.
//!
//! # Overview
//!
//! Arbor lets an application build trees of isolated, message-passing
//! processes with typed mailboxes, structured lifecycle management, external
//! observability, and fault-tolerant restart under a rate-limited intensity
//! policy.
//!
//! Three layers, bottom up:
//!
//! - **Processes** ([`process`], [`subject`], [`selector`]): lightweight
//!   isolated units with private mailboxes. Typed [`Subject`]s address a
//!   mailbox; composable [`Selector`]s recover typed messages from it with
//!   selective receive. Monitors, links, and trap-exit give failure
//!   visibility; [`Subject::call`] layers monitor-backed request/reply on
//!   top.
//! - **Actors** ([`actor`]): a process owning private state driven by a
//!   sequential handler, with an init handshake against its parent, a
//!   running/suspended mode switch, and the [`system`] inspection protocol
//!   answered for free.
//! - **Supervisors** ([`supervisor`]): actors whose state is a chain of child
//!   starters. Children restart rest-for-one under a sliding-window intensity
//!   limit, with failed restarts retried asynchronously.
//!
//! # Core guarantees
//!
//! - **Isolation**: a crashing process cannot corrupt another's state; all
//!   cross-process communication is message passing.
//! - **Per-pair FIFO**: message order is preserved per sender–receiver pair.
//! - **Save-queue selective receive**: frames no clause matches stay queued,
//!   in order, for a later receive.
//! - **No hung calls**: every call monitors its callee; death, reply, and
//!   timeout all resolve the call.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use arbor::{actor, supervisor, Next, Reply};
//!
//! enum Msg {
//!     Greet(Reply<String>),
//! }
//!
//! let tree = supervisor::start(|children| {
//!     children.add(supervisor::worker(|()| {
//!         actor::start((), |Msg::Greet(reply), ()| {
//!             reply.send("hello".to_owned());
//!             Next::Continue(())
//!         })
//!     }))
//! })?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod actor;
pub mod call;
mod mailbox;
pub mod message;
pub mod pid;
pub mod process;
mod registry;
pub mod selector;
pub mod subject;
pub mod supervisor;
pub mod system;
pub mod test_utils;

// Re-exports for convenient access to core types
pub use actor::{InitResult, Next, StartError};
pub use call::{CallError, Reply};
pub use message::{Atom, Dynamic};
pub use pid::{Pid, Ref};
pub use process::{ExitMessage, ExitReason, MonitorRef, ProcessDown};
pub use selector::{SelectTimeout, Selector};
pub use subject::Subject;
pub use system::{Mode, StatusInfo, SystemMessage};
