//! Global process table: liveness, links, monitors, and signal delivery.
//!
//! The table is the substrate's single source of truth. A pid is alive iff it
//! has a record here. Termination removes the record, closes the mailbox,
//! propagates exit signals over links, and fires monitors — all under the
//! table locks, so signal delivery is atomic with respect to process death.
//!
//! Lock order: `procs` before `monitors` before any mailbox. All indexes are
//! `BTreeMap`s so iteration order never depends on hashing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::mailbox::Mailbox;
use crate::message::Frame;
use crate::pid::{Pid, Ref};
use crate::process::{ExitMessage, ExitReason, ProcessDown};

#[derive(Debug)]
struct ProcessRecord {
    mailbox: Arc<Mailbox>,
    links: BTreeSet<Pid>,
    trap_exits: bool,
}

#[derive(Debug)]
struct MonitorRecord {
    watcher: Pid,
    target: Pid,
}

#[derive(Debug)]
struct Monitors {
    by_ref: BTreeMap<Ref, MonitorRecord>,
    by_target: BTreeMap<Pid, Vec<Ref>>,
    by_watcher: BTreeMap<Pid, Vec<Ref>>,
}

impl Monitors {
    const fn new() -> Self {
        Self {
            by_ref: BTreeMap::new(),
            by_target: BTreeMap::new(),
            by_watcher: BTreeMap::new(),
        }
    }

    fn establish(&mut self, reference: Ref, watcher: Pid, target: Pid) {
        self.by_ref.insert(reference, MonitorRecord { watcher, target });
        self.by_target.entry(target).or_default().push(reference);
        self.by_watcher.entry(watcher).or_default().push(reference);
    }

    fn remove(&mut self, reference: Ref) -> Option<MonitorRecord> {
        let record = self.by_ref.remove(&reference)?;
        if let Some(refs) = self.by_target.get_mut(&record.target) {
            refs.retain(|r| *r != reference);
            if refs.is_empty() {
                self.by_target.remove(&record.target);
            }
        }
        if let Some(refs) = self.by_watcher.get_mut(&record.watcher) {
            refs.retain(|r| *r != reference);
            if refs.is_empty() {
                self.by_watcher.remove(&record.watcher);
            }
        }
        Some(record)
    }

    /// Removes every monitor on `target`, returning `(reference, watcher)`
    /// pairs for notification.
    fn remove_target(&mut self, target: Pid) -> Vec<(Ref, Pid)> {
        let Some(refs) = self.by_target.remove(&target) else {
            return Vec::new();
        };
        let mut removed = Vec::with_capacity(refs.len());
        for reference in refs {
            if let Some(record) = self.by_ref.remove(&reference) {
                if let Some(watcher_refs) = self.by_watcher.get_mut(&record.watcher) {
                    watcher_refs.retain(|r| *r != reference);
                    if watcher_refs.is_empty() {
                        self.by_watcher.remove(&record.watcher);
                    }
                }
                removed.push((reference, record.watcher));
            }
        }
        removed
    }

    /// Drops every monitor held by `watcher` (called when the watcher dies).
    fn remove_watcher(&mut self, watcher: Pid) {
        let Some(refs) = self.by_watcher.remove(&watcher) else {
            return;
        };
        for reference in refs {
            if let Some(record) = self.by_ref.remove(&reference) {
                if let Some(target_refs) = self.by_target.get_mut(&record.target) {
                    target_refs.retain(|r| *r != reference);
                    if target_refs.is_empty() {
                        self.by_target.remove(&record.target);
                    }
                }
            }
        }
    }
}

struct ProcessTable {
    procs: Mutex<BTreeMap<Pid, ProcessRecord>>,
    monitors: Mutex<Monitors>,
}

static TABLE: ProcessTable = ProcessTable {
    procs: Mutex::new(BTreeMap::new()),
    monitors: Mutex::new(Monitors::new()),
};

pub(crate) fn register(pid: Pid, mailbox: Arc<Mailbox>) {
    TABLE.procs.lock().insert(
        pid,
        ProcessRecord {
            mailbox,
            links: BTreeSet::new(),
            trap_exits: false,
        },
    );
}

pub(crate) fn is_alive(pid: Pid) -> bool {
    TABLE.procs.lock().contains_key(&pid)
}

pub(crate) fn mailbox_of(pid: Pid) -> Option<Arc<Mailbox>> {
    TABLE.procs.lock().get(&pid).map(|r| Arc::clone(&r.mailbox))
}

/// Delivers a raw frame to `pid`'s mailbox; dropped silently if dead.
pub(crate) fn send_frame(pid: Pid, frame: Frame) {
    if let Some(mailbox) = mailbox_of(pid) {
        mailbox.push(frame);
    }
}

pub(crate) fn set_trap_exits(pid: Pid, enabled: bool) {
    if let Some(record) = TABLE.procs.lock().get_mut(&pid) {
        record.trap_exits = enabled;
    }
}

/// Installs a bidirectional link. Both processes must be alive; links for a
/// spawn are installed before the child thread runs.
pub(crate) fn link(a: Pid, b: Pid) {
    let mut procs = TABLE.procs.lock();
    if !procs.contains_key(&a) || !procs.contains_key(&b) {
        return;
    }
    if let Some(record) = procs.get_mut(&a) {
        record.links.insert(b);
    }
    if let Some(record) = procs.get_mut(&b) {
        record.links.insert(a);
    }
}

/// Removes a bidirectional link, if present.
pub(crate) fn unlink(a: Pid, b: Pid) {
    let mut procs = TABLE.procs.lock();
    if let Some(record) = procs.get_mut(&a) {
        record.links.remove(&b);
    }
    if let Some(record) = procs.get_mut(&b) {
        record.links.remove(&a);
    }
}

/// Establishes a monitor from `watcher` on `target`.
///
/// If `target` is already dead a `ProcessDown` with reason
/// `Abnormal("noproc")` is enqueued to the watcher immediately.
pub(crate) fn monitor(watcher: Pid, target: Pid) -> Ref {
    let reference = Ref::new();
    let procs = TABLE.procs.lock();
    if procs.contains_key(&target) {
        TABLE.monitors.lock().establish(reference, watcher, target);
    } else if let Some(record) = procs.get(&watcher) {
        record.mailbox.push(Frame::Down(ProcessDown {
            monitor: reference,
            pid: target,
            reason: ExitReason::Abnormal("noproc".into()),
        }));
    }
    reference
}

/// Removes a monitor. With `flush`, also purges any already-enqueued down
/// frame for the reference from the watcher's mailbox.
pub(crate) fn demonitor(watcher_mailbox: &Mailbox, reference: Ref, flush: bool) {
    TABLE.monitors.lock().remove(reference);
    if flush {
        watcher_mailbox
            .retain(|frame| !matches!(frame, Frame::Down(down) if down.monitor == reference));
    }
}

/// Sends an exit signal from `from` to `to`.
///
/// `Killed` is untrappable and always parks a pending exit. Any other reason
/// is delivered as an [`ExitMessage`] when the target traps exits, and
/// otherwise terminates the target — including `Normal`, which is how a
/// parent cancels a child.
pub(crate) fn send_exit(from: Pid, to: Pid, reason: ExitReason) {
    let procs = TABLE.procs.lock();
    let Some(record) = procs.get(&to) else {
        return;
    };
    if reason == ExitReason::Killed {
        record.mailbox.request_exit(ExitReason::Killed);
    } else if record.trap_exits {
        record.mailbox.push(Frame::Exit(ExitMessage { pid: from, reason }));
    } else {
        record.mailbox.request_exit(reason);
    }
}

/// Removes a dead process from the table and fans out its death.
///
/// Linked peers that trap exits receive an [`ExitMessage`]; non-trapping
/// peers are terminated unless the reason is `Normal`. Every monitor on the
/// pid fires exactly one [`ProcessDown`]; monitors held by the pid are
/// released without firing.
pub(crate) fn terminate(pid: Pid, reason: ExitReason) {
    let mut procs = TABLE.procs.lock();
    let Some(record) = procs.remove(&pid) else {
        return;
    };
    record.mailbox.close();

    tracing::debug!(pid = %pid, reason = ?reason, "process terminated");

    for peer in &record.links {
        if let Some(peer_record) = procs.get_mut(peer) {
            peer_record.links.remove(&pid);
            if peer_record.trap_exits {
                peer_record.mailbox.push(Frame::Exit(ExitMessage {
                    pid,
                    reason: reason.clone(),
                }));
            } else if reason != ExitReason::Normal {
                peer_record.mailbox.request_exit(reason.clone());
            }
        }
    }

    let mut monitors = TABLE.monitors.lock();
    for (reference, watcher) in monitors.remove_target(pid) {
        if let Some(watcher_record) = procs.get(&watcher) {
            watcher_record.mailbox.push(Frame::Down(ProcessDown {
                monitor: reference,
                pid,
                reason: reason.clone(),
            }));
        }
    }
    monitors.remove_watcher(pid);
}
