//! Per-CPU interrupt priority.
//!
//! A CPU running at level `L` defers every source whose priority is at or below `L`. Deferred
//! sources and scheduled soft interrupts are remembered once each and replayed, highest priority
//! first, as soon as the level drops below theirs.

use super::{Dispatch, IntrTable, Ipl};
use alloc::collections::btree_set::BTreeSet;
use core::sync::atomic::{AtomicU8, Ordering};
use spin::Mutex;

/// Work waiting on one CPU for its level to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Pending {
    Source(usize),
    Soft(u64),
}

pub(super) struct CpuState {
    level: AtomicU8,
    pending: Mutex<BTreeSet<Pending>>,
}

impl CpuState {
    pub(super) fn new() -> CpuState {
        CpuState {
            level: AtomicU8::new(Ipl::None.into()),
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    pub(super) fn level(&self) -> Ipl {
        Ipl::try_from(self.level.load(Ordering::Acquire)).unwrap_or(Ipl::High)
    }

    /// Set the level, returning the previous one.
    pub(super) fn swap_level(&self, ipl: Ipl) -> Ipl {
        Ipl::try_from(self.level.swap(ipl.into(), Ordering::AcqRel)).unwrap_or(Ipl::High)
    }

    pub(super) fn defer(&self, work: Pending) {
        self.pending.lock().insert(work);
    }
}

/// Priority raised by [IntrTable::spl_raise]; the previous level is restored on drop.
#[must_use = "dropping the guard immediately restores the previous level"]
pub struct SplGuard<'a> {
    table: &'a IntrTable,
    cpu: usize,
    saved: Ipl,
}

impl SplGuard<'_> {
    /// Level that will be restored.
    pub fn saved(&self) -> Ipl {
        self.saved
    }
}

impl Drop for SplGuard<'_> {
    fn drop(&mut self) {
        self.table.lower(self.cpu, self.saved);
    }
}

impl IntrTable {
    /// Raise `cpu` to at least `ipl`. Never lowers the level.
    pub fn spl_raise(&self, cpu: usize, ipl: Ipl) -> SplGuard<'_> {
        let state = self.cpu(cpu);
        let saved = state.level();
        if ipl > saved {
            state.swap_level(ipl);
        }
        SplGuard {
            table: self,
            cpu,
            saved,
        }
    }

    /// Current level of `cpu`.
    pub fn spl_level(&self, cpu: usize) -> Ipl {
        self.cpu(cpu).level()
    }

    /// Sources and soft interrupts deferred on `cpu` and not yet replayed.
    pub fn pending(&self, cpu: usize) -> usize {
        self.cpu(cpu).pending.lock().len()
    }

    /// Drop `cpu` to `ipl` and replay what it unmasks.
    pub(super) fn lower(&self, cpu: usize, ipl: Ipl) {
        let state = self.cpu(cpu);
        state.swap_level(ipl);
        loop {
            let next = {
                let mut pending = state.pending.lock();
                let pick = pending
                    .iter()
                    .map(|&work| (self.pending_ipl(work), work))
                    .filter(|&(work_ipl, _)| work_ipl > ipl || work_ipl == Ipl::None)
                    .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
                    .map(|(_, work)| work);
                if let Some(work) = pick {
                    pending.remove(&work);
                }
                pick
            };
            match next {
                // A source disestablished while pending replays as stray.
                Some(Pending::Source(source)) => {
                    if self.dispatch_on(cpu, source) == Dispatch::Deferred {
                        break;
                    }
                }
                // A disestablished soft interrupt is simply dropped.
                Some(Pending::Soft(id)) => self.softint_run(cpu, id),
                None => break,
            }
        }
    }

    fn pending_ipl(&self, work: Pending) -> Ipl {
        match work {
            Pending::Source(source) => self.source_ipl(source),
            Pending::Soft(id) => self.softint_ipl(id).unwrap_or(Ipl::None),
        }
    }
}
