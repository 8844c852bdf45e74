//! Soft interrupts.
//!
//! A hard handler does the minimum at its own priority and schedules the rest as a soft
//! interrupt at one of the soft levels. Scheduling marks the handler pending on the current CPU;
//! it runs once that CPU's level drops below the soft level, through the same replay path as
//! masked hardware sources. Scheduling an already pending handler does nothing.

use super::{IntrTable, Ipl, spl::Pending};
use alloc::{boxed::Box, string::String, sync::Arc};
use core::{
    hint::spin_loop,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Proof of one soft interrupt registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftintToken {
    id: u64,
}

pub(super) struct SoftRegistration {
    name: String,
    pub(super) ipl: Ipl,
    handler: Box<dyn Fn() + Send + Sync>,
    active: AtomicUsize,
    dead: AtomicBool,
}

impl Ipl {
    /// Whether soft interrupts may run at this level.
    pub fn is_soft(self) -> bool {
        matches!(self, Ipl::SoftClock | Ipl::SoftNet | Ipl::SoftSerial)
    }
}

impl IntrTable {
    /// Register `handler` to run at the soft level `ipl` with `arg` each time it is scheduled.
    ///
    /// `ipl` must be one of the soft levels.
    pub fn softint_establish<T, F>(
        &self,
        ipl: Ipl,
        name: &str,
        handler: F,
        arg: Arc<T>,
    ) -> SoftintToken
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        if !ipl.is_soft() {
            panic_dev!("{}: soft interrupt established at {:?}", name, ipl);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.softints.write().insert(
            id,
            Arc::new(SoftRegistration {
                name: String::from(name),
                ipl,
                handler: Box::new(move || handler(&arg)),
                active: AtomicUsize::new(0),
                dead: AtomicBool::new(false),
            }),
        );
        debug_ex!("{}: soft interrupt #{} at {:?}.", name, id, ipl);
        SoftintToken { id }
    }

    /// Schedule `token` on the current CPU.
    pub fn softint_schedule(&self, token: SoftintToken) {
        self.softint_schedule_on((self.cpu_id)(), token)
    }

    /// Schedule `token` on `cpu`. It runs now if the level of `cpu` is already below its own.
    pub fn softint_schedule_on(&self, cpu: usize, token: SoftintToken) {
        let Some(ipl) = self.softint_ipl(token.id) else {
            panic_dev!("scheduling disestablished soft interrupt #{}", token.id);
        };
        let state = self.cpu(cpu);
        state.defer(Pending::Soft(token.id));
        if state.level() < ipl {
            self.lower(cpu, state.level());
        }
    }

    /// Remove the soft interrupt behind `token`, waiting for a run in progress on another CPU.
    ///
    /// A pending run is dropped. Must not be called from the handler itself.
    pub fn softint_disestablish(&self, token: SoftintToken) {
        let Some(removed) = self.softints.write().remove(&token.id) else {
            panic_dev!("double disestablish of soft interrupt #{}", token.id);
        };
        removed.dead.store(true, Ordering::SeqCst);
        while removed.active.load(Ordering::SeqCst) != 0 {
            spin_loop();
        }
        debug_ex!("{}: soft interrupt #{} disestablished.", removed.name, token.id);
    }

    pub(super) fn softint_ipl(&self, id: u64) -> Option<Ipl> {
        self.softints.read().get(&id).map(|r| r.ipl)
    }

    /// Run soft interrupt `id` on `cpu` at its level, then drop back and replay.
    pub(super) fn softint_run(&self, cpu: usize, id: u64) {
        let Some(registration) = self.softints.read().get(&id).cloned() else {
            return;
        };
        let state = self.cpu(cpu);
        let saved = state.swap_level(registration.ipl);
        registration.active.fetch_add(1, Ordering::SeqCst);
        if !registration.dead.load(Ordering::SeqCst) {
            (registration.handler)();
        }
        registration.active.fetch_sub(1, Ordering::SeqCst);
        self.lower(cpu, saved);
    }
}
