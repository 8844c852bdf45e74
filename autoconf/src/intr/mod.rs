//! Interrupt establishment and dispatch.
//!
//! Each source owns a chain of registrations, run in registration order. The chain is replaced,
//! never edited in place, so dispatch works on a snapshot taken under a short read lock and
//! establish/disestablish never wait for a handler except to honour the cancellation guarantee
//! of [IntrTable::disestablish].
//!
//! Masking is per CPU, see [spl]. Deferred halves of handlers run as soft interrupts, see
//! [softint].

pub mod softint;
pub mod spl;

use crate::{Config, Error, Result};
use alloc::{
    boxed::Box, collections::btree_map::BTreeMap, format, string::String, sync::Arc, vec::Vec,
};
use core::{
    fmt::Debug,
    hint::spin_loop,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use softint::SoftRegistration;
pub use softint::SoftintToken;
use spin::RwLock;
pub use spl::SplGuard;
use spl::{CpuState, Pending};

/// Interrupt priority levels, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum Ipl {
    None = 0,
    SoftClock = 1,
    SoftNet = 2,
    SoftSerial = 3,
    Bio = 4,
    Net = 5,
    Tty = 6,
    Vm = 7,
    Sched = 8,
    High = 9,
}

/// How a source signals and how its chain is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Shared line; dispatch stops at the first handler that claims it.
    Edge,
    /// Shared line; every handler runs, the line stays asserted until all devices are served.
    Level,
    /// Exactly one handler.
    Exclusive,
}

/// Whether a handler's device raised the interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed,
    Unclaimed,
}

/// Interrupt line of a device as enumerated by its bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrSpec {
    pub source: usize,
    pub trigger: Trigger,
}

/// Platform-imposed properties of a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceConfig {
    /// Fixed trigger type. Otherwise the first registration decides.
    pub trigger: Option<Trigger>,
    /// Highest priority a handler may be established at.
    pub ceiling: Option<Ipl>,
}

/// Proof of one registration, consumed by [IntrTable::disestablish].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrToken {
    source: usize,
    id: u64,
}

impl IntrToken {
    pub fn source(&self) -> usize {
        self.source
    }
}

/// Result of one [IntrTable::dispatch].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Some handler claimed the interrupt.
    Claimed { handlers_run: usize },
    /// Handlers ran but none claimed it.
    Unclaimed { handlers_run: usize },
    /// The CPU priority masks the source; it will be replayed when the level drops.
    Deferred,
    /// Nothing is established on the source.
    Stray,
}

struct Registration {
    id: u64,
    name: String,
    ipl: Ipl,
    handler: Box<dyn Fn() -> Claim + Send + Sync>,
    /// Dispatches currently inside or about to enter `handler`.
    active: AtomicUsize,
    dead: AtomicBool,
}

type Chain = Arc<Vec<Arc<Registration>>>;

struct SourceState {
    config: SourceConfig,
    trigger: Option<Trigger>,
    chain: Chain,
}

impl SourceState {
    fn ipl(&self) -> Ipl {
        self.chain.iter().map(|r| r.ipl).max().unwrap_or(Ipl::None)
    }
}

struct Source {
    state: RwLock<SourceState>,
    count: AtomicU64,
    stray: AtomicU64,
}

/// Dispatch table of every interrupt source of the machine.
pub struct IntrTable {
    sources: Vec<Source>,
    softints: RwLock<BTreeMap<u64, Arc<SoftRegistration>>>,
    cpus: Vec<CpuState>,
    chain_max: usize,
    next_id: AtomicU64,
    cpu_id: fn() -> usize,
}

fn boot_cpu() -> usize {
    0
}

impl IntrTable {
    pub fn new(config: &Config) -> IntrTable {
        let sources = (0..config.intr_sources)
            .map(|_| Source {
                state: RwLock::new(SourceState {
                    config: SourceConfig::default(),
                    trigger: None,
                    chain: Arc::new(Vec::new()),
                }),
                count: AtomicU64::new(0),
                stray: AtomicU64::new(0),
            })
            .collect();
        IntrTable {
            sources,
            softints: RwLock::new(BTreeMap::new()),
            cpus: (0..config.max_cpus.max(1)).map(|_| CpuState::new()).collect(),
            chain_max: config.intr_chain_max,
            next_id: AtomicU64::new(1),
            cpu_id: boot_cpu,
        }
    }

    /// Use `cpu_id` to find the current CPU in [IntrTable::dispatch].
    pub fn with_cpu_id(mut self, cpu_id: fn() -> usize) -> IntrTable {
        self.cpu_id = cpu_id;
        self
    }

    pub fn sources(&self) -> usize {
        self.sources.len()
    }

    /// Apply platform properties to `source`.
    pub fn configure(&self, source: usize, config: SourceConfig) -> Result<()> {
        let mut state = self.source(source)?.state.write();
        if let (Some(fixed), Some(current)) = (config.trigger, state.trigger) {
            if fixed != current && !state.chain.is_empty() {
                return Err(Error::Busy);
            }
        }
        state.config = config;
        if config.trigger.is_some() {
            state.trigger = config.trigger;
        }
        Ok(())
    }

    fn source(&self, source: usize) -> Result<&Source> {
        self.sources.get(source).ok_or(Error::OutOfRange)
    }

    /// Append `handler` to the chain of `spec.source`, run at `ipl` with `arg`. `name` is the
    /// device the handler serves.
    ///
    /// Fail with [Error::OutOfRange] for an unknown source and with [Error::Busy] if the
    /// source is exclusive and taken, uses another trigger type, cannot run at `ipl` or has a
    /// full chain.
    pub fn establish<T, F>(
        &self,
        spec: IntrSpec,
        ipl: Ipl,
        name: &str,
        handler: F,
        arg: Arc<T>,
    ) -> Result<IntrToken>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> Claim + Send + Sync + 'static,
    {
        if ipl == Ipl::None {
            panic_dev!("{}: establishing an interrupt handler at Ipl::None", name);
        }
        let source = self.source(spec.source)?;
        let mut state = source.state.write();
        let trigger = state.trigger.unwrap_or(spec.trigger);
        if trigger != spec.trigger
            || (trigger == Trigger::Exclusive && !state.chain.is_empty())
            || state.config.ceiling.is_some_and(|ceiling| ipl > ceiling)
            || state.chain.len() >= self.chain_max
        {
            return Err(Error::Busy);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Arc::new(Registration {
            id,
            name: String::from(name),
            ipl,
            handler: Box::new(move || handler(&arg)),
            active: AtomicUsize::new(0),
            dead: AtomicBool::new(false),
        });
        let mut chain = Vec::with_capacity(state.chain.len() + 1);
        chain.extend(state.chain.iter().cloned());
        chain.push(registration);
        state.chain = Arc::new(chain);
        state.trigger = Some(trigger);
        debug_ex!(
            "{}: interrupting at {} ({:?}, {:?}).",
            name,
            self.intr_string(spec.source),
            trigger,
            ipl
        );
        Ok(IntrToken {
            source: spec.source,
            id,
        })
    }

    /// Remove exactly the registration behind `token`.
    ///
    /// No dispatch of the handler starts after this returns, and a dispatch already running it
    /// on another CPU is waited for. Must not be called from the handler itself.
    pub fn disestablish(&self, token: IntrToken) {
        let Ok(source) = self.source(token.source) else {
            panic_dev!("disestablish of a token for unknown source {}", token.source);
        };
        let removed = {
            let mut state = source.state.write();
            let Some(index) = state.chain.iter().position(|r| r.id == token.id) else {
                panic_dev!(
                    "double disestablish of handler #{} on {}",
                    token.id,
                    self.intr_string(token.source)
                );
            };
            let mut chain: Vec<_> = state.chain.iter().cloned().collect();
            let removed = chain.remove(index);
            state.chain = Arc::new(chain);
            if state.chain.is_empty() && state.config.trigger.is_none() {
                state.trigger = None;
            }
            removed
        };
        removed.dead.store(true, Ordering::SeqCst);
        while removed.active.load(Ordering::SeqCst) != 0 {
            spin_loop();
        }
        debug_ex!(
            "{}: disestablished from {}.",
            removed.name,
            self.intr_string(token.source)
        );
    }

    /// Dispatch `source` on the current CPU.
    pub fn dispatch(&self, source: usize) -> Dispatch {
        self.dispatch_on((self.cpu_id)(), source)
    }

    /// Dispatch `source` on `cpu`, as the trap path of that CPU would.
    ///
    /// Sources outside the table are counted nowhere and reported as [Dispatch::Stray].
    pub fn dispatch_on(&self, cpu: usize, source: usize) -> Dispatch {
        let Ok(src) = self.source(source) else {
            return Dispatch::Stray;
        };
        let (chain, trigger, ipl) = {
            let state = src.state.read();
            (state.chain.clone(), state.trigger, state.ipl())
        };
        if chain.is_empty() {
            src.stray.fetch_add(1, Ordering::Relaxed);
            return Dispatch::Stray;
        }
        let cpu_state = self.cpu(cpu);
        if ipl <= cpu_state.level() {
            cpu_state.defer(Pending::Source(source));
            return Dispatch::Deferred;
        }

        let saved = cpu_state.swap_level(ipl);
        let mut handlers_run = 0;
        let mut claimed = false;
        for registration in chain.iter() {
            registration.active.fetch_add(1, Ordering::SeqCst);
            if !registration.dead.load(Ordering::SeqCst) {
                handlers_run += 1;
                if (registration.handler)() == Claim::Claimed {
                    claimed = true;
                }
            }
            registration.active.fetch_sub(1, Ordering::SeqCst);
            if claimed && trigger != Some(Trigger::Level) {
                break;
            }
        }
        self.lower(cpu, saved);

        if claimed {
            src.count.fetch_add(1, Ordering::Relaxed);
            Dispatch::Claimed { handlers_run }
        } else {
            src.stray.fetch_add(1, Ordering::Relaxed);
            Dispatch::Unclaimed { handlers_run }
        }
    }

    /// Interrupts of `source` claimed by some handler.
    pub fn count(&self, source: usize) -> u64 {
        self.source(source)
            .map_or(0, |s| s.count.load(Ordering::Relaxed))
    }

    /// Interrupts of `source` nobody claimed.
    pub fn stray(&self, source: usize) -> u64 {
        self.source(source)
            .map_or(0, |s| s.stray.load(Ordering::Relaxed))
    }

    /// Names of the handlers chained on `source`, in dispatch order.
    pub fn handlers(&self, source: usize) -> Vec<String> {
        self.source(source).map_or(Vec::new(), |s| {
            s.state.read().chain.iter().map(|r| r.name.clone()).collect()
        })
    }

    /// Human readable name of `source`.
    pub fn intr_string(&self, source: usize) -> String {
        format!("irq {}", source)
    }

    fn cpu(&self, cpu: usize) -> &CpuState {
        self.cpus.get(cpu).unwrap_or_else(|| {
            panic_dev!("interrupt on cpu {} of {}", cpu, self.cpus.len())
        })
    }

    fn source_ipl(&self, source: usize) -> Ipl {
        self.source(source)
            .map_or(Ipl::None, |s| s.state.read().ipl())
    }
}

impl Debug for IntrTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IntrTable")
            .field("sources", &self.sources.len())
            .field("softints", &self.softints.read().len())
            .field("cpus", &self.cpus.len())
            .field("chain_max", &self.chain_max)
            .finish()
    }
}
