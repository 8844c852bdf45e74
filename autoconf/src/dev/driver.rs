//! Driver registry.
//!
//! Responsibilities:
//! - Provide the [Driver] trait every concrete driver implements.
//! - Keep driver instances alive for the lifetime of the [DriverTable] and hand out cheap
//!   [Arc] clones so no lock is held while a driver runs.
//! - Index drivers by bus class, preserving registration order. Registration order is the
//!   tie-break between drivers that match a slot equally well.
//!
//! No uniqueness is enforced: two drivers may claim the same bus class and even the same name.
use super::{AttachArgs, AttachContext, DetachContext, DeviceNode};
use crate::Result;
use alloc::{boxed::Box, collections::btree_map::BTreeMap, sync::Arc, vec::Vec};
use bitflags::bitflags;
use core::any::Any;

/// Driver private state, created by [Driver::attach].
pub type Softc = Box<dyn Any + Send + Sync>;

bitflags! {
    /// Detach behaviour.
    pub struct DetachFlags: u32 {
        /// The device is gone; a driver refusing to detach is fatal.
        const FORCE = 0b01;
        /// Do not announce the detach.
        const QUIET = 0b10;
    }
}

/// Trait implemented by drivers.
///
/// Guarantees and expectations:
/// - [Driver::probe] only inspects its arguments. It must not map registers nor establish
///   interrupts, and may be called for slots the driver never attaches to.
/// - [Driver::attach] acquires resources through the [AttachContext]; they are released in
///   reverse order if attach fails and after [Driver::detach] succeeds.
/// - [Driver::detach] may refuse with an error unless [DetachFlags::FORCE] is given.
pub trait Driver: Send + Sync {
    fn name(&self) -> &'static str;
    /// Bus classes whose slots this driver is tried on.
    fn bus_classes(&self) -> &'static [&'static str];
    /// Score how well the driver fits a slot of `parent`. Zero means no match.
    fn probe(&self, parent: &DeviceNode, args: &AttachArgs) -> u32;
    fn attach(&self, ctx: &mut AttachContext, args: &AttachArgs) -> Result<Softc>;
    fn detach(&self, ctx: &mut DetachContext, softc: &mut Softc, flags: DetachFlags) -> Result<()>;
    fn on_registered(&self) {}
}

/// Position of a driver in its [DriverTable].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DriverId(usize);

/// Registered drivers, indexed by bus class.
#[derive(Default)]
pub struct DriverTable {
    drivers: Vec<Arc<dyn Driver>>,
    by_class: BTreeMap<&'static str, Vec<DriverId>>,
}

impl DriverTable {
    pub fn new() -> DriverTable {
        DriverTable::default()
    }

    /// Register a driver instance.
    ///
    /// [Driver::on_registered] runs before the driver becomes visible to probing.
    pub fn register<T: Driver + 'static>(&mut self, driver: T) -> DriverId {
        debug_ex!("\tRegistered driver '{}'.", driver.name());
        driver.on_registered();
        let id = DriverId(self.drivers.len());
        for class in driver.bus_classes() {
            self.by_class.entry(*class).or_default().push(id);
        }
        self.drivers.push(Arc::new(driver));
        id
    }

    pub fn get(&self, id: DriverId) -> Option<Arc<dyn Driver>> {
        self.drivers.get(id.0).cloned()
    }

    /// Drivers tried on a slot of `bus_class`, in registration order.
    pub fn candidates(&self, bus_class: &str) -> Vec<(DriverId, Arc<dyn Driver>)> {
        self.by_class.get(bus_class).map_or(Vec::new(), |ids| {
            ids.iter()
                .map(|id| (*id, self.drivers[id.0].clone()))
                .collect()
        })
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
