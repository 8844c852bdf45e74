//! Device registry and autoconfiguration.
//!
//! Drivers register into a [DriverTable] keyed by bus class. [Autoconf] walks the bus roots:
//! for every slot a bus enumerates it asks each eligible driver for a score, attaches the best
//! one and, when that device is itself a bus, probes behind it right after its attach.

mod args;
mod autoconf;
mod context;
mod device;
mod driver;
mod hotplug;

pub use args::{AttachArgs, CriticalRole, Ident, RegSpec};
pub use autoconf::{Autoconf, SlotOutcome};
pub use context::{AttachContext, DetachContext};
pub use device::{DeviceId, DeviceNode, DeviceState};
pub use driver::{DetachFlags, Driver, DriverId, DriverTable, Softc};
pub use hotplug::{HotplugEvent, HotplugOutcome, HotplugQueue};
