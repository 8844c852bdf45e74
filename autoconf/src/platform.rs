//! Boot-time construction of the device tree.
//!
//! The platform describes what it knows statically: its bus roots, the slots each root decodes
//! and the properties of its interrupt sources. [bootstrap] turns that into a populated
//! [Autoconf]; bridges found on the way are probed as they attach.

use crate::{
    Config, Result,
    dev::{AttachArgs, Autoconf, DriverTable},
    intr::{IntrTable, SourceConfig},
};
use alloc::{sync::Arc, vec::Vec};
use log::info;

/// One bus root and the slots known behind it.
#[derive(Debug, Clone)]
pub struct BusRoot {
    pub name: &'static str,
    pub args: AttachArgs,
    pub children: Vec<AttachArgs>,
}

/// Everything the machine-dependent boot code knows about the hardware.
#[derive(Debug, Clone, Default)]
pub struct Platform {
    pub roots: Vec<BusRoot>,
    pub intr_sources: Vec<(usize, SourceConfig)>,
}

impl Platform {
    pub fn new() -> Platform {
        Platform::default()
    }

    pub fn root(mut self, name: &'static str, args: AttachArgs, children: Vec<AttachArgs>) -> Platform {
        self.roots.push(BusRoot {
            name,
            args,
            children,
        });
        self
    }

    pub fn intr_source(mut self, source: usize, config: SourceConfig) -> Platform {
        self.intr_sources.push((source, config));
        self
    }
}

/// Wire the interrupt table, then attach every root and probe its children in order.
///
/// Fail if an interrupt source cannot be configured or if a critical device is missing once
/// every root has been probed.
pub fn bootstrap(config: Config, platform: Platform, drivers: DriverTable) -> Result<Autoconf> {
    info!("Configuring devices...");
    let intr = Arc::new(IntrTable::new(&config));
    for (source, source_config) in &platform.intr_sources {
        intr.configure(*source, *source_config)?;
    }
    let mut autoconf = Autoconf::with_intr(config, drivers, intr);

    let mut missing = None;
    for root in platform.roots {
        let id = autoconf.add_root(root.name, root.args);
        if let Err(err) = autoconf.probe_bus(id, root.children) {
            missing.get_or_insert(err);
        }
    }
    if let Some(err) = missing {
        return Err(err);
    }
    info!("Devices configured.");
    Ok(autoconf)
}
