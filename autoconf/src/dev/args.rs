//! What a bus knows about one of its slots.

use crate::{bus_space::BusSpaceTag, intr::IntrSpec};
use alloc::{
    collections::btree_map::BTreeMap,
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::fmt::Write;

/// Devices the platform cannot boot without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticalRole {
    Console,
    RootStorage,
}

/// How the bus identifies a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ident {
    /// Nothing but locators, as on buses without self-identification.
    Anonymous,
    /// Fixed device name from a static configuration table.
    Name(String),
    /// Compatible strings, most specific first.
    Compatible(Vec<String>),
    /// PCI configuration space identity.
    Pci {
        vendor: u16,
        product: u16,
        class: u32,
        revision: u8,
    },
}

/// One register window of a slot.
#[derive(Debug, Clone)]
pub struct RegSpec {
    pub tag: BusSpaceTag,
    pub base: u64,
    pub size: u64,
}

/// Attach arguments handed to [crate::dev::Driver::probe] and [crate::dev::Driver::attach].
#[derive(Debug, Clone)]
pub struct AttachArgs {
    /// Kind of bus the slot sits on; selects the candidate drivers.
    pub bus_class: &'static str,
    pub ident: Ident,
    /// Bus-specific locators, e.g. `port`, `slot`, `function`.
    pub locators: BTreeMap<&'static str, u64>,
    pub regs: Vec<RegSpec>,
    pub intrs: Vec<IntrSpec>,
    /// Boot fails if this slot ends up without a device.
    pub critical: Option<CriticalRole>,
}

impl AttachArgs {
    pub fn new(bus_class: &'static str) -> AttachArgs {
        AttachArgs {
            bus_class,
            ident: Ident::Anonymous,
            locators: BTreeMap::new(),
            regs: Vec::new(),
            intrs: Vec::new(),
            critical: None,
        }
    }

    pub fn name(mut self, name: &str) -> AttachArgs {
        self.ident = Ident::Name(name.to_string());
        self
    }

    pub fn compatible(mut self, compatible: &[&str]) -> AttachArgs {
        self.ident = Ident::Compatible(compatible.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn pci(mut self, vendor: u16, product: u16, class: u32, revision: u8) -> AttachArgs {
        self.ident = Ident::Pci {
            vendor,
            product,
            class,
            revision,
        };
        self
    }

    pub fn locator(mut self, key: &'static str, value: u64) -> AttachArgs {
        self.locators.insert(key, value);
        self
    }

    pub fn reg(mut self, tag: &BusSpaceTag, base: u64, size: u64) -> AttachArgs {
        self.regs.push(RegSpec {
            tag: tag.clone(),
            base,
            size,
        });
        self
    }

    pub fn intr(mut self, spec: IntrSpec) -> AttachArgs {
        self.intrs.push(spec);
        self
    }

    pub fn critical(mut self, role: CriticalRole) -> AttachArgs {
        self.critical = Some(role);
        self
    }

    /// Whether the slot carries `name` as its fixed name.
    pub fn is_named(&self, name: &str) -> bool {
        matches!(&self.ident, Ident::Name(n) if n == name)
    }

    /// Position of `compatible` in the slot's compatible list, most specific first.
    pub fn compatible_rank(&self, compatible: &str) -> Option<usize> {
        match &self.ident {
            Ident::Compatible(list) => list.iter().position(|c| c == compatible),
            _ => None,
        }
    }

    pub fn locator_value(&self, key: &str) -> Option<u64> {
        self.locators.get(key).copied()
    }

    /// Short description for "not configured" lines: identity followed by locators.
    pub fn describe(&self) -> String {
        let mut out = match &self.ident {
            Ident::Anonymous => format!("{} device", self.bus_class),
            Ident::Name(name) => name.clone(),
            Ident::Compatible(list) => match list.first() {
                Some(first) => format!("\"{}\"", first),
                None => format!("{} device", self.bus_class),
            },
            Ident::Pci {
                vendor, product, ..
            } => format!("vendor {:#06x} product {:#06x}", vendor, product),
        };
        for (key, value) in &self.locators {
            let _ = write!(out, " {} {:#x}", key, value);
        }
        out
    }
}
