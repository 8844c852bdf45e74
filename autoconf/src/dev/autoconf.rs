//! The match/attach/detach walk.
//!
//! The device tree is an arena of [DeviceNode]s indexed by [DeviceId]. A parent lists its
//! children in slot order and every child names its parent. Nodes that leave the tree stay in
//! the arena as terminal tombstones so ids are never reused.
//!
//! Everything here runs in one context at a time: at boot, from [crate::platform], and
//! later from the hot-plug worker.

use super::{
    AttachArgs, AttachContext, CriticalRole, DetachContext, DetachFlags, DeviceId, DeviceNode,
    DeviceState, Driver, DriverId, DriverTable, HotplugEvent, HotplugOutcome, HotplugQueue,
    context::release,
};
use crate::{Config, Error, Result, intr::IntrTable};
use alloc::{
    collections::{btree_map::BTreeMap, btree_set::BTreeSet},
    format,
    string::String,
    sync::Arc,
    vec::Vec,
};
use core::{any::Any, mem};
use log::{error, info, warn};

/// What became of one slot handed to [Autoconf::probe_bus].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    Attached(DeviceId),
    /// No driver matched.
    Unconfigured,
    /// The best driver matched but failed to attach.
    Failed { driver: &'static str, error: Error },
}

/// Driver registry, device tree and interrupt table of one machine.
pub struct Autoconf {
    config: Config,
    drivers: DriverTable,
    nodes: Vec<DeviceNode>,
    roots: Vec<DeviceId>,
    units: BTreeMap<&'static str, BTreeSet<usize>>,
    intr: Arc<IntrTable>,
    hotplug: HotplugQueue,
    /// First critical slot left empty by the current walk.
    critical: Option<Error>,
}

impl Autoconf {
    pub fn new(config: Config, drivers: DriverTable) -> Autoconf {
        let intr = Arc::new(IntrTable::new(&config));
        Self::with_intr(config, drivers, intr)
    }

    /// Use an interrupt table wired up by the platform.
    pub fn with_intr(config: Config, drivers: DriverTable, intr: Arc<IntrTable>) -> Autoconf {
        Autoconf {
            config,
            drivers,
            nodes: Vec::new(),
            roots: Vec::new(),
            units: BTreeMap::new(),
            intr,
            hotplug: HotplugQueue::new(),
            critical: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn intr(&self) -> &Arc<IntrTable> {
        &self.intr
    }

    pub fn drivers(&self) -> &DriverTable {
        &self.drivers
    }

    /// Add a candidate driver, tried after every driver registered before it.
    pub fn register_driver<T: Driver + 'static>(&mut self, driver: T) -> DriverId {
        self.drivers.register(driver)
    }

    /// Add a bus root. Roots have no driver and count as attached at once.
    pub fn add_root(&mut self, name: &'static str, args: AttachArgs) -> DeviceId {
        let id = self.push_node(None, args);
        let unit = self.alloc_unit(name);
        let node = &mut self.nodes[id.0];
        node.name = name;
        node.unit = Some(unit);
        node.xname = format!("{}{}", name, unit);
        for state in [
            DeviceState::Matched,
            DeviceState::Attaching,
            DeviceState::Attached,
        ] {
            self.set_state(id, state);
        }
        self.roots.push(id);
        info!("{} (root)", self.nodes[id.0].xname);
        id
    }

    /// Match and attach every slot enumerated behind `parent`.
    ///
    /// Fail with [Error::CriticalDeviceMissing] if a critical slot, here or behind a bridge
    /// attached on the way, ended up without a device. All slots are still processed.
    pub fn probe_bus(&mut self, parent: DeviceId, slots: Vec<AttachArgs>) -> Result<Vec<SlotOutcome>> {
        let outcomes = self.probe_slots(parent, slots);
        match self.critical.take() {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }

    fn probe_slots(&mut self, parent: DeviceId, slots: Vec<AttachArgs>) -> Vec<SlotOutcome> {
        self.check_parent(parent, "probing children of");
        slots
            .into_iter()
            .map(|args| self.config_slot(parent, args))
            .collect()
    }

    fn config_slot(&mut self, parent: DeviceId, args: AttachArgs) -> SlotOutcome {
        let critical = args.critical;
        let id = self.push_node(Some(parent), args);
        let Some((driver_id, driver)) = self.best_match(id) else {
            let node = &self.nodes[id.0];
            let what = node.args.as_ref().map(|a| a.describe()).unwrap_or_default();
            info!("{} at {} not configured", what, self.xname_of(parent));
            self.set_state(id, DeviceState::Rejected);
            self.retire(id);
            if let Some(role) = critical {
                self.critical_missing(role, &what);
            }
            return SlotOutcome::Unconfigured;
        };
        let name = driver.name();
        self.bind(id, driver_id, driver);
        match self.attach_node(id) {
            Ok(()) => SlotOutcome::Attached(id),
            Err(error) => {
                if let Some(role) = critical {
                    self.critical_missing(role, name);
                }
                SlotOutcome::Failed {
                    driver: name,
                    error,
                }
            }
        }
    }

    /// Highest positive score wins; on a tie the earliest registered driver does.
    fn best_match(&self, id: DeviceId) -> Option<(DriverId, Arc<dyn Driver>)> {
        let node = &self.nodes[id.0];
        let parent = &self.nodes[node.parent?.0];
        let args = node.args.as_ref()?;
        let mut best: Option<(u32, DriverId, Arc<dyn Driver>)> = None;
        for (driver_id, driver) in self.drivers.candidates(args.bus_class) {
            let score = driver.probe(parent, args);
            debug_ex!(
                "{} at {}: '{}' scores {}.",
                args.describe(),
                parent.xname,
                driver.name(),
                score
            );
            if score > 0 && best.as_ref().is_none_or(|(top, _, _)| score > *top) {
                best = Some((score, driver_id, driver));
            }
        }
        best.map(|(_, driver_id, driver)| (driver_id, driver))
    }

    /// Attach `args` behind `parent` with a given driver, without matching.
    pub fn attach(
        &mut self,
        parent: DeviceId,
        driver_id: DriverId,
        args: AttachArgs,
    ) -> Result<DeviceId> {
        self.check_parent(parent, "attaching a child of");
        let driver = self
            .drivers
            .get(driver_id)
            .unwrap_or_else(|| panic_dev!("attach with unregistered driver {:?}", driver_id));
        let critical = args.critical;
        let name = driver.name();
        let id = self.push_node(Some(parent), args);
        self.bind(id, driver_id, driver);
        let attached = self.attach_node(id);
        if let (Err(_), Some(role)) = (&attached, critical) {
            self.critical_missing(role, name);
        }
        if let Some(err) = self.critical.take() {
            return Err(err);
        }
        attached.map(|()| id)
    }

    fn bind(&mut self, id: DeviceId, driver_id: DriverId, driver: Arc<dyn Driver>) {
        let name = driver.name();
        let unit = self.alloc_unit(name);
        let node = &mut self.nodes[id.0];
        node.name = name;
        node.unit = Some(unit);
        node.xname = format!("{}{}", name, unit);
        node.driver = Some((driver_id, driver));
        self.set_state(id, DeviceState::Matched);
    }

    fn attach_node(&mut self, id: DeviceId) -> Result<()> {
        let Some(parent) = self.nodes[id.0].parent else {
            panic_dev!("attaching root {} through a driver", self.nodes[id.0].xname);
        };
        self.check_parent(parent, "attaching a child of");
        self.set_state(id, DeviceState::Attaching);

        let node = &mut self.nodes[id.0];
        let Some((_, driver)) = node.driver.clone() else {
            panic_dev!("attaching unbound node {}", node.xname);
        };
        let Some(args) = node.args.take() else {
            panic_dev!("attaching {} without arguments", node.xname);
        };
        let xname = node.xname.clone();
        let parent_xname = String::from(self.xname_of(parent));
        let mut ctx = AttachContext::new(
            id,
            xname.clone(),
            parent_xname.clone(),
            self.intr.clone(),
            self.config.attach_spin_limit,
        );
        let result = driver.attach(&mut ctx, &args);
        self.nodes[id.0].args = Some(args);
        let (resources, found) = ctx.into_parts();

        match result {
            Ok(softc) => {
                let node = &mut self.nodes[id.0];
                node.softc = Some(softc);
                node.resources = resources;
                self.set_state(id, DeviceState::Attached);
                info!("{} at {}", xname, parent_xname);
                if !found.is_empty() {
                    self.probe_slots(id, found);
                }
                Ok(())
            }
            Err(err) => {
                release(&self.intr, resources);
                warn!("{} at {}: attach failed: {}", xname, parent_xname, err);
                self.set_state(id, DeviceState::Detached);
                self.retire(id);
                Err(err)
            }
        }
    }

    /// Detach `id` and everything below it, children last-attached first.
    ///
    /// A driver refusing to detach stops the walk: the refusing device and its ancestors stay
    /// attached, siblings already detached stay detached. With [DetachFlags::FORCE] a refusal
    /// is fatal instead.
    pub fn detach(&mut self, id: DeviceId, flags: DetachFlags) -> Result<()> {
        let node = self.node_or_die(id);
        if node.state != DeviceState::Attached {
            panic_dev!("detaching {} in state {:?}", node.xname, node.state);
        }
        let children = node.children.clone();
        self.set_state(id, DeviceState::Detaching);
        for child in children.into_iter().rev() {
            if let Err(err) = self.detach(child, flags) {
                self.set_state(id, DeviceState::Attached);
                return Err(err);
            }
        }

        let node = &mut self.nodes[id.0];
        let xname = node.xname.clone();
        if let Some((_, driver)) = node.driver.clone() {
            let Some(mut softc) = node.softc.take() else {
                panic_dev!("{} attached without driver state", xname);
            };
            let mut ctx = DetachContext::new(id, xname.clone(), self.intr.clone());
            if let Err(err) = driver.detach(&mut ctx, &mut softc, flags) {
                if flags.contains(DetachFlags::FORCE) {
                    panic_dev!("{}: forced detach refused: {}", xname, err);
                }
                warn!("{}: detach refused: {}", xname, err);
                self.nodes[id.0].softc = Some(softc);
                self.set_state(id, DeviceState::Attached);
                return Err(err);
            }
        }

        let resources = mem::take(&mut self.nodes[id.0].resources);
        release(&self.intr, resources);
        self.set_state(id, DeviceState::Detached);
        self.retire(id);
        if !flags.contains(DetachFlags::QUIET) {
            info!("{} detached", xname);
        }
        Ok(())
    }

    /// Detach every root, last-added first.
    pub fn shutdown(&mut self, flags: DetachFlags) -> Result<()> {
        for root in self.roots.clone().into_iter().rev() {
            self.detach(root, flags)?;
        }
        Ok(())
    }

    /// Producer side of the hot-plug queue.
    pub fn hotplug(&self) -> HotplugQueue {
        self.hotplug.clone()
    }

    /// Process queued hot-plug events in arrival order.
    pub fn run_hotplug(&mut self) -> Vec<HotplugOutcome> {
        let mut outcomes = Vec::new();
        while let Some(event) = self.hotplug.pop() {
            let outcome = match event {
                HotplugEvent::Attach { parent, args } => {
                    if self.state(parent) != Some(DeviceState::Attached) {
                        HotplugOutcome::Stale
                    } else {
                        let mut probed = self.probe_slots(parent, Vec::from([args]));
                        // Only boot depends on critical slots.
                        self.critical = None;
                        HotplugOutcome::Probed(probed.pop().unwrap_or(SlotOutcome::Unconfigured))
                    }
                }
                HotplugEvent::Detach { device, flags } => {
                    if self.state(device) != Some(DeviceState::Attached) {
                        HotplugOutcome::Stale
                    } else {
                        HotplugOutcome::Detached(self.detach(device, flags))
                    }
                }
            };
            debug_ex!("Hot-plug event processed: {:?}.", outcome);
            outcomes.push(outcome);
        }
        outcomes
    }

    // region: Lookup

    pub fn node(&self, id: DeviceId) -> Option<&DeviceNode> {
        self.nodes.get(id.0)
    }

    /// Live device named `xname`.
    pub fn find(&self, xname: &str) -> Option<DeviceId> {
        self.nodes
            .iter()
            .find(|node| !node.state.is_terminal() && node.xname == xname)
            .map(|node| node.id)
    }

    pub fn roots(&self) -> &[DeviceId] {
        &self.roots
    }

    pub fn children(&self, id: DeviceId) -> &[DeviceId] {
        self.node(id).map_or(&[], |node| node.children())
    }

    pub fn parent(&self, id: DeviceId) -> Option<DeviceId> {
        self.node(id)?.parent
    }

    pub fn state(&self, id: DeviceId) -> Option<DeviceState> {
        self.node(id).map(|node| node.state)
    }

    pub fn xname(&self, id: DeviceId) -> Option<&str> {
        self.node(id).map(|node| node.xname())
    }

    /// Driver state of `id`, if it is attached with a softc of type `T`.
    pub fn softc<T: Any>(&self, id: DeviceId) -> Option<&T> {
        let softc = self.node(id)?.softc.as_ref()?;
        let softc: &(dyn Any + Send + Sync) = &**softc;
        softc.downcast_ref::<T>()
    }

    pub fn softc_mut<T: Any>(&mut self, id: DeviceId) -> Option<&mut T> {
        let softc = self.nodes.get_mut(id.0)?.softc.as_mut()?;
        let softc: &mut (dyn Any + Send + Sync) = &mut **softc;
        softc.downcast_mut::<T>()
    }

    /// Every live device, depth first in slot order, as `"child at parent"` or `"root"`.
    pub fn tree_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        for root in &self.roots {
            self.walk(*root, 0, &mut |node, _| {
                out.push(match node.parent {
                    Some(parent) => format!("{} at {}", node.xname, self.xname_of(parent)),
                    None => node.xname.clone(),
                })
            });
        }
        out
    }

    /// Log the device tree.
    pub fn dump(&self) {
        info!("Device tree:");
        for root in &self.roots {
            self.walk(*root, 0, &mut |node, depth| {
                info!("{:indent$}{} {:?}", "", node.xname, node.state, indent = 2 * depth + 2)
            });
        }
    }

    fn walk(&self, id: DeviceId, depth: usize, visit: &mut dyn FnMut(&DeviceNode, usize)) {
        let node = &self.nodes[id.0];
        visit(node, depth);
        for child in &node.children {
            self.walk(*child, depth + 1, visit);
        }
    }

    // endregion

    fn push_node(&mut self, parent: Option<DeviceId>, args: AttachArgs) -> DeviceId {
        let id = DeviceId(self.nodes.len());
        self.nodes.push(DeviceNode {
            id,
            name: "",
            unit: None,
            xname: String::new(),
            parent,
            children: Vec::new(),
            driver: None,
            softc: None,
            args: Some(args),
            resources: Vec::new(),
            state: DeviceState::Unprobed,
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    /// Take a node that reached a terminal state out of the tree.
    fn retire(&mut self, id: DeviceId) {
        let node = &mut self.nodes[id.0];
        let (name, unit, parent) = (node.name, node.unit, node.parent);
        node.softc = None;
        node.args = None;
        node.driver = None;
        if let Some(unit) = unit {
            self.free_unit(name, unit);
        }
        match parent {
            Some(parent) => self.nodes[parent.0].children.retain(|child| *child != id),
            None => self.roots.retain(|root| *root != id),
        }
    }

    fn set_state(&mut self, id: DeviceId, next: DeviceState) {
        let node = &mut self.nodes[id.0];
        if !node.state.can_become(next) {
            panic_dev!("{}: {:?} -> {:?}", node.xname, node.state, next);
        }
        node.state = next;
    }

    fn check_parent(&self, parent: DeviceId, what: &str) {
        let node = self.node_or_die(parent);
        if node.state != DeviceState::Attached {
            panic_dev!("{} {} in state {:?}", what, node.xname, node.state);
        }
    }

    fn node_or_die(&self, id: DeviceId) -> &DeviceNode {
        self.nodes
            .get(id.0)
            .unwrap_or_else(|| panic_dev!("unknown device {:?}", id))
    }

    fn xname_of(&self, id: DeviceId) -> &str {
        &self.nodes[id.0].xname
    }

    fn alloc_unit(&mut self, name: &'static str) -> usize {
        let used = self.units.entry(name).or_default();
        let unit = (0..).find(|unit| !used.contains(unit)).unwrap_or_default();
        used.insert(unit);
        unit
    }

    fn free_unit(&mut self, name: &'static str, unit: usize) {
        if let Some(used) = self.units.get_mut(name) {
            used.remove(&unit);
        }
    }

    fn critical_missing(&mut self, role: CriticalRole, what: &str) {
        error!("{:?} device {} could not be configured", role, what);
        if self.critical.is_none() {
            self.critical = Some(Error::CriticalDeviceMissing { role });
        }
    }
}
