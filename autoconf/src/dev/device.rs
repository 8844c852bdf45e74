//! Device nodes and their life cycle.

use super::{AttachArgs, Driver, DriverId, Softc};
use crate::{
    bus_space::BusSpaceHandle,
    intr::{IntrToken, SoftintToken},
};
use alloc::{string::String, sync::Arc, vec::Vec};
use core::fmt::Debug;

/// Stable index of a node in the device tree. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub(super) usize);

/// Life cycle of a node.
///
/// ```text
/// Unprobed -> Rejected
///          -> Matched -> Attaching -> Attached -> Detaching -> Detached
///                                  -> Detached (attach failed)
///                                                Detaching -> Attached (detach refused)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unprobed,
    Rejected,
    Matched,
    Attaching,
    Attached,
    Detaching,
    Detached,
}

impl DeviceState {
    pub fn can_become(self, next: DeviceState) -> bool {
        use DeviceState::*;
        matches!(
            (self, next),
            (Unprobed, Rejected)
                | (Unprobed, Matched)
                | (Matched, Attaching)
                | (Attaching, Attached)
                | (Attaching, Detached)
                | (Attached, Detaching)
                | (Detaching, Detached)
                | (Detaching, Attached)
        )
    }

    /// Rejected and detached nodes are gone from the tree.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeviceState::Rejected | DeviceState::Detached)
    }
}

/// A resource acquired through [super::AttachContext], released in reverse order.
pub(super) enum Resource {
    Mapping(BusSpaceHandle),
    Intr(IntrToken),
    Softint(SoftintToken),
}

pub struct DeviceNode {
    pub(super) id: DeviceId,
    pub(super) name: &'static str,
    pub(super) unit: Option<usize>,
    pub(super) xname: String,
    pub(super) parent: Option<DeviceId>,
    pub(super) children: Vec<DeviceId>,
    pub(super) driver: Option<(DriverId, Arc<dyn Driver>)>,
    pub(super) softc: Option<Softc>,
    pub(super) args: Option<AttachArgs>,
    pub(super) resources: Vec<Resource>,
    pub(super) state: DeviceState,
}

impl DeviceNode {
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Driver or bus name without unit, e.g. `com`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn unit(&self) -> Option<usize> {
        self.unit
    }

    /// Name plus unit, e.g. `com0`.
    pub fn xname(&self) -> &str {
        &self.xname
    }

    pub fn parent(&self) -> Option<DeviceId> {
        self.parent
    }

    pub fn children(&self) -> &[DeviceId] {
        &self.children
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// The arguments the node was matched with; [None] once it left the tree.
    pub fn args(&self) -> Option<&AttachArgs> {
        self.args.as_ref()
    }

    pub fn driver(&self) -> Option<DriverId> {
        self.driver.as_ref().map(|(id, _)| *id)
    }
}

impl Debug for DeviceNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceNode")
            .field("id", &self.id)
            .field("xname", &self.xname)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("state", &self.state)
            .finish()
    }
}
