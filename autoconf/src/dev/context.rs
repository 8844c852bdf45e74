//! What a driver may do while attaching and detaching.

use super::{AttachArgs, DeviceId, device::Resource};
use crate::{
    Error, Result,
    bus_space::{BusSpaceHandle, BusSpaceTag, MapFlags},
    dev::RegSpec,
    intr::{Claim, IntrSpec, IntrTable, IntrToken, Ipl, SoftintToken},
};
use alloc::{string::String, sync::Arc, vec::Vec};
use core::{hint::spin_loop, ops::Range};

/// Handed to [super::Driver::attach].
///
/// Mappings and interrupt handlers acquired here are owned by the device: they are released in
/// reverse order if attach fails and after a successful detach. Do not unmap or disestablish
/// them yourself.
pub struct AttachContext {
    id: DeviceId,
    xname: String,
    parent_xname: String,
    intr: Arc<IntrTable>,
    spin_limit: usize,
    resources: Vec<Resource>,
    found: Vec<AttachArgs>,
}

impl AttachContext {
    pub(super) fn new(
        id: DeviceId,
        xname: String,
        parent_xname: String,
        intr: Arc<IntrTable>,
        spin_limit: usize,
    ) -> AttachContext {
        AttachContext {
            id,
            xname,
            parent_xname,
            intr,
            spin_limit,
            resources: Vec::new(),
            found: Vec::new(),
        }
    }

    pub(super) fn into_parts(self) -> (Vec<Resource>, Vec<AttachArgs>) {
        (self.resources, self.found)
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn xname(&self) -> &str {
        &self.xname
    }

    pub fn parent_xname(&self) -> &str {
        &self.parent_xname
    }

    /// The interrupt table, cloneable into handler arguments that schedule soft interrupts.
    pub fn intr(&self) -> &Arc<IntrTable> {
        &self.intr
    }

    pub fn map(&mut self, reg: &RegSpec, flags: MapFlags) -> Result<BusSpaceHandle> {
        let handle = reg.tag.map(reg.base, reg.size, flags)?;
        self.resources.push(Resource::Mapping(handle.clone()));
        Ok(handle)
    }

    /// Map register window `index` of `args`, failing with [Error::OutOfRange] if the bus
    /// reported fewer.
    pub fn map_reg(
        &mut self,
        args: &AttachArgs,
        index: usize,
        flags: MapFlags,
    ) -> Result<BusSpaceHandle> {
        let reg = args.regs.get(index).ok_or(Error::OutOfRange)?;
        self.map(reg, flags)
    }

    pub fn alloc(
        &mut self,
        tag: &BusSpaceTag,
        region: Range<u64>,
        size: u64,
        alignment: u64,
        boundary: u64,
        flags: MapFlags,
    ) -> Result<(u64, BusSpaceHandle)> {
        let (addr, handle) = tag.alloc(region, size, alignment, boundary, flags)?;
        self.resources.push(Resource::Mapping(handle.clone()));
        Ok((addr, handle))
    }

    pub fn establish<T, F>(
        &mut self,
        spec: IntrSpec,
        ipl: Ipl,
        handler: F,
        arg: Arc<T>,
    ) -> Result<IntrToken>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> Claim + Send + Sync + 'static,
    {
        let token = self
            .intr
            .establish(spec, ipl, &self.xname, handler, arg)?;
        self.resources.push(Resource::Intr(token));
        Ok(token)
    }

    pub fn softint_establish<T, F>(&mut self, ipl: Ipl, handler: F, arg: Arc<T>) -> SoftintToken
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let token = self.intr.softint_establish(ipl, &self.xname, handler, arg);
        self.resources.push(Resource::Softint(token));
        token
    }

    /// Report a child found behind this device. It is probed once this attach has succeeded.
    pub fn config_found(&mut self, args: AttachArgs) {
        self.found.push(args);
    }

    /// Poll `ready` until it holds, giving up with [Error::HardwareRejected] after the
    /// configured number of attempts.
    pub fn spin_wait(&self, mut ready: impl FnMut() -> bool) -> Result<()> {
        for _ in 0..self.spin_limit {
            if ready() {
                return Ok(());
            }
            spin_loop();
        }
        Err(Error::HardwareRejected)
    }
}

/// Handed to [super::Driver::detach].
pub struct DetachContext {
    id: DeviceId,
    xname: String,
    intr: Arc<IntrTable>,
}

impl DetachContext {
    pub(super) fn new(id: DeviceId, xname: String, intr: Arc<IntrTable>) -> DetachContext {
        DetachContext { id, xname, intr }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn xname(&self) -> &str {
        &self.xname
    }

    pub fn intr(&self) -> &IntrTable {
        &self.intr
    }
}

/// Release `resources` last-acquired first.
pub(super) fn release(intr: &IntrTable, resources: Vec<Resource>) {
    for resource in resources.into_iter().rev() {
        match resource {
            Resource::Intr(token) => intr.disestablish(token),
            Resource::Softint(token) => intr.softint_disestablish(token),
            Resource::Mapping(handle) => handle.tag().unmap(&handle),
        }
    }
}
