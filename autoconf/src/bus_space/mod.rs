//! Bus-space access layer.
//!
//! A [BusSpaceTag] describes one address-space variant of the machine: its byte order, the
//! window of valid bus addresses, the register stride and which mapping attributes the hardware
//! can honour. Mapping a range through a tag reserves it in the tag's [Extent] and yields a
//! [BusSpaceHandle], the only way drivers touch device registers.
//!
//! Ownership:
//! - Tags are cheap to clone and shared by every mapping made through them.
//! - The tag owns each live mapping. Handles observe it weakly, so after [BusSpaceTag::unmap]
//!   every handle and sub-region of that mapping is dead and any access through it is fatal.
//! - Handles carry no lock; concurrent register access through one handle is the driver's
//!   business. Map, unmap and alloc contend on the extent lock of the tag.

mod access;
pub mod reg;
pub mod window;

use crate::{
    Error, Result,
    extent::{AllocAt, Extent, ExtentFlags},
    handle::{Handle, HandleRef},
};
use alloc::{collections::btree_map::BTreeMap, sync::Arc};
use bitflags::bitflags;
use core::{
    fmt::Debug,
    ops::Range,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};
use spin::Mutex;
use utils::range::{RangeExt, span};
pub use utils::endian::{BusWord, ByteOrder};
pub use window::{BarrierFlags, BusAccess, MmioWindow, RamWindow};

bitflags! {
    /// Mapping attributes.
    pub struct MapFlags: u32 {
        /// Request a directly dereferenceable mapping.
        const LINEAR       = 0b001;
        /// Allow the CPU to cache the mapping.
        const CACHEABLE    = 0b010;
        /// Allow reads to be merged or issued speculatively.
        const PREFETCHABLE = 0b100;
    }
}

/// Static description of one address-space variant.
#[derive(Debug, Clone)]
pub struct TagSpec {
    pub name: &'static str,
    pub order: ByteOrder,
    /// Valid bus addresses.
    pub window: Range<u64>,
    /// Register offsets are scaled by `1 << stride_shift` bus units.
    pub stride_shift: u32,
    /// Attributes the hardware can honour; requests for others are dropped.
    pub caps: MapFlags,
    /// Descriptor storage of the backing extent.
    pub max_mappings: usize,
}

impl TagSpec {
    pub fn new(name: &'static str, order: ByteOrder, window: Range<u64>) -> TagSpec {
        TagSpec {
            name,
            order,
            window,
            stride_shift: 0,
            caps: MapFlags::empty(),
            max_mappings: ::config::EXTENT_MAX_REGIONS,
        }
    }

    pub fn stride_shift(mut self, shift: u32) -> TagSpec {
        self.stride_shift = shift;
        self
    }

    pub fn caps(mut self, caps: MapFlags) -> TagSpec {
        self.caps = caps;
        self
    }
}

struct TagInner {
    spec: TagSpec,
    extent: Extent,
    access: Arc<dyn BusAccess>,
    maps: Mutex<BTreeMap<usize, Handle<Mapping>>>,
    next_map: AtomicUsize,
}

#[derive(Debug)]
struct Mapping {
    base: u64,
    len: u64,
}

/// How a handle came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// [BusSpaceTag::map] of a fixed range.
    Mapped,
    /// [BusSpaceTag::alloc] of a negotiated range.
    Allocated,
    /// [BusSpaceTag::subregion] of another handle; dies with its parent.
    Subregion,
}

/// Shared, immutable descriptor of one address-space variant.
#[derive(Clone)]
pub struct BusSpaceTag {
    inner: Handle<TagInner>,
}

/// Opaque token for a mapped range.
#[derive(Clone)]
pub struct BusSpaceHandle {
    tag: BusSpaceTag,
    map_id: usize,
    mapping: HandleRef<Mapping>,
    kind: HandleKind,
    base: u64,
    len: u64,
    flags: MapFlags,
}

impl BusSpaceTag {
    /// Build a tag, creating the extent that tracks mappings inside `spec.window`.
    pub fn new(spec: TagSpec, access: Arc<dyn BusAccess>) -> Result<BusSpaceTag> {
        let extent = Extent::create_with_storage(
            spec.name,
            spec.window.start,
            spec.window.end.saturating_sub(spec.window.start),
            spec.max_mappings,
        )?;
        debug_ex!(
            "Bus-space tag '{}' {:?} window {:#x?}.",
            spec.name,
            spec.order,
            spec.window
        );
        Ok(BusSpaceTag {
            inner: Handle::from(TagInner {
                spec,
                extent,
                access,
                maps: Mutex::new(BTreeMap::new()),
                next_map: AtomicUsize::new(0),
            }),
        })
    }

    pub fn name(&self) -> &'static str {
        self.inner.spec.name
    }

    pub fn order(&self) -> ByteOrder {
        self.inner.spec.order
    }

    pub fn window(&self) -> Range<u64> {
        self.inner.spec.window.clone()
    }

    pub fn stride_shift(&self) -> u32 {
        self.inner.spec.stride_shift
    }

    /// The allocator tracking this tag's mappings.
    pub fn extent(&self) -> &Extent {
        &self.inner.extent
    }

    /// Whether two tags are the same descriptor.
    pub fn same(&self, other: &BusSpaceTag) -> bool {
        self.inner.ptr_eq(&other.inner)
    }

    /// Map `[base, base + len)`.
    ///
    /// Fail with [Error::BadAddress] if the range is empty or leaves the tag's window and with
    /// [Error::NoSpace] if it cannot be reserved. Unsupported attributes are dropped so the
    /// mapping is never less strict than what the hardware guarantees.
    pub fn map(&self, base: u64, len: u64, flags: MapFlags) -> Result<BusSpaceHandle> {
        let range = span(base, len)
            .filter(|range| !range.is_empty())
            .ok_or(Error::BadAddress)?;
        if !self.inner.spec.window.covers(&range) {
            return Err(Error::BadAddress);
        }
        self.inner
            .extent
            .alloc(AllocAt::At(base), len, 0, 0, ExtentFlags::empty())
            .map_err(|err| match err {
                Error::RangeInUse => Error::NoSpace,
                other => other,
            })?;
        Ok(self.install(base, len, flags, HandleKind::Mapped))
    }

    /// Allocate `size` units somewhere inside `region` and map them.
    ///
    /// For buses that negotiate addresses instead of decoding fixed ones. Fail with
    /// [Error::BadAddress] if `region` does not intersect the tag's window and with
    /// [Error::NoSpace] if no run fits.
    pub fn alloc(
        &self,
        region: Range<u64>,
        size: u64,
        alignment: u64,
        boundary: u64,
        flags: MapFlags,
    ) -> Result<(u64, BusSpaceHandle)> {
        if !self.inner.spec.window.overlap(&region) {
            return Err(Error::BadAddress);
        }
        let base = self.inner.extent.alloc_in(
            region,
            size,
            alignment,
            boundary,
            ExtentFlags::empty(),
        )?;
        Ok((base, self.install(base, size, flags, HandleKind::Allocated)))
    }

    fn install(&self, base: u64, len: u64, flags: MapFlags, kind: HandleKind) -> BusSpaceHandle {
        let mut flags = flags & self.inner.spec.caps;
        if flags.contains(MapFlags::LINEAR) && self.inner.access.linear(base).is_none() {
            flags.remove(MapFlags::LINEAR);
        }
        let map_id = self.inner.next_map.fetch_add(1, Ordering::Relaxed);
        let mapping = Handle::from(Mapping { base, len });
        let weak = mapping.create_ref();
        self.inner.maps.lock().insert(map_id, mapping);
        debug_ex!(
            "{}: mapped [{:#x},{:#x}) as #{} {:?}.",
            self.name(),
            base,
            base + len,
            map_id,
            flags
        );
        BusSpaceHandle {
            tag: self.clone(),
            map_id,
            mapping: weak,
            kind,
            base,
            len,
            flags,
        }
    }

    /// Release a mapping and return its range to the allocator.
    ///
    /// Unmapping twice, unmapping a sub-region or unmapping through another tag is fatal.
    pub fn unmap(&self, handle: &BusSpaceHandle) {
        if !self.same(&handle.tag) {
            panic_dev!(
                "{}: unmapping a handle of tag '{}'",
                self.name(),
                handle.tag.name()
            );
        }
        if handle.kind == HandleKind::Subregion {
            panic_dev!(
                "{}: unmapping sub-region [{:#x},{:#x}); sub-regions die with their parent",
                self.name(),
                handle.base,
                handle.base + handle.len
            );
        }
        let mapping = self
            .inner
            .maps
            .lock()
            .remove(&handle.map_id)
            .unwrap_or_else(|| {
                panic_dev!(
                    "{}: double unmap of [{:#x},{:#x})",
                    self.name(),
                    handle.base,
                    handle.base + handle.len
                )
            });
        self.inner.extent.free(mapping.base, mapping.len);
        debug_ex!("{}: unmapped #{}.", self.name(), handle.map_id);
    }

    /// Carve `[offset, offset + len)` out of `handle`.
    ///
    /// `offset` is a register offset and is scaled by the stride, `len` is in bus units. Fail
    /// with [Error::OutOfRange] if the piece does not fit inside `handle`.
    pub fn subregion(&self, handle: &BusSpaceHandle, offset: u64, len: u64) -> Result<BusSpaceHandle> {
        handle.check_alive();
        let start = offset
            .checked_shl(self.stride_shift())
            .filter(|start| *start >> self.stride_shift() == offset)
            .ok_or(Error::OutOfRange)?;
        let end = start.checked_add(len).ok_or(Error::OutOfRange)?;
        if end > handle.len {
            return Err(Error::OutOfRange);
        }
        Ok(BusSpaceHandle {
            tag: handle.tag.clone(),
            map_id: handle.map_id,
            mapping: handle.mapping.clone(),
            kind: HandleKind::Subregion,
            base: handle.base + start,
            len,
            flags: handle.flags,
        })
    }

    /// Number of live mappings.
    pub fn mappings(&self) -> usize {
        self.inner.maps.lock().len()
    }
}

impl Debug for BusSpaceTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusSpaceTag")
            .field("name", &self.name())
            .field("order", &self.order())
            .field("window", &self.window())
            .finish()
    }
}

impl BusSpaceHandle {
    pub fn tag(&self) -> &BusSpaceTag {
        &self.tag
    }

    /// Bus address of offset zero.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Length in bus units.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Attributes actually granted, after degradation.
    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    /// Whether the mapping behind this handle still exists.
    pub fn is_valid(&self) -> bool {
        !self.mapping.is_dead()
    }

    /// CPU pointer to offset zero of a [MapFlags::LINEAR] mapping.
    pub fn vaddr(&self) -> Option<NonNull<u8>> {
        self.check_alive();
        if !self.flags.contains(MapFlags::LINEAR) {
            return None;
        }
        self.tag.inner.access.linear(self.base)
    }

    fn check_alive(&self) {
        if self.mapping.is_dead() {
            panic_dev!(
                "{}: access through unmapped handle [{:#x},{:#x})",
                self.tag.name(),
                self.base,
                self.base + self.len
            );
        }
    }

    /// Bus address of register `offset` for an access of `width` bytes.
    fn bus_addr(&self, offset: u64, width: u64) -> u64 {
        self.check_alive();
        let start = offset
            .checked_shl(self.tag.stride_shift())
            .filter(|start| *start >> self.tag.stride_shift() == offset);
        match start.and_then(|start| Some((start, start.checked_add(width)?))) {
            Some((start, end)) if end <= self.len => self.base + start,
            _ => panic_dev!(
                "{}: access of {} byte(s) at offset {:#x} beyond handle of length {:#x}",
                self.tag.name(),
                width,
                offset,
                self.len
            ),
        }
    }

    /// Bus address of a `width`-byte register access, which must be naturally aligned.
    fn word_addr(&self, offset: u64, width: u64) -> u64 {
        let addr = self.bus_addr(offset, width);
        if addr % width != 0 {
            panic_dev!(
                "{}: misaligned {}-byte access at offset {:#x} (bus address {:#x})",
                self.tag.name(),
                width,
                offset,
                addr
            );
        }
        addr
    }

    fn access(&self) -> &dyn BusAccess {
        &*self.tag.inner.access
    }
}

impl Debug for BusSpaceHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!(
            "{}#{}[{:#x},{:#x}){:?}",
            self.tag.name(),
            self.map_id,
            self.base,
            self.base + self.len,
            self.kind
        ))
    }
}

/// Convenience to build a RAM-backed tag, as emulated buses and tests use.
pub fn ram_tag(spec: TagSpec) -> Result<(BusSpaceTag, Arc<RamWindow>)> {
    let len = spec.window.end.saturating_sub(spec.window.start);
    let ram = Arc::new(RamWindow::new(spec.window.start, len as usize));
    let tag = BusSpaceTag::new(spec, ram.clone())?;
    Ok((tag, ram))
}
