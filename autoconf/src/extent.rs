//! Extent allocator: bookkeeping of used sub-ranges of one linear address space.
//!
//! An [Extent] keeps its allocated regions in address order; the gaps between them are the free
//! runs. Freeing a region therefore coalesces the surrounding free runs without extra work.
//! Allocation is first-fit: the candidate start is rounded up for alignment and moved to the
//! next boundary line when the run would straddle one. Allocation only happens at boot and
//! hot-plug, so nothing smarter is needed.
//!
//! Every extent is guarded by its own lock; callers never see it.

use crate::{Error, Result};
use alloc::{boxed::Box, vec::Vec};
use bitflags::bitflags;
use core::{fmt::Debug, ops::Range};
use spin::Mutex;
use utils::range::{RangeExt, align_up, span};

bitflags! {
    /// Allocation flags.
    pub struct ExtentFlags: u32 {
        /// Measure boundary lines from the start of the extent instead of from address zero.
        const BOUND_RELATIVE = 0b0001;
    }
}

/// Where an allocation has to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocAt {
    /// First fit anywhere in the extent.
    Any,
    /// Exactly at this address.
    At(u64),
}

/// An allocated run of an extent.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub size: u64,
}

impl Region {
    /// `[start, start + size)`. Regions never wrap: they always lie inside their extent.
    pub fn range(&self) -> Range<u64> {
        self.start..self.start + self.size
    }
}

impl Debug for Region {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("[{:#x},{:#x})", self.start, self.start + self.size))
    }
}

struct ExtentInner {
    /// Allocated regions, sorted by start address.
    regions: Vec<Region>,
    /// Cap on the number of region descriptors, if storage was fixed at creation.
    max_regions: Option<usize>,
}

pub struct Extent {
    name: Box<str>,
    span: Range<u64>,
    inner: Mutex<ExtentInner>,
}

impl Extent {
    /// Create an extent covering `[start, start + length)` with storage growing on demand.
    pub fn create(name: &str, start: u64, length: u64) -> Result<Extent> {
        Self::build(name, start, length, None)
    }

    /// Create an extent whose descriptor storage is fixed to `max_regions` allocations.
    ///
    /// Fail with [Error::OutOfMemory] if the storage cannot be reserved up front or if it would
    /// not hold a single region.
    pub fn create_with_storage(
        name: &str,
        start: u64,
        length: u64,
        max_regions: usize,
    ) -> Result<Extent> {
        if max_regions == 0 {
            return Err(Error::OutOfMemory);
        }
        Self::build(name, start, length, Some(max_regions))
    }

    fn build(name: &str, start: u64, length: u64, max_regions: Option<usize>) -> Result<Extent> {
        let span = span(start, length).ok_or(Error::BadAddress)?;
        let mut regions = Vec::new();
        if let Some(max) = max_regions {
            regions
                .try_reserve_exact(max)
                .map_err(|_| Error::OutOfMemory)?;
        }
        debug_ex!("Created extent '{}' [{:#x},{:#x}).", name, span.start, span.end);
        Ok(Extent {
            name: Box::from(name),
            span,
            inner: Mutex::new(ExtentInner {
                regions,
                max_regions,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The whole address range managed by this extent.
    pub fn span(&self) -> Range<u64> {
        self.span.clone()
    }

    /// Allocate `size` units at `at`.
    ///
    /// `alignment` must be zero or a power of two. With `boundary > 0` the returned run never
    /// straddles a multiple of `boundary`.
    ///
    /// Fail with [Error::NoSpace] when no free run satisfies the constraints (for
    /// [AllocAt::At], when the given start itself violates them), [Error::RangeInUse] when an
    /// explicit start overlaps an allocation, [Error::BadAddress] when an explicit range lies
    /// outside the extent and [Error::OutOfMemory] when descriptor storage is exhausted.
    pub fn alloc(
        &self,
        at: AllocAt,
        size: u64,
        alignment: u64,
        boundary: u64,
        flags: ExtentFlags,
    ) -> Result<u64> {
        match at {
            AllocAt::Any => self.alloc_in(self.span(), size, alignment, boundary, flags),
            AllocAt::At(start) => self.alloc_at(start, size, alignment, boundary, flags),
        }
    }

    /// First-fit allocation restricted to `window`, which is clipped to the extent.
    pub fn alloc_in(
        &self,
        window: Range<u64>,
        size: u64,
        alignment: u64,
        boundary: u64,
        flags: ExtentFlags,
    ) -> Result<u64> {
        self.check_request(size, alignment);
        let window = window.start.max(self.span.start)..window.end.min(self.span.end);
        if window.is_empty() {
            return Err(Error::NoSpace);
        }
        let bound_base = self.bound_base(flags);
        let mut inner = self.inner.lock();
        inner.check_storage()?;

        let mut cursor = window.start;
        let mut index = 0;
        // Walk the free runs: [cursor, next region start) for each region, then the tail.
        loop {
            let next = inner.regions.get(index);
            let run_end = next.map_or(window.end, |r| r.start.min(window.end));
            if run_end > cursor {
                if let Some(start) = place(cursor, run_end, size, alignment, boundary, bound_base) {
                    inner.regions.insert(index, Region { start, size });
                    debug_ex!(
                        "Extent '{}': allocated [{:#x},{:#x}).",
                        self.name,
                        start,
                        start + size
                    );
                    return Ok(start);
                }
            }
            match next {
                Some(region) => {
                    cursor = cursor.max(region.start + region.size);
                    if cursor >= window.end {
                        return Err(Error::NoSpace);
                    }
                    index += 1;
                }
                None => return Err(Error::NoSpace),
            }
        }
    }

    fn alloc_at(
        &self,
        start: u64,
        size: u64,
        alignment: u64,
        boundary: u64,
        flags: ExtentFlags,
    ) -> Result<u64> {
        self.check_request(size, alignment);
        let range = span(start, size).ok_or(Error::BadAddress)?;
        if !self.span.covers(&range) {
            return Err(Error::BadAddress);
        }
        let bound_base = self.bound_base(flags);
        if place(start, range.end, size, alignment, boundary, bound_base) != Some(start) {
            return Err(Error::NoSpace);
        }
        let mut inner = self.inner.lock();
        if inner.regions.iter().any(|r| r.range().overlap(&range)) {
            return Err(Error::RangeInUse);
        }
        inner.check_storage()?;
        let index = inner.regions.partition_point(|r| r.start < start);
        inner.regions.insert(index, Region { start, size });
        debug_ex!(
            "Extent '{}': reserved [{:#x},{:#x}).",
            self.name,
            range.start,
            range.end
        );
        Ok(start)
    }

    /// Return `[start, start + size)` to the free space.
    ///
    /// The range must have been allocated as one unit; anything else is fatal.
    pub fn free(&self, start: u64, size: u64) {
        let mut inner = self.inner.lock();
        let target = Region { start, size };
        match inner.regions.binary_search_by_key(&start, |r| r.start) {
            Ok(index) if inner.regions[index] == target => {
                inner.regions.remove(index);
                debug_ex!("Extent '{}': freed {:?}.", self.name, target);
            }
            _ => panic_dev!(
                "extent '{}': freeing {:?}, which was never allocated as a unit",
                self.name,
                target
            ),
        }
    }

    /// Tear the extent down. Outstanding allocations are fatal.
    pub fn destroy(self) {
        let inner = self.inner.lock();
        if !inner.regions.is_empty() {
            panic_dev!(
                "extent '{}' destroyed with {} outstanding allocation(s): {:?}",
                self.name,
                inner.regions.len(),
                inner.regions
            );
        }
        debug_ex!("Destroyed extent '{}'.", self.name);
    }

    /// Snapshot of the allocated regions in address order.
    pub fn regions(&self) -> Vec<Region> {
        self.inner.lock().regions.clone()
    }

    /// Whether exactly `[start, start + size)` is allocated as one unit.
    pub fn is_allocated(&self, start: u64, size: u64) -> bool {
        self.inner
            .lock()
            .regions
            .contains(&Region { start, size })
    }

    /// Log the allocation map.
    pub fn dump(&self) {
        let inner = self.inner.lock();
        log::info!(
            "extent '{}' [{:#x},{:#x}), {} region(s):",
            self.name,
            self.span.start,
            self.span.end,
            inner.regions.len()
        );
        for region in &inner.regions {
            log::info!("\t{:?}", region);
        }
    }

    fn check_request(&self, size: u64, alignment: u64) {
        if size == 0 {
            panic_dev!("extent '{}': zero-sized allocation", self.name);
        }
        if alignment > 1 && !alignment.is_power_of_two() {
            panic_dev!(
                "extent '{}': alignment {:#x} is not a power of two",
                self.name,
                alignment
            );
        }
    }

    fn bound_base(&self, flags: ExtentFlags) -> u64 {
        if flags.contains(ExtentFlags::BOUND_RELATIVE) {
            self.span.start
        } else {
            0
        }
    }
}

impl Debug for Extent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{}:", self.name))?;
        for region in self.inner.lock().regions.iter() {
            f.write_fmt(format_args!("{:?}", region))?;
        }
        Ok(())
    }
}

impl ExtentInner {
    fn check_storage(&mut self) -> Result<()> {
        match self.max_regions {
            Some(max) if self.regions.len() >= max => Err(Error::OutOfMemory),
            Some(_) => Ok(()),
            None => self
                .regions
                .try_reserve(1)
                .map_err(|_| Error::OutOfMemory),
        }
    }
}

/// Find the lowest start in `[from, limit)` for a run of `size` honouring `alignment` and
/// `boundary` (lines measured from `bound_base`).
///
/// Boundaries need not be powers of two, so the aligned offset from a line differs from line to
/// line and every line up to `limit` has to be tried.
fn place(
    from: u64,
    limit: u64,
    size: u64,
    alignment: u64,
    boundary: u64,
    bound_base: u64,
) -> Option<u64> {
    if boundary != 0 && size > boundary {
        return None;
    }
    let mut start = align_up(from, alignment)?;
    loop {
        let end = start.checked_add(size)?;
        if end > limit {
            return None;
        }
        if boundary == 0 {
            return Some(start);
        }
        let rel = start.checked_sub(bound_base)?;
        if rel / boundary == (rel + size - 1) / boundary {
            return Some(start);
        }
        let line = (rel / boundary).checked_add(1)?.checked_mul(boundary)?;
        start = align_up(bound_base.checked_add(line)?, alignment)?;
    }
}
