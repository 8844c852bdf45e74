//! Access backends behind a bus-space tag.
//!
//! A backend moves raw bytes between a bus address and the CPU, one access per call, without
//! interpreting them. Byte order is the tag's business, not the backend's.
//!
//! - [RamWindow]: bus memory backed by ordinary RAM, for emulated buses and host testing.
//! - [MmioWindow]: a bus window the CPU reaches at a fixed virtual offset.

use super::reg::Register;
use alloc::{boxed::Box, vec::Vec};
use bitflags::bitflags;
use core::{
    ops::Range,
    ptr::NonNull,
    sync::atomic::{AtomicU8, Ordering, fence},
};

bitflags! {
    /// Ordering requested by [BusAccess::barrier].
    pub struct BarrierFlags: u32 {
        /// Complete earlier reads before later accesses.
        const READ  = 0b01;
        /// Complete earlier writes before later accesses.
        const WRITE = 0b10;
    }
}

/// Raw access to one bus address window.
///
/// `bytes.len()` is always 1, 2, 4 or 8 and the access must be performed as a single bus cycle
/// of that width. `bytes` holds the memory image, lowest address first.
pub trait BusAccess: Send + Sync {
    fn load(&self, addr: u64, bytes: &mut [u8]);
    fn store(&self, addr: u64, bytes: &[u8]);

    /// A directly dereferenceable pointer to `addr`, if this window supports linear mappings.
    fn linear(&self, _addr: u64) -> Option<NonNull<u8>> {
        None
    }

    fn barrier(&self, flags: BarrierFlags) {
        if !flags.is_empty() {
            fence(Ordering::SeqCst);
        }
    }
}

/// Bus memory backed by RAM.
pub struct RamWindow {
    base: u64,
    cells: Box<[AtomicU8]>,
}

impl RamWindow {
    /// Zero-filled memory answering bus addresses `[base, base + len)`.
    pub fn new(base: u64, len: usize) -> RamWindow {
        let cells: Vec<AtomicU8> = (0..len).map(|_| AtomicU8::new(0)).collect();
        RamWindow {
            base,
            cells: cells.into_boxed_slice(),
        }
    }

    pub fn range(&self) -> Range<u64> {
        self.base..self.base + self.cells.len() as u64
    }

    fn cells(&self, addr: u64, len: usize) -> &[AtomicU8] {
        let start = addr
            .checked_sub(self.base)
            .map(|off| off as usize)
            .filter(|off| off.saturating_add(len) <= self.cells.len())
            .unwrap_or_else(|| {
                panic_dev!(
                    "RAM window {:#x?}: access of {} byte(s) at {:#x}",
                    self.range(),
                    len,
                    addr
                )
            });
        &self.cells[start..start + len]
    }
}

impl BusAccess for RamWindow {
    fn load(&self, addr: u64, bytes: &mut [u8]) {
        let len = bytes.len();
        for (byte, cell) in bytes.iter_mut().zip(self.cells(addr, len)) {
            *byte = cell.load(Ordering::Relaxed);
        }
    }

    fn store(&self, addr: u64, bytes: &[u8]) {
        for (byte, cell) in bytes.iter().zip(self.cells(addr, bytes.len())) {
            cell.store(*byte, Ordering::Relaxed);
        }
    }

    fn linear(&self, addr: u64) -> Option<NonNull<u8>> {
        let cell = self.cells(addr, 1).first()?;
        NonNull::new(cell.as_ptr())
    }
}

/// A bus window mapped into the CPU address space at a fixed offset.
pub struct MmioWindow {
    bus: Range<u64>,
    cpu_base: usize,
}

impl MmioWindow {
    /// Window translating bus addresses `bus` to CPU addresses starting at `cpu_base`.
    ///
    /// # Safety
    /// `[cpu_base, cpu_base + bus.len())` must stay mapped as device memory for the lifetime of
    /// the window and every aligned access inside it must be valid. Misaligned accesses are
    /// fatal before they reach the bus.
    pub unsafe fn new(bus: Range<u64>, cpu_base: usize) -> MmioWindow {
        MmioWindow { bus, cpu_base }
    }

    fn cpu_addr(&self, addr: u64, len: usize) -> usize {
        let end = addr.saturating_add(len as u64);
        if addr < self.bus.start || end > self.bus.end {
            panic_dev!(
                "MMIO window {:#x?}: access of {} byte(s) at {:#x}",
                self.bus,
                len,
                addr
            );
        }
        let cpu = self.cpu_base + (addr - self.bus.start) as usize;
        if len > 1 && cpu % len != 0 {
            panic_dev!(
                "MMIO window {:#x?}: misaligned {}-byte access at {:#x}",
                self.bus,
                len,
                cpu
            );
        }
        cpu
    }
}

impl BusAccess for MmioWindow {
    fn load(&self, addr: u64, bytes: &mut [u8]) {
        let cpu = self.cpu_addr(addr, bytes.len());
        unsafe {
            match bytes.len() {
                1 => bytes[0] = Register::<u8>::at(cpu).read(),
                2 => bytes.copy_from_slice(&Register::<u16>::at(cpu).read().to_ne_bytes()),
                4 => bytes.copy_from_slice(&Register::<u32>::at(cpu).read().to_ne_bytes()),
                8 => bytes.copy_from_slice(&Register::<u64>::at(cpu).read().to_ne_bytes()),
                width => panic_dev!("MMIO load of unsupported width {}", width),
            }
        }
    }

    fn store(&self, addr: u64, bytes: &[u8]) {
        let cpu = self.cpu_addr(addr, bytes.len());
        unsafe {
            match bytes.len() {
                1 => Register::<u8>::at(cpu).write(bytes[0]),
                2 => Register::<u16>::at(cpu).write(u16::from_ne_bytes([bytes[0], bytes[1]])),
                4 => {
                    let mut raw = [0u8; 4];
                    raw.copy_from_slice(bytes);
                    Register::<u32>::at(cpu).write(u32::from_ne_bytes(raw))
                }
                8 => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(bytes);
                    Register::<u64>::at(cpu).write(u64::from_ne_bytes(raw))
                }
                width => panic_dev!("MMIO store of unsupported width {}", width),
            }
        }
    }

    fn linear(&self, addr: u64) -> Option<NonNull<u8>> {
        NonNull::new(self.cpu_addr(addr, 1) as *mut u8)
    }
}
