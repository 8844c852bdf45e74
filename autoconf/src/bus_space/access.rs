//! Register access through a [BusSpaceHandle].
//!
//! Every access goes through [BusWord] so the tag's byte order is applied exactly once. The
//! width-suffixed forms (`read_4`, `write_region_2`, ...) are thin wrappers over the generic
//! ones and exist because drivers name register widths, not types.
//!
//! - `multi` forms hit the same register `count` times, for FIFOs.
//! - `region` forms walk successive registers.
//! - `set` forms store one value repeatedly.

use super::{BarrierFlags, BusSpaceHandle};
use paste::paste;
use utils::endian::BusWord;

impl BusSpaceHandle {
    pub fn read<W: BusWord>(&self, offset: u64) -> W {
        let addr = self.word_addr(offset, W::WIDTH as u64);
        let mut raw = [0u8; 8];
        self.access().load(addr, &mut raw[..W::WIDTH]);
        W::decode(self.tag.order(), &raw)
    }

    pub fn write<W: BusWord>(&self, offset: u64, value: W) {
        let addr = self.word_addr(offset, W::WIDTH as u64);
        let mut raw = [0u8; 8];
        value.encode(self.tag.order(), &mut raw);
        self.access().store(addr, &raw[..W::WIDTH]);
    }

    /// Read the register at `offset` once per element of `buf`.
    pub fn read_multi<W: BusWord>(&self, offset: u64, buf: &mut [W]) {
        for word in buf.iter_mut() {
            *word = self.read(offset);
        }
    }

    pub fn write_multi<W: BusWord>(&self, offset: u64, buf: &[W]) {
        for word in buf {
            self.write(offset, *word);
        }
    }

    /// Read successive registers starting at `offset` into `buf`.
    pub fn read_region<W: BusWord>(&self, offset: u64, buf: &mut [W]) {
        for (i, word) in buf.iter_mut().enumerate() {
            *word = self.read(Self::step::<W>(offset, i));
        }
    }

    pub fn write_region<W: BusWord>(&self, offset: u64, buf: &[W]) {
        for (i, word) in buf.iter().enumerate() {
            self.write(Self::step::<W>(offset, i), *word);
        }
    }

    /// Store `value` to the register at `offset` `count` times.
    pub fn set_multi<W: BusWord>(&self, offset: u64, value: W, count: usize) {
        for _ in 0..count {
            self.write(offset, value);
        }
    }

    /// Store `value` to `count` successive registers.
    pub fn set_region<W: BusWord>(&self, offset: u64, value: W, count: usize) {
        for i in 0..count {
            self.write(Self::step::<W>(offset, i), value);
        }
    }

    /// Copy `count` successive registers from this handle to `dst`.
    ///
    /// The copy behaves as if through a temporary buffer when both ranges overlap on the same
    /// tag.
    pub fn copy_region<W: BusWord>(
        &self,
        src_offset: u64,
        dst: &BusSpaceHandle,
        dst_offset: u64,
        count: usize,
    ) {
        if count == 0 {
            return;
        }
        // Validate both ends before touching anything.
        let last = Self::step::<W>(0, count - 1);
        let src_start = self.word_addr(src_offset, W::WIDTH as u64);
        self.word_addr(src_offset + last, W::WIDTH as u64);
        let dst_start = dst.word_addr(dst_offset, W::WIDTH as u64);
        dst.word_addr(dst_offset + last, W::WIDTH as u64);

        let copy_one = |i: usize| {
            let word: W = self.read(Self::step::<W>(src_offset, i));
            dst.write(Self::step::<W>(dst_offset, i), word);
        };
        if self.tag.same(&dst.tag) && dst_start > src_start {
            (0..count).rev().for_each(copy_one);
        } else {
            (0..count).for_each(copy_one);
        }
    }

    /// Order accesses to `[offset, offset + len)` issued before this call against those after.
    pub fn barrier(&self, offset: u64, len: u64, flags: BarrierFlags) {
        if len > 0 {
            self.bus_addr(offset, len);
        }
        self.access().barrier(flags);
    }

    #[inline(always)]
    fn step<W: BusWord>(offset: u64, index: usize) -> u64 {
        offset + (index * W::WIDTH) as u64
    }
}

macro_rules! width_accessors {
    ($($bytes: literal => $word: ty),+) => {
        paste! {
            impl BusSpaceHandle {
                $(
                    #[inline]
                    pub fn [<read_ $bytes>](&self, offset: u64) -> $word {
                        self.read::<$word>(offset)
                    }

                    #[inline]
                    pub fn [<write_ $bytes>](&self, offset: u64, value: $word) {
                        self.write::<$word>(offset, value)
                    }

                    #[inline]
                    pub fn [<read_multi_ $bytes>](&self, offset: u64, buf: &mut [$word]) {
                        self.read_multi(offset, buf)
                    }

                    #[inline]
                    pub fn [<write_multi_ $bytes>](&self, offset: u64, buf: &[$word]) {
                        self.write_multi(offset, buf)
                    }

                    #[inline]
                    pub fn [<read_region_ $bytes>](&self, offset: u64, buf: &mut [$word]) {
                        self.read_region(offset, buf)
                    }

                    #[inline]
                    pub fn [<write_region_ $bytes>](&self, offset: u64, buf: &[$word]) {
                        self.write_region(offset, buf)
                    }

                    #[inline]
                    pub fn [<set_multi_ $bytes>](&self, offset: u64, value: $word, count: usize) {
                        self.set_multi(offset, value, count)
                    }

                    #[inline]
                    pub fn [<set_region_ $bytes>](&self, offset: u64, value: $word, count: usize) {
                        self.set_region(offset, value, count)
                    }

                    #[inline]
                    pub fn [<copy_region_ $bytes>](
                        &self,
                        src_offset: u64,
                        dst: &BusSpaceHandle,
                        dst_offset: u64,
                        count: usize,
                    ) {
                        self.copy_region::<$word>(src_offset, dst, dst_offset, count)
                    }
                )+
            }
        }
    };
}

width_accessors!(1 => u8, 2 => u16, 4 => u32, 8 => u64);
