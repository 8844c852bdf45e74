//! ## Endianness Module
//! This module describes the byte order of an address space and converts register words
//! between that byte order and host values.
//!
//! All the word types used by bus accesses implement [BusWord],
//! which defines [BusWord::decode] and [BusWord::encode] to move a value across the byte order
//! boundary without caring about the byte order of the current arch.

use core::fmt::Debug;

/// Byte order of an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Most Significant Byte (MSB) comes first in memory.
    Big,
    /// Least Significant Byte (LSB) comes first in memory.
    Little,
    /// Whatever the current architecture uses.
    Native,
}

impl ByteOrder {
    /// Byte order of the current architecture.
    pub const HOST: ByteOrder = if cfg!(target_endian = "big") {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    };

    /// Replace [ByteOrder::Native] with the concrete host byte order.
    #[inline(always)]
    pub const fn resolve(self) -> ByteOrder {
        match self {
            ByteOrder::Native => Self::HOST,
            other => other,
        }
    }

    /// Whether values need a byte swap between this order and the host order.
    #[inline(always)]
    pub fn is_swapped(self) -> bool {
        self.resolve() != Self::HOST
    }
}

/// A register word that can be stored in memory of any byte order.
pub trait BusWord: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    /// Width of the word in bytes.
    const WIDTH: usize;
    /// Parse the first [BusWord::WIDTH] bytes of `bytes`, laid out in `order`.
    fn decode(order: ByteOrder, bytes: &[u8]) -> Self;
    /// Lay the value out in `order` into the first [BusWord::WIDTH] bytes of `bytes`.
    fn encode(self, order: ByteOrder, bytes: &mut [u8]);
}

/// Implement [BusWord] for a primitive unsigned integer.
macro_rules! impl_bus_word {
    ($tval: ty) => {
        impl BusWord for $tval {
            const WIDTH: usize = size_of::<$tval>();

            #[inline(always)]
            fn decode(order: ByteOrder, bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$tval>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                match order.resolve() {
                    ByteOrder::Big => <$tval>::from_be_bytes(raw),
                    _ => <$tval>::from_le_bytes(raw),
                }
            }

            #[inline(always)]
            fn encode(self, order: ByteOrder, bytes: &mut [u8]) {
                let raw = match order.resolve() {
                    ByteOrder::Big => self.to_be_bytes(),
                    _ => self.to_le_bytes(),
                };
                bytes[..Self::WIDTH].copy_from_slice(&raw);
            }
        }
    };
}

impl_bus_word!(u8);
impl_bus_word!(u16);
impl_bus_word!(u32);
impl_bus_word!(u64);
