//! Recoverable errors of the device framework.
//!
//! Everything here is recoverable at the call site: the owning attach fails cleanly and the
//! device stays unpopulated. Invariant violations are not errors, see [crate::panic_dev].

use crate::dev::CriticalRole;
use core::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Descriptor storage could not be obtained.
    OutOfMemory,
    /// No free run satisfies the size, alignment and boundary constraints.
    NoSpace,
    /// A specific range overlaps an existing allocation.
    RangeInUse,
    /// The address range lies outside the valid window.
    BadAddress,
    /// An offset or length exceeds its parent region.
    OutOfRange,
    /// The resource cannot take another user.
    Busy,
    /// The hardware did not behave as the driver expected.
    HardwareRejected,
    /// A device the platform cannot boot without failed to attach.
    CriticalDeviceMissing { role: CriticalRole },
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::OutOfMemory => f.write_str("out of descriptor storage"),
            Error::NoSpace => f.write_str("no space left in address space"),
            Error::RangeInUse => f.write_str("range already in use"),
            Error::BadAddress => f.write_str("address outside the valid window"),
            Error::OutOfRange => f.write_str("offset out of range"),
            Error::Busy => f.write_str("resource busy"),
            Error::HardwareRejected => f.write_str("hardware rejected the request"),
            Error::CriticalDeviceMissing { role } => {
                f.write_fmt(format_args!("{:?} device could not be configured", role))
            }
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
