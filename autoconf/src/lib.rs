//! Device autoconfiguration and hardware access framework.
//!
//! The crate binds drivers written once to the physical resources of very different machines:
//! - [extent]: bookkeeping of used sub-ranges of a linear address space.
//! - [bus_space]: byte-order-correct, overlap-free register access through (tag, handle) pairs.
//! - [intr]: interrupt establishment and dispatch with per-CPU priority masking.
//! - [dev]: the driver registry and the match/attach/detach state machine.
//! - [platform]: boot-time construction of the device tree from a platform descriptor.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod panic;
#[macro_use]
pub mod logging;
pub mod bus_space;
pub mod config;
pub mod dev;
pub mod error;
pub mod extent;
pub mod handle;
pub mod intr;
pub mod platform;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
