//! Build-time configuration for the device framework.
//!
//! Values come from `flags.json` at the workspace root, one section per target
//! architecture, and are emitted as `usize` constants by the build script.

#![no_std]
#![deny(missing_docs)]

/// Constants generated from `flags.json`.
#[allow(missing_docs)]
pub mod build_flags {
    include!(concat!(env!("OUT_DIR"), "/build_flags.rs"));
}

pub use build_flags::*;
