//! Host-side stand-ins for the hardware the kernel crates talk to.
//!
//! Physical frames are page-aligned host allocations, so a [`memory::TestMMU`]
//! can read and write "physical" memory directly. [`image::ElfBuilder`]
//! assembles small program images for the loader tests.

pub mod allocation;
pub mod image;
pub mod memory;

#[cfg(feature = "test_log")]
mod logging;
