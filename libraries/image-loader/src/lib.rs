#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

mod bootstrap;
mod elf;
mod loader;
mod segment;
mod source;
mod symbols;

pub use bootstrap::*;
pub use elf::*;
pub use loader::*;
pub use segment::*;
pub use source::*;
pub use symbols::*;
