#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

mod address;
mod physical_address;
mod virtual_address;

pub use address::{IAddressBase, IAlignableAddress};
pub use physical_address::*;
pub use virtual_address::*;

pub const PAGE_SIZE_BITS: usize = 0xc;
