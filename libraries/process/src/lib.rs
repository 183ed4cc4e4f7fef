#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

mod process;

pub use process::*;
