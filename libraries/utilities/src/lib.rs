//! Small helpers shared by the loader and heap crates.
//!
//! [`InvokeOnDrop`] runs a closure over a value when it leaves scope. The
//! bootstrapper uses it to close the host image handle on every exit path,
//! including early returns through `?`.

#![cfg_attr(not(test), no_std)]

mod invoke_on_drop;

pub use invoke_on_drop::*;
