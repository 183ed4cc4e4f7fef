#![cfg_attr(not(feature = "std"), no_std)]

use address::{PhysicalAddress, VirtualAddress};

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

mod flags;

pub use flags::GenericMappingFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MMUError {
    InvalidAddress,
    PrivilegeError,
    AccessFault, // not mapped to a proper frame
    MisalignedAddress,
    PageNotReadable { vaddr: VirtualAddress },
    PageNotWritable { vaddr: VirtualAddress },
}

impl dyn IMMU {
    /// Reads a native-endian machine word from user memory.
    pub fn read_usize(&self, vaddr: VirtualAddress) -> Result<usize, MMUError> {
        let mut buf = [0u8; core::mem::size_of::<usize>()];

        self.read_bytes(vaddr, &mut buf)?;

        Ok(usize::from_ne_bytes(buf))
    }

    pub fn write_usize(&self, vaddr: VirtualAddress, value: usize) -> Result<(), MMUError> {
        self.write_bytes(vaddr, &value.to_ne_bytes())
    }
}

/// A page table, as seen by the loader and the user heap.
pub trait IMMU {
    /// Installs a single translation `vaddr -> target`.
    fn map_single(
        &mut self,
        vaddr: VirtualAddress,
        target: PhysicalAddress,
        size: PageSize,
        flags: GenericMappingFlags,
    ) -> PagingResult<()>;

    fn remap_single(
        &mut self,
        vaddr: VirtualAddress,
        new_target: PhysicalAddress,
        flags: GenericMappingFlags,
    ) -> PagingResult<PageSize>;

    fn unmap_single(&mut self, vaddr: VirtualAddress) -> PagingResult<(PhysicalAddress, PageSize)>;

    fn query_virtual(
        &self,
        vaddr: VirtualAddress,
    ) -> PagingResult<(PhysicalAddress, GenericMappingFlags, PageSize)>;

    fn read_bytes(&self, vaddr: VirtualAddress, buf: &mut [u8]) -> Result<(), MMUError>;

    fn write_bytes(&self, vaddr: VirtualAddress, buf: &[u8]) -> Result<(), MMUError>;
}

/// The error type for page table operation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// The address is not aligned to the page size.
    NotAligned,
    /// The mapping is not present.
    NotMapped,
    /// The mapping is already present.
    AlreadyMapped,
    CanNotModify,
    OutOfMemory,
}

impl From<PagingError> for MMUError {
    fn from(value: PagingError) -> Self {
        match value {
            PagingError::NotAligned => MMUError::MisalignedAddress,
            PagingError::NotMapped => MMUError::InvalidAddress,
            PagingError::AlreadyMapped | PagingError::CanNotModify | PagingError::OutOfMemory => {
                MMUError::AccessFault
            }
        }
    }
}

/// The page sizes supported by the hardware page table.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PageSize {
    /// Size of 4 kilobytes (2<sup>12</sup> bytes).
    _4K,
    /// Size of 2 megabytes (2<sup>21</sup> bytes).
    _2M,
    /// Size of 1 gigabytes (2<sup>30</sup> bytes).
    _1G,
    Custom(usize),
}

impl From<usize> for PageSize {
    fn from(value: usize) -> Self {
        match value {
            0x1000 => PageSize::_4K,
            0x20_0000 => PageSize::_2M,
            0x4000_0000 => PageSize::_1G,
            _ => PageSize::Custom(value),
        }
    }
}

impl PageSize {
    pub const fn as_usize(&self) -> usize {
        match self {
            PageSize::_4K => 0x1000,
            PageSize::_2M => 0x20_0000,
            PageSize::_1G => 0x4000_0000,
            PageSize::Custom(v) => *v,
        }
    }
}

pub type PagingResult<TValue> = Result<TValue, PagingError>;
