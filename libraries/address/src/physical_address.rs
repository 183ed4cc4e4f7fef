use crate::address::impl_address;

#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PhysicalAddress(usize);

impl_address!(PhysicalAddress);

impl PhysicalAddress {
    #[inline(always)]
    pub const fn new(addr: usize) -> PhysicalAddress {
        PhysicalAddress(addr)
    }

    pub fn as_mut_ptr<T>(&self) -> *mut T {
        self.0 as *mut T
    }
}
