use crate::address::impl_address;

#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtualAddress(usize);

impl_address!(VirtualAddress);

impl VirtualAddress {
    #[inline(always)]
    pub const fn new(addr: usize) -> VirtualAddress {
        VirtualAddress(addr)
    }

    #[inline(always)]
    pub fn from_ref<T: ?Sized>(r: &T) -> VirtualAddress {
        VirtualAddress::from_ptr(r as *const T as *const ())
    }

    #[inline(always)]
    pub fn from_ptr<T>(p: *const T) -> VirtualAddress {
        VirtualAddress(p as usize)
    }

    pub fn as_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    pub fn as_mut_ptr<T>(&self) -> *mut T {
        self.0 as *mut T
    }
}
