use abstractions::IUsizeAlias;

pub trait IAddressBase: IUsizeAlias {
    #[inline(always)]
    fn is_null(self) -> bool {
        self.as_usize() == 0
    }

    #[inline(always)]
    fn null() -> Self {
        Self::from_usize(0)
    }

    /// Offsets the address, returning `None` if the result wraps the address width.
    #[inline(always)]
    fn checked_add(self, offset: usize) -> Option<Self> {
        self.as_usize().checked_add(offset).map(Self::from_usize)
    }
}

pub trait IAlignableAddress: IAddressBase {
    fn is_aligned(self, align: usize) -> bool {
        self.as_usize() % align == 0
    }

    fn is_page_aligned(self) -> bool {
        self.is_aligned(constants::PAGE_SIZE)
    }

    fn align_up(self, align: usize) -> Self {
        debug_assert!(align.is_power_of_two());

        let mask = align - 1;
        let aligned = (self.as_usize() + mask) & !mask;
        Self::from_usize(aligned)
    }

    fn align_down(self, align: usize) -> Self {
        debug_assert!(align.is_power_of_two());

        let mask = align - 1;
        let aligned = self.as_usize() & !mask;
        Self::from_usize(aligned)
    }

    fn page_down(self) -> Self {
        self.align_down(constants::PAGE_SIZE)
    }

    fn page_up(self) -> Self {
        self.align_up(constants::PAGE_SIZE)
    }

    /// Like [`IAlignableAddress::page_up`], but `None` when the next boundary is past the address width.
    fn checked_page_up(self) -> Option<Self> {
        self.as_usize()
            .checked_next_multiple_of(constants::PAGE_SIZE)
            .map(Self::from_usize)
    }

    fn in_page_offset(self) -> usize {
        self.as_usize() % constants::PAGE_SIZE
    }
}

macro_rules! impl_address {
    ($type:ident) => {
        abstractions::impl_usize_alias!($type);
        abstractions::impl_arith_with_usize!($type);
        abstractions::impl_distance!($type);

        impl $crate::IAddressBase for $type {}

        impl $crate::IAlignableAddress for $type {}

        impl core::fmt::Display for $type {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{:#018x}", self.0)
            }
        }

        impl core::fmt::Debug for $type {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}({:#x})", stringify!($type), self.0)
            }
        }
    };
}

pub(crate) use impl_address;
