pub trait IUsizeAlias: Copy + Clone + PartialEq + PartialOrd + Eq + Ord {
    fn as_usize(&self) -> usize;

    fn from_usize(value: usize) -> Self;
}

#[macro_export]
macro_rules! impl_usize_alias {
    ($type:ident) => {
        impl abstractions::IUsizeAlias for $type {
            #[inline(always)]
            fn as_usize(&self) -> usize {
                self.0
            }

            #[inline(always)]
            fn from_usize(value: usize) -> Self {
                $type(value)
            }
        }
    };
}

#[macro_export]
macro_rules! impl_arith_with_usize {
    ($type:ty) => {
        impl core::ops::Add<usize> for $type {
            type Output = Self;
            fn add(self, rhs: usize) -> Self::Output {
                abstractions::IUsizeAlias::from_usize(
                    abstractions::IUsizeAlias::as_usize(&self) + rhs,
                )
            }
        }

        impl core::ops::Sub<usize> for $type {
            type Output = Self;
            fn sub(self, rhs: usize) -> Self::Output {
                abstractions::IUsizeAlias::from_usize(
                    abstractions::IUsizeAlias::as_usize(&self) - rhs,
                )
            }
        }

        impl core::ops::AddAssign<usize> for $type {
            fn add_assign(&mut self, rhs: usize) {
                *self = abstractions::IUsizeAlias::from_usize(
                    abstractions::IUsizeAlias::as_usize(self) + rhs,
                );
            }
        }

        impl core::ops::SubAssign<usize> for $type {
            fn sub_assign(&mut self, rhs: usize) {
                *self = abstractions::IUsizeAlias::from_usize(
                    abstractions::IUsizeAlias::as_usize(self) - rhs,
                );
            }
        }
    };
}

/// Subtracting two addresses of the same kind yields the distance between them.
#[macro_export]
macro_rules! impl_distance {
    ($type:ty) => {
        impl core::ops::Sub<$type> for $type {
            type Output = usize;
            fn sub(self, rhs: $type) -> usize {
                abstractions::IUsizeAlias::as_usize(&self)
                    - abstractions::IUsizeAlias::as_usize(&rhs)
            }
        }
    };
}
