//! Power-of-two alignment of blob offsets.

pub trait AlignableTo: Sized {
    /// Round up to the next multiple of `align`, a power of two.
    fn align_up(self, align: Self) -> Self;
    fn is_aligned_to(self, align: Self) -> bool;
}

macro_rules! impl_alignable_to {
    ($($ty:ty),*) => {
        $(
            impl AlignableTo for $ty {
                #[inline]
                fn align_up(self, align: $ty) -> $ty {
                    debug_assert!(align.is_power_of_two());
                    (self + align - 1) & !(align - 1)
                }

                #[inline]
                fn is_aligned_to(self, align: $ty) -> bool {
                    self & (align - 1) == 0
                }
            }
        )*
    };
}

impl_alignable_to!(u32, u64, usize);
