#[macro_export]
macro_rules! enum_accessors {
    ($bind:ident $(($variant:ident($ty:ty) $is:ident $get:ident $unwrap:ident $cvt:expr))*) => ($(
        #[inline]
        pub fn $is(&self) -> bool {
            matches!(self, Self::$variant(_))
        }

        /// Attempt to access the underlying value, returning `None` if it is
        /// not the correct variant.
        #[inline]
        pub fn $get(&self) -> Option<$ty> {
            if let Self::$variant($bind) = self {
                Some($cvt)
            } else {
                None
            }
        }

        /// Returns the underlying value, panicking if it's the wrong variant.
        ///
        /// # Panics
        ///
        /// Panics if `self` is not of the right variant.
        #[inline]
        pub fn $unwrap(&self) -> $ty {
            self.$get().expect(concat!("expected ", stringify!($ty)))
        }
    )*)
}

/// Is `bytes` a multiple of the host page size?
pub fn usize_is_multiple_of_host_page_size(bytes: usize) -> bool {
    bytes % crate::host_page_size() == 0
}

pub fn round_u64_up_to_host_pages(bytes: u64) -> u64 {
    let page_size = u64::try_from(crate::host_page_size()).unwrap();
    debug_assert!(page_size.is_power_of_two());
    bytes
        .checked_add(page_size - 1)
        .map(|val| val & !(page_size - 1))
        .unwrap_or_else(|| {
            panic!("{bytes} is too large to be rounded up to a multiple of the host page size")
        })
}

/// Same as `round_u64_up_to_host_pages` but for `usize`s.
pub fn round_usize_up_to_host_pages(bytes: usize) -> usize {
    let bytes = u64::try_from(bytes).unwrap();
    usize::try_from(round_u64_up_to_host_pages(bytes)).unwrap()
}
