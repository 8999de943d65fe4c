/*!
 * Atomic Width Abstraction
 *
 * Lets the futex facade treat every std atomic as "a word of N bytes".
 * `reinterpret_as` moves values between same-width or mismatched-width
 * representations without going through numeric conversion.
 */

use std::mem::size_of;
use std::sync::atomic::{
    AtomicBool, AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicPtr, AtomicU16,
    AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering,
};

mod sealed {
    pub trait Sealed {}
}

/// Plain-old-data: every bit pattern of `size_of::<Self>()` bytes is
/// initialized memory (no padding)
pub trait Pod: Copy + sealed::Sealed + 'static {}

/// Fixed-width integers usable as a reinterpretation target
pub trait Integral: Pod + Eq + Default {}

macro_rules! impl_pod {
    ($($t:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}
            impl Pod for $t {}
        )*
    };
}

macro_rules! impl_integral {
    ($($t:ty),* $(,)?) => {
        impl_pod!($($t),*);
        $(impl Integral for $t {})*
    };
}

impl_integral!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize);
impl_pod!(f32, f64, bool, char);

impl<T: 'static> sealed::Sealed for *const T {}
impl<T: 'static> Pod for *const T {}
impl<T: 'static> sealed::Sealed for *mut T {}
impl<T: 'static> Pod for *mut T {}

/// Reinterpret the bits of `input` as the integral type `As`
///
/// Equal sizes give a bit-preserving cast. Otherwise the bytes of `input` are
/// copied into a zero-initialized `As`, truncating or zero-extending in
/// memory order.
#[inline(always)]
#[must_use]
pub fn reinterpret_as<As: Integral, T: Pod>(input: &T) -> As {
    if size_of::<As>() == size_of::<T>() {
        // SAFETY: both types are Pod of the same size; every bit pattern is a
        // valid `As`.
        unsafe { std::mem::transmute_copy::<T, As>(input) }
    } else {
        let mut out = As::default();
        let len = size_of::<T>().min(size_of::<As>());
        // SAFETY: `len` is within both objects, neither has padding, and the
        // regions cannot overlap (`out` is a fresh local).
        unsafe {
            std::ptr::copy_nonoverlapping(
                input as *const T as *const u8,
                &mut out as *mut As as *mut u8,
                len,
            );
        }
        out
    }
}

/// An atomic cell the futex facade can wait on
///
/// # Safety
///
/// `WIDTH` must equal `size_of::<Self>()` and `size_of::<Self::Value>()`, and
/// the atomic must be laid out exactly like its value (true for every std
/// atomic), so the native backends may address it as a raw word.
pub unsafe trait FutexAtomic: Sync {
    /// Value stored in the atomic
    type Value: Pod;

    /// Width in bytes
    const WIDTH: usize;

    /// Atomic load
    fn load_value(&self, order: Ordering) -> Self::Value;

    /// Bits of a value, zero-extended to 64 bits
    #[inline(always)]
    fn bits(value: Self::Value) -> u64 {
        reinterpret_as::<u64, _>(&value)
    }

    /// Whether the atomic currently holds exactly the bits of `compare`
    #[inline(always)]
    fn matches(&self, compare: Self::Value) -> bool {
        Self::bits(self.load_value(Ordering::Acquire)) == Self::bits(compare)
    }

    /// Address used as the wait key
    #[inline(always)]
    fn addr(&self) -> usize {
        self as *const Self as *const () as usize
    }
}

macro_rules! impl_futex_atomic {
    ($($atomic:ty => $value:ty),* $(,)?) => {
        $(
            unsafe impl FutexAtomic for $atomic {
                type Value = $value;
                const WIDTH: usize = size_of::<$value>();

                #[inline(always)]
                fn load_value(&self, order: Ordering) -> $value {
                    self.load(order)
                }
            }
        )*
    };
}

impl_futex_atomic!(
    AtomicBool => bool,
    AtomicI8 => i8,
    AtomicU8 => u8,
    AtomicI16 => i16,
    AtomicU16 => u16,
    AtomicI32 => i32,
    AtomicU32 => u32,
    AtomicI64 => i64,
    AtomicU64 => u64,
    AtomicIsize => isize,
    AtomicUsize => usize,
);

unsafe impl<T: 'static> FutexAtomic for AtomicPtr<T> {
    type Value = *mut T;
    const WIDTH: usize = size_of::<*mut T>();

    #[inline(always)]
    fn load_value(&self, order: Ordering) -> *mut T {
        self.load(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_same_width_is_bit_cast() {
        assert_eq!(reinterpret_as::<u32, _>(&-1i32), u32::MAX);
        assert_eq!(reinterpret_as::<i8, _>(&0x80u8), i8::MIN);
        assert_eq!(reinterpret_as::<u32, _>(&1.0f32), 0x3f80_0000);
        assert_eq!(reinterpret_as::<u64, _>(&-0.0f64), 0x8000_0000_0000_0000);
    }

    #[test]
    fn test_narrow_into_wide_zero_fills() {
        let wide: u64 = reinterpret_as(&0xffu8);
        assert_eq!(wide.count_ones(), 8);
        let wide: u64 = reinterpret_as(&true);
        assert_eq!(wide.count_ones(), 1);
    }

    #[test]
    fn test_widths_match_sizes() {
        assert_eq!(<AtomicBool as FutexAtomic>::WIDTH, 1);
        assert_eq!(<AtomicI8 as FutexAtomic>::WIDTH, 1);
        assert_eq!(<AtomicU16 as FutexAtomic>::WIDTH, 2);
        assert_eq!(<AtomicI32 as FutexAtomic>::WIDTH, 4);
        assert_eq!(<AtomicU64 as FutexAtomic>::WIDTH, 8);
        assert_eq!(<AtomicUsize as FutexAtomic>::WIDTH, size_of::<usize>());
        assert_eq!(<AtomicPtr<u8> as FutexAtomic>::WIDTH, size_of::<usize>());
    }

    #[test]
    fn test_matches_compares_bits() {
        let a = AtomicI16::new(-2);
        assert!(a.matches(-2));
        assert!(!a.matches(2));
        let p = AtomicPtr::<u8>::new(std::ptr::null_mut());
        assert!(p.matches(std::ptr::null_mut()));
    }

    proptest! {
        #[test]
        fn prop_u64_roundtrips_through_f64(x in any::<u64>()) {
            let f = f64::from_bits(x);
            prop_assert_eq!(reinterpret_as::<u64, _>(&f), x);
        }

        #[test]
        fn prop_signed_bit_cast_matches_as(x in any::<i32>()) {
            prop_assert_eq!(reinterpret_as::<u32, _>(&x), x as u32);
        }

        #[test]
        fn prop_truncation_keeps_low_bytes(x in any::<u64>()) {
            let narrow: u32 = reinterpret_as(&x);
            let expected = if cfg!(target_endian = "little") { x as u32 } else { (x >> 32) as u32 };
            prop_assert_eq!(narrow, expected);
        }
    }
}
