/*!
 * Windows wait-on-address backend
 *
 * Uses the ntdll form of WaitOnAddress, which accepts timeouts in 100ns
 * units: negative for relative, positive for absolute FILETIME. Waits on
 * 1, 2, 4 and 8-byte words natively, so the parking lot is only used when
 * the `force-parking-lot` feature asks for it.
 */

use super::{width_bit, NativeFutex};
use crate::core::errors::{fatal, FutexError};
use crate::core::sync::atomic::FutexAtomic;
use crate::core::sync::time::{clamp_duration, TimePoint};
use std::ffi::c_void;
use std::ptr;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows_sys::Win32::System::Threading::{WakeByAddressAll, WakeByAddressSingle};

/// 100ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_TO_UNIX_EPOCH_100NS: i64 = 0x019D_B1DE_D53E_8000;

const STATUS_SUCCESS: i32 = 0;
const STATUS_TIMEOUT: i32 = 0x0000_0102;

type RtlWaitOnAddressFn =
    unsafe extern "system" fn(*const c_void, *const c_void, usize, *const i64) -> i32;

static RTL_WAIT_ON_ADDRESS: OnceLock<RtlWaitOnAddressFn> = OnceLock::new();

/// `RtlWaitOnAddress` backend
pub struct WindowsFutex;

fn rtl_wait_on_address() -> RtlWaitOnAddressFn {
    *RTL_WAIT_ON_ADDRESS.get_or_init(|| {
        let module_name: Vec<u16> = "ntdll.dll\0".encode_utf16().collect();
        // SAFETY: NUL-terminated strings; ntdll is mapped into every process.
        unsafe {
            let module = GetModuleHandleW(module_name.as_ptr());
            if module == 0 {
                fatal(FutexError::os("GetModuleHandleW(ntdll.dll)", GetLastError().into()));
            }
            match GetProcAddress(module, b"RtlWaitOnAddress\0".as_ptr()) {
                Some(proc) => std::mem::transmute::<unsafe extern "system" fn() -> isize, RtlWaitOnAddressFn>(proc),
                None => fatal(FutexError::os("GetProcAddress(RtlWaitOnAddress)", GetLastError().into())),
            }
        }
    })
}

fn hundred_nanos(d: Duration) -> i64 {
    (d.as_nanos() / 100).min(i64::MAX as u128) as i64
}

fn wait_on_address<A: FutexAtomic>(val: &A, compare: &A::Value, timeout: Option<i64>) -> bool {
    if !matches!(A::WIDTH, 1 | 2 | 4 | 8) {
        fatal(FutexError::UnsupportedWidth(A::WIDTH));
    }

    let timeout_ptr = timeout.as_ref().map_or(ptr::null(), |t| t as *const i64);
    // SAFETY: `val` and `compare` are live for the call and `A::WIDTH` bytes wide.
    let status = unsafe {
        rtl_wait_on_address()(
            val as *const A as *const c_void,
            compare as *const A::Value as *const c_void,
            A::WIDTH,
            timeout_ptr,
        )
    };
    match status {
        STATUS_SUCCESS => true,
        STATUS_TIMEOUT => false,
        other => fatal(FutexError::os("RtlWaitOnAddress", other.into())),
    }
}

impl NativeFutex for WindowsFutex {
    const NAME: &'static str = "windows-wait-on-address";
    const NATIVE_WIDTH_MASK: usize = width_bit(1) | width_bit(2) | width_bit(4) | width_bit(8);

    fn wait<A: FutexAtomic>(val: &A, compare: A::Value) {
        wait_on_address(val, &compare, None);
    }

    fn wait_for<A: FutexAtomic>(val: &A, compare: A::Value, duration: Duration) -> bool {
        let units = hundred_nanos(clamp_duration(duration));
        if units <= 0 {
            return false;
        }
        // Negative means relative
        wait_on_address(val, &compare, Some(-units))
    }

    fn wait_until<A: FutexAtomic, P: TimePoint>(val: &A, compare: A::Value, deadline: &P) -> bool {
        // RtlWaitOnAddress is slow to report an elapsed absolute time
        let remaining = match deadline.remaining() {
            Some(remaining) => remaining,
            None => return false,
        };

        let target = if P::IS_SYSTEM_CLOCK {
            deadline.to_system_time()
        } else {
            SystemTime::now() + remaining
        };
        let since_unix = target.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let absolute = hundred_nanos(since_unix).saturating_add(FILETIME_TO_UNIX_EPOCH_100NS);
        debug_assert!(absolute >= 0);

        wait_on_address(val, &compare, Some(absolute))
    }

    fn wake_one<A: FutexAtomic>(addr: *const A) {
        // SAFETY: the address is only used as a key.
        unsafe { WakeByAddressSingle(addr as *const c_void) };
    }

    fn wake_n<A: FutexAtomic>(addr: *const A, count: usize) {
        if count >= i32::MAX as usize {
            return Self::wake_all(addr);
        }
        for _ in 0..count {
            Self::wake_one(addr);
        }
    }

    fn wake_all<A: FutexAtomic>(addr: *const A) {
        // SAFETY: as above.
        unsafe { WakeByAddressAll(addr as *const c_void) };
    }
}
