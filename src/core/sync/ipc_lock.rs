/*!
 * Inter-Process Lock
 *
 * A named lock shared by every process that opens the same name:
 * - Unix: POSIX named semaphore with an initial count of 1 (not recursive)
 * - Windows: named mutex (recursive within the owning thread)
 *
 * The name is removed from the system when the object is dropped.
 */

use crate::core::errors::{FutexError, FutexResult};
use std::ffi::CString;

/// Longest accepted lock name, in bytes
pub const MAX_LOCK_NAME: usize = 250;

fn validate_name(name: &str) -> FutexResult<()> {
    if name.is_empty() || name.len() >= MAX_LOCK_NAME || name.contains('\0') {
        return Err(FutexError::InvalidLockName(name.to_string()));
    }
    Ok(())
}

/// Name as registered with the OS
///
/// Unix semaphore names are a single path component: a leading `/` and no
/// other slashes.
pub fn system_name(name: &str) -> String {
    if cfg!(unix) {
        let mut out = String::with_capacity(name.len() + 1);
        out.push('/');
        out.extend(name.chars().map(|c| if c == '/' { '_' } else { c }));
        out
    } else {
        name.to_string()
    }
}

/// Named lock visible to other processes
pub struct IpcLock {
    name: CString,
    handle: imp::Handle,
}

// SAFETY: the OS handle may be used from any thread.
unsafe impl Send for IpcLock {}
unsafe impl Sync for IpcLock {}

impl IpcLock {
    /// Open (creating if needed) the lock called `name`; starts unlocked
    pub fn new(name: &str) -> FutexResult<Self> {
        validate_name(name)?;
        let system = system_name(name);
        let c_name =
            CString::new(system.clone()).map_err(|_| FutexError::InvalidLockName(name.to_string()))?;

        let handle = imp::open(&c_name).map_err(|err| FutexError::IpcLockCreation {
            name: system.clone(),
            message: err.to_string(),
        })?;

        tracing::debug!(name = %system, "opened inter-process lock");
        Ok(Self { name: c_name, handle })
    }

    /// Block until the lock is held
    pub fn lock(&self) {
        imp::lock(self.handle);
    }

    /// Take the lock if it is free
    pub fn try_lock(&self) -> bool {
        imp::try_lock(self.handle)
    }

    pub fn unlock(&self) {
        imp::unlock(self.handle);
    }

    /// Lock and return a guard that unlocks on drop
    pub fn guard(&self) -> IpcLockGuard<'_> {
        self.lock();
        IpcLockGuard { lock: self }
    }

    /// Name as registered with the OS
    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }
}

impl Drop for IpcLock {
    fn drop(&mut self) {
        imp::close(self.handle, &self.name);
    }
}

impl std::fmt::Debug for IpcLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcLock").field("name", &self.name()).finish()
    }
}

/// Releases an [`IpcLock`] on drop
#[must_use = "if unused the IpcLock will immediately unlock"]
pub struct IpcLockGuard<'a> {
    lock: &'a IpcLock,
}

impl Drop for IpcLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(unix)]
mod imp {
    use crate::core::errors::{fatal, FutexError};
    use libc::{c_uint, sem_t};
    use std::ffi::CString;
    use std::io;

    pub type Handle = *mut sem_t;

    fn errno() -> i32 {
        io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }

    pub fn open(name: &CString) -> io::Result<Handle> {
        // SAFETY: `name` is NUL-terminated; variadic mode/value are promoted to c_uint.
        let sem = unsafe {
            libc::sem_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o644 as c_uint,
                1 as c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            Err(io::Error::last_os_error())
        } else {
            Ok(sem)
        }
    }

    pub fn lock(sem: Handle) {
        loop {
            // SAFETY: `sem` came from a successful sem_open and is still open.
            if unsafe { libc::sem_wait(sem) } == 0 {
                return;
            }
            match errno() {
                libc::EINTR | libc::ETIMEDOUT => continue,
                code => fatal(FutexError::os("sem_wait", code.into())),
            }
        }
    }

    pub fn try_lock(sem: Handle) -> bool {
        loop {
            // SAFETY: as above.
            if unsafe { libc::sem_trywait(sem) } == 0 {
                return true;
            }
            if errno() != libc::EINTR {
                return false;
            }
        }
    }

    pub fn unlock(sem: Handle) {
        // SAFETY: as above.
        if unsafe { libc::sem_post(sem) } != 0 {
            fatal(FutexError::os("sem_post", errno().into()));
        }
    }

    pub fn close(sem: Handle, name: &CString) {
        // SAFETY: closing the handle we opened; unlinking by the same name.
        unsafe {
            libc::sem_close(sem);
            libc::sem_unlink(name.as_ptr());
        }
    }
}

#[cfg(windows)]
mod imp {
    use crate::core::errors::{fatal, FutexError};
    use std::ffi::CString;
    use std::io;
    use std::ptr;
    use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, WAIT_ABANDONED, WAIT_OBJECT_0};
    use windows_sys::Win32::System::Threading::{CreateMutexA, ReleaseMutex, WaitForSingleObject, INFINITE};

    pub type Handle = HANDLE;

    pub fn open(name: &CString) -> io::Result<Handle> {
        // SAFETY: `name` is NUL-terminated; default security attributes.
        let handle = unsafe { CreateMutexA(ptr::null(), 0, name.as_ptr() as *const u8) };
        if handle == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(handle)
        }
    }

    pub fn lock(handle: Handle) {
        // SAFETY: `handle` is an open mutex handle.
        match unsafe { WaitForSingleObject(handle, INFINITE) } {
            // An abandoned mutex is still acquired
            WAIT_OBJECT_0 | WAIT_ABANDONED => {}
            _ => fatal(FutexError::os("WaitForSingleObject", unsafe { GetLastError() }.into())),
        }
    }

    pub fn try_lock(handle: Handle) -> bool {
        // SAFETY: as above.
        matches!(unsafe { WaitForSingleObject(handle, 0) }, WAIT_OBJECT_0 | WAIT_ABANDONED)
    }

    pub fn unlock(handle: Handle) {
        // SAFETY: as above.
        if unsafe { ReleaseMutex(handle) } == 0 {
            fatal(FutexError::os("ReleaseMutex", unsafe { GetLastError() }.into()));
        }
    }

    pub fn close(handle: Handle, _name: &CString) {
        // SAFETY: closing the handle we opened.
        unsafe { CloseHandle(handle) };
    }
}
