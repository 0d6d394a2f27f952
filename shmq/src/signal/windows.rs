use std::ffi::c_void;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, LocalFree, ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS,
    ERROR_FILENAME_EXCED_RANGE, ERROR_FILE_NOT_FOUND, ERROR_INVALID_HANDLE,
    ERROR_NOT_ENOUGH_MEMORY, ERROR_OUTOFMEMORY, ERROR_TOO_MANY_OPEN_FILES, ERROR_TOO_MANY_POSTS,
    HANDLE, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Security::Authorization::{
    ConvertStringSecurityDescriptorToSecurityDescriptorW, SDDL_REVISION_1,
};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::System::Threading::{
    CreateSemaphoreExW, ReleaseSemaphore, WaitForSingleObject, INFINITE, SEMAPHORE_ALL_ACCESS,
};

use crate::errors::{QueueError, SignalError};

use super::MAX_INITIAL_COUNT;

const NAMESPACE_PREFIX: &str = "Global\\";

// Grant the World SID full control so every intended participant, whatever
// session it runs in, can open the semaphore.
const WORLD_FULL_CONTROL_SDDL: &str = "D:(A;;GA;;;WD)";

/// Windows named counting semaphore.
pub struct Signal {
    handle: HANDLE,
}

unsafe impl Send for Signal {}
unsafe impl Sync for Signal {}

fn map_error(code: u32) -> SignalError {
    match code {
        ERROR_ACCESS_DENIED => SignalError::Unauthorized,
        ERROR_ALREADY_EXISTS => SignalError::AlreadyExists,
        ERROR_INVALID_HANDLE => SignalError::Invalid,
        ERROR_TOO_MANY_POSTS => SignalError::Overflow,
        ERROR_FILE_NOT_FOUND => SignalError::NotFound,
        ERROR_FILENAME_EXCED_RANGE => SignalError::NameTooLong,
        ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY => SignalError::OutOfMemory,
        ERROR_TOO_MANY_OPEN_FILES => SignalError::TooManyOpen,
        other => SignalError::Os(other as i32),
    }
}

fn wide_name(name: &str) -> Vec<u16> {
    format!("{}{}", NAMESPACE_PREFIX, name)
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect()
}

impl Signal {
    /// Creates the named semaphore with `initial_count` if absent, opens it
    /// otherwise.
    ///
    /// `delete_on_dispose` has no effect here: the kernel destroys the
    /// semaphore when its last handle closes.
    pub fn create_or_open(
        name: &str,
        initial_count: u32,
        _delete_on_dispose: bool,
    ) -> Result<Signal, QueueError> {
        if initial_count > MAX_INITIAL_COUNT {
            return Err(QueueError::Signal(SignalError::InitialCountTooLarge));
        }
        let name = wide_name(name);
        let sddl: Vec<u16> = WORLD_FULL_CONTROL_SDDL
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();

        let mut descriptor: *mut c_void = ptr::null_mut();
        let converted = unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                sddl.as_ptr(),
                SDDL_REVISION_1,
                &mut descriptor,
                ptr::null_mut(),
            )
        };
        if converted == 0 {
            return Err(QueueError::Signal(map_error(unsafe { GetLastError() })));
        }

        let attributes = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: descriptor,
            bInheritHandle: 0,
        };
        let handle = unsafe {
            CreateSemaphoreExW(
                &attributes,
                initial_count as i32,
                i32::MAX,
                name.as_ptr(),
                0,
                SEMAPHORE_ALL_ACCESS,
            )
        };
        let create_error = unsafe { GetLastError() };
        unsafe {
            LocalFree(descriptor);
        }
        if handle.is_null() {
            return Err(QueueError::Signal(map_error(create_error)));
        }
        Ok(Signal { handle })
    }

    /// Increments the count, waking one waiter.
    pub fn release(&self) -> Result<(), QueueError> {
        if unsafe { ReleaseSemaphore(self.handle, 1, ptr::null_mut()) } != 0 {
            Ok(())
        } else {
            Err(QueueError::Signal(map_error(unsafe { GetLastError() })))
        }
    }

    /// Decrements the count, blocking up to `milliseconds_timeout`.
    ///
    /// A negative timeout blocks indefinitely, zero polls. Returns `false`
    /// on timeout.
    pub fn wait(&self, milliseconds_timeout: i64) -> Result<bool, QueueError> {
        let timeout = if milliseconds_timeout < 0 {
            INFINITE
        } else {
            milliseconds_timeout.min(u32::MAX as i64 - 1) as u32
        };
        match unsafe { WaitForSingleObject(self.handle, timeout) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            WAIT_FAILED => Err(QueueError::Signal(map_error(unsafe { GetLastError() }))),
            other => Err(QueueError::Signal(SignalError::Os(other as i32))),
        }
    }

    /// No-op on Windows; the kernel reclaims the name on last handle close.
    pub fn unlink(_name: &str) -> Result<(), QueueError> {
        Ok(())
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}
