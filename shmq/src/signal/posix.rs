use std::ffi::CString;
use std::io;

use crate::errors::{QueueError, SignalError};

use super::cleanup;
use super::MAX_INITIAL_COUNT;

// macOS caps semaphore names at PSEMNAMLEN (31) bytes including the NUL.
#[cfg(target_os = "macos")]
const MAX_NAME_BYTES: usize = 30;
// Linux stores sem names under /dev/shm with a "sem." prefix, leaving
// NAME_MAX - 4 bytes.
#[cfg(not(target_os = "macos"))]
const MAX_NAME_BYTES: usize = 251;

/// POSIX named counting semaphore.
pub struct Signal {
    sem: *mut libc::sem_t,
    name: String,
    delete_on_dispose: bool,
}

// sem_post / sem_wait are async-signal-safe and thread-safe on one handle.
unsafe impl Send for Signal {}
unsafe impl Sync for Signal {}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn map_errno(errno: i32) -> SignalError {
    match errno {
        libc::EACCES | libc::EPERM => SignalError::Unauthorized,
        libc::EEXIST => SignalError::AlreadyExists,
        libc::EINTR => SignalError::Interrupted,
        libc::EINVAL => SignalError::Invalid,
        libc::EOVERFLOW => SignalError::Overflow,
        libc::ENOENT => SignalError::NotFound,
        libc::ENAMETOOLONG => SignalError::NameTooLong,
        libc::ENOMEM => SignalError::OutOfMemory,
        libc::EMFILE | libc::ENFILE => SignalError::TooManyOpen,
        other => SignalError::Os(other),
    }
}

fn qualified_name(name: &str) -> Result<CString, QueueError> {
    let full = format!("/{}", name);
    if full.len() > MAX_NAME_BYTES {
        return Err(QueueError::Signal(SignalError::NameTooLong));
    }
    CString::new(full)
        .map_err(|_| QueueError::InvalidArgument("semaphore name contains a NUL byte".to_string()))
}

impl Signal {
    /// Creates the named semaphore with `initial_count` if absent, opens it
    /// otherwise.
    ///
    /// With `delete_on_dispose` the name is unlinked when the handle drops,
    /// and also registered for unlink if the process is terminated by a
    /// signal first.
    pub fn create_or_open(
        name: &str,
        initial_count: u32,
        delete_on_dispose: bool,
    ) -> Result<Signal, QueueError> {
        if initial_count > MAX_INITIAL_COUNT {
            return Err(QueueError::Signal(SignalError::InitialCountTooLarge));
        }
        let qualified = qualified_name(name)?;
        // All intended participants must be able to open the semaphore, so it
        // is created world-accessible.
        let sem = unsafe {
            libc::sem_open(
                qualified.as_ptr(),
                libc::O_CREAT,
                0o777 as libc::c_uint,
                initial_count as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(QueueError::Signal(map_errno(last_errno())));
        }
        if delete_on_dispose {
            cleanup::register(name);
        }
        Ok(Signal {
            sem,
            name: name.to_string(),
            delete_on_dispose,
        })
    }

    /// Increments the count, waking one waiter.
    pub fn release(&self) -> Result<(), QueueError> {
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(QueueError::Signal(map_errno(last_errno())))
        }
    }

    /// Decrements the count, blocking up to `milliseconds_timeout`.
    ///
    /// A negative timeout blocks indefinitely, zero polls. Returns `false`
    /// on timeout, `Err(SignalError::Interrupted)` when aborted by an OS
    /// signal.
    pub fn wait(&self, milliseconds_timeout: i64) -> Result<bool, QueueError> {
        if milliseconds_timeout < 0 {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                Ok(true)
            } else {
                Err(QueueError::Signal(map_errno(last_errno())))
            }
        } else if milliseconds_timeout == 0 {
            self.try_wait()
        } else {
            self.timed_wait(milliseconds_timeout)
        }
    }

    fn try_wait(&self) -> Result<bool, QueueError> {
        if unsafe { libc::sem_trywait(self.sem) } == 0 {
            return Ok(true);
        }
        match last_errno() {
            libc::EAGAIN => Ok(false),
            errno => Err(QueueError::Signal(map_errno(errno))),
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn timed_wait(&self, milliseconds: i64) -> Result<bool, QueueError> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
            return Err(QueueError::Signal(map_errno(last_errno())));
        }
        let nanos = now.tv_nsec as i64 + (milliseconds % 1000) * 1_000_000;
        let deadline = libc::timespec {
            tv_sec: now.tv_sec + (milliseconds / 1000) as libc::time_t + (nanos / 1_000_000_000),
            tv_nsec: nanos % 1_000_000_000,
        };
        if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
            return Ok(true);
        }
        match last_errno() {
            libc::ETIMEDOUT => Ok(false),
            errno => Err(QueueError::Signal(map_errno(errno))),
        }
    }

    // macOS has no sem_timedwait; poll with a cooperative yield instead.
    #[cfg(target_os = "macos")]
    fn timed_wait(&self, milliseconds: i64) -> Result<bool, QueueError> {
        use std::time::{Duration, Instant};

        let deadline = Instant::now() + Duration::from_millis(milliseconds as u64);
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::yield_now();
        }
    }

    /// Removes the name from the system; existing handles stay usable.
    pub fn unlink(name: &str) -> Result<(), QueueError> {
        let qualified = qualified_name(name)?;
        if unsafe { libc::sem_unlink(qualified.as_ptr()) } == 0 {
            Ok(())
        } else {
            Err(QueueError::Signal(map_errno(last_errno())))
        }
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
        if self.delete_on_dispose {
            if let Err(e) = Signal::unlink(&self.name) {
                tracing::warn!("failed to unlink semaphore {}: {}", self.name, e);
            }
            cleanup::deregister(&self.name);
        }
    }
}
