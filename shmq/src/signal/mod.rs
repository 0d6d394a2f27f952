//! Named cross-process counting semaphore.
//!
//! One backend per platform behind a uniform five-operation surface:
//! create-or-open, release, timed wait, close (on drop) and unlink. The
//! queue uses one such semaphore per queue name as a wakeup hint for blocked
//! subscribers; it never carries correctness.

#[cfg(unix)]
mod posix;
#[cfg(unix)]
pub use posix::Signal;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::Signal;

/// Tag prefixed to the queue name to form the coupling-semaphore name.
pub const COUPLING_TAG: &str = "C";

/// Largest portable initial count accepted by [`Signal::create_or_open`].
pub const MAX_INITIAL_COUNT: u32 = 32767;

/// Name of the semaphore coupling a queue's publisher and subscribers,
/// before the platform namespace prefix is applied.
pub fn coupling_signal_name(queue_name: &str) -> String {
    format!("{}{}", COUPLING_TAG, queue_name)
}

#[cfg(unix)]
pub(crate) mod cleanup {
    //! Process-exit unlink registry.
    //!
    //! Named POSIX semaphores are kernel-global and survive the process.
    //! Semaphores created with `delete_on_dispose` are recorded here and
    //! unlinked from a signal-watcher thread when the process is terminated,
    //! so an interrupted run does not leak kernel objects.

    use std::sync::{Mutex, Once};
    use std::thread;

    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::iterator::Signals;

    static REGISTERED: Mutex<Vec<String>> = Mutex::new(Vec::new());
    static WATCHER: Once = Once::new();

    pub(crate) fn register(name: &str) {
        WATCHER.call_once(|| {
            let mut signals = match Signals::new([SIGHUP, SIGINT, SIGQUIT, SIGTERM]) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("could not install semaphore cleanup handler: {}", e);
                    return;
                }
            };
            thread::spawn(move || {
                if signals.forever().next().is_some() {
                    unlink_all();
                    std::process::exit(0);
                }
            });
        });
        let mut names = REGISTERED.lock().unwrap_or_else(|e| e.into_inner());
        names.push(name.to_string());
    }

    pub(crate) fn deregister(name: &str) {
        let mut names = REGISTERED.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = names.iter().position(|n| n == name) {
            names.remove(pos);
        }
    }

    fn unlink_all() {
        let names: Vec<String> = {
            let mut guard = REGISTERED.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for name in names {
            if let Err(e) = super::Signal::unlink(&name) {
                tracing::warn!("failed to unlink semaphore {}: {}", name, e);
            }
        }
    }
}
