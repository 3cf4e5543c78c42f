//! Execution suspension
//!
//! Patching code that another thread may be executing is only safe while
//! every other thread is frozen. [`SuspensionScope`] pairs the freeze with a
//! resume on every exit path.
//!
//! Inside the window the initiating thread must not log, allocate or take
//! any lock it does not already hold: a frozen thread may own it.

use std::sync::Arc;

use super::error::HookError;

/// Process-wide thread freezing primitive
pub trait ThreadSuspender: Send + Sync {
    /// Freeze every thread except the caller
    ///
    /// On error no thread is left frozen.
    fn suspend_all_but_one(&self) -> Result<(), HookError>;

    /// Resume the threads frozen by the last successful suspend
    fn resume_all(&self);
}

/// Token meaning "all other threads are frozen"; resumes them when dropped
#[must_use = "threads resume as soon as the scope is dropped"]
pub struct SuspensionScope<'a> {
    suspender: &'a dyn ThreadSuspender,
}

impl<'a> SuspensionScope<'a> {
    pub fn enter(suspender: &'a dyn ThreadSuspender) -> Result<Self, HookError> {
        suspender.suspend_all_but_one()?;
        Ok(Self { suspender })
    }
}

impl Drop for SuspensionScope<'_> {
    fn drop(&mut self) {
        self.suspender.resume_all();
    }
}

/// Run `f` with every other thread frozen
pub fn with_suspended<T>(
    suspender: &dyn ThreadSuspender,
    f: impl FnOnce() -> T,
) -> Result<T, HookError> {
    let _scope = SuspensionScope::enter(suspender)?;
    Ok(f())
}

/// The suspender for the current platform
pub fn platform_suspender() -> Arc<dyn ThreadSuspender> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(linux::SignalSuspender::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnsupportedSuspender)
    }
}

/// Suspender for platforms without an implementation; always fails
#[derive(Debug, Default)]
pub struct UnsupportedSuspender;

impl ThreadSuspender for UnsupportedSuspender {
    fn suspend_all_but_one(&self) -> Result<(), HookError> {
        Err(HookError::Unsupported)
    }

    fn resume_all(&self) {}
}

#[cfg(target_os = "linux")]
pub use linux::SignalSuspender;

#[cfg(target_os = "linux")]
mod linux {
    use std::ffi::c_int;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use parking_lot::{Mutex, MutexGuard};

    use super::{HookError, ThreadSuspender};

    /// Signal used to park threads
    const PARK_SIGNAL: Signal = Signal::SIGUSR2;

    /// How long to wait for signalled threads to park
    const PARK_TIMEOUT: Duration = Duration::from_secs(2);

    static HOLD: AtomicBool = AtomicBool::new(false);
    static PARKED: AtomicUsize = AtomicUsize::new(0);

    /// Serialises suspenders; only the holder ever sends park signals
    static OWNER: Mutex<()> = Mutex::new(());

    /// Action our park handler replaced; only touched while holding `OWNER`
    static PREVIOUS: Mutex<Option<SigAction>> = Mutex::new(None);

    extern "C" fn park_handler(_: c_int) {
        PARKED.fetch_add(1, Ordering::SeqCst);
        while HOLD.load(Ordering::Acquire) {
            std::hint::spin_loop();
            unsafe {
                libc::sched_yield();
            }
        }
        PARKED.fetch_sub(1, Ordering::SeqCst);
    }

    /// Freezes threads by parking them in a signal handler
    ///
    /// Every thread listed in `/proc/self/task` except the caller receives
    /// `SIGUSR2` and spins in the handler until [`resume_all`](ThreadSuspender::resume_all).
    ///
    /// The park handler is only installed for the duration of a window; the
    /// host's own `SIGUSR2` action is put back on resume. After a park timeout
    /// the handler stays in place, since signals may still be pending, and the
    /// next successful window restores the saved action.
    pub struct SignalSuspender {
        guard: Mutex<Option<MutexGuard<'static, ()>>>,
    }

    // SAFETY: the owner guard is only created and dropped by the suspending thread
    unsafe impl Send for SignalSuspender {}
    unsafe impl Sync for SignalSuspender {}

    impl Default for SignalSuspender {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SignalSuspender {
        pub fn new() -> Self {
            Self {
                guard: Mutex::new(None),
            }
        }

        /// Must be called with `OWNER` held
        fn install_handler() -> Result<(), HookError> {
            let action = SigAction::new(
                SigHandler::Handler(park_handler),
                SaFlags::SA_RESTART,
                SigSet::all(),
            );
            let replaced = unsafe { sigaction(PARK_SIGNAL, &action) }
                .map_err(|err| HookError::Suspension(format!("sigaction failed: {}", err)))?;

            // Still installed from a timed-out window: keep the host's action
            PREVIOUS.lock().get_or_insert(replaced);
            Ok(())
        }

        /// Must be called with `OWNER` held and no park signal pending
        fn restore_handler() {
            let Some(previous) = PREVIOUS.lock().take() else {
                return;
            };
            if let Err(err) = unsafe { sigaction(PARK_SIGNAL, &previous) } {
                tracing::warn!("Failed to restore the previous {} action: {}", PARK_SIGNAL, err);
            }
        }

        fn other_threads() -> Result<Vec<libc::pid_t>, HookError> {
            let own = unsafe { libc::syscall(libc::SYS_gettid) } as libc::pid_t;
            let entries = std::fs::read_dir("/proc/self/task")
                .map_err(|err| HookError::Suspension(format!("cannot list threads: {}", err)))?;

            Ok(entries
                .filter_map(Result::ok)
                .filter_map(|entry| entry.file_name().to_str()?.parse::<libc::pid_t>().ok())
                .filter(|&tid| tid != own)
                .collect())
        }

        fn release() {
            HOLD.store(false, Ordering::Release);
            while PARKED.load(Ordering::SeqCst) != 0 {
                std::hint::spin_loop();
            }
        }
    }

    impl ThreadSuspender for SignalSuspender {
        fn suspend_all_but_one(&self) -> Result<(), HookError> {
            let owner = OWNER.lock();
            Self::install_handler()?;
            let threads = match Self::other_threads() {
                Ok(threads) => threads,
                Err(err) => {
                    Self::restore_handler();
                    return Err(err);
                }
            };
            let pid = unsafe { libc::getpid() };

            HOLD.store(true, Ordering::Release);

            let mut signalled = 0;
            for tid in threads {
                let rc = unsafe {
                    libc::syscall(libc::SYS_tgkill, pid, tid, PARK_SIGNAL as c_int)
                };
                // ESRCH: the thread exited since we listed it
                if rc == 0 {
                    signalled += 1;
                }
            }

            let deadline = Instant::now() + PARK_TIMEOUT;
            while PARKED.load(Ordering::SeqCst) < signalled {
                if Instant::now() >= deadline {
                    let parked = PARKED.load(Ordering::SeqCst);
                    Self::release();
                    drop(owner);
                    return Err(HookError::Suspension(format!(
                        "only {} of {} threads parked",
                        parked, signalled
                    )));
                }
                std::thread::yield_now();
            }

            *self.guard.lock() = Some(owner);
            Ok(())
        }

        fn resume_all(&self) {
            let owner = self.guard.lock().take();
            if owner.is_some() {
                Self::release();
                Self::restore_handler();
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        extern "C" fn host_handler(_: c_int) {}

        #[test]
        fn test_previous_action_restored_after_window() {
            let host_action = SigAction::new(
                SigHandler::Handler(host_handler),
                SaFlags::empty(),
                SigSet::empty(),
            );
            let original = {
                let _owner = OWNER.lock();
                unsafe { sigaction(PARK_SIGNAL, &host_action) }.unwrap()
            };

            let suspender = SignalSuspender::new();
            suspender.suspend_all_but_one().unwrap();
            suspender.resume_all();

            let current = {
                let _owner = OWNER.lock();
                unsafe { sigaction(PARK_SIGNAL, &original) }.unwrap()
            };
            assert_eq!(current.handler(), SigHandler::Handler(host_handler));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Suspender that only counts calls
    #[derive(Default)]
    pub(crate) struct CountingSuspender {
        pub suspends: AtomicUsize,
        pub resumes: AtomicUsize,
        pub fail: std::sync::atomic::AtomicBool,
        /// Keep the window open until cleared
        pub hold: std::sync::atomic::AtomicBool,
    }

    impl CountingSuspender {
        pub fn suspends(&self) -> usize {
            self.suspends.load(Ordering::SeqCst)
        }

        pub fn resumes(&self) -> usize {
            self.resumes.load(Ordering::SeqCst)
        }
    }

    impl ThreadSuspender for CountingSuspender {
        fn suspend_all_but_one(&self) -> Result<(), HookError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(HookError::Suspension("refused".to_string()));
            }
            self.suspends.fetch_add(1, Ordering::SeqCst);
            while self.hold.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
            Ok(())
        }

        fn resume_all(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_scope_resumes_on_drop() {
        let suspender = CountingSuspender::default();
        {
            let _scope = SuspensionScope::enter(&suspender).unwrap();
            assert_eq!(suspender.suspends(), 1);
            assert_eq!(suspender.resumes(), 0);
        }
        assert_eq!(suspender.resumes(), 1);
    }

    #[test]
    fn test_scope_resumes_on_early_return() {
        fn failing(suspender: &dyn ThreadSuspender) -> Result<(), HookError> {
            let _scope = SuspensionScope::enter(suspender)?;
            Err(HookError::EnableFailed("patch failed".to_string()))
        }

        let suspender = CountingSuspender::default();
        assert!(failing(&suspender).is_err());
        assert_eq!(suspender.suspends(), 1);
        assert_eq!(suspender.resumes(), 1);
    }

    #[test]
    fn test_scope_resumes_on_panic() {
        let suspender = CountingSuspender::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = with_suspended(&suspender, || panic!("boom"));
        }));
        assert!(result.is_err());
        assert_eq!(suspender.resumes(), 1);
    }

    #[test]
    fn test_failed_suspend_does_not_resume() {
        let suspender = CountingSuspender::default();
        suspender.fail.store(true, Ordering::SeqCst);
        assert!(with_suspended(&suspender, || ()).is_err());
        assert_eq!(suspender.resumes(), 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_signal_suspender_freezes_other_threads() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;
        use std::time::Duration;

        let counter = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let counter = Arc::clone(&counter);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    counter.fetch_add(1, Ordering::Relaxed);
                    std::hint::spin_loop();
                }
            })
        };

        while counter.load(Ordering::Relaxed) == 0 {
            std::thread::yield_now();
        }

        let suspender = SignalSuspender::new();
        let (before, after) = with_suspended(&suspender, || {
            let before = counter.load(Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            (before, counter.load(Ordering::SeqCst))
        })
        .unwrap();
        assert_eq!(before, after);

        let resumed_from = counter.load(Ordering::SeqCst);
        while counter.load(Ordering::SeqCst) == resumed_from {
            std::thread::yield_now();
        }

        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();
    }
}
