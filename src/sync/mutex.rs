//! Process-shared recursive mutex embedded in a segment

use std::cell::UnsafeCell;
use std::mem;

/// A recursive mutex whose storage lives inside the shared segment, usable
/// by every process mapping it.
///
/// The mutex is initialized exactly once, by the process that creates the
/// segment, with `PTHREAD_PROCESS_SHARED` and `PTHREAD_MUTEX_RECURSIVE` set.
/// Recursion means a holder may re-acquire without deadlocking itself, which
/// is what lets explicit `lock()` bracket a batch of CRUD calls that each
/// take the lock internally.
///
/// The mutex is not robust: if a process dies while holding it, every other
/// process blocks forever. This mirrors the underlying primitive and is a
/// documented limitation of the store, not something handled here.
#[repr(C)]
pub struct SharedMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for SharedMutex {}
unsafe impl Sync for SharedMutex {}

impl SharedMutex {
    /// Placeholder storage for embedding in a not-yet-initialized header
    pub(crate) fn uninit() -> Self {
        Self {
            // Overwritten by init() before first use
            inner: UnsafeCell::new(unsafe { mem::zeroed() }),
        }
    }

    /// Initialize the mutex in place.
    ///
    /// # Safety
    /// The storage must already live at its final location inside the shared
    /// mapping, exactly one process may call this, and it must happen before
    /// any other process can reach the mutex (the bootstrap state word
    /// enforces both).
    pub unsafe fn init(&self) {
        let mut attr: libc::pthread_mutexattr_t = mem::zeroed();
        libc::pthread_mutexattr_init(&mut attr);
        libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_RECURSIVE);
        libc::pthread_mutex_init(self.inner.get(), &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
    }

    /// Acquire the mutex, blocking without timeout
    pub fn lock(&self) {
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_lock failed");
    }

    /// Release the mutex
    pub fn unlock(&self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed");
    }

    /// Try to acquire the mutex without blocking; returns whether it was taken
    pub fn try_lock(&self) -> bool {
        unsafe { libc::pthread_mutex_trylock(self.inner.get()) == 0 }
    }

    /// Acquire the mutex and return a guard releasing it on drop
    pub fn guard(&self) -> SharedMutexGuard<'_> {
        self.lock();
        SharedMutexGuard { mutex: self }
    }
}

/// RAII guard for a [`SharedMutex`]
pub struct SharedMutexGuard<'a> {
    mutex: &'a SharedMutex,
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
