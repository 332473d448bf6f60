//! Spin-based lock usable in VMX root, where nothing may block on a scheduler.
//!
//! Unlike a guard-based mutex, the lock is released explicitly and may be released by a
//! core other than the one that acquired it. The operating core uses that to release
//! halted cores.

use core::{
    hint::spin_loop,
    sync::atomic::{AtomicBool, Ordering},
};

pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Try to acquire the lock without spinning. Returns `false` if already held.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn lock(&self) {
        self.lock_with(|| {});
    }

    /// Spins until the lock is acquired, calling `on_spin` between attempts.
    pub fn lock_with(&self, mut on_spin: impl FnMut()) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Wait on a plain load so the cache line is not hammered with writes.
            while self.locked.load(Ordering::Relaxed) {
                on_spin();
                spin_loop();
            }
        }
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{sync::Arc, thread},
    };

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
    }

    #[test]
    fn another_thread_can_release() {
        let lock = Arc::new(SpinLock::new());
        lock.lock();

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || {
                lock.lock();
                lock.unlock();
            })
        };

        lock.unlock();
        waiter.join().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn spin_hook_runs_while_waiting() {
        let lock = SpinLock::new();
        lock.lock();

        let mut spins = 0;
        lock.lock_with(|| {
            spins += 1;
            if spins == 3 {
                lock.unlock();
            }
        });
        assert_eq!(spins, 3);
        assert!(lock.is_locked());
    }
}
