//! Robust priority-inheritance mutex and condition variable.
//!
//! Both types are `#[repr(C)]` and designed to be overlaid on shared memory
//! at a fixed offset; the all-zero state is valid (unlocked, no waiters).
//! Pointers inside [`Mtx`] are robust-list linkage that is only meaningful
//! in the owner's address space while the lock is held.
//!
//! The state machines are:
//!
//! **lock**: CAS `0 → tid` for the uncontended path, otherwise
//! `FUTEX_LOCK_PI` so the kernel queues us with priority inheritance. If the
//! previous owner died we still *hold* the lock, but get
//! [`Acquire::OwnerDead`] so the protected data can be repaired.
//!
//! **unlock**: only the owner may unlock. If the word still carries the
//! owner-died flag (the owner never called [`Mtx::consistent`]), the unlock
//! poisons the word to the unrecoverable encoding; every later lock attempt
//! fails with [`SyncError::Unrecoverable`].
//!
//! **wait**: snapshot the condition counter, unlock, then
//! `FUTEX_WAIT_REQUEUE_PI`. Wakers bump the counter and requeue waiters
//! directly onto the mutex word, so a successful wake returns with the
//! mutex already held by kernel-arbitrated PI handoff.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::ftx::{self, Ftx};
use crate::robust;
use crate::time::TimeMono;

/// How a lock was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Acquire {
    /// Normal acquisition.
    Clean,
    /// The previous owner died while holding the lock. The lock *is* held;
    /// the caller must repair the protected state and call
    /// [`Mtx::consistent`] before unlocking, or the mutex poisons.
    OwnerDead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("mutex is already locked")]
    Busy,

    #[error("deadline expired")]
    TimedOut,

    #[error("calling thread already owns the mutex")]
    Deadlock,

    #[error("calling thread does not own the mutex")]
    NotOwner,

    #[error("mutex is not marked inconsistent")]
    NotInconsistent,

    #[error("mutex was abandoned in an unrecoverable state")]
    Unrecoverable,

    #[error("unexpected futex error (errno {0})")]
    Os(i32),
}

/// A robust, priority-inheriting, process-shared mutex.
#[repr(C)]
pub struct Mtx {
    // Robust-list linkage. `next` must stay the first field: the kernel
    // treats the entry address as a `struct robust_list`.
    next: AtomicPtr<Mtx>,
    prev: AtomicPtr<Mtx>,
    ftx: Ftx,
}

impl Mtx {
    /// Byte offset of the futex word, reported to the kernel as the robust
    /// list's `futex_offset`.
    pub(crate) const FTX_OFFSET: usize = 16;

    /// An unlocked mutex. Equivalent to zeroed memory.
    pub const fn new() -> Self {
        Mtx {
            next: AtomicPtr::new(std::ptr::null_mut()),
            prev: AtomicPtr::new(std::ptr::null_mut()),
            ftx: Ftx::new(0),
        }
    }

    pub(crate) fn link_next(&self) -> &AtomicPtr<Mtx> {
        &self.next
    }

    pub(crate) fn link_prev(&self) -> &AtomicPtr<Mtx> {
        &self.prev
    }

    pub(crate) fn ftx(&self) -> &Ftx {
        &self.ftx
    }

    /// Locks, blocking until acquired or `deadline` passes.
    pub fn timedlock(&self, deadline: TimeMono) -> Result<Acquire, SyncError> {
        self.timedlock_impl(Some(&deadline))
    }

    /// Locks, blocking indefinitely.
    pub fn lock(&self) -> Result<Acquire, SyncError> {
        self.timedlock_impl(None)
    }

    fn timedlock_impl(&self, deadline: Option<&TimeMono>) -> Result<Acquire, SyncError> {
        robust::op_start(self);
        let res = self.timedlock_robust(deadline);
        if res.is_ok() {
            robust::op_add(self);
        }
        robust::op_end();
        res
    }

    pub(crate) fn timedlock_robust(
        &self,
        deadline: Option<&TimeMono>,
    ) -> Result<Acquire, SyncError> {
        let tid = robust::tid();

        loop {
            if ftx::notrecoverable(self.ftx.load(Ordering::Acquire)) {
                return Err(SyncError::Unrecoverable);
            }

            // Uncontended path: no kernel involvement.
            if self
                .ftx
                .compare_exchange(0, tid, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(Acquire::Clean);
            }

            match ftx::lock_pi(&self.ftx, deadline) {
                Ok(()) => {
                    return Ok(if ftx::owner_died(self.ftx.load(Ordering::Acquire)) {
                        Acquire::OwnerDead
                    } else {
                        Acquire::Clean
                    });
                }
                Err(libc::EINTR) => continue,
                Err(libc::ETIMEDOUT) => return Err(SyncError::TimedOut),
                Err(libc::EDEADLK) => return Err(SyncError::Deadlock),
                Err(e) => return Err(SyncError::Os(e)),
            }
        }
    }

    /// Attempts the lock without blocking.
    pub fn try_lock(&self) -> Result<Acquire, SyncError> {
        robust::op_start(self);
        let res = self.try_lock_impl();
        robust::op_end();
        res
    }

    fn try_lock_impl(&self) -> Result<Acquire, SyncError> {
        let tid = robust::tid();

        let old = match self
            .ftx
            .compare_exchange(0, tid, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => {
                robust::op_add(self);
                return Ok(Acquire::Clean);
            }
            Err(old) => old,
        };

        if ftx::notrecoverable(old) {
            return Err(SyncError::Unrecoverable);
        }
        if !ftx::owner_died(old) {
            return Err(SyncError::Busy);
        }

        // The owner died. Ask the kernel to hand the word over.
        match ftx::trylock_pi(&self.ftx) {
            Ok(()) => {
                robust::op_add(self);
                Ok(if ftx::owner_died(self.ftx.load(Ordering::Acquire)) {
                    Acquire::OwnerDead
                } else {
                    Acquire::Clean
                })
            }
            // Somebody else adopted it first.
            Err(libc::EAGAIN) => Err(SyncError::Busy),
            Err(_) => Err(SyncError::Unrecoverable),
        }
    }

    /// Clears the owner-died flag after the caller repaired the protected
    /// state. Only the current owner of an inconsistent mutex may call this.
    pub fn consistent(&self) -> Result<(), SyncError> {
        let val = self.ftx.load(Ordering::Acquire);

        if !ftx::owner_died(val) {
            return Err(SyncError::NotInconsistent);
        }
        if ftx::tid_of(val) != robust::tid() {
            return Err(SyncError::NotOwner);
        }

        self.ftx.fetch_and(!ftx::FUTEX_OWNER_DIED, Ordering::AcqRel);
        Ok(())
    }

    /// Unlocks. Only the owner may unlock; unlocking an inconsistent mutex
    /// transitions it to the unrecoverable state.
    pub fn unlock(&self) -> Result<(), SyncError> {
        let tid = robust::tid();
        let val = self.ftx.load(Ordering::Acquire);

        if ftx::tid_of(val) != tid {
            return Err(SyncError::NotOwner);
        }

        let poison = if ftx::owner_died(val) {
            ftx::FTX_NOTRECOVERABLE
        } else {
            0
        };

        robust::op_start(self);
        robust::op_del(self);

        // If the word is exactly our tid there are no waiters and the
        // kernel can stay out of it.
        if self
            .ftx
            .compare_exchange(tid, poison, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            let _ = ftx::unlock_pi(&self.ftx);
            if poison != 0 {
                // The kernel unlock rewrote the word; reapply the poison.
                self.ftx.fetch_or(poison, Ordering::AcqRel);
            }
        }

        robust::op_end();
        Ok(())
    }
}

impl Default for Mtx {
    fn default() -> Self {
        Mtx::new()
    }
}

/// A process-shared condition variable: a single 32-bit counter.
///
/// Wakes requeue waiters onto the paired mutex with `FUTEX_CMP_REQUEUE_PI`,
/// so woken threads return from [`Cnd::wait`] already holding the lock.
#[repr(C)]
pub struct Cnd {
    val: Ftx,
}

impl Cnd {
    pub const fn new() -> Self {
        Cnd { val: Ftx::new(0) }
    }

    /// Releases `mtx`, waits for a wake, and reacquires before returning.
    ///
    /// Spurious wakes are possible; callers loop on their predicate. The
    /// caller must hold `mtx`.
    pub fn wait(&self, mtx: &Mtx) -> Result<Acquire, SyncError> {
        self.timedwait_impl(mtx, None)
    }

    /// Like [`Cnd::wait`] with an absolute deadline. On timeout the mutex is
    /// reacquired (without a deadline) and [`SyncError::TimedOut`] returned.
    pub fn timedwait(&self, mtx: &Mtx, deadline: TimeMono) -> Result<Acquire, SyncError> {
        self.timedwait_impl(mtx, Some(&deadline))
    }

    fn timedwait_impl(&self, mtx: &Mtx, deadline: Option<&TimeMono>) -> Result<Acquire, SyncError> {
        let snapshot = self.val.load(Ordering::Acquire);

        // Let others in to do the thing that will eventually wake us.
        mtx.unlock()?;

        robust::op_start(mtx);

        let mut wait_res;
        loop {
            wait_res = ftx::wait_requeue_pi(&self.val, snapshot, deadline, mtx.ftx());
            if wait_res != Err(libc::EINTR) {
                break;
            }
        }

        let err = match wait_res {
            // Requeue wake: the kernel already granted us the mutex.
            Ok(()) => None,
            Err(libc::ETIMEDOUT) => {
                // Manual reacquire; the timeout is kept over any relock
                // outcome.
                let _ = mtx.timedlock_robust(None);
                Some(SyncError::TimedOut)
            }
            Err(libc::EAGAIN) => {
                // The counter moved between unlock and wait: the wake we
                // were waiting for already happened.
                match mtx.timedlock_robust(None) {
                    Ok(_) => None,
                    Err(e) => Some(e),
                }
            }
            Err(e) => Some(SyncError::Os(e)),
        };

        robust::op_add(mtx);

        let res = match err {
            Some(e) => Err(e),
            None => Ok(if ftx::owner_died(mtx.ftx().load(Ordering::Acquire)) {
                Acquire::OwnerDead
            } else {
                Acquire::Clean
            }),
        };

        robust::op_end();
        res
    }

    /// Wakes one waiter.
    pub fn signal(&self, mtx: &Mtx) -> Result<(), SyncError> {
        self.wake(mtx, 1)
    }

    /// Wakes all waiters.
    pub fn broadcast(&self, mtx: &Mtx) -> Result<(), SyncError> {
        self.wake(mtx, i32::MAX as u32)
    }

    fn wake(&self, mtx: &Mtx, cnt: u32) -> Result<(), SyncError> {
        let mut val = self.val.fetch_add(1, Ordering::AcqRel).wrapping_add(1);

        loop {
            match ftx::cmp_requeue_pi(&self.val, val, mtx.ftx(), cnt) {
                Ok(()) => return Ok(()),
                // Another waker bumped the counter under us; retry with the
                // current value.
                Err(libc::EAGAIN) => val = self.val.load(Ordering::Acquire),
                Err(e) => return Err(SyncError::Os(e)),
            }
        }
    }
}

impl Default for Cnd {
    fn default() -> Self {
        Cnd::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn ftx_offset_matches_layout() {
        assert_eq!(Mtx::FTX_OFFSET, mem::offset_of!(Mtx, ftx));
    }

    #[test]
    fn lock_unlock_roundtrip() {
        let mtx = Mtx::new();
        assert_eq!(mtx.lock(), Ok(Acquire::Clean));
        assert_eq!(mtx.unlock(), Ok(()));
        assert_eq!(mtx.try_lock(), Ok(Acquire::Clean));
        assert_eq!(mtx.unlock(), Ok(()));
    }

    #[test]
    fn unlock_requires_ownership() {
        let mtx = Mtx::new();
        assert_eq!(mtx.unlock(), Err(SyncError::NotOwner));
    }

    #[test]
    fn consistent_requires_inconsistency() {
        let mtx = Mtx::new();
        let _ = mtx.lock().unwrap();
        assert_eq!(mtx.consistent(), Err(SyncError::NotInconsistent));
        mtx.unlock().unwrap();
    }

    #[test]
    fn try_lock_reports_busy_across_threads() {
        let mtx = Arc::new(Mtx::new());
        let _ = mtx.lock().unwrap();

        let m = Arc::clone(&mtx);
        std::thread::spawn(move || {
            assert_eq!(m.try_lock(), Err(SyncError::Busy));
        })
        .join()
        .unwrap();

        mtx.unlock().unwrap();
    }

    #[test]
    fn timedlock_times_out_under_contention() {
        let mtx = Arc::new(Mtx::new());
        let _ = mtx.lock().unwrap();

        let m = Arc::clone(&mtx);
        std::thread::spawn(move || {
            let deadline = TimeMono::after(Duration::from_millis(50));
            assert_eq!(m.timedlock(deadline), Err(SyncError::TimedOut));
        })
        .join()
        .unwrap();

        mtx.unlock().unwrap();
    }

    fn die_holding(mtx: &Arc<Mtx>) {
        // The thread exits with the mutex still linked in its robust list;
        // the kernel flags the word with OWNER_DIED at thread exit.
        let m = Arc::clone(mtx);
        std::thread::spawn(move || {
            let _ = m.lock().unwrap();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn robust_handoff_recovers() {
        let mtx = Arc::new(Mtx::new());
        die_holding(&mtx);

        assert_eq!(mtx.lock(), Ok(Acquire::OwnerDead));
        mtx.consistent().unwrap();
        mtx.unlock().unwrap();

        assert_eq!(mtx.lock(), Ok(Acquire::Clean));
        mtx.unlock().unwrap();
    }

    #[test]
    fn unlocking_inconsistent_mutex_poisons_it() {
        let mtx = Arc::new(Mtx::new());
        die_holding(&mtx);

        assert_eq!(mtx.lock(), Ok(Acquire::OwnerDead));
        // Skipping consistent() on purpose.
        mtx.unlock().unwrap();

        assert_eq!(mtx.lock(), Err(SyncError::Unrecoverable));
        assert_eq!(mtx.try_lock(), Err(SyncError::Unrecoverable));
    }

    #[test]
    fn try_lock_adopts_dead_owner() {
        let mtx = Arc::new(Mtx::new());
        die_holding(&mtx);

        assert_eq!(mtx.try_lock(), Ok(Acquire::OwnerDead));
        mtx.consistent().unwrap();
        mtx.unlock().unwrap();
    }

    #[test]
    fn signal_wakes_waiter_with_mutex_held() {
        let mtx = Arc::new(Mtx::new());
        let cnd = Arc::new(Cnd::new());
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let (m, c, f) = (Arc::clone(&mtx), Arc::clone(&cnd), Arc::clone(&flag));
        let waiter = std::thread::spawn(move || {
            let _ = m.lock().unwrap();
            while !f.load(Ordering::Acquire) {
                let _ = c.wait(&m).unwrap();
            }
            m.unlock().unwrap();
        });

        // Give the waiter time to park.
        std::thread::sleep(Duration::from_millis(50));

        let _ = mtx.lock().unwrap();
        flag.store(true, Ordering::Release);
        cnd.signal(&mtx).unwrap();
        mtx.unlock().unwrap();

        waiter.join().unwrap();
    }

    #[test]
    fn timedwait_times_out_and_reacquires() {
        let mtx = Mtx::new();
        let cnd = Cnd::new();

        let _ = mtx.lock().unwrap();
        let deadline = TimeMono::after(Duration::from_millis(50));
        assert_eq!(cnd.timedwait(&mtx, deadline), Err(SyncError::TimedOut));
        // Timeout hands the mutex back; unlocking must succeed.
        mtx.unlock().unwrap();
    }
}
