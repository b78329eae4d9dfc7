//! Raw futex operations.
//!
//! Thin wrappers over `syscall(SYS_futex, ...)` for the priority-inheritance
//! family. Everything here operates on a 32-bit futex word whose contents
//! follow the kernel's robust-futex encoding: the low 30 bits hold the owner
//! tid, bit 30 flags a dead owner, bit 31 flags kernel-managed waiters.

use std::ptr;
use std::sync::atomic::AtomicU32;

use crate::time::TimeMono;

/// The kernel-facing futex word.
pub(crate) type Ftx = AtomicU32;

// linux/futex.h word encoding; libc does not export these.
pub(crate) const FUTEX_OWNER_DIED: u32 = 0x4000_0000;
pub(crate) const FUTEX_TID_MASK: u32 = 0x3fff_ffff;

/// Owner-died plus a saturated tid: the permanently poisoned state.
pub(crate) const FTX_NOTRECOVERABLE: u32 = FUTEX_TID_MASK | FUTEX_OWNER_DIED;

#[inline]
pub(crate) fn tid_of(word: u32) -> u32 {
    word & FUTEX_TID_MASK
}

#[inline]
pub(crate) fn owner_died(word: u32) -> bool {
    word & FUTEX_OWNER_DIED != 0
}

#[inline]
pub(crate) fn notrecoverable(word: u32) -> bool {
    word & FTX_NOTRECOVERABLE == FTX_NOTRECOVERABLE
}

pub(crate) type Errno = i32;

fn futex(
    uaddr: *const Ftx,
    op: libc::c_int,
    val: u32,
    timeout: *const libc::timespec,
    uaddr2: *const Ftx,
    val3: u32,
) -> Result<(), Errno> {
    let rc = unsafe { libc::syscall(libc::SYS_futex, uaddr, op, val, timeout, uaddr2, val3) };
    if rc == -1 {
        Err(std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EINVAL))
    } else {
        Ok(())
    }
}

fn deadline_ptr(deadline: Option<&TimeMono>) -> *const libc::timespec {
    deadline.map_or(ptr::null(), |t| t.as_timespec())
}

/// Acquire with priority inheritance, blocking in the kernel.
pub(crate) fn lock_pi(ftx: &Ftx, deadline: Option<&TimeMono>) -> Result<(), Errno> {
    futex(ftx, libc::FUTEX_LOCK_PI, 0, deadline_ptr(deadline), ptr::null(), 0)
}

/// Kernel-arbitrated trylock. Used to adopt a word left behind by a dead
/// owner; fails with EAGAIN if someone else gets there first.
pub(crate) fn trylock_pi(ftx: &Ftx) -> Result<(), Errno> {
    futex(ftx, libc::FUTEX_TRYLOCK_PI, 0, ptr::null(), ptr::null(), 0)
}

/// Release and wake the highest-priority waiter.
pub(crate) fn unlock_pi(ftx: &Ftx) -> Result<(), Errno> {
    futex(ftx, libc::FUTEX_UNLOCK_PI, 0, ptr::null(), ptr::null(), 0)
}

/// Wait on `cnd` until requeued onto (and granted) the mutex word.
///
/// A zero return means the caller *owns the mutex*: the kernel performs the
/// PI acquisition as part of the requeue wake.
pub(crate) fn wait_requeue_pi(
    cnd: &Ftx,
    val: u32,
    deadline: Option<&TimeMono>,
    mtx_ftx: &Ftx,
) -> Result<(), Errno> {
    futex(
        cnd,
        libc::FUTEX_WAIT_REQUEUE_PI,
        val,
        deadline_ptr(deadline),
        mtx_ftx,
        0,
    )
}

/// Wake one waiter on `cnd` and requeue up to `requeue_cnt` more onto the
/// mutex word. Fails with EAGAIN if `*cnd != val`.
pub(crate) fn cmp_requeue_pi(
    cnd: &Ftx,
    val: u32,
    mtx_ftx: &Ftx,
    requeue_cnt: u32,
) -> Result<(), Errno> {
    // nr_requeue rides in the timeout argument slot.
    futex(
        cnd,
        libc::FUTEX_CMP_REQUEUE_PI,
        1,
        requeue_cnt as usize as *const libc::timespec,
        mtx_ftx,
        val,
    )
}
