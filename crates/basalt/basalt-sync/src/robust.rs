//! Per-thread robust-list bookkeeping.
//!
//! Each thread lazily registers one `robust_list_head` with the kernel.
//! While a thread holds a [`Mtx`] the mutex is linked into that list; if the
//! thread dies, the kernel walks the list, releases each entry, and flags
//! its futex word with `FUTEX_OWNER_DIED`. The `list_op_pending` slot
//! brackets the link/unlink transitions so a death mid-operation is cleaned
//! up too.
//!
//! The registration and the cached tid are invalidated in a forked child:
//! the child is a different task and must re-register with its own head.

use std::cell::Cell;
use std::mem;
use std::ptr;
use std::sync::Once;
use std::sync::atomic::{Ordering, fence};

use crate::mtx::Mtx;

/// Kernel `struct robust_list_head`. The first word of every list entry is
/// its `next` pointer, and the futex word of an entry lives at
/// `entry + futex_offset`. [`Mtx`] puts `next` first and its futex word at a
/// fixed offset to satisfy exactly that contract.
#[repr(C)]
struct RobustListHead {
    next: Cell<*mut Mtx>,
    futex_offset: Cell<libc::c_long>,
    list_op_pending: Cell<*mut Mtx>,
}

struct RobustThread {
    head: RobustListHead,
    registered: Cell<bool>,
    tid: Cell<u32>,
}

thread_local! {
    static ROBUST: RobustThread = const {
        RobustThread {
            head: RobustListHead {
                next: Cell::new(ptr::null_mut()),
                futex_offset: Cell::new(0),
                list_op_pending: Cell::new(ptr::null_mut()),
            },
            registered: Cell::new(false),
            tid: Cell::new(0),
        }
    };
}

static ATFORK: Once = Once::new();

extern "C" fn atfork_child() {
    // The child inherited a registration pointing at the parent's head and
    // a cached tid belonging to the parent thread. Drop both; first use in
    // the child re-registers.
    ROBUST.with(|r| {
        r.registered.set(false);
        r.tid.set(0);
    });
}

fn sentinel(r: &RobustThread) -> *mut Mtx {
    // The head doubles as the circular-list sentinel; only its first word
    // (the next pointer) is ever read through this alias.
    &r.head as *const RobustListHead as *mut Mtx
}

fn ensure_registered(r: &RobustThread) {
    if r.registered.get() {
        return;
    }

    ATFORK.call_once(|| unsafe {
        libc::pthread_atfork(None, None, Some(atfork_child));
    });

    r.head.next.set(sentinel(r));
    r.head.futex_offset.set(Mtx::FTX_OFFSET as libc::c_long);
    r.head.list_op_pending.set(ptr::null_mut());
    unsafe {
        libc::syscall(
            libc::SYS_set_robust_list,
            &r.head as *const RobustListHead,
            mem::size_of::<RobustListHead>(),
        );
    }
    r.registered.set(true);
}

/// The caller's kernel thread id, as stored into futex words.
pub(crate) fn tid() -> u32 {
    ROBUST.with(|r| {
        let cached = r.tid.get();
        if cached != 0 {
            return cached;
        }
        let t = unsafe { libc::syscall(libc::SYS_gettid) } as u32;
        r.tid.set(t);
        t
    })
}

/// Marks `mtx` as the operation in flight, so the kernel can finish the
/// transition if this thread dies before [`op_end`].
pub(crate) fn op_start(mtx: &Mtx) {
    ROBUST.with(|r| {
        ensure_registered(r);
        r.head.list_op_pending.set(mtx as *const Mtx as *mut Mtx);
    });
    fence(Ordering::SeqCst);
}

pub(crate) fn op_end() {
    fence(Ordering::SeqCst);
    ROBUST.with(|r| r.head.list_op_pending.set(ptr::null_mut()));
}

/// Links a just-acquired mutex at the front of this thread's robust list.
pub(crate) fn op_add(mtx: &Mtx) {
    ROBUST.with(|r| {
        let sent = sentinel(r);
        let old_first = r.head.next.get();

        mtx.link_prev().store(sent, Ordering::Relaxed);
        mtx.link_next().store(old_first, Ordering::Relaxed);
        fence(Ordering::SeqCst);

        r.head.next.set(mtx as *const Mtx as *mut Mtx);
        if old_first != sent {
            unsafe { (*old_first).link_prev() }.store(mtx as *const Mtx as *mut Mtx, Ordering::Relaxed);
        }
    });
}

/// Unlinks a mutex that is about to be released.
pub(crate) fn op_del(mtx: &Mtx) {
    ROBUST.with(|r| {
        let sent = sentinel(r);
        let prev = mtx.link_prev().load(Ordering::Relaxed);
        let next = mtx.link_next().load(Ordering::Relaxed);

        if prev == sent {
            r.head.next.set(next);
        } else {
            unsafe { (*prev).link_next() }.store(next, Ordering::Relaxed);
        }
        if next != sent {
            unsafe { (*next).link_prev() }.store(prev, Ordering::Relaxed);
        }
    });
}
