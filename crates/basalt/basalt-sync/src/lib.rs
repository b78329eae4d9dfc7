//! `basalt-sync`: process-shared synchronization primitives.
//!
//! The primitives here live *inside* shared memory: any process that maps
//! the bytes can lock the same [`Mtx`] and wait on the same [`Cnd`]. Three
//! properties distinguish them from `std::sync`:
//!
//! - **Robust**: every lock is registered on a per-thread robust list, so
//!   the kernel releases it (flagging `OwnerDead`) if the owner dies.
//! - **Priority inheritance**: contention goes through the PI futex family,
//!   so a waiting high-priority thread lends its priority to the owner.
//! - **Zero-initialized**: an all-zero word is a valid unlocked mutex, which
//!   is exactly what a freshly created shared-memory file contains.
//!
//! Recovery protocol: a lock that returns [`Acquire::OwnerDead`] hands the
//! caller a held-but-inconsistent mutex. Repair the protected data, call
//! [`Mtx::consistent`], then unlock. Unlocking *without* marking consistent
//! poisons the mutex permanently ([`SyncError::Unrecoverable`]).

mod ftx;
mod mtx;
mod robust;
mod time;

pub use mtx::{Acquire, Cnd, Mtx, SyncError};
pub use time::TimeMono;
