//! `basalt-arena`: memory regions shared between processes.
//!
//! An arena is a contiguous byte buffer plus a mode describing how other
//! processes use it simultaneously. The usual backing is a fixed-size file
//! mapped into every participating process; [`ArenaFile`] handles the
//! create-or-open dance and path resolution against `A0_ROOT`.
//!
//! Brand-new arena files are all zeroes. The transport layer treats a
//! zeroed header as uninitialized, so no separate init step is needed here.

mod arena;
mod file;

pub use arena::{Arena, ArenaMode};
pub use file::{ArenaFile, FileError, FileOptions, ROOT_ENV, remove, remove_all, resolve};
