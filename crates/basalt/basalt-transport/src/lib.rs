//! `basalt-transport`: a bounded, crash-resilient, multi-process ring log.
//!
//! The transport overlays a fixed header on an [`Arena`](basalt_arena::Arena)
//! and maintains an append-only log of variable-size frames behind the
//! header. One writer appends at a time (single-writer is enforced by the
//! in-arena mutex, not assumed), any number of readers iterate, and the ring
//! evicts its oldest frames when space runs out.
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ magic │ committed state │ working state │ mtx │ cnd │ pad    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Frame { seq │ prev_off │ next_off │ payload_size │ payload } │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Frame ...                                                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Crash safety
//!
//! Writers mutate the *working* state and publish with [`commit`], which
//! snapshots working over *committed* and broadcasts the condition variable.
//! Readers only ever consult committed state, so a writer that dies
//! mid-append leaves every committed frame intact; the next locker observes
//! the divergence (via the robust mutex) and rolls the working state back.
//!
//! [`commit`]: LockedTransport::commit

mod layout;
mod transport;

pub use basalt_sync::TimeMono;
pub use transport::{FrameMut, FrameRef, LockedTransport, Transport, TransportError};
