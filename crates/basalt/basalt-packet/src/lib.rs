//! `basalt-packet`: the self-describing record carried in transport frames.
//!
//! A packet is a uuid id, a repeatable multiset of string key/value headers,
//! and a byte payload, serialized as one flat buffer:
//!
//! ```text
//! ┌───────────────────────────────┐
//! │ id (36 chars + NUL, pad to 8) │
//! ├───────────────────────────────┤
//! │ num headers (u64)             │
//! ├───────────────────────────────┤
//! │ offset of hdr 0 key   (u64)   │
//! │ offset of hdr 0 val   (u64)   │
//! │ ...                           │
//! │ offset of payload     (u64)   │
//! ├───────────────────────────────┤
//! │ key/val bytes, NUL-terminated │
//! ├───────────────────────────────┤
//! │ payload bytes                 │
//! └───────────────────────────────┘
//! ```
//!
//! All offsets are measured from the packet's start, so a serialized packet
//! is position-independent and can be read in place inside a frame. Header
//! *order* is not part of the contract; compare headers as a multiset.

mod packet;
mod view;

pub use packet::{Packet, PacketStats};
pub use view::PacketView;

/// Reserved repeatable header key referencing the ids of other packets.
pub const DEP_KEY: &str = "a0_deps";

/// Length of a packet id: a hyphenated UUIDv4.
pub const ID_LEN: usize = 36;

pub(crate) const ID_FIELD: usize = 40; // 36 + NUL, padded to 8
pub(crate) const NUM_OFF: usize = ID_FIELD;
pub(crate) const TABLE_OFF: usize = NUM_OFF + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("packet buffer is truncated ({need} bytes needed, {have} present)")]
    Truncated { need: usize, have: usize },

    #[error("packet id is malformed")]
    BadId,

    #[error("packet offset table is corrupt")]
    BadOffsets,

    #[error("packet header text is not utf-8")]
    BadUtf8,
}
