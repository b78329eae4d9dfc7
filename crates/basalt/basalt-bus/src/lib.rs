//! `basalt-bus`: pub/sub and RPC over the shared-memory transport.
//!
//! Both patterns are thin framings: every message is a serialized
//! [`Packet`] committed as an ordinary transport frame. Pub/sub is the
//! transport's natural shape; RPC adds two headers (`a0_rpc_type` tags a
//! frame as request, response, or cancel, and `a0_req_id` correlates
//! responses with requests). There is no separate channel for any of it.
//!
//! Each handle runs one background [`worker`](Worker) thread that holds a
//! cursor on the topic's transport, parks on the in-arena condition
//! variable while idle, and invokes callbacks with the lock released.

mod pubsub;
mod rpc;
pub mod topic;
mod worker;

pub use basalt_packet::{Packet, PacketView};
pub use pubsub::{Publisher, Subscriber};
pub use rpc::{Request, RpcClient, RpcServer};
pub use worker::Init;

use basalt_packet::PacketError;
use basalt_transport::{Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("handle is closed")]
    Shutdown,

    #[error("response id must differ from the request id")]
    InvalidReply,

    #[error(transparent)]
    File(#[from] basalt_arena::FileError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Serializes `pkt` into a fresh frame and commits it.
pub(crate) fn commit_packet(transport: &Transport, pkt: &Packet) -> Result<(), BusError> {
    let mut locked = transport.lock()?;
    {
        let frame = locked.alloc(pkt.serial_size())?;
        pkt.serialize_into(frame.payload)?;
    }
    locked.commit()?;
    Ok(())
}
