//! Topic-name to arena-file mapping.
//!
//! Topics map to relative paths, which the arena layer resolves against
//! `A0_ROOT`. One topic name yields distinct files per pattern, so a pub/sub
//! topic and an RPC topic of the same name never share a transport.

pub fn pubsub_path(topic: &str) -> String {
    format!("basalt/{topic}.pubsub.a0")
}

pub fn rpc_path(topic: &str) -> String {
    format!("basalt/{topic}.rpc.a0")
}
