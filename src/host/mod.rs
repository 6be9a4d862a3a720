//! Host-facing protocol: envelopes, the serialized command server, the
//! browser bridge and the stdio transport.

pub mod bridge;
pub mod channel;
pub mod contract;
pub mod stdio;
