//! # lode-network
//! One-frame-per-connection TCP gossip: wire messages, the known-peer
//! registry, and the node server with its handlers.

pub mod message;
pub mod peers;
pub mod server;

pub use message::{InvKind, Message};
pub use peers::KnownPeers;
pub use server::{dial, send_tx, Node, NodeConfig, NodeState};
