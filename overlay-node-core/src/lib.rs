//! # overlay-node-core
//!
//! Building blocks shared by overlay nodes: the address model, NAT traits,
//! the ping/pong wire envelope, transports and timers. The bootstrap
//! sequencing and liveness probing built on top of them live in the
//! `overlay-node` crate.
//!
//! - [`address`] - node ids, basic and decorated addresses
//! - [`nat`] - NAT traits, classifications and the detection/traversal collaborators
//! - [`protocol`] - wire envelope for ping and pong
//! - [`transport`] - bind protocol, UDP and in-memory transports
//! - [`timer`] - cancellable one-shot and periodic timeouts
//! - [`sample`] - gossip samples of candidate peers

pub mod address;
pub mod error;
pub mod nat;
pub mod protocol;
pub mod sample;
pub mod socket;
pub mod timer;
pub mod transport;
