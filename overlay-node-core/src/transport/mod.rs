//! Datagram transports and the bind protocol.
//!
//! A [`Transport`] binds the node to a local port on request and sends
//! [`Envelope`]s to other nodes. Inbound envelopes are delivered through the
//! receiver handed out when the transport is created.

use crate::address::Address;
use crate::protocol::Envelope;
use async_trait::async_trait;
use uuid::Uuid;

pub mod memory;
pub mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

/// Ask the transport to bind the port of `address`.
///
/// A port of `0` asks for an ephemeral port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindRequest {
    pub id: Uuid,
    pub address: Address,
    pub is_bootstrap: bool,
}

impl BindRequest {
    pub fn new(address: Address, is_bootstrap: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            address,
            is_bootstrap,
        }
    }
    pub fn answer(&self, bound_port: u16) -> BindResponse {
        BindResponse {
            id: self.id,
            bound_port,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindResponse {
    pub id: Uuid,
    pub bound_port: u16,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind the requested port, replacing any previous binding.
    async fn bind(&self, request: BindRequest) -> anyhow::Result<BindResponse>;
    /// Send an envelope to its destination. Delivery is best effort.
    async fn send(&self, envelope: Envelope) -> anyhow::Result<()>;
}
