//! Node identity and overlay addresses.
//!
//! An [`Address`] is the full description of how to reach a node: its
//! [`BasicAddress`] (ip, port and node id) decorated with the [`NatTrait`]
//! that was detected for it. Addresses are immutable values; every change of
//! ip, port or NAT trait produces a new `Address`.
//!
//! ```rust
//! use overlay_node_core::address::{Address, NodeId};
//! use std::net::Ipv4Addr;
//!
//! let adr = Address::open(Ipv4Addr::LOCALHOST.into(), 23334, NodeId::from(1));
//! let canonical = adr.with_port(23333);
//! assert_eq!(adr.base().node_id(), canonical.base().node_id());
//! assert_ne!(adr.base(), canonical.base());
//! ```

use crate::nat::NatTrait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Identifier of a node in the overlay.
#[repr(transparent)]
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u32 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity portion of an address, used as the key of peer tables.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug, Serialize, Deserialize)]
pub struct BasicAddress {
    ip: IpAddr,
    port: u16,
    node_id: NodeId,
}

impl BasicAddress {
    pub fn new(ip: IpAddr, port: u16, node_id: NodeId) -> Self {
        Self { ip, port, node_id }
    }
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
    pub fn port(&self) -> u16 {
        self.port
    }
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for BasicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:<{}>", self.socket_addr(), self.node_id)
    }
}

/// A [`BasicAddress`] decorated with the NAT trait of the node behind it.
#[derive(Eq, PartialEq, Hash, Clone, Debug, Serialize, Deserialize)]
pub struct Address {
    base: BasicAddress,
    nat: NatTrait,
}

impl Address {
    pub fn new(base: BasicAddress, nat: NatTrait) -> Self {
        Self { base, nat }
    }
    /// An address of a directly reachable node.
    pub fn open(ip: IpAddr, port: u16, node_id: NodeId) -> Self {
        Self::new(BasicAddress::new(ip, port, node_id), NatTrait::Open)
    }
    pub fn base(&self) -> BasicAddress {
        self.base
    }
    pub fn ip(&self) -> IpAddr {
        self.base.ip
    }
    pub fn port(&self) -> u16 {
        self.base.port
    }
    pub fn node_id(&self) -> NodeId {
        self.base.node_id
    }
    pub fn nat(&self) -> &NatTrait {
        &self.nat
    }
    pub fn socket_addr(&self) -> SocketAddr {
        self.base.socket_addr()
    }
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(BasicAddress::new(self.base.ip, port, self.base.node_id), self.nat.clone())
    }
    pub fn with_ip(&self, ip: IpAddr) -> Self {
        Self::new(BasicAddress::new(ip, self.base.port, self.base.node_id), self.nat.clone())
    }
    pub fn with_nat(&self, nat: NatTrait) -> Self {
        Self::new(self.base, nat)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.base, self.nat)
    }
}
