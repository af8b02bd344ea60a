//! NAT traits and the NAT collaborators of a node.
//!
//! The detection algorithm and the traversal machinery live outside this
//! crate. A node only consumes their outcome through [`NatProbe`] and
//! [`NatTraverser`]:
//!
//! ```rust
//! use overlay_node_core::nat::{NatClassification, NatTrait};
//! use std::net::Ipv4Addr;
//!
//! let detected = NatClassification::nated(Ipv4Addr::new(1, 2, 3, 4).into());
//! let nat: NatTrait = detected.to_trait().unwrap();
//! assert!(nat.is_nated());
//! assert_eq!(nat.public_ip(), Some(Ipv4Addr::new(1, 2, 3, 4).into()));
//! ```

use crate::address::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// How the NAT maps an internal endpoint to external endpoints.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize, Default)]
pub enum MappingPolicy {
    #[default]
    EndpointIndependent,
    HostDependent,
    PortDependent,
}

/// How the NAT picks the external port of a new mapping.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize, Default)]
pub enum AllocationPolicy {
    #[default]
    PortPreservation,
    PortContiguity,
    Random,
}

/// Which inbound packets the NAT lets through an existing mapping.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize, Default)]
pub enum FilteringPolicy {
    #[default]
    EndpointIndependent,
    HostDependent,
    PortDependent,
}

/// Reachability of a node.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub enum NatTrait {
    /// Directly reachable.
    Open,
    /// Behind address and port translation.
    Nated {
        mapping: MappingPolicy,
        allocation: AllocationPolicy,
        filtering: FilteringPolicy,
        public_ip: Option<IpAddr>,
    },
}

impl NatTrait {
    /// A nated trait with the most permissive policies.
    pub fn nated(public_ip: Option<IpAddr>) -> Self {
        NatTrait::Nated {
            mapping: Default::default(),
            allocation: Default::default(),
            filtering: Default::default(),
            public_ip,
        }
    }
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, NatTrait::Open)
    }
    #[inline]
    pub fn is_nated(&self) -> bool {
        matches!(self, NatTrait::Nated { .. })
    }
    pub fn public_ip(&self) -> Option<IpAddr> {
        match self {
            NatTrait::Open => None,
            NatTrait::Nated { public_ip, .. } => *public_ip,
        }
    }
}

impl fmt::Display for NatTrait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatTrait::Open => write!(f, "open"),
            NatTrait::Nated {
                mapping,
                allocation,
                filtering,
                public_ip,
            } => {
                write!(f, "nat:{mapping:?}/{allocation:?}/{filtering:?}")?;
                if let Some(ip) = public_ip {
                    write!(f, "@{ip}")?;
                }
                Ok(())
            }
        }
    }
}

/// Outcome of a NAT detection run.
///
/// Only [`NatClassification::Open`] and [`NatClassification::Nated`] can be
/// turned into a usable [`NatTrait`]; everything else leaves the node without
/// a reachable address.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum NatClassification {
    Open,
    Nated {
        mapping: MappingPolicy,
        allocation: AllocationPolicy,
        filtering: FilteringPolicy,
        public_ip: Option<IpAddr>,
    },
    /// Behind a firewall that drops unsolicited traffic without translation.
    Firewall,
    /// No UDP traffic reaches the outside.
    UdpBlocked,
    Unknown,
}

impl NatClassification {
    pub fn nated(public_ip: IpAddr) -> Self {
        NatClassification::Nated {
            mapping: Default::default(),
            allocation: Default::default(),
            filtering: Default::default(),
            public_ip: Some(public_ip),
        }
    }
    /// The trait a node with this classification announces, if it has one.
    pub fn to_trait(&self) -> Option<NatTrait> {
        match self {
            NatClassification::Open => Some(NatTrait::Open),
            NatClassification::Nated {
                mapping,
                allocation,
                filtering,
                public_ip,
            } => Some(NatTrait::Nated {
                mapping: *mapping,
                allocation: *allocation,
                filtering: *filtering,
                public_ip: *public_ip,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for NatClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_trait() {
            Some(nat) => fmt::Display::fmt(&nat, f),
            None => write!(f, "{self:?}"),
        }
    }
}

/// Detects the NAT in front of a bound local address.
#[async_trait]
pub trait NatProbe: Send + Sync {
    async fn detect(&self, local: Address) -> anyhow::Result<NatClassification>;
}

/// Sets up NAT traversal (relays, hole punching) for a nated self address.
///
/// Returning means the traversal layer is ready. It may hand back a refined
/// self address, e.g. one decorated with relay information.
#[async_trait]
pub trait NatTraverser: Send + Sync {
    async fn setup(&self, self_address: Address) -> anyhow::Result<Option<Address>>;
}

/// A probe that reports a preconfigured classification.
#[derive(Clone, Debug)]
pub struct StaticNatProbe {
    classification: NatClassification,
    delay: Duration,
}

impl StaticNatProbe {
    pub fn new(classification: NatClassification) -> Self {
        Self {
            classification,
            delay: Duration::ZERO,
        }
    }
    pub fn set_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl NatProbe for StaticNatProbe {
    async fn detect(&self, local: Address) -> anyhow::Result<NatClassification> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        log::debug!("static nat probe for {local}: {}", self.classification);
        Ok(self.classification.clone())
    }
}

/// A traverser with nothing to set up; ready immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateTraverser;

#[async_trait]
impl NatTraverser for ImmediateTraverser {
    async fn setup(&self, _self_address: Address) -> anyhow::Result<Option<Address>> {
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::{NatClassification, NatTrait};
    use std::net::Ipv4Addr;

    #[test]
    fn test_unsupported_classification_has_no_trait() {
        assert_eq!(NatClassification::Open.to_trait(), Some(NatTrait::Open));
        assert!(NatClassification::Firewall.to_trait().is_none());
        assert!(NatClassification::UdpBlocked.to_trait().is_none());
        assert!(NatClassification::Unknown.to_trait().is_none());
    }

    #[test]
    fn test_nated_display() {
        let nat = NatTrait::nated(Some(Ipv4Addr::new(1, 2, 3, 4).into()));
        assert_eq!(
            nat.to_string(),
            "nat:EndpointIndependent/PortPreservation/EndpointIndependent@1.2.3.4"
        );
        assert_eq!(NatTrait::Open.to_string(), "open");
    }
}
