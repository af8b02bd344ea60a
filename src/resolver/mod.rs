//! Bootstrap sequencing of the node's own address.
//!
//! The resolver walks a node from "no usable address" to a publicly
//! reachable one:
//!
//! ```text
//! Unbound -> WaitFirstBind -> WaitNatDetection -+-(open)--> WaitSecondBind -> Ready
//!                                               +-(nated)-> WaitSecondBind -> WaitTraversalReady -> Ready
//! ```
//!
//! It performs no io. Every event handler returns the [`ResolverCommand`]s the
//! node has to execute, and the outcome of those commands is fed back as the
//! next event. Bind responses are matched by correlation id; responses to
//! requests the resolver no longer waits for are dropped.

use crate::error::{Error, Result};
use overlay_node_core::address::{Address, BasicAddress, NodeId};
use overlay_node_core::nat::{NatClassification, NatTrait};
use overlay_node_core::transport::{BindRequest, BindResponse};
use std::collections::HashMap;
use std::net::IpAddr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPurpose {
    /// Provisional binding used to talk to the outside during nat detection.
    FirstBind,
    /// Binding of the canonical port once the nat is known.
    SecondBind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: Uuid,
    pub purpose: BindPurpose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverPhase {
    Unbound,
    WaitFirstBind,
    WaitNatDetection,
    WaitSecondBind,
    WaitTraversalReady,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverCommand {
    Bind(BindRequest),
    DetectNat(Address),
    StartTraversal(Address),
    SelfAddressChanged(Address),
    Ready(Address),
}

pub struct AddressResolver {
    node_id: NodeId,
    local_ip: IpAddr,
    port: u16,
    provisional_port: u16,
    phase: ResolverPhase,
    self_address: Option<Address>,
    pending: HashMap<Uuid, BindPurpose>,
}

impl AddressResolver {
    pub fn new(node_id: NodeId, local_ip: IpAddr, port: u16, provisional_port: u16) -> Self {
        Self {
            node_id,
            local_ip,
            port,
            provisional_port,
            phase: ResolverPhase::Unbound,
            self_address: None,
            pending: HashMap::new(),
        }
    }
    pub fn phase(&self) -> ResolverPhase {
        self.phase
    }
    pub fn is_ready(&self) -> bool {
        self.phase == ResolverPhase::Ready
    }
    pub fn self_address(&self) -> Option<&Address> {
        self.self_address.as_ref()
    }
    pub fn pending(&self) -> Vec<PendingRequest> {
        self.pending
            .iter()
            .map(|(id, purpose)| PendingRequest {
                id: *id,
                purpose: *purpose,
            })
            .collect()
    }

    pub fn start(&mut self) -> Result<Vec<ResolverCommand>> {
        if self.phase != ResolverPhase::Unbound {
            log::warn!("<nid:{}> already started, phase:{:?}", self.node_id, self.phase);
            return Ok(vec![]);
        }
        let adr = Address::open(self.local_ip, self.provisional_port, self.node_id);
        log::info!("<nid:{}> binding provisional address:{adr}", self.node_id);
        self.self_address = Some(adr.clone());
        self.phase = ResolverPhase::WaitFirstBind;
        Ok(vec![self.bind(adr, BindPurpose::FirstBind)])
    }

    pub fn on_bind_response(&mut self, resp: BindResponse) -> Result<Vec<ResolverCommand>> {
        let Some(purpose) = self.pending.remove(&resp.id) else {
            log::debug!(
                "<nid:{}> dropping bind response with unknown id:{} phase:{:?}",
                self.node_id,
                resp.id,
                self.phase
            );
            return Ok(vec![]);
        };
        let Some(adr) = self.self_address.as_ref() else {
            return Ok(vec![]);
        };
        let adr = adr.with_port(resp.bound_port);
        log::info!("<nid:{}> bind response:{} adr:{adr}", self.node_id, resp.id);
        match (purpose, self.phase) {
            (BindPurpose::FirstBind, ResolverPhase::WaitFirstBind) => {
                self.self_address = Some(adr.clone());
                self.phase = ResolverPhase::WaitNatDetection;
                log::info!("<nid:{}> waiting for nat detection...", self.node_id);
                Ok(vec![ResolverCommand::DetectNat(adr)])
            }
            (BindPurpose::SecondBind, ResolverPhase::WaitSecondBind) => {
                self.self_address = Some(adr.clone());
                if adr.nat().is_open() {
                    self.phase = ResolverPhase::Ready;
                    log::info!("<nid:{}> ready with open address:{adr}", self.node_id);
                    Ok(vec![
                        ResolverCommand::SelfAddressChanged(adr.clone()),
                        ResolverCommand::Ready(adr),
                    ])
                } else {
                    self.phase = ResolverPhase::WaitTraversalReady;
                    log::info!("<nid:{}> waiting for nat traverser...", self.node_id);
                    Ok(vec![
                        ResolverCommand::SelfAddressChanged(adr.clone()),
                        ResolverCommand::StartTraversal(adr),
                    ])
                }
            }
            (purpose, phase) => {
                log::warn!(
                    "<nid:{}> unexpected {purpose:?} response in phase:{phase:?}",
                    self.node_id
                );
                Ok(vec![])
            }
        }
    }

    pub fn on_nat_detected(
        &mut self,
        classification: NatClassification,
    ) -> Result<Vec<ResolverCommand>> {
        if self.phase != ResolverPhase::WaitNatDetection {
            log::warn!(
                "<nid:{}> unexpected nat detection result:{classification} phase:{:?}",
                self.node_id,
                self.phase
            );
            return Ok(vec![]);
        }
        let Some(nat) = classification.to_trait() else {
            return Err(self.fail(Error::UnsupportedNat(classification)));
        };
        let current_ip = match self.self_address.as_ref() {
            Some(adr) => adr.ip(),
            None => self.local_ip,
        };
        let adr = match &nat {
            NatTrait::Open => {
                log::info!("<nid:{}> open node", self.node_id);
                Address::open(current_ip, self.port, self.node_id)
            }
            NatTrait::Nated { public_ip, .. } => {
                let Some(public_ip) = *public_ip else {
                    return Err(self.fail(Error::MissingPublicIp(classification)));
                };
                log::info!("<nid:{}> detected {nat} public ip:{public_ip}", self.node_id);
                Address::new(BasicAddress::new(public_ip, self.port, self.node_id), nat.clone())
            }
        };
        self.self_address = Some(adr.clone());
        self.phase = ResolverPhase::WaitSecondBind;
        Ok(vec![self.bind(adr, BindPurpose::SecondBind)])
    }

    /// The traversal layer is up. `updated` is its refined view of self, if any.
    pub fn on_traversal_ready(&mut self, updated: Option<Address>) -> Result<Vec<ResolverCommand>> {
        if self.phase != ResolverPhase::WaitTraversalReady {
            log::warn!(
                "<nid:{}> unexpected traversal ready, phase:{:?}",
                self.node_id,
                self.phase
            );
            return Ok(vec![]);
        }
        if let Some(updated) = updated {
            log::info!("<nid:{}> changed self address:{updated}", self.node_id);
            self.self_address = Some(updated);
        }
        let Some(adr) = self.self_address.clone() else {
            return Ok(vec![]);
        };
        self.phase = ResolverPhase::Ready;
        log::info!("<nid:{}> nat traverser ready, self:{adr}", self.node_id);
        Ok(vec![
            ResolverCommand::SelfAddressChanged(adr.clone()),
            ResolverCommand::Ready(adr),
        ])
    }

    pub fn on_bind_failed(&mut self, id: Uuid, e: anyhow::Error) -> Result<Vec<ResolverCommand>> {
        if self.pending.remove(&id).is_none() {
            log::debug!("<nid:{}> dropping bind failure with unknown id:{id} {e:?}", self.node_id);
            return Ok(vec![]);
        }
        Err(self.fail(Error::BindFailed(e)))
    }

    pub fn on_nat_failed(&mut self, e: anyhow::Error) -> Result<Vec<ResolverCommand>> {
        if self.phase != ResolverPhase::WaitNatDetection {
            log::debug!("<nid:{}> dropping late nat failure {e:?}", self.node_id);
            return Ok(vec![]);
        }
        Err(self.fail(Error::NatDetectionFailed(e)))
    }

    pub fn on_traversal_failed(&mut self, e: anyhow::Error) -> Result<Vec<ResolverCommand>> {
        if self.phase != ResolverPhase::WaitTraversalReady {
            log::debug!("<nid:{}> dropping late traversal failure {e:?}", self.node_id);
            return Ok(vec![]);
        }
        Err(self.fail(Error::TraversalFailed(e)))
    }

    fn bind(&mut self, adr: Address, purpose: BindPurpose) -> ResolverCommand {
        // one outstanding request per purpose
        self.pending.retain(|_, v| *v != purpose);
        let req = BindRequest::new(adr, true);
        log::trace!(
            "<nid:{}> bind request:{} purpose:{purpose:?} adr:{}",
            self.node_id,
            req.id,
            req.address
        );
        self.pending.insert(req.id, purpose);
        ResolverCommand::Bind(req)
    }

    fn fail(&mut self, e: Error) -> Error {
        log::error!("<nid:{}> bootstrap failed in phase:{:?}: {e}", self.node_id, self.phase);
        self.phase = ResolverPhase::Failed;
        self.pending.clear();
        e
    }
}

#[cfg(test)]
mod test {
    use super::{AddressResolver, BindPurpose, ResolverCommand, ResolverPhase};
    use crate::error::Error;
    use overlay_node_core::address::{Address, NodeId};
    use overlay_node_core::nat::{NatClassification, NatTrait};
    use overlay_node_core::transport::BindRequest;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use uuid::Uuid;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
    const PUBLIC: IpAddr = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));

    fn resolver() -> AddressResolver {
        AddressResolver::new(NodeId::from(1), LOCAL, 23333, 23334)
    }

    fn expect_bind(commands: Vec<ResolverCommand>) -> BindRequest {
        assert_eq!(commands.len(), 1, "{commands:?}");
        match commands.into_iter().next() {
            Some(ResolverCommand::Bind(req)) => req,
            other => panic!("expected bind, got {other:?}"),
        }
    }

    fn self_changes(commands: &[ResolverCommand]) -> Vec<Address> {
        commands
            .iter()
            .filter_map(|v| match v {
                ResolverCommand::SelfAddressChanged(adr) => Some(adr.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_open_path() {
        let mut resolver = resolver();
        let mut all = Vec::new();
        let first = expect_bind(resolver.start().unwrap());
        assert_eq!(first.address.port(), 23334);
        assert_eq!(resolver.phase(), ResolverPhase::WaitFirstBind);

        let commands = resolver.on_bind_response(first.answer(23334)).unwrap();
        assert_eq!(resolver.phase(), ResolverPhase::WaitNatDetection);
        match &commands[..] {
            [ResolverCommand::DetectNat(adr)] => assert_eq!(adr.port(), 23334),
            other => panic!("{other:?}"),
        }
        all.extend(commands);

        let second = expect_bind(resolver.on_nat_detected(NatClassification::Open).unwrap());
        assert_eq!(second.address.port(), 23333);
        assert_eq!(resolver.phase(), ResolverPhase::WaitSecondBind);

        let commands = resolver.on_bind_response(second.answer(23333)).unwrap();
        assert!(resolver.is_ready());
        assert!(matches!(commands.last(), Some(ResolverCommand::Ready(_))));
        all.extend(commands);
        let changes = self_changes(&all);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].port(), 23333);
        assert_eq!(changes[0].ip(), LOCAL);
        assert!(changes[0].nat().is_open());
        assert!(resolver.pending().is_empty());
    }

    #[test]
    fn test_nated_path() {
        let mut resolver = resolver();
        let mut all = Vec::new();
        let first = expect_bind(resolver.start().unwrap());
        all.extend(resolver.on_bind_response(first.answer(40001)).unwrap());
        assert_eq!(resolver.self_address().unwrap().port(), 40001);

        let second = expect_bind(
            resolver
                .on_nat_detected(NatClassification::nated(PUBLIC))
                .unwrap(),
        );
        assert_eq!(second.address.ip(), PUBLIC);
        assert_eq!(second.address.port(), 23333);
        assert_eq!(resolver.pending()[0].purpose, BindPurpose::SecondBind);

        let commands = resolver.on_bind_response(second.answer(40002)).unwrap();
        assert_eq!(resolver.phase(), ResolverPhase::WaitTraversalReady);
        assert!(matches!(commands.last(), Some(ResolverCommand::StartTraversal(adr)) if adr.port() == 40002));
        all.extend(commands);

        let commands = resolver.on_traversal_ready(None).unwrap();
        assert!(resolver.is_ready());
        all.extend(commands);

        let changes = self_changes(&all);
        assert_eq!(changes.len(), 2);
        let last = changes.last().unwrap();
        assert_eq!(last.socket_addr(), SocketAddr::from((PUBLIC, 40002)));
        assert_eq!(last.nat(), &NatTrait::nated(Some(PUBLIC)));
        assert_eq!(
            all.iter()
                .filter(|v| matches!(v, ResolverCommand::Ready(_)))
                .count(),
            1
        );
    }

    #[test]
    fn test_unknown_id_dropped() {
        let mut resolver = resolver();
        let first = expect_bind(resolver.start().unwrap());
        let stale = BindRequest::new(first.address.clone(), true);
        assert!(resolver.on_bind_response(stale.answer(1)).unwrap().is_empty());
        assert_eq!(resolver.phase(), ResolverPhase::WaitFirstBind);
        assert_eq!(resolver.pending().len(), 1);

        resolver.on_bind_response(first.answer(23334)).unwrap();
        // a duplicate of an answered response is stale too
        assert!(resolver.on_bind_response(first.answer(23334)).unwrap().is_empty());
        assert_eq!(resolver.phase(), ResolverPhase::WaitNatDetection);
    }

    #[test]
    fn test_second_bind_waits_for_first() {
        let mut resolver = resolver();
        let first = expect_bind(resolver.start().unwrap());
        assert!(resolver
            .on_nat_detected(NatClassification::Open)
            .unwrap()
            .is_empty());
        assert_eq!(resolver.phase(), ResolverPhase::WaitFirstBind);
        assert!(resolver
            .pending()
            .iter()
            .all(|v| v.purpose == BindPurpose::FirstBind && v.id == first.id));
        assert!(resolver.on_traversal_ready(None).unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_nat_is_fatal() {
        let mut resolver = resolver();
        let first = expect_bind(resolver.start().unwrap());
        resolver.on_bind_response(first.answer(23334)).unwrap();
        let e = resolver
            .on_nat_detected(NatClassification::UdpBlocked)
            .unwrap_err();
        assert!(matches!(e, Error::UnsupportedNat(NatClassification::UdpBlocked)));
        assert!(e.is_fatal());
        assert_eq!(resolver.phase(), ResolverPhase::Failed);
        assert!(resolver
            .on_nat_detected(NatClassification::Open)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_nated_without_public_ip_is_fatal() {
        let mut resolver = resolver();
        let first = expect_bind(resolver.start().unwrap());
        resolver.on_bind_response(first.answer(23334)).unwrap();
        let classification = NatClassification::Nated {
            mapping: Default::default(),
            allocation: Default::default(),
            filtering: Default::default(),
            public_ip: None,
        };
        let e = resolver.on_nat_detected(classification).unwrap_err();
        assert!(matches!(e, Error::MissingPublicIp(_)));
    }

    #[test]
    fn test_bind_failure() {
        let mut resolver = resolver();
        let first = expect_bind(resolver.start().unwrap());
        assert!(resolver
            .on_bind_failed(Uuid::new_v4(), anyhow::anyhow!("late"))
            .unwrap()
            .is_empty());
        let e = resolver
            .on_bind_failed(first.id, anyhow::anyhow!("address in use"))
            .unwrap_err();
        assert!(matches!(e, Error::BindFailed(_)));
        assert_eq!(resolver.phase(), ResolverPhase::Failed);
        assert!(resolver.pending().is_empty());
        assert!(resolver.on_bind_response(first.answer(1)).unwrap().is_empty());
    }

    #[test]
    fn test_traversal_refines_self() {
        let mut resolver = resolver();
        let first = expect_bind(resolver.start().unwrap());
        resolver.on_bind_response(first.answer(40001)).unwrap();
        let second = expect_bind(
            resolver
                .on_nat_detected(NatClassification::nated(PUBLIC))
                .unwrap(),
        );
        resolver.on_bind_response(second.answer(23333)).unwrap();
        let refined = resolver.self_address().unwrap().with_port(50000);
        let commands = resolver.on_traversal_ready(Some(refined.clone())).unwrap();
        assert_eq!(
            commands,
            vec![
                ResolverCommand::SelfAddressChanged(refined.clone()),
                ResolverCommand::Ready(refined)
            ]
        );
        assert!(resolver
            .on_traversal_failed(anyhow::anyhow!("late"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_traversal_failure_is_fatal() {
        let mut resolver = resolver();
        let first = expect_bind(resolver.start().unwrap());
        resolver.on_bind_response(first.answer(40001)).unwrap();
        let second = expect_bind(
            resolver
                .on_nat_detected(NatClassification::nated(PUBLIC))
                .unwrap(),
        );
        resolver.on_bind_response(second.answer(23333)).unwrap();
        let e = resolver
            .on_traversal_failed(anyhow::anyhow!("no relay"))
            .unwrap_err();
        assert!(matches!(e, Error::TraversalFailed(_)));
        assert!(resolver.start().unwrap().is_empty());
    }

    #[test]
    fn test_nat_failure_is_fatal() {
        let mut resolver = resolver();
        let first = expect_bind(resolver.start().unwrap());
        resolver.on_bind_response(first.answer(23334)).unwrap();
        let e = resolver
            .on_nat_failed(anyhow::anyhow!("stun unreachable"))
            .unwrap_err();
        assert!(matches!(e, Error::NatDetectionFailed(_)));
        assert!(e.is_fatal());
        assert_eq!(resolver.phase(), ResolverPhase::Failed);
        assert!(resolver.pending().is_empty());
        // a classification arriving after the failure changes nothing
        assert!(resolver
            .on_nat_detected(NatClassification::Open)
            .unwrap()
            .is_empty());
        assert_eq!(resolver.phase(), ResolverPhase::Failed);
    }

    #[test]
    fn test_second_bind_failure_is_fatal() {
        let mut resolver = resolver();
        let first = expect_bind(resolver.start().unwrap());
        resolver.on_bind_response(first.answer(23334)).unwrap();
        let second = expect_bind(resolver.on_nat_detected(NatClassification::Open).unwrap());
        let e = resolver
            .on_bind_failed(second.id, anyhow::anyhow!("address in use"))
            .unwrap_err();
        assert!(matches!(e, Error::BindFailed(_)));
        assert_eq!(resolver.phase(), ResolverPhase::Failed);
        assert!(!resolver.is_ready());
        assert!(resolver.on_bind_response(second.answer(23333)).unwrap().is_empty());
        assert_eq!(resolver.phase(), ResolverPhase::Failed);
    }
}
