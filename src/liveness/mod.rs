//! Bounded-retry ping/pong liveness probing of sampled peers.
//!
//! Every peer the prober knows about lives in exactly one of three tables:
//!
//! - `pending`: being pinged, with retries left
//! - `responsive`: answered at least one ping; never probed again
//! - `unreachable`: used up its retries without an answer
//!
//! Candidates that cannot be probed at all are only remembered as
//! `unfeasible` strings for diagnostics.

use overlay_node_core::address::{Address, BasicAddress};
use overlay_node_core::protocol::Envelope;
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerRecord {
    pub base: BasicAddress,
    pub address: Address,
    pub retries_left: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Pending,
    Responsive,
    Unreachable,
}

/// Snapshot of the prober tables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub pending: Vec<BasicAddress>,
    pub responsive: Vec<Address>,
    pub unreachable: Vec<Address>,
    pub unfeasible: Vec<String>,
}

pub struct LivenessProbe {
    self_address: Address,
    ping_retry: usize,
    pending: HashMap<BasicAddress, PeerRecord>,
    responsive: HashMap<BasicAddress, Address>,
    unreachable: HashMap<BasicAddress, Address>,
    unfeasible: BTreeSet<String>,
}

impl LivenessProbe {
    pub fn new(self_address: Address, ping_retry: usize) -> Self {
        Self {
            self_address,
            ping_retry,
            pending: HashMap::new(),
            responsive: HashMap::new(),
            unreachable: HashMap::new(),
            unfeasible: BTreeSet::new(),
        }
    }

    pub fn self_address(&self) -> &Address {
        &self.self_address
    }

    pub fn on_self_update(&mut self, self_address: Address) {
        log::info!("<nid:{}> update self:{self_address}", self_address.node_id());
        self.self_address = self_address;
    }

    pub fn state(&self, base: &BasicAddress) -> Option<PeerState> {
        if self.pending.contains_key(base) {
            Some(PeerState::Pending)
        } else if self.responsive.contains_key(base) {
            Some(PeerState::Responsive)
        } else if self.unreachable.contains_key(base) {
            Some(PeerState::Unreachable)
        } else {
            None
        }
    }

    pub fn pending(&self, base: &BasicAddress) -> Option<&PeerRecord> {
        self.pending.get(base)
    }

    /// Queue unknown candidates for probing. Known peers keep their state and
    /// retry counter.
    pub fn on_peer_sample<'a, I>(&mut self, candidates: I)
    where
        I: IntoIterator<Item = &'a Address>,
    {
        for candidate in candidates {
            let base = candidate.base();
            if base == self.self_address.base() || self.state(&base).is_some() {
                continue;
            }
            if !self.is_feasible(candidate) {
                log::debug!(
                    "<nid:{}> unfeasible ping target:{candidate}",
                    self.self_address.node_id()
                );
                self.unfeasible.insert(candidate.to_string());
                continue;
            }
            self.pending.insert(
                base,
                PeerRecord {
                    base,
                    address: candidate.clone(),
                    retries_left: self.ping_retry,
                },
            );
        }
    }

    /// One probe round: returns the pings to send.
    ///
    /// Every pending peer with retries left gets exactly one ping. Counters are
    /// decremented once the whole round is done, and a peer whose last ping
    /// went out in this round is moved to `unreachable` then.
    pub fn on_probe_tick(&mut self) -> Vec<Envelope> {
        let targets: Vec<BasicAddress> = self.pending.keys().copied().collect();
        let mut pings = Vec::with_capacity(targets.len());
        let mut exhausted = Vec::new();
        for base in targets {
            let Some(record) = self.pending.get(&base) else {
                continue;
            };
            if record.retries_left > 0 {
                log::debug!(
                    "<nid:{}> pinging from:{} to:{}",
                    self.self_address.node_id(),
                    self.self_address,
                    record.address
                );
                pings.push(Envelope::ping(
                    self.self_address.clone(),
                    record.address.clone(),
                ));
            } else {
                exhausted.push(base);
            }
        }
        for record in self.pending.values_mut() {
            record.retries_left = record.retries_left.saturating_sub(1);
            if record.retries_left == 0 {
                exhausted.push(record.base);
            }
        }
        for base in exhausted {
            if let Some(record) = self.pending.remove(&base) {
                log::debug!(
                    "<nid:{}> missed:{}",
                    self.self_address.node_id(),
                    record.address
                );
                self.unreachable.insert(base, record.address);
            }
        }
        pings
    }

    /// Answer a ping. Does not change any peer state.
    pub fn on_ping(&self, from: &Address) -> Envelope {
        log::debug!(
            "<nid:{}> ping from:{from} on:{}",
            self.self_address.node_id(),
            self.self_address
        );
        Envelope::pong(self.self_address.clone(), from.clone())
    }

    /// Record a responsive peer under its most recently seen address.
    pub fn on_pong(&mut self, from: &Address) {
        log::debug!(
            "<nid:{}> pong from:{from} on:{}",
            self.self_address.node_id(),
            self.self_address
        );
        let base = from.base();
        self.pending.remove(&base);
        self.unreachable.remove(&base);
        self.responsive.insert(base, from.clone());
    }

    pub fn on_liveness_query(&self) -> Vec<Address> {
        let mut pinged: Vec<Address> = self.responsive.values().cloned().collect();
        pinged.sort_by_key(|v| v.base());
        pinged
    }

    pub fn on_status_tick(&self) -> StatusReport {
        let mut pending: Vec<BasicAddress> = self.pending.keys().copied().collect();
        pending.sort();
        let mut unreachable: Vec<Address> = self.unreachable.values().cloned().collect();
        unreachable.sort_by_key(|v| v.base());
        let report = StatusReport {
            pending,
            responsive: self.on_liveness_query(),
            unreachable,
            unfeasible: self.unfeasible.iter().cloned().collect(),
        };
        log::info!(
            "<nid:{}> pending:{} {:?} ponged:{} {:?} missed:{} {:?} unfeasible:{} {:?}",
            self.self_address.node_id(),
            report.pending.len(),
            report.pending,
            report.responsive.len(),
            report.responsive,
            report.unreachable.len(),
            report.unreachable,
            report.unfeasible.len(),
            report.unfeasible
        );
        report
    }

    fn is_feasible(&self, adr: &Address) -> bool {
        let ip = adr.ip();
        !(ip.is_unspecified()
            || ip.is_multicast()
            || adr.port() == 0
            || ip.is_ipv4() != self.self_address.ip().is_ipv4())
    }
}
