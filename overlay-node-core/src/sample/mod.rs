//! Gossip samples of candidate peers.

use crate::address::Address;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::time::Duration;

/// One delivery of the peer sampling service.
///
/// Open nodes are gossiped in the public view, nated ones in the private view.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerSample {
    pub public: Vec<Address>,
    pub private: Vec<Address>,
}

impl PeerSample {
    pub fn new(public: Vec<Address>, private: Vec<Address>) -> Self {
        Self { public, private }
    }
    /// Split `peers` into views by their NAT trait.
    pub fn from_peers<I: IntoIterator<Item = Address>>(peers: I) -> Self {
        let (public, private) = peers.into_iter().partition(|v| v.nat().is_open());
        Self { public, private }
    }
    pub fn is_empty(&self) -> bool {
        self.public.is_empty() && self.private.is_empty()
    }
}

/// Periodically yields samples of the overlay.
#[async_trait]
pub trait PeerSampler: Send {
    /// Wait for the next sample. `None` means the sampler is done.
    async fn next_sample(&mut self) -> Option<PeerSample>;
}

/// Samples a fixed set of known peers.
pub struct StaticSampler {
    peers: Vec<Address>,
    view_size: usize,
    period: Duration,
    first: bool,
}

impl StaticSampler {
    pub fn new(peers: Vec<Address>, view_size: usize, period: Duration) -> Self {
        Self {
            peers,
            view_size,
            period,
            first: true,
        }
    }
}

#[async_trait]
impl PeerSampler for StaticSampler {
    async fn next_sample(&mut self) -> Option<PeerSample> {
        if self.peers.is_empty() {
            return None;
        }
        if !self.first {
            tokio::time::sleep(self.period).await;
        }
        self.first = false;
        let peers: Vec<Address> = self
            .peers
            .choose_multiple(&mut rand::thread_rng(), self.view_size)
            .cloned()
            .collect();
        Some(PeerSample::from_peers(peers))
    }
}

#[cfg(test)]
mod tests {
    use super::{PeerSample, PeerSampler, StaticSampler};
    use crate::address::{Address, NodeId};
    use crate::nat::NatTrait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn peer(id: u32, nat: NatTrait) -> Address {
        Address::open(IpAddr::V4(Ipv4Addr::new(10, 0, 0, id as u8)), 23333, NodeId::from(id))
            .with_nat(nat)
    }

    #[test]
    fn split_views() {
        let sample = PeerSample::from_peers(vec![
            peer(1, NatTrait::Open),
            peer(2, NatTrait::nated(None)),
            peer(3, NatTrait::Open),
        ]);
        assert_eq!(sample.public.len(), 2);
        assert_eq!(sample.private.len(), 1);
        assert_eq!(sample.private[0].node_id(), NodeId::from(2));
    }

    #[tokio::test]
    async fn static_sampler_bounded_view() {
        let peers: Vec<_> = (1..=5).map(|i| peer(i, NatTrait::Open)).collect();
        let mut sampler = StaticSampler::new(peers, 3, Duration::from_millis(5));
        for _ in 0..2 {
            let sample = sampler.next_sample().await.unwrap();
            assert_eq!(sample.public.len(), 3);
            assert!(sample.private.is_empty());
        }
        let mut empty = StaticSampler::new(vec![], 3, Duration::from_millis(5));
        assert!(empty.next_sample().await.is_none());
    }
}
