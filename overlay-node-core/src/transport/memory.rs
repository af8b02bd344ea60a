use crate::error::Error;
use crate::protocol::Envelope;
use crate::transport::{BindRequest, BindResponse, Transport};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver, Sender};

const EPHEMERAL_PORTS: Range<u16> = 49152..65535;

/// An in-process datagram network connecting [`MemoryTransport`]s.
///
/// A node is reachable at the ip of the address it binds, so a simulated
/// nated node binding its public address behaves like a NAT forwarding its
/// public mapping.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<SocketAddr, Sender<Envelope>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport attached to this network.
    pub fn transport(&self, inbound_cap: usize) -> (MemoryTransport, Receiver<Envelope>) {
        let (inbound, receiver) = channel(inbound_cap);
        (
            MemoryTransport {
                network: self.clone(),
                inbound,
                bound: Mutex::new(None),
            },
            receiver,
        )
    }

    pub fn is_bound(&self, addr: &SocketAddr) -> bool {
        self.endpoints.contains_key(addr)
    }

    fn register(&self, ip: IpAddr, port: u16, inbound: &Sender<Envelope>) -> anyhow::Result<u16> {
        if port != 0 {
            let addr = SocketAddr::new(ip, port);
            return match self.endpoints.entry(addr) {
                Entry::Occupied(_) => Err(Error::Io(std::io::ErrorKind::AddrInUse.into()).into()),
                Entry::Vacant(v) => {
                    v.insert(inbound.clone());
                    Ok(port)
                }
            };
        }
        let mut rng = rand::thread_rng();
        loop {
            let port = rng.gen_range(EPHEMERAL_PORTS);
            if let Entry::Vacant(v) = self.endpoints.entry(SocketAddr::new(ip, port)) {
                v.insert(inbound.clone());
                return Ok(port);
            }
        }
    }

    fn release(&self, addr: &SocketAddr) {
        self.endpoints.remove(addr);
    }

    fn route(&self, addr: &SocketAddr) -> Option<Sender<Envelope>> {
        self.endpoints.get(addr).map(|v| v.value().clone())
    }
}

/// One node's attachment to a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    inbound: Sender<Envelope>,
    bound: Mutex<Option<SocketAddr>>,
}

impl MemoryTransport {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Some(addr) = self.bound.lock().take() {
            self.network.release(&addr);
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn bind(&self, request: BindRequest) -> anyhow::Result<BindResponse> {
        let ip = request.address.ip();
        let mut guard = self.bound.lock();
        if let Some(old) = guard.take() {
            self.network.release(&old);
        }
        let port = self
            .network
            .register(ip, request.address.port(), &self.inbound)?;
        guard.replace(SocketAddr::new(ip, port));
        log::debug!(
            "memory bind {} -> {ip}:{port} bootstrap:{}",
            request.address,
            request.is_bootstrap
        );
        Ok(request.answer(port))
    }

    async fn send(&self, envelope: Envelope) -> anyhow::Result<()> {
        if self.bound.lock().is_none() {
            return Err(Error::NotBound.into());
        }
        let dest = envelope.dest().socket_addr();
        match self.network.route(&dest) {
            Some(sender) => {
                if sender.try_send(envelope).is_err() {
                    log::debug!("memory network drop to {dest}, inbound full or closed");
                }
            }
            None => log::trace!("memory network drop to {dest}, nobody bound"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::address::{Address, NodeId};
    use crate::protocol::ProtocolType;
    use crate::protocol::Envelope;
    use crate::transport::{BindRequest, MemoryNetwork, Transport};
    use std::net::{IpAddr, Ipv4Addr};

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    #[tokio::test]
    async fn ephemeral_then_fixed_port() {
        let network = MemoryNetwork::new();
        let (t, _rx) = network.transport(8);
        let adr = Address::open(IP, 0, NodeId::from(1));
        let first = t.bind(BindRequest::new(adr.clone(), true)).await.unwrap();
        assert!(first.bound_port >= 49152);
        let second = t
            .bind(BindRequest::new(adr.with_port(23333), false))
            .await
            .unwrap();
        assert_eq!(second.bound_port, 23333);
        assert!(!network.is_bound(&(IP, first.bound_port).into()));
        assert!(network.is_bound(&(IP, 23333).into()));
        drop(t);
        assert!(!network.is_bound(&(IP, 23333).into()));
    }

    #[tokio::test]
    async fn port_in_use() {
        let network = MemoryNetwork::new();
        let (a, _a_rx) = network.transport(8);
        let (b, _b_rx) = network.transport(8);
        let adr = Address::open(IP, 23333, NodeId::from(1));
        a.bind(BindRequest::new(adr.clone(), true)).await.unwrap();
        assert!(b.bind(BindRequest::new(adr, true)).await.is_err());
    }

    #[tokio::test]
    async fn deliver_and_drop_unknown() {
        let network = MemoryNetwork::new();
        let (a, _a_rx) = network.transport(8);
        let (b, mut b_rx) = network.transport(8);
        let adr_a = Address::open(IP, 1000, NodeId::from(1));
        let adr_b = Address::open(IP, 1001, NodeId::from(2));
        a.bind(BindRequest::new(adr_a.clone(), true)).await.unwrap();
        b.bind(BindRequest::new(adr_b.clone(), true)).await.unwrap();
        a.send(Envelope::pong(adr_a.clone(), adr_b)).await.unwrap();
        let envelope = b_rx.recv().await.unwrap();
        assert_eq!(envelope.protocol(), ProtocolType::Pong);
        assert_eq!(envelope.src(), &adr_a);
        let nowhere = Address::open(IP, 1002, NodeId::from(3));
        assert!(a.send(Envelope::ping(adr_a, nowhere)).await.is_ok());
    }
}
