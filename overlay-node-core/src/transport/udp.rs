use crate::error::Error;
use crate::protocol::Envelope;
use crate::transport::{BindRequest, BindResponse, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinHandle;

const RECV_BUF_LEN: usize = 2048;
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);
const MAX_RECV_ERRORS: usize = 16;

struct BoundSocket {
    socket: Arc<UdpSocket>,
    recv_task: JoinHandle<()>,
}

impl Drop for BoundSocket {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Transport over a single UDP socket bound on a local interface.
///
/// Every bind replaces the previous socket; the provisional port used during
/// bootstrap is released once the node rebinds on its canonical port.
pub struct UdpTransport {
    local_ip: IpAddr,
    inbound: Sender<Envelope>,
    bound: Mutex<Option<BoundSocket>>,
}

impl UdpTransport {
    pub fn new(local_ip: IpAddr, inbound_cap: usize) -> (UdpTransport, Receiver<Envelope>) {
        let (inbound, receiver) = channel(inbound_cap);
        (
            UdpTransport {
                local_ip,
                inbound,
                bound: Mutex::new(None),
            },
            receiver,
        )
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound
            .lock()
            .as_ref()
            .and_then(|v| v.socket.local_addr().ok())
    }

    fn current_socket(&self) -> Option<Arc<UdpSocket>> {
        self.bound.lock().as_ref().map(|v| v.socket.clone())
    }
}

/// Consecutive `recv_from` failures of one socket.
#[derive(Default)]
struct RecvErrors {
    consecutive: usize,
}

impl RecvErrors {
    /// Returns how long to back off, or `None` once the socket looks dead.
    fn record(&mut self, e: &io::Error) -> Option<Duration> {
        // icmp port unreachable from an earlier send, not a socket failure
        if e.kind() == io::ErrorKind::ConnectionReset {
            return Some(Duration::ZERO);
        }
        self.consecutive += 1;
        if self.consecutive >= MAX_RECV_ERRORS {
            return None;
        }
        Some(RECV_ERROR_BACKOFF * self.consecutive as u32)
    }
    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, inbound: Sender<Envelope>) {
    let mut buf = [0u8; RECV_BUF_LEN];
    let mut errors = RecvErrors::default();
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(rs) => rs,
            Err(e) => {
                let Some(backoff) = errors.record(&e) else {
                    log::error!(
                        "udp recv_from failed {} times, stop receiving on {:?}: {e:?}",
                        errors.consecutive,
                        socket.local_addr()
                    );
                    return;
                };
                log::warn!("udp recv_from {e:?}");
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                continue;
            }
        };
        errors.reset();
        let envelope = match Envelope::decode(&buf[..len]) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("drop datagram from {addr}: {e}");
                continue;
            }
        };
        if inbound.send(envelope).await.is_err() {
            log::debug!("udp inbound closed, stop receiving on {:?}", socket.local_addr());
            return;
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn bind(&self, request: BindRequest) -> anyhow::Result<BindResponse> {
        let addr = SocketAddr::new(self.local_ip, request.address.port());
        // release the old socket first, a rebind may target the same port
        self.bound.lock().take();
        let socket = Arc::new(crate::socket::bind_udp(addr)?);
        let bound_port = socket.local_addr()?.port();
        let recv_task = tokio::spawn(recv_loop(socket.clone(), self.inbound.clone()));
        log::debug!(
            "udp bind {} -> {}:{bound_port} bootstrap:{}",
            request.address,
            self.local_ip,
            request.is_bootstrap
        );
        self.bound.lock().replace(BoundSocket { socket, recv_task });
        Ok(request.answer(bound_port))
    }

    async fn send(&self, envelope: Envelope) -> anyhow::Result<()> {
        let socket = self.current_socket().ok_or(Error::NotBound)?;
        let buf = envelope.encode()?;
        socket.send_to(&buf, envelope.dest().socket_addr()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{RecvErrors, MAX_RECV_ERRORS, RECV_ERROR_BACKOFF};
    use crate::address::{Address, NodeId};
    use crate::protocol::{Envelope, ProtocolType};
    use crate::transport::{BindRequest, Transport, UdpTransport};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    pub async fn bind_ephemeral_and_exchange() {
        let (a, _a_rx) = UdpTransport::new(LOCALHOST, 16);
        let (b, mut b_rx) = UdpTransport::new(LOCALHOST, 16);
        let adr_a = Address::open(LOCALHOST, 0, NodeId::from(1));
        let adr_b = Address::open(LOCALHOST, 0, NodeId::from(2));
        let req = BindRequest::new(adr_a.clone(), true);
        let resp = a.bind(req.clone()).await.unwrap();
        assert_eq!(resp.id, req.id);
        assert_ne!(resp.bound_port, 0);
        let port_b = b.bind(BindRequest::new(adr_b.clone(), true)).await.unwrap().bound_port;

        let adr_a = adr_a.with_port(resp.bound_port);
        let adr_b = adr_b.with_port(port_b);
        a.send(Envelope::ping(adr_a.clone(), adr_b.clone()))
            .await
            .unwrap();
        let envelope = tokio::time::timeout(Duration::from_secs(1), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.protocol(), ProtocolType::Ping);
        assert_eq!(envelope.src(), &adr_a);
    }

    #[tokio::test]
    pub async fn send_before_bind_fails() {
        let (a, _rx) = UdpTransport::new(LOCALHOST, 16);
        let adr = Address::open(LOCALHOST, 9, NodeId::from(1));
        assert!(a.send(Envelope::ping(adr.clone(), adr)).await.is_err());
    }

    #[tokio::test]
    pub async fn rebind_replaces_socket() {
        let (a, _rx) = UdpTransport::new(LOCALHOST, 16);
        let adr = Address::open(LOCALHOST, 0, NodeId::from(1));
        let first = a.bind(BindRequest::new(adr.clone(), true)).await.unwrap();
        let second = a.bind(BindRequest::new(adr, false)).await.unwrap();
        assert_eq!(a.local_addr().unwrap().port(), second.bound_port);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn recv_errors_back_off_then_give_up() {
        let mut errors = RecvErrors::default();
        let failure = std::io::Error::from(std::io::ErrorKind::Other);
        assert_eq!(errors.record(&failure), Some(RECV_ERROR_BACKOFF));
        assert_eq!(errors.record(&failure), Some(RECV_ERROR_BACKOFF * 2));
        errors.reset();
        assert_eq!(errors.record(&failure), Some(RECV_ERROR_BACKOFF));
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        for _ in 0..MAX_RECV_ERRORS * 2 {
            assert_eq!(errors.record(&reset), Some(Duration::ZERO));
        }
        for _ in 1..MAX_RECV_ERRORS - 1 {
            assert!(errors.record(&failure).is_some());
        }
        assert_eq!(errors.record(&failure), None);
    }
}
