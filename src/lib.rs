//! # overlay-node
//!
//! Bootstraps an overlay node behind an arbitrary NAT and keeps track of which
//! sampled peers answer pings.
//!
//! A node binds a provisional port, asks a [`NatProbe`] what sits in front of
//! it, binds its canonical port and, when nated, waits for the
//! [`NatTraverser`]. Once ready it pings the peers handed to it by a
//! [`PeerSampler`] and reports the ones that answered.
//!
//! ```no_run
//! use overlay_node::config::NodeConfig;
//! use overlay_node::Builder;
//! use overlay_node_core::address::NodeId;
//! use overlay_node_core::nat::{NatClassification, StaticNatProbe};
//!
//! # async fn run() -> overlay_node::error::Result<()> {
//! let config = NodeConfig::empty().set_node_id(NodeId::new(1)).set_port(23333);
//! let mut node = Builder::new(config)
//!     .nat_probe(StaticNatProbe::new(NatClassification::Open))
//!     .spawn()
//!     .await?;
//! let self_address = node.wait_ready().await?;
//! println!("ready as {self_address}");
//! let pinged = node.pinged().await?;
//! println!("{} peers answered", pinged.pinged.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod liveness;
pub mod node;
pub mod resolver;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::node::{NodeActor, NodeHandle, NodeNotification};
use overlay_node_core::address::Address;
use overlay_node_core::nat::{ImmediateTraverser, NatProbe, NatTraverser};
use overlay_node_core::protocol::Envelope;
use overlay_node_core::sample::PeerSampler;
use overlay_node_core::transport::{Transport, UdpTransport};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::mpsc::Receiver;
use tokio::task::{JoinError, JoinHandle, JoinSet};

pub use node::{PingedRequest, PingedResponse};

pub struct Builder {
    config: NodeConfig,
    transport: Option<(Arc<dyn Transport>, Receiver<Envelope>)>,
    nat_probe: Option<Arc<dyn NatProbe>>,
    traverser: Option<Arc<dyn NatTraverser>>,
    sampler: Option<Box<dyn PeerSampler>>,
}

impl Builder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            transport: None,
            nat_probe: None,
            traverser: None,
            sampler: None,
        }
    }
    /// Defaults to a [`UdpTransport`] on the configured local ip.
    pub fn transport(mut self, transport: Arc<dyn Transport>, inbound: Receiver<Envelope>) -> Self {
        self.transport = Some((transport, inbound));
        self
    }
    pub fn nat_probe<P: NatProbe + 'static>(mut self, nat_probe: P) -> Self {
        self.nat_probe = Some(Arc::new(nat_probe));
        self
    }
    pub fn traverser<T: NatTraverser + 'static>(mut self, traverser: T) -> Self {
        self.traverser = Some(Arc::new(traverser));
        self
    }
    pub fn sampler<S: PeerSampler + 'static>(mut self, sampler: S) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }
    pub async fn spawn(self) -> Result<Node> {
        let node_id = self.config.check()?;
        let nat_probe = self
            .nat_probe
            .ok_or_else(|| Error::InvalidArgument("nat probe is required".into()))?;
        let traverser = self
            .traverser
            .unwrap_or_else(|| Arc::new(ImmediateTraverser));
        let (transport, inbound) = match self.transport {
            Some(v) => v,
            None => {
                let (transport, inbound) =
                    UdpTransport::new(self.config.local_ip, self.config.event_channel_size);
                (Arc::new(transport) as Arc<dyn Transport>, inbound)
            }
        };
        let (handle, node_rx, notifications) = node::channel(&self.config);
        let actor = NodeActor::new(
            node_id,
            self.config,
            &handle,
            node_rx,
            transport,
            nat_probe,
            traverser,
        );
        let maintain = node::maintain::start_task(handle.node_tx(), inbound, self.sampler);
        let task = tokio::spawn(actor.run());
        Ok(Node {
            handle,
            notifications: Some(notifications),
            task: Some(task),
            _maintain: maintain,
        })
    }
}

/// A running node. Dropping it stops the node.
pub struct Node {
    handle: NodeHandle,
    notifications: Option<broadcast::Receiver<NodeNotification>>,
    task: Option<JoinHandle<Result<()>>>,
    _maintain: JoinSet<()>,
}

enum Step {
    Ready(Option<Address>),
    Finished(std::result::Result<Result<()>, JoinError>),
}

impl Node {
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }
    /// Notifications since the node was spawned, nothing missed.
    /// Later calls return `None`; use [`NodeHandle::subscribe`] instead.
    pub fn take_notifications(&mut self) -> Option<broadcast::Receiver<NodeNotification>> {
        self.notifications.take()
    }
    /// Waits for the bootstrap to complete and returns the announced address.
    ///
    /// Returns at once if the node is already ready. Fails with the fatal
    /// error if the bootstrap failed.
    pub async fn wait_ready(&mut self) -> Result<Address> {
        let mut ready = self.handle.watch_ready();
        if let Some(adr) = (*ready.borrow_and_update()).clone() {
            return Ok(adr);
        }
        let Some(task) = self.task.as_mut() else {
            return Err(Error::Stopped);
        };
        let step = tokio::select! {
            rs = ready.wait_for(Option::is_some) => Step::Ready(rs.ok().and_then(|v| (*v).clone())),
            rs = task => Step::Finished(rs),
        };
        match step {
            Step::Ready(Some(adr)) => Ok(adr),
            Step::Ready(None) => Err(Error::Stopped),
            Step::Finished(rs) => {
                self.task = None;
                match rs {
                    Ok(Ok(())) => Err(Error::Stopped),
                    Ok(Err(e)) => Err(e),
                    Err(e) => {
                        log::error!("node task {e:?}");
                        Err(Error::Stopped)
                    }
                }
            }
        }
    }
    /// Waits for the node to stop.
    pub async fn wait(mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Err(Error::Stopped);
        };
        match task.await {
            Ok(rs) => rs,
            Err(e) => {
                log::error!("node task {e:?}");
                Err(Error::Stopped)
            }
        }
    }
}

impl Deref for Node {
    type Target = NodeHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
