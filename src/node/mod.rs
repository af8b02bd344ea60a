//! The node actor.
//!
//! A node is a single task consuming one event channel. Resolver and prober
//! state is only touched from that task, so handlers run strictly one at a
//! time. Collaborator calls (bind, nat detection, traversal setup, sends) are
//! spawned and report back through the same channel; no handler ever waits
//! on them.

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::liveness::{LivenessProbe, StatusReport};
use crate::resolver::{AddressResolver, ResolverCommand};
use overlay_node_core::address::{Address, NodeId};
use overlay_node_core::nat::{NatClassification, NatProbe, NatTraverser};
use overlay_node_core::protocol::{Envelope, ProtocolType};
use overlay_node_core::sample::PeerSample;
use overlay_node_core::timer::{TimerHandle, TimerService};
use overlay_node_core::transport::{BindResponse, Transport};
use std::sync::Arc;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinSet;
use uuid::Uuid;

pub(crate) mod maintain;
mod pinged;

pub use pinged::{PingedRequest, PingedResponse};

pub(crate) enum NodeEvent {
    BindResponse(BindResponse),
    BindFailed(Uuid, anyhow::Error),
    NatDetected(NatClassification),
    NatFailed(anyhow::Error),
    TraversalReady(Option<Address>),
    TraversalFailed(anyhow::Error),
    Sample(PeerSample),
    Inbound(Envelope),
    ProbeTick,
    StatusTick,
    Pinged(PingedRequest, oneshot::Sender<PingedResponse>),
    Status(oneshot::Sender<StatusReport>),
    Shutdown,
}

/// Published to everything that depends on the node's own address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeNotification {
    SelfAddressChanged(Address),
    /// Sent once, when the bootstrap completed.
    Ready(Address),
}

/// Cheap, cloneable access to a running node.
#[derive(Clone)]
pub struct NodeHandle {
    node_tx: Sender<NodeEvent>,
    notifications: broadcast::Sender<NodeNotification>,
    ready: Arc<watch::Sender<Option<Address>>>,
}

impl NodeHandle {
    /// Peers that answered at least one ping.
    pub async fn pinged(&self) -> Result<PingedResponse> {
        self.pinged_request(PingedRequest::new()).await
    }
    pub async fn pinged_request(&self, req: PingedRequest) -> Result<PingedResponse> {
        let (tx, rx) = oneshot::channel();
        self.send(NodeEvent::Pinged(req, tx)).await?;
        rx.await.map_err(|_| Error::Stopped)
    }
    pub async fn status(&self) -> Result<StatusReport> {
        let (tx, rx) = oneshot::channel();
        self.send(NodeEvent::Status(tx)).await?;
        rx.await.map_err(|_| Error::Stopped)
    }
    /// Hand a gossip sample to the node.
    pub async fn deliver_sample(&self, sample: PeerSample) -> Result<()> {
        self.send(NodeEvent::Sample(sample)).await
    }
    pub fn subscribe(&self) -> broadcast::Receiver<NodeNotification> {
        self.notifications.subscribe()
    }
    /// The address announced by `Ready`, once the bootstrap completed.
    pub fn ready_address(&self) -> Option<Address> {
        self.ready.borrow().clone()
    }
    pub(crate) fn watch_ready(&self) -> watch::Receiver<Option<Address>> {
        self.ready.subscribe()
    }
    pub(crate) fn node_tx(&self) -> &Sender<NodeEvent> {
        &self.node_tx
    }
    pub async fn shutdown(&self) -> Result<()> {
        self.send(NodeEvent::Shutdown).await
    }
    async fn send(&self, event: NodeEvent) -> Result<()> {
        self.node_tx.send(event).await.map_err(|_| Error::Stopped)
    }
}

pub(crate) struct NodeActor {
    node_id: NodeId,
    config: NodeConfig,
    resolver: AddressResolver,
    prober: Option<LivenessProbe>,
    transport: Arc<dyn Transport>,
    nat_probe: Arc<dyn NatProbe>,
    traverser: Arc<dyn NatTraverser>,
    node_tx: Sender<NodeEvent>,
    node_rx: Receiver<NodeEvent>,
    timer: TimerService<NodeEvent>,
    probe_timer: Option<TimerHandle>,
    status_timer: Option<TimerHandle>,
    notifications: broadcast::Sender<NodeNotification>,
    ready: Arc<watch::Sender<Option<Address>>>,
    tasks: JoinSet<()>,
}

pub(crate) fn channel(
    config: &NodeConfig,
) -> (
    NodeHandle,
    Receiver<NodeEvent>,
    broadcast::Receiver<NodeNotification>,
) {
    let (node_tx, node_rx) = tokio::sync::mpsc::channel(config.event_channel_size);
    let (notifications, first) = broadcast::channel(config.notification_capacity);
    (
        NodeHandle {
            node_tx,
            notifications,
            ready: Arc::new(watch::Sender::new(None)),
        },
        node_rx,
        first,
    )
}

impl NodeActor {
    pub(crate) fn new(
        node_id: NodeId,
        config: NodeConfig,
        handle: &NodeHandle,
        node_rx: Receiver<NodeEvent>,
        transport: Arc<dyn Transport>,
        nat_probe: Arc<dyn NatProbe>,
        traverser: Arc<dyn NatTraverser>,
    ) -> Self {
        let resolver = AddressResolver::new(
            node_id,
            config.local_ip,
            config.port,
            config.provisional_port(),
        );
        Self {
            node_id,
            config,
            resolver,
            prober: None,
            transport,
            nat_probe,
            traverser,
            node_tx: handle.node_tx.clone(),
            node_rx,
            timer: TimerService::new(handle.node_tx.clone()),
            probe_timer: None,
            status_timer: None,
            notifications: handle.notifications.clone(),
            ready: handle.ready.clone(),
            tasks: JoinSet::new(),
        }
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        log::info!("<nid:{}> starting", self.node_id);
        let rs = self.event_loop().await;
        if let Err(e) = &rs {
            log::error!("<nid:{}> fatal: {e}", self.node_id);
        }
        self.teardown();
        rs
    }

    async fn event_loop(&mut self) -> Result<()> {
        let commands = self.resolver.start()?;
        self.execute(commands);
        while let Some(event) = self.node_rx.recv().await {
            if !self.handle(event)? {
                break;
            }
            // reap finished collaborator tasks
            while self.tasks.try_join_next().is_some() {}
        }
        Ok(())
    }

    /// Returns `false` once the node should stop.
    fn handle(&mut self, event: NodeEvent) -> Result<bool> {
        let commands = match event {
            NodeEvent::BindResponse(resp) => self.resolver.on_bind_response(resp)?,
            NodeEvent::BindFailed(id, e) => self.resolver.on_bind_failed(id, e)?,
            NodeEvent::NatDetected(classification) => {
                self.resolver.on_nat_detected(classification)?
            }
            NodeEvent::NatFailed(e) => self.resolver.on_nat_failed(e)?,
            NodeEvent::TraversalReady(updated) => self.resolver.on_traversal_ready(updated)?,
            NodeEvent::TraversalFailed(e) => self.resolver.on_traversal_failed(e)?,
            NodeEvent::Sample(sample) => {
                self.on_sample(sample);
                vec![]
            }
            NodeEvent::Inbound(envelope) => {
                self.on_inbound(envelope);
                vec![]
            }
            NodeEvent::ProbeTick => {
                if let Some(prober) = self.prober.as_mut() {
                    let pings = prober.on_probe_tick();
                    self.send_all(pings);
                }
                vec![]
            }
            NodeEvent::StatusTick => {
                if let Some(prober) = self.prober.as_ref() {
                    prober.on_status_tick();
                }
                vec![]
            }
            NodeEvent::Pinged(req, tx) => {
                let self_addr = self.current_address();
                let pinged = self
                    .prober
                    .as_ref()
                    .map(|v| v.on_liveness_query())
                    .unwrap_or_default();
                _ = tx.send(req.answer(self_addr, pinged));
                vec![]
            }
            NodeEvent::Status(tx) => {
                let report = self
                    .prober
                    .as_ref()
                    .map(|v| v.on_status_tick())
                    .unwrap_or_default();
                _ = tx.send(report);
                vec![]
            }
            NodeEvent::Shutdown => {
                log::info!("<nid:{}> shutdown requested", self.node_id);
                return Ok(false);
            }
        };
        self.execute(commands);
        Ok(true)
    }

    fn execute(&mut self, commands: Vec<ResolverCommand>) {
        for command in commands {
            match command {
                ResolverCommand::Bind(req) => {
                    let transport = self.transport.clone();
                    let node_tx = self.node_tx.clone();
                    self.tasks.spawn(async move {
                        let id = req.id;
                        let event = match transport.bind(req).await {
                            Ok(resp) => NodeEvent::BindResponse(resp),
                            Err(e) => NodeEvent::BindFailed(id, e),
                        };
                        _ = node_tx.send(event).await;
                    });
                }
                ResolverCommand::DetectNat(adr) => {
                    let nat_probe = self.nat_probe.clone();
                    let node_tx = self.node_tx.clone();
                    self.tasks.spawn(async move {
                        let event = match nat_probe.detect(adr).await {
                            Ok(classification) => NodeEvent::NatDetected(classification),
                            Err(e) => NodeEvent::NatFailed(e),
                        };
                        _ = node_tx.send(event).await;
                    });
                }
                ResolverCommand::StartTraversal(adr) => {
                    let traverser = self.traverser.clone();
                    let node_tx = self.node_tx.clone();
                    self.tasks.spawn(async move {
                        let event = match traverser.setup(adr).await {
                            Ok(updated) => NodeEvent::TraversalReady(updated),
                            Err(e) => NodeEvent::TraversalFailed(e),
                        };
                        _ = node_tx.send(event).await;
                    });
                }
                ResolverCommand::SelfAddressChanged(adr) => {
                    if let Some(prober) = self.prober.as_mut() {
                        prober.on_self_update(adr.clone());
                    }
                    _ = self
                        .notifications
                        .send(NodeNotification::SelfAddressChanged(adr));
                }
                ResolverCommand::Ready(adr) => {
                    self.start_probing(adr.clone());
                    self.ready.send_replace(Some(adr.clone()));
                    _ = self.notifications.send(NodeNotification::Ready(adr));
                }
            }
        }
    }

    fn start_probing(&mut self, self_address: Address) {
        log::info!("<nid:{}> ready, probing peers as:{self_address}", self.node_id);
        self.prober = Some(LivenessProbe::new(self_address, self.config.ping_retry));
        let ping_interval = self.config.ping_interval;
        let status_interval = self.config.status_interval;
        self.probe_timer = Some(self.timer.schedule_periodic(
            ping_interval,
            ping_interval,
            || NodeEvent::ProbeTick,
        ));
        self.status_timer = Some(self.timer.schedule_periodic(
            status_interval,
            status_interval,
            || NodeEvent::StatusTick,
        ));
    }

    fn on_sample(&mut self, sample: PeerSample) {
        let Some(prober) = self.prober.as_mut() else {
            log::debug!("<nid:{}> not ready, dropping sample", self.node_id);
            return;
        };
        log::trace!("<nid:{}> public sample:{:?}", self.node_id, sample.public);
        log::trace!("<nid:{}> private sample:{:?}", self.node_id, sample.private);
        prober.on_peer_sample(&sample.public);
        prober.on_peer_sample(&sample.private);
    }

    fn on_inbound(&mut self, envelope: Envelope) {
        let Some(prober) = self.prober.as_mut() else {
            log::debug!(
                "<nid:{}> not ready, dropping {:?} from:{}",
                self.node_id,
                envelope.protocol(),
                envelope.src()
            );
            return;
        };
        if envelope.dest().node_id() != self.node_id {
            log::debug!(
                "<nid:{}> dropping {:?} for:{}",
                self.node_id,
                envelope.protocol(),
                envelope.dest()
            );
            return;
        }
        match envelope.protocol() {
            ProtocolType::Ping => {
                let pong = prober.on_ping(envelope.src());
                self.send_all(vec![pong]);
            }
            ProtocolType::Pong => prober.on_pong(envelope.src()),
            ProtocolType::Unknown => {}
        }
    }

    fn send_all(&mut self, envelopes: Vec<Envelope>) {
        if envelopes.is_empty() {
            return;
        }
        let transport = self.transport.clone();
        let node_id = self.node_id;
        self.tasks.spawn(async move {
            for envelope in envelopes {
                let dest = envelope.dest().clone();
                if let Err(e) = transport.send(envelope).await {
                    log::warn!("<nid:{node_id}> send to {dest} failed {e:?}");
                }
            }
        });
    }

    fn current_address(&self) -> Address {
        if let Some(prober) = self.prober.as_ref() {
            return prober.self_address().clone();
        }
        self.resolver
            .self_address()
            .cloned()
            .unwrap_or_else(|| Address::open(self.config.local_ip, self.config.port, self.node_id))
    }

    fn teardown(&mut self) {
        if let Some(timer) = self.probe_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.status_timer.take() {
            timer.cancel();
        }
        self.tasks.abort_all();
        log::info!("<nid:{}> stopped, phase:{:?}", self.node_id, self.resolver.phase());
    }
}
