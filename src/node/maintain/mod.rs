use crate::node::NodeEvent;
use overlay_node_core::protocol::Envelope;
use overlay_node_core::sample::PeerSampler;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;

mod inbound;
mod sample;

pub(crate) fn start_task(
    node_tx: &Sender<NodeEvent>,
    inbound: Receiver<Envelope>,
    sampler: Option<Box<dyn PeerSampler>>,
) -> JoinSet<()> {
    let mut join_set = JoinSet::new();
    join_set.spawn(inbound::inbound_loop(node_tx.clone(), inbound));
    if let Some(sampler) = sampler {
        join_set.spawn(sample::sample_loop(node_tx.clone(), sampler));
    }
    join_set
}
