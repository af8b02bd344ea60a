use crate::node::NodeEvent;
use overlay_node_core::protocol::Envelope;
use tokio::sync::mpsc::{Receiver, Sender};

pub(crate) async fn inbound_loop(node_tx: Sender<NodeEvent>, mut inbound: Receiver<Envelope>) {
    while let Some(envelope) = inbound.recv().await {
        if node_tx.send(NodeEvent::Inbound(envelope)).await.is_err() {
            break;
        }
    }
    log::debug!("inbound loop done");
}
