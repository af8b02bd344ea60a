use crate::node::NodeEvent;
use overlay_node_core::sample::PeerSampler;
use tokio::sync::mpsc::Sender;

pub(crate) async fn sample_loop(node_tx: Sender<NodeEvent>, mut sampler: Box<dyn PeerSampler>) {
    while let Some(sample) = sampler.next_sample().await {
        if sample.is_empty() {
            continue;
        }
        if node_tx.send(NodeEvent::Sample(sample)).await.is_err() {
            break;
        }
    }
    log::debug!("sample loop done");
}
