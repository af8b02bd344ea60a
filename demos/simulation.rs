use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use overlay_node::config::NodeConfig;
use overlay_node::{Builder, Node};
use overlay_node_core::address::{Address, NodeId};
use overlay_node_core::nat::{NatClassification, StaticNatProbe};
use overlay_node_core::sample::StaticSampler;
use overlay_node_core::transport::MemoryNetwork;

/// Runs a handful of nodes on an in-memory network and prints who pinged whom.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of nodes.
    #[arg(short, long, default_value_t = 8)]
    nodes: u32,
    /// Every n-th node sits behind a nat.
    #[arg(long, default_value_t = 3)]
    nat_every: u32,
    /// Nodes that are sampled but never started.
    #[arg(long, default_value_t = 2)]
    ghosts: u32,
    /// Seconds to run.
    #[arg(short, long, default_value_t = 5)]
    duration: u64,
}

fn node_ip(id: u32) -> IpAddr {
    IpAddr::V4(Ipv4Addr::from(0x0a00_0000 | id))
}

fn public_ip(id: u32) -> IpAddr {
    IpAddr::V4(Ipv4Addr::from(0x6400_0000 | id))
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let Args {
        nodes,
        nat_every,
        ghosts,
        duration,
    } = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let port = 23333;
    let is_nated = |id: u32| nat_every != 0 && id % nat_every == 0;

    // what each node will announce once ready
    let mut known = Vec::new();
    for id in 1..=nodes + ghosts {
        let ip = if is_nated(id) { public_ip(id) } else { node_ip(id) };
        known.push(Address::open(ip, port, NodeId::from(id)));
    }

    let network = MemoryNetwork::new();
    let mut running: Vec<Node> = Vec::new();
    for id in 1..=nodes {
        let nat = if is_nated(id) {
            NatClassification::nated(public_ip(id))
        } else {
            NatClassification::Open
        };
        let config = NodeConfig::empty()
            .set_node_id(NodeId::from(id))
            .set_local_ip(node_ip(id))
            .set_port(port)
            .set_ping_retry(3)
            .set_ping_interval(Duration::from_millis(200))
            .set_status_interval(Duration::from_secs(1));
        let (transport, inbound) = network.transport(256);
        let node = Builder::new(config)
            .transport(Arc::new(transport), inbound)
            .nat_probe(StaticNatProbe::new(nat).set_delay(Duration::from_millis(50)))
            .sampler(StaticSampler::new(
                known.clone(),
                4,
                Duration::from_millis(300),
            ))
            .spawn()
            .await?;
        running.push(node);
    }
    for node in running.iter_mut() {
        let adr = node.wait_ready().await?;
        log::info!("{adr} ready");
    }

    tokio::time::sleep(Duration::from_secs(duration)).await;

    for node in running.iter() {
        let rs = node.pinged().await?;
        let ids: Vec<String> = rs.pinged.iter().map(|v| v.node_id().to_string()).collect();
        println!("{} pinged [{}]", rs.self_addr, ids.join(", "));
        let status = node.status().await?;
        println!(
            "    pending:{} unreachable:{} unfeasible:{}",
            status.pending.len(),
            status.unreachable.len(),
            status.unfeasible.len()
        );
    }
    for node in running {
        node.shutdown().await?;
        node.wait().await?;
    }
    Ok(())
}
