use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use overlay_node::config::NodeConfig;
use overlay_node::Builder;
use overlay_node_core::address::{Address, NodeId};
use overlay_node_core::nat::{NatClassification, StaticNatProbe};
use overlay_node_core::sample::StaticSampler;
use overlay_node_core::transport::UdpTransport;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Node id.
    #[arg(short, long)]
    id: u32,
    /// Canonical port.
    #[arg(short, long)]
    port: Option<u16>,
    /// Local ip to bind on.
    #[arg(short, long, default_value = "127.0.0.1")]
    local: IpAddr,
    /// Peer node, `id@ip:port`.
    /// example: --peer 2@127.0.0.1:23335 --peer 3@127.0.0.1:23337
    #[arg(long)]
    peer: Option<Vec<String>>,
    /// `open`, or `nat:<public ip>`.
    #[arg(short, long, default_value = "open")]
    nat: String,
    /// Pings sent before a peer is given up.
    #[arg(short, long)]
    retry: Option<usize>,
}

fn parse_peer(peer: &str) -> anyhow::Result<Address> {
    let (id, adr) = peer
        .split_once('@')
        .ok_or_else(|| anyhow::anyhow!("expected id@ip:port, got {peer}"))?;
    let id = u32::from_str(id)?;
    let adr = SocketAddr::from_str(adr)?;
    Ok(Address::open(adr.ip(), adr.port(), NodeId::from(id)))
}

fn parse_nat(nat: &str) -> anyhow::Result<NatClassification> {
    if nat == "open" {
        return Ok(NatClassification::Open);
    }
    match nat.strip_prefix("nat:") {
        Some(ip) => Ok(NatClassification::nated(IpAddr::from_str(ip)?)),
        None => Err(anyhow::anyhow!("expected open or nat:<ip>, got {nat}")),
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let Args {
        id,
        port,
        local,
        peer,
        nat,
        retry,
    } = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let mut peers = Vec::new();
    for peer in peer.unwrap_or_default() {
        peers.push(parse_peer(&peer)?);
    }
    let nat = parse_nat(&nat)?;

    let mut config = NodeConfig::empty()
        .set_node_id(NodeId::from(id))
        .set_local_ip(local);
    if let Some(port) = port {
        config = config.set_port(port);
    }
    if let Some(retry) = retry {
        config = config.set_ping_retry(retry);
    }
    let (transport, inbound) = UdpTransport::new(local, config.event_channel_size);
    let mut node = Builder::new(config)
        .transport(Arc::new(transport), inbound)
        .nat_probe(StaticNatProbe::new(nat))
        .sampler(StaticSampler::new(peers, 8, Duration::from_secs(2)))
        .spawn()
        .await?;

    let (tx, mut quit) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc2::set_async_handler(async move {
        _ = tx.send(()).await;
    })
    .await;

    let self_address = match node.wait_ready().await {
        Ok(adr) => adr,
        Err(e) => {
            log::error!("bootstrap failed: {e}");
            std::process::exit(1);
        }
    };
    log::info!("ready as {self_address}");

    let handle = node.handle();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            match handle.pinged().await {
                Ok(rs) => log::info!("{} pinged: {:?}", rs.self_addr, rs.pinged),
                Err(_) => break,
            }
        }
    });

    _ = quit.recv().await;
    log::info!("exiting");
    node.shutdown().await?;
    node.wait().await?;
    Ok(())
}
