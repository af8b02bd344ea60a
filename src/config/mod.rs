use crate::error::{Error, Result};
use overlay_node_core::address::NodeId;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub(crate) const PING_RETRY: usize = 5;
pub(crate) const PING_INTERVAL: Duration = Duration::from_millis(1000);
pub(crate) const STATUS_INTERVAL: Duration = Duration::from_millis(5000);
pub(crate) const DEFAULT_PORT: u16 = 23333;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_id: Option<NodeId>,
    /// Interface the node binds on before it knows its public address.
    pub local_ip: IpAddr,
    /// Port the node is reachable on once bootstrapped.
    pub port: u16,
    /// Port used to talk to the outside before the nat is known.
    /// Defaults to `port + 1`.
    pub provisional_port: Option<u16>,
    /// Pings sent to a silent peer before it is considered unreachable.
    pub ping_retry: usize,
    pub ping_interval: Duration,
    pub status_interval: Duration,
    pub event_channel_size: usize,
    pub notification_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            provisional_port: None,
            ping_retry: PING_RETRY,
            ping_interval: PING_INTERVAL,
            status_interval: STATUS_INTERVAL,
            event_channel_size: 1024,
            notification_capacity: 16,
        }
    }
}

impl NodeConfig {
    pub fn empty() -> Self {
        Self::default()
    }
    pub fn set_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id.replace(node_id);
        self
    }
    pub fn set_local_ip(mut self, local_ip: IpAddr) -> Self {
        self.local_ip = local_ip;
        self
    }
    pub fn set_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
    pub fn set_provisional_port(mut self, provisional_port: u16) -> Self {
        self.provisional_port.replace(provisional_port);
        self
    }
    pub fn set_ping_retry(mut self, ping_retry: usize) -> Self {
        self.ping_retry = ping_retry;
        self
    }
    pub fn set_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }
    pub fn set_status_interval(mut self, status_interval: Duration) -> Self {
        self.status_interval = status_interval;
        self
    }
    pub fn set_event_channel_size(mut self, event_channel_size: usize) -> Self {
        self.event_channel_size = event_channel_size;
        self
    }
    pub fn set_notification_capacity(mut self, notification_capacity: usize) -> Self {
        self.notification_capacity = notification_capacity;
        self
    }

    pub fn provisional_port(&self) -> u16 {
        self.provisional_port
            .unwrap_or_else(|| if self.port == 0 { 0 } else { self.port.wrapping_add(1) })
    }

    pub(crate) fn check(&self) -> Result<NodeId> {
        let node_id = self
            .node_id
            .ok_or_else(|| Error::InvalidArgument("node_id is required".into()))?;
        if self.ping_interval.is_zero() || self.status_interval.is_zero() {
            return Err(Error::InvalidArgument("intervals must be non-zero".into()));
        }
        if self.event_channel_size == 0 || self.notification_capacity == 0 {
            return Err(Error::InvalidArgument("channel sizes must be non-zero".into()));
        }
        Ok(node_id)
    }
}

#[cfg(test)]
mod test {
    use super::NodeConfig;
    use overlay_node_core::address::NodeId;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::empty().set_node_id(NodeId::from(1));
        assert_eq!(config.ping_retry, 5);
        assert_eq!(config.ping_interval, Duration::from_millis(1000));
        assert_eq!(config.status_interval, Duration::from_millis(5000));
        assert_eq!(config.provisional_port(), 23334);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_check() {
        assert!(NodeConfig::empty().check().is_err());
        let config = NodeConfig::empty()
            .set_node_id(NodeId::from(1))
            .set_ping_interval(Duration::ZERO);
        assert!(config.check().is_err());
        let config = NodeConfig::empty().set_node_id(NodeId::from(1)).set_port(0);
        assert_eq!(config.provisional_port(), 0);
    }
}
