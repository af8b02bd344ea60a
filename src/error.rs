use overlay_node_core::nat::NatClassification;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The node cannot announce a reachable address with this classification.
    #[error("unsupported nat classification: {0}")]
    UnsupportedNat(NatClassification),
    #[error("nated classification without public ip: {0}")]
    MissingPublicIp(NatClassification),
    #[error("bind failed: {0:#}")]
    BindFailed(anyhow::Error),
    #[error("nat detection failed: {0:#}")]
    NatDetectionFailed(anyhow::Error),
    #[error("nat traversal setup failed: {0:#}")]
    TraversalFailed(anyhow::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("node stopped")]
    Stopped,
}

impl Error {
    /// Fatal errors end the bootstrap; the node cannot continue without a
    /// reachable address.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedNat(_)
                | Error::MissingPublicIp(_)
                | Error::BindFailed(_)
                | Error::NatDetectionFailed(_)
                | Error::TraversalFailed(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::Error;
    use overlay_node_core::nat::NatClassification;

    #[test]
    fn test_fatal_errors() {
        assert!(Error::UnsupportedNat(NatClassification::Firewall).is_fatal());
        assert!(Error::BindFailed(anyhow::anyhow!("in use")).is_fatal());
        assert!(Error::NatDetectionFailed(anyhow::anyhow!("timeout")).is_fatal());
        assert!(!Error::Stopped.is_fatal());
        assert!(!Error::InvalidArgument("node_id".into()).is_fatal());
    }
}
