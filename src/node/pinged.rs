use overlay_node_core::address::Address;
use uuid::Uuid;

/// Ask a node which peers it has successfully pinged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingedRequest {
    pub id: Uuid,
}

impl PingedRequest {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
    pub fn answer(&self, self_addr: Address, pinged: Vec<Address>) -> PingedResponse {
        PingedResponse {
            id: self.id,
            self_addr,
            pinged,
        }
    }
}

impl Default for PingedRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PingedResponse {
    pub id: Uuid,
    pub self_addr: Address,
    pub pinged: Vec<Address>,
}
