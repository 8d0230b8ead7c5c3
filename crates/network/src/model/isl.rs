//! Inter-switch links.

use common::SwitchId;
use serde::{Deserialize, Serialize};

/// One end of an inter-switch link: a switch and one of its ports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct IslEndpoint {
    pub switch_id: SwitchId,
    pub port: u32,
}

impl IslEndpoint {
    pub fn new(switch_id: SwitchId, port: u32) -> Self {
        Self { switch_id, port }
    }
}

impl std::fmt::Display for IslEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.switch_id, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IslStatus {
    #[default]
    Active,
    Inactive,
}

/// A unidirectional link between two switches.
///
/// `available_bandwidth` is always derived as `max_bandwidth` minus the sum
/// of bandwidth of the flow paths traversing the link; it goes negative
/// when the link is oversubscribed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Isl {
    pub src: IslEndpoint,
    pub dst: IslEndpoint,
    pub max_bandwidth: u64,
    pub available_bandwidth: i64,
    pub cost: u32,
    pub status: IslStatus,
}

impl Isl {
    /// Creates an active, unused link.
    pub fn new(src: IslEndpoint, dst: IslEndpoint, max_bandwidth: u64) -> Self {
        Self {
            src,
            dst,
            max_bandwidth,
            available_bandwidth: max_bandwidth as i64,
            cost: 1,
            status: IslStatus::Active,
        }
    }

    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_status(mut self, status: IslStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == IslStatus::Active
    }

    /// Returns the same link seen from the other end.
    pub fn reversed_endpoints(&self) -> (IslEndpoint, IslEndpoint) {
        (self.dst, self.src)
    }
}
