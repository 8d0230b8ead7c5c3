//! Flows and flow paths.

use chrono::{DateTime, Utc};
use common::{Cookie, FlowId, MeterId, PathId, SwitchId};
use serde::{Deserialize, Serialize};

use super::isl::IslEndpoint;

/// A customer-facing flow endpoint: switch, port and outer vlan.
///
/// Vlan 0 means untagged traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowEndpoint {
    pub switch_id: SwitchId,
    pub port: u32,
    pub vlan: u16,
}

impl FlowEndpoint {
    pub fn new(switch_id: SwitchId, port: u32, vlan: u16) -> Self {
        Self {
            switch_id,
            port,
            vlan,
        }
    }
}

/// Lifecycle status of a flow.
///
/// ```text
/// InProgress ──► Up ──► InProgress (reroute/delete) ──► Up | Down
///     └────────► Down
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FlowStatus {
    /// An operation on the flow is in flight.
    #[default]
    InProgress,
    /// The flow is installed and validated.
    Up,
    /// The flow exists but does not carry traffic.
    Down,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::InProgress => "InProgress",
            FlowStatus::Up => "Up",
            FlowStatus::Down => "Down",
        }
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A logical reserved path between two endpoints, made of a forward and a
/// reverse flow path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: FlowId,
    pub source: FlowEndpoint,
    pub destination: FlowEndpoint,
    pub bandwidth: u64,
    pub status: FlowStatus,
    pub forward_path_id: Option<PathId>,
    pub reverse_path_id: Option<PathId>,
    pub description: Option<String>,
    pub time_modified: DateTime<Utc>,
}

impl Flow {
    /// Creates a flow with no paths in `InProgress` status.
    pub fn new(
        flow_id: FlowId,
        source: FlowEndpoint,
        destination: FlowEndpoint,
        bandwidth: u64,
    ) -> Self {
        Self {
            flow_id,
            source,
            destination,
            bandwidth,
            status: FlowStatus::InProgress,
            forward_path_id: None,
            reverse_path_id: None,
            description: None,
            time_modified: Utc::now(),
        }
    }

    /// Returns true if both endpoints sit on the same switch.
    pub fn is_one_switch(&self) -> bool {
        self.source.switch_id == self.destination.switch_id
    }

    /// Returns the ids of the primary paths that are set, forward first.
    pub fn path_ids(&self) -> Vec<PathId> {
        self.forward_path_id
            .into_iter()
            .chain(self.reverse_path_id)
            .collect()
    }
}

/// One hop of a flow path between two adjacent switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSegment {
    pub src_switch: SwitchId,
    pub src_port: u32,
    pub dst_switch: SwitchId,
    pub dst_port: u32,
}

impl PathSegment {
    pub fn new(src_switch: SwitchId, src_port: u32, dst_switch: SwitchId, dst_port: u32) -> Self {
        Self {
            src_switch,
            src_port,
            dst_switch,
            dst_port,
        }
    }

    pub fn src(&self) -> IslEndpoint {
        IslEndpoint::new(self.src_switch, self.src_port)
    }

    pub fn dst(&self) -> IslEndpoint {
        IslEndpoint::new(self.dst_switch, self.dst_port)
    }

    /// Returns the same hop traversed in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self::new(self.dst_switch, self.dst_port, self.src_switch, self.src_port)
    }
}

/// One direction of a flow with the resources allocated for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPath {
    pub path_id: PathId,
    pub flow_id: FlowId,
    pub src_switch: SwitchId,
    pub dst_switch: SwitchId,
    pub cookie: Cookie,
    pub meter_id: Option<MeterId>,
    pub transit_vlan: Option<u16>,
    pub bandwidth: u64,
    pub segments: Vec<PathSegment>,
}

impl FlowPath {
    /// Returns every switch the path touches, in traversal order.
    pub fn switches(&self) -> Vec<SwitchId> {
        let mut switches = vec![self.src_switch];
        for segment in &self.segments {
            if switches.last() != Some(&segment.src_switch) {
                switches.push(segment.src_switch);
            }
            switches.push(segment.dst_switch);
        }
        if switches.last() != Some(&self.dst_switch) {
            switches.push(self.dst_switch);
        }
        switches
    }

    /// Returns true if any segment uses the link between `src` and `dst`, in
    /// either direction.
    pub fn traverses(&self, src: IslEndpoint, dst: IslEndpoint) -> bool {
        self.segments.iter().any(|s| {
            (s.src() == src && s.dst() == dst) || (s.src() == dst && s.dst() == src)
        })
    }

    /// Returns true if both paths run over the same hops.
    pub fn same_route(&self, segments: &[PathSegment]) -> bool {
        self.segments == segments
    }
}
