//! Allocation of the per-flow resources: cookie, meters and transit vlans.

use common::{Cookie, MeterId, PathId, SwitchId};
use serde::{Deserialize, Serialize};

use crate::model::{Flow, FlowPath, SwitchFeature};
use crate::pce::PathPair;
use crate::store::NetworkTransaction;
use crate::Result;

/// Resources reserved for one direction of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathResources {
    pub path_id: PathId,
    pub ingress_switch: SwitchId,
    pub meter_id: Option<MeterId>,
    pub transit_vlan: Option<u16>,
}

/// Resources reserved for a flow: one cookie shared by both directions plus
/// per-direction path resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowResources {
    pub unmasked_cookie: u64,
    pub forward: PathResources,
    pub reverse: PathResources,
}

impl FlowResources {
    /// Recovers the resources held by an existing pair of paths.
    pub fn from_paths(forward: &FlowPath, reverse: &FlowPath) -> Self {
        let direction = |path: &FlowPath| PathResources {
            path_id: path.path_id,
            ingress_switch: path.src_switch,
            meter_id: path.meter_id,
            transit_vlan: path.transit_vlan,
        };
        Self {
            unmasked_cookie: forward.cookie.unmasked(),
            forward: direction(forward),
            reverse: direction(reverse),
        }
    }

    pub fn forward_cookie(&self) -> Cookie {
        Cookie::forward(self.unmasked_cookie)
    }

    pub fn reverse_cookie(&self) -> Cookie {
        Cookie::reverse(self.unmasked_cookie)
    }

    /// Builds the forward and reverse flow paths for a computed route.
    pub fn build_paths(&self, flow: &Flow, route: &PathPair) -> (FlowPath, FlowPath) {
        let forward = FlowPath {
            path_id: self.forward.path_id,
            flow_id: flow.flow_id.clone(),
            src_switch: flow.source.switch_id,
            dst_switch: flow.destination.switch_id,
            cookie: self.forward_cookie(),
            meter_id: self.forward.meter_id,
            transit_vlan: self.forward.transit_vlan,
            bandwidth: flow.bandwidth,
            segments: route.forward.clone(),
        };
        let reverse = FlowPath {
            path_id: self.reverse.path_id,
            flow_id: flow.flow_id.clone(),
            src_switch: flow.destination.switch_id,
            dst_switch: flow.source.switch_id,
            cookie: self.reverse_cookie(),
            meter_id: self.reverse.meter_id,
            transit_vlan: self.reverse.transit_vlan,
            bandwidth: flow.bandwidth,
            segments: route.reverse.clone(),
        };
        (forward, reverse)
    }
}

/// Reserves and releases flow resources inside a network transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowResourcesManager;

impl FlowResourcesManager {
    pub fn new() -> Self {
        Self
    }

    /// Allocates a cookie and, per direction, a fresh path id, a meter on
    /// the ingress switch (when it supports meters and the flow has a
    /// bandwidth limit) and a transit vlan (when the flow spans switches).
    pub fn allocate(&self, tx: &mut dyn NetworkTransaction, flow: &Flow) -> Result<FlowResources> {
        let unmasked_cookie = tx.allocate_cookie()?;
        let forward = self.allocate_path(tx, flow, flow.source.switch_id)?;
        let reverse = self.allocate_path(tx, flow, flow.destination.switch_id)?;

        tracing::debug!(
            flow_id = %flow.flow_id,
            cookie = unmasked_cookie,
            forward_path = %forward.path_id,
            reverse_path = %reverse.path_id,
            "allocated flow resources"
        );

        Ok(FlowResources {
            unmasked_cookie,
            forward,
            reverse,
        })
    }

    fn allocate_path(
        &self,
        tx: &mut dyn NetworkTransaction,
        flow: &Flow,
        ingress_switch: SwitchId,
    ) -> Result<PathResources> {
        let switch = tx.get_switch(ingress_switch)?;
        let meter_id = if flow.bandwidth > 0 && switch.supports(SwitchFeature::Meters) {
            Some(tx.allocate_meter(ingress_switch)?)
        } else {
            None
        };
        let transit_vlan = if flow.is_one_switch() {
            None
        } else {
            Some(tx.allocate_transit_vlan()?)
        };

        Ok(PathResources {
            path_id: PathId::new(),
            ingress_switch,
            meter_id,
            transit_vlan,
        })
    }

    /// Returns every resource back to its pool.
    pub fn deallocate(&self, tx: &mut dyn NetworkTransaction, resources: &FlowResources) {
        tx.release_cookie(resources.unmasked_cookie);
        for path in [resources.forward, resources.reverse] {
            if let Some(meter_id) = path.meter_id {
                tx.release_meter(path.ingress_switch, meter_id);
            }
            if let Some(vlan) = path.transit_vlan {
                tx.release_transit_vlan(vlan);
            }
        }
    }
}
