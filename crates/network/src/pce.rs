//! Path computation over the available network.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::{PathId, SwitchId};
use serde::{Deserialize, Serialize};

use crate::error::PathComputerError;
use crate::model::{Flow, Isl, IslEndpoint, PathSegment};
use crate::store::NetworkStore;

/// A computed route: forward hops from source to destination and the
/// matching reverse hops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPair {
    pub forward: Vec<PathSegment>,
    pub reverse: Vec<PathSegment>,
}

impl PathPair {
    /// Builds a pair from forward hops by reversing them.
    pub fn from_forward(forward: Vec<PathSegment>) -> Self {
        let reverse = forward.iter().rev().map(PathSegment::reversed).collect();
        Self { forward, reverse }
    }
}

/// Computes routes for flows.
#[async_trait]
pub trait PathComputer: Send + Sync {
    /// Finds a route for `flow`. Bandwidth held by `reuse_paths` counts as
    /// available, so a flow can be rerouted onto links it already occupies.
    async fn get_path(
        &self,
        flow: &Flow,
        reuse_paths: &[PathId],
    ) -> Result<PathPair, PathComputerError>;
}

/// Cheapest-path computer over active links that have enough available
/// bandwidth in both directions.
pub struct AvailableNetworkPathComputer {
    store: Arc<dyn NetworkStore>,
}

impl AvailableNetworkPathComputer {
    pub fn new(store: Arc<dyn NetworkStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PathComputer for AvailableNetworkPathComputer {
    #[tracing::instrument(skip(self, flow, reuse_paths), fields(flow_id = %flow.flow_id))]
    async fn get_path(
        &self,
        flow: &Flow,
        reuse_paths: &[PathId],
    ) -> Result<PathPair, PathComputerError> {
        let src = flow.source.switch_id;
        let dst = flow.destination.switch_id;
        let unroutable = |reason: String| PathComputerError::Unroutable {
            flow_id: flow.flow_id.clone(),
            reason,
        };

        // Read-only snapshot; dropped without commit.
        let tx = self.store.begin().await?;

        for switch_id in [src, dst] {
            match tx.find_switch(switch_id) {
                Some(switch) if switch.is_active() => {}
                Some(_) => return Err(unroutable(format!("switch {switch_id} is inactive"))),
                None => return Err(unroutable(format!("switch {switch_id} not found"))),
            }
        }

        if flow.is_one_switch() {
            return Ok(PathPair::default());
        }

        let mut reusable: HashMap<(IslEndpoint, IslEndpoint), i64> = HashMap::new();
        for path_id in reuse_paths {
            if let Some(path) = tx.find_path(*path_id) {
                for segment in &path.segments {
                    *reusable.entry((segment.src(), segment.dst())).or_default() +=
                        path.bandwidth as i64;
                }
            }
        }

        let isls: BTreeMap<(IslEndpoint, IslEndpoint), Isl> = tx
            .find_isls()
            .into_iter()
            .map(|isl| ((isl.src, isl.dst), isl))
            .collect();

        let usable = |isl: &Isl| {
            let credit = reusable.get(&(isl.src, isl.dst)).copied().unwrap_or(0);
            isl.is_active()
                && tx
                    .find_switch(isl.dst.switch_id)
                    .is_some_and(|s| s.is_active())
                && isl.available_bandwidth + credit >= flow.bandwidth as i64
        };

        let mut adjacency: BTreeMap<SwitchId, Vec<&Isl>> = BTreeMap::new();
        for isl in isls.values() {
            let Some(back) = isls.get(&isl.reversed_endpoints()) else {
                continue;
            };
            if usable(isl) && usable(back) {
                adjacency.entry(isl.src.switch_id).or_default().push(isl);
            }
        }

        let forward = cheapest_route(&adjacency, src, dst)
            .ok_or_else(|| unroutable(format!("no path from {src} to {dst}")))?;

        tracing::debug!(hops = forward.len(), "computed path");
        Ok(PathPair::from_forward(forward))
    }
}

/// Dijkstra by link cost; ties break on hop count, then on switch id.
fn cheapest_route(
    adjacency: &BTreeMap<SwitchId, Vec<&Isl>>,
    src: SwitchId,
    dst: SwitchId,
) -> Option<Vec<PathSegment>> {
    let mut best: HashMap<SwitchId, (u64, usize)> = HashMap::from([(src, (0, 0))]);
    let mut via: HashMap<SwitchId, &Isl> = HashMap::new();
    let mut queue = BinaryHeap::from([Reverse((0u64, 0usize, src))]);

    while let Some(Reverse((cost, hops, switch_id))) = queue.pop() {
        if switch_id == dst {
            break;
        }
        if best.get(&switch_id).is_some_and(|b| *b < (cost, hops)) {
            continue;
        }
        for isl in adjacency.get(&switch_id).into_iter().flatten() {
            let next = isl.dst.switch_id;
            let candidate = (cost + u64::from(isl.cost), hops + 1);
            if best.get(&next).is_none_or(|b| candidate < *b) {
                best.insert(next, candidate);
                via.insert(next, *isl);
                queue.push(Reverse((candidate.0, candidate.1, next)));
            }
        }
    }

    if !via.contains_key(&dst) {
        return None;
    }

    let mut segments = Vec::new();
    let mut current = dst;
    while current != src {
        let isl = via.get(&current)?;
        segments.push(PathSegment::new(
            isl.src.switch_id,
            isl.src.port,
            isl.dst.switch_id,
            isl.dst.port,
        ));
        current = isl.src.switch_id;
    }
    segments.reverse();
    Some(segments)
}
