use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::{FlowId, MeterId, PathId, SwitchId};
use tokio::sync::RwLock;

use crate::model::{Flow, FlowPath, Isl, IslEndpoint, Switch};
use crate::store::{NetworkStore, NetworkTransaction};
use crate::{PersistenceError, Result};

const MAX_UNMASKED_COOKIE: u64 = 0xFFFF_FFFF;
const MAX_FLOW_METER_ID: u32 = 2047;
const MIN_TRANSIT_VLAN: u16 = 2;
const MAX_TRANSIT_VLAN: u16 = 4094;

/// A unit of data tracked for conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum EntityKey {
    Switch(SwitchId),
    Flow(FlowId),
    Path(PathId),
    Isl(IslEndpoint, IslEndpoint),
    Cookie(u64),
    Meter(SwitchId, MeterId),
    TransitVlan(u16),
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::Switch(id) => write!(f, "switch {id}"),
            EntityKey::Flow(id) => write!(f, "flow {id}"),
            EntityKey::Path(id) => write!(f, "path {id}"),
            EntityKey::Isl(src, dst) => write!(f, "isl {src}-{dst}"),
            EntityKey::Cookie(c) => write!(f, "cookie {c}"),
            EntityKey::Meter(sw, m) => write!(f, "meter {m} on {sw}"),
            EntityKey::TransitVlan(v) => write!(f, "transit vlan {v}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NetworkState {
    switches: BTreeMap<SwitchId, Switch>,
    isls: BTreeMap<(IslEndpoint, IslEndpoint), Isl>,
    flows: BTreeMap<FlowId, Flow>,
    paths: BTreeMap<PathId, FlowPath>,
    cookies: BTreeSet<u64>,
    meters: BTreeSet<(SwitchId, MeterId)>,
    transit_vlans: BTreeSet<u16>,
}

impl NetworkState {
    /// Copies the value behind `key` from `source`, removing it here if
    /// `source` no longer has it.
    fn apply(&mut self, source: &NetworkState, key: &EntityKey) {
        fn copy<K: Ord + Clone, V: Clone>(dst: &mut BTreeMap<K, V>, src: &BTreeMap<K, V>, k: &K) {
            match src.get(k) {
                Some(v) => {
                    dst.insert(k.clone(), v.clone());
                }
                None => {
                    dst.remove(k);
                }
            }
        }
        fn toggle<T: Ord + Clone>(dst: &mut BTreeSet<T>, src: &BTreeSet<T>, v: &T) {
            if src.contains(v) {
                dst.insert(v.clone());
            } else {
                dst.remove(v);
            }
        }

        match key {
            EntityKey::Switch(id) => copy(&mut self.switches, &source.switches, id),
            EntityKey::Flow(id) => copy(&mut self.flows, &source.flows, id),
            EntityKey::Path(id) => copy(&mut self.paths, &source.paths, id),
            EntityKey::Isl(src, dst) => copy(&mut self.isls, &source.isls, &(*src, *dst)),
            EntityKey::Cookie(c) => toggle(&mut self.cookies, &source.cookies, c),
            EntityKey::Meter(sw, m) => toggle(&mut self.meters, &source.meters, &(*sw, *m)),
            EntityKey::TransitVlan(v) => {
                toggle(&mut self.transit_vlans, &source.transit_vlans, v)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: NetworkState,
    /// Commit sequence number at which each key was last written.
    versions: HashMap<EntityKey, u64>,
    commit_seq: u64,
    injected_conflicts: u32,
}

/// In-memory network repository.
///
/// Transactions work on a private snapshot and are validated optimistically
/// at commit: if another transaction committed a write to any key this one
/// wrote or locked since it began, the commit fails with
/// [`PersistenceError::TransactionConflict`].
#[derive(Clone, Default)]
pub struct InMemoryNetworkStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryNetworkStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a switch outside of any transaction.
    pub async fn add_switch(&self, switch: Switch) {
        let mut inner = self.inner.write().await;
        inner.state.switches.insert(switch.switch_id, switch);
    }

    /// Adds or replaces a unidirectional ISL outside of any transaction.
    pub async fn add_isl(&self, isl: Isl) {
        let mut inner = self.inner.write().await;
        inner.state.isls.insert((isl.src, isl.dst), isl);
    }

    /// Adds both directions of a link between two switch ports.
    pub async fn add_bidirectional_isl(&self, a: IslEndpoint, b: IslEndpoint, max_bandwidth: u64) {
        self.add_isl(Isl::new(a, b, max_bandwidth)).await;
        self.add_isl(Isl::new(b, a, max_bandwidth)).await;
    }

    /// Makes the next `count` commits fail with a recoverable conflict.
    pub async fn inject_conflicts(&self, count: u32) {
        self.inner.write().await.injected_conflicts = count;
    }

    pub async fn flow(&self, flow_id: &FlowId) -> Option<Flow> {
        self.inner.read().await.state.flows.get(flow_id).cloned()
    }

    pub async fn path(&self, path_id: PathId) -> Option<FlowPath> {
        self.inner.read().await.state.paths.get(&path_id).cloned()
    }

    pub async fn paths_for_flow(&self, flow_id: &FlowId) -> Vec<FlowPath> {
        self.inner
            .read()
            .await
            .state
            .paths
            .values()
            .filter(|p| &p.flow_id == flow_id)
            .cloned()
            .collect()
    }

    pub async fn path_count(&self) -> usize {
        self.inner.read().await.state.paths.len()
    }

    pub async fn isl(&self, src: IslEndpoint, dst: IslEndpoint) -> Option<Isl> {
        self.inner.read().await.state.isls.get(&(src, dst)).cloned()
    }

    /// Overwrites the stored available bandwidth of a link, bypassing
    /// transactions.
    pub async fn set_available_bandwidth(&self, src: IslEndpoint, dst: IslEndpoint, value: i64) {
        if let Some(isl) = self.inner.write().await.state.isls.get_mut(&(src, dst)) {
            isl.available_bandwidth = value;
        }
    }

    /// Returns the number of allocated cookies, meters and transit vlans.
    pub async fn allocated_resource_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.state.cookies.len() + inner.state.meters.len() + inner.state.transit_vlans.len()
    }
}

#[async_trait]
impl NetworkStore for InMemoryNetworkStore {
    async fn begin(&self) -> Result<Box<dyn NetworkTransaction>> {
        let inner = self.inner.read().await;
        Ok(Box::new(InMemoryTransaction {
            store: self.inner.clone(),
            state: inner.state.clone(),
            start_seq: inner.commit_seq,
            writes: BTreeSet::new(),
        }))
    }
}

/// A transaction over an [`InMemoryNetworkStore`] snapshot.
pub struct InMemoryTransaction {
    store: Arc<RwLock<Inner>>,
    state: NetworkState,
    start_seq: u64,
    writes: BTreeSet<EntityKey>,
}

impl InMemoryTransaction {
    fn touch(&mut self, key: EntityKey) {
        self.writes.insert(key);
    }
}

#[async_trait]
impl NetworkTransaction for InMemoryTransaction {
    fn find_switch(&self, switch_id: SwitchId) -> Option<Switch> {
        self.state.switches.get(&switch_id).cloned()
    }

    fn lock_switches(&mut self, switch_ids: &[SwitchId]) -> Result<()> {
        for switch_id in switch_ids {
            if !self.state.switches.contains_key(switch_id) {
                return Err(PersistenceError::SwitchNotFound(*switch_id));
            }
            self.touch(EntityKey::Switch(*switch_id));
        }
        Ok(())
    }

    fn find_flow(&self, flow_id: &FlowId) -> Option<Flow> {
        self.state.flows.get(flow_id).cloned()
    }

    fn create_flow(&mut self, flow: Flow) -> Result<()> {
        if self.state.flows.contains_key(&flow.flow_id) {
            return Err(PersistenceError::FlowAlreadyExists(flow.flow_id));
        }
        self.touch(EntityKey::Flow(flow.flow_id.clone()));
        self.state.flows.insert(flow.flow_id.clone(), flow);
        Ok(())
    }

    fn update_flow(&mut self, flow: Flow) -> Result<()> {
        if !self.state.flows.contains_key(&flow.flow_id) {
            return Err(PersistenceError::FlowNotFound(flow.flow_id));
        }
        self.touch(EntityKey::Flow(flow.flow_id.clone()));
        self.state.flows.insert(flow.flow_id.clone(), flow);
        Ok(())
    }

    fn delete_flow(&mut self, flow_id: &FlowId) -> Result<Flow> {
        let flow = self
            .state
            .flows
            .remove(flow_id)
            .ok_or_else(|| PersistenceError::FlowNotFound(flow_id.clone()))?;
        self.touch(EntityKey::Flow(flow_id.clone()));
        Ok(flow)
    }

    fn find_path(&self, path_id: PathId) -> Option<FlowPath> {
        self.state.paths.get(&path_id).cloned()
    }

    fn find_paths_by_flow(&self, flow_id: &FlowId) -> Vec<FlowPath> {
        self.state
            .paths
            .values()
            .filter(|p| &p.flow_id == flow_id)
            .cloned()
            .collect()
    }

    fn save_path(&mut self, path: FlowPath) -> Result<()> {
        self.touch(EntityKey::Path(path.path_id));
        self.state.paths.insert(path.path_id, path);
        Ok(())
    }

    fn delete_path(&mut self, path_id: PathId) -> Result<FlowPath> {
        let path = self
            .state
            .paths
            .remove(&path_id)
            .ok_or(PersistenceError::PathNotFound(path_id))?;
        self.touch(EntityKey::Path(path_id));
        Ok(path)
    }

    fn used_bandwidth_between(&self, src: IslEndpoint, dst: IslEndpoint) -> u64 {
        self.state
            .paths
            .values()
            .filter(|p| p.segments.iter().any(|s| s.src() == src && s.dst() == dst))
            .map(|p| p.bandwidth)
            .sum()
    }

    fn find_isl(&self, src: IslEndpoint, dst: IslEndpoint) -> Option<Isl> {
        self.state.isls.get(&(src, dst)).cloned()
    }

    fn find_isls(&self) -> Vec<Isl> {
        self.state.isls.values().cloned().collect()
    }

    fn update_available_bandwidth(
        &mut self,
        src: IslEndpoint,
        dst: IslEndpoint,
        used_bandwidth: u64,
    ) -> Result<i64> {
        let isl = self
            .state
            .isls
            .get_mut(&(src, dst))
            .ok_or(PersistenceError::IslNotFound { src, dst })?;
        isl.available_bandwidth = isl.max_bandwidth as i64 - used_bandwidth as i64;
        let available = isl.available_bandwidth;
        self.touch(EntityKey::Isl(src, dst));
        Ok(available)
    }

    fn allocate_cookie(&mut self) -> Result<u64> {
        let value = (1..=MAX_UNMASKED_COOKIE)
            .find(|c| !self.state.cookies.contains(c))
            .ok_or(PersistenceError::ResourceExhausted("cookie"))?;
        self.state.cookies.insert(value);
        self.touch(EntityKey::Cookie(value));
        Ok(value)
    }

    fn release_cookie(&mut self, unmasked: u64) {
        if self.state.cookies.remove(&unmasked) {
            self.touch(EntityKey::Cookie(unmasked));
        }
    }

    fn allocate_meter(&mut self, switch_id: SwitchId) -> Result<MeterId> {
        let meter = (MeterId::MIN_FLOW_METER_ID..=MAX_FLOW_METER_ID)
            .map(MeterId::new)
            .find(|m| !self.state.meters.contains(&(switch_id, *m)))
            .ok_or(PersistenceError::ResourceExhausted("meter"))?;
        self.state.meters.insert((switch_id, meter));
        self.touch(EntityKey::Meter(switch_id, meter));
        Ok(meter)
    }

    fn release_meter(&mut self, switch_id: SwitchId, meter_id: MeterId) {
        if self.state.meters.remove(&(switch_id, meter_id)) {
            self.touch(EntityKey::Meter(switch_id, meter_id));
        }
    }

    fn allocate_transit_vlan(&mut self) -> Result<u16> {
        let vlan = (MIN_TRANSIT_VLAN..=MAX_TRANSIT_VLAN)
            .find(|v| !self.state.transit_vlans.contains(v))
            .ok_or(PersistenceError::ResourceExhausted("transit vlan"))?;
        self.state.transit_vlans.insert(vlan);
        self.touch(EntityKey::TransitVlan(vlan));
        Ok(vlan)
    }

    fn release_transit_vlan(&mut self, vlan: u16) {
        if self.state.transit_vlans.remove(&vlan) {
            self.touch(EntityKey::TransitVlan(vlan));
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut inner = self.store.write().await;

        if inner.injected_conflicts > 0 {
            inner.injected_conflicts -= 1;
            return Err(PersistenceError::TransactionConflict(
                "injected conflict".to_string(),
            ));
        }

        if let Some(key) = self
            .writes
            .iter()
            .find(|k| inner.versions.get(*k).is_some_and(|v| *v > self.start_seq))
        {
            metrics::counter!("network_transaction_conflicts").increment(1);
            return Err(PersistenceError::TransactionConflict(key.to_string()));
        }

        inner.commit_seq += 1;
        let seq = inner.commit_seq;
        for key in &self.writes {
            inner.state.apply(&self.state, key);
            inner.versions.insert(key.clone(), seq);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FlowEndpoint;
    use crate::store::NetworkStoreExt;
    use common::RetryPolicy;

    fn sw(n: u64) -> SwitchId {
        SwitchId::new(n)
    }

    fn flow(id: &str) -> Flow {
        Flow::new(
            FlowId::new(id),
            FlowEndpoint::new(sw(1), 1, 0),
            FlowEndpoint::new(sw(2), 1, 0),
            100,
        )
    }

    async fn store_with_switches() -> InMemoryNetworkStore {
        let store = InMemoryNetworkStore::new();
        store.add_switch(Switch::new(sw(1))).await;
        store.add_switch(Switch::new(sw(2))).await;
        store
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = store_with_switches().await;
        store.transaction(|tx| tx.create_flow(flow("f1"))).await.unwrap();
        assert!(store.flow(&FlowId::new("f1")).await.is_some());
    }

    #[tokio::test]
    async fn failed_work_discards_writes() {
        let store = store_with_switches().await;
        let result: Result<()> = store
            .transaction(|tx| {
                tx.create_flow(flow("f1"))?;
                Err(PersistenceError::Unavailable("boom".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(store.flow(&FlowId::new("f1")).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_lock_of_same_switch_conflicts() {
        let store = store_with_switches().await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.lock_switches(&[sw(1)]).unwrap();
        second.lock_switches(&[sw(1), sw(2)]).unwrap();

        first.commit().await.unwrap();
        let result = second.commit().await;
        assert!(matches!(result, Err(PersistenceError::TransactionConflict(_))));
    }

    #[tokio::test]
    async fn disjoint_transactions_both_commit() {
        let store = store_with_switches().await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.create_flow(flow("f1")).unwrap();
        second.create_flow(flow("f2")).unwrap();

        first.commit().await.unwrap();
        second.commit().await.unwrap();
        assert!(store.flow(&FlowId::new("f1")).await.is_some());
        assert!(store.flow(&FlowId::new("f2")).await.is_some());
    }

    #[tokio::test]
    async fn retry_wrapper_survives_injected_conflicts() {
        let store = store_with_switches().await;
        store.inject_conflicts(3).await;

        store
            .transaction_with_retry(&RetryPolicy::new(3), |tx| tx.create_flow(flow("f1")))
            .await
            .unwrap();
        assert!(store.flow(&FlowId::new("f1")).await.is_some());
    }

    #[tokio::test]
    async fn retry_wrapper_gives_up_after_budget() {
        let store = store_with_switches().await;
        store.inject_conflicts(4).await;

        let result = store
            .transaction_with_retry(&RetryPolicy::new(3), |tx| tx.create_flow(flow("f1")))
            .await;
        assert!(matches!(result, Err(PersistenceError::TransactionConflict(_))));
        assert!(store.flow(&FlowId::new("f1")).await.is_none());
    }

    #[tokio::test]
    async fn resource_pools_hand_out_lowest_free_value() {
        let store = store_with_switches().await;
        let (c1, c2, m1, v1) = store
            .transaction(|tx| {
                let c1 = tx.allocate_cookie()?;
                let c2 = tx.allocate_cookie()?;
                let m1 = tx.allocate_meter(sw(1))?;
                let v1 = tx.allocate_transit_vlan()?;
                Ok((c1, c2, m1, v1))
            })
            .await
            .unwrap();
        assert_eq!((c1, c2), (1, 2));
        assert_eq!(m1, MeterId::new(MeterId::MIN_FLOW_METER_ID));
        assert_eq!(v1, MIN_TRANSIT_VLAN);

        store
            .transaction(|tx| {
                tx.release_cookie(1);
                Ok(())
            })
            .await
            .unwrap();
        let again = store.transaction(|tx| tx.allocate_cookie()).await.unwrap();
        assert_eq!(again, 1);
    }

    #[tokio::test]
    async fn available_bandwidth_is_max_minus_used() {
        let store = store_with_switches().await;
        let a = IslEndpoint::new(sw(1), 10);
        let b = IslEndpoint::new(sw(2), 20);
        store.add_isl(Isl::new(a, b, 1000)).await;

        let available = store
            .transaction(|tx| tx.update_available_bandwidth(a, b, 300))
            .await
            .unwrap();
        assert_eq!(available, 700);
        assert_eq!(store.isl(a, b).await.unwrap().available_bandwidth, 700);
    }
}
