use async_trait::async_trait;
use common::{FlowId, MeterId, PathId, RetryPolicy, SwitchId};

use crate::model::{Flow, FlowPath, FlowStatus, Isl, IslEndpoint, Switch};
use crate::{PersistenceError, Result};

/// Repository operations available inside a transaction.
///
/// Reads see the state as of `begin` plus this transaction's own writes.
/// Nothing is visible to other transactions until [`commit`] succeeds;
/// dropping the transaction discards its writes.
///
/// [`commit`]: NetworkTransaction::commit
#[async_trait]
pub trait NetworkTransaction: Send {
    // Switches

    fn find_switch(&self, switch_id: SwitchId) -> Option<Switch>;

    /// Serializes this transaction against any other transaction that
    /// locks or writes one of these switches.
    fn lock_switches(&mut self, switch_ids: &[SwitchId]) -> Result<()>;

    // Flows

    fn find_flow(&self, flow_id: &FlowId) -> Option<Flow>;

    fn create_flow(&mut self, flow: Flow) -> Result<()>;

    fn update_flow(&mut self, flow: Flow) -> Result<()>;

    fn delete_flow(&mut self, flow_id: &FlowId) -> Result<Flow>;

    // Flow paths

    fn find_path(&self, path_id: PathId) -> Option<FlowPath>;

    fn find_paths_by_flow(&self, flow_id: &FlowId) -> Vec<FlowPath>;

    /// Inserts or replaces a path.
    fn save_path(&mut self, path: FlowPath) -> Result<()>;

    fn delete_path(&mut self, path_id: PathId) -> Result<FlowPath>;

    /// Sums the bandwidth of every path with a segment over the link
    /// between `src` and `dst`.
    fn used_bandwidth_between(&self, src: IslEndpoint, dst: IslEndpoint) -> u64;

    // ISLs

    fn find_isl(&self, src: IslEndpoint, dst: IslEndpoint) -> Option<Isl>;

    fn find_isls(&self) -> Vec<Isl>;

    /// Sets `available = max - used_bandwidth` on the link and returns the
    /// new value.
    fn update_available_bandwidth(
        &mut self,
        src: IslEndpoint,
        dst: IslEndpoint,
        used_bandwidth: u64,
    ) -> Result<i64>;

    // Resource pools

    /// Reserves the lowest free unmasked cookie value.
    fn allocate_cookie(&mut self) -> Result<u64>;

    fn release_cookie(&mut self, unmasked: u64);

    /// Reserves the lowest free flow meter id on a switch.
    fn allocate_meter(&mut self, switch_id: SwitchId) -> Result<MeterId>;

    fn release_meter(&mut self, switch_id: SwitchId, meter_id: MeterId);

    /// Reserves the lowest free transit vlan.
    fn allocate_transit_vlan(&mut self) -> Result<u16>;

    fn release_transit_vlan(&mut self, vlan: u16);

    /// Makes this transaction's writes visible atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    // Provided helpers

    fn get_switch(&self, switch_id: SwitchId) -> Result<Switch> {
        self.find_switch(switch_id)
            .ok_or(PersistenceError::SwitchNotFound(switch_id))
    }

    fn get_flow(&self, flow_id: &FlowId) -> Result<Flow> {
        self.find_flow(flow_id)
            .ok_or_else(|| PersistenceError::FlowNotFound(flow_id.clone()))
    }

    fn get_path(&self, path_id: PathId) -> Result<FlowPath> {
        self.find_path(path_id)
            .ok_or(PersistenceError::PathNotFound(path_id))
    }

    fn update_flow_status(&mut self, flow_id: &FlowId, status: FlowStatus) -> Result<()> {
        let mut flow = self.get_flow(flow_id)?;
        flow.status = status;
        flow.time_modified = chrono::Utc::now();
        self.update_flow(flow)
    }

    /// Recomputes available bandwidth, from actual usage, of every link
    /// the path traverses in both directions.
    fn recompute_isls_for_path(&mut self, path: &FlowPath) -> Result<()> {
        for segment in &path.segments {
            for (src, dst) in [
                (segment.src(), segment.dst()),
                (segment.dst(), segment.src()),
            ] {
                if self.find_isl(src, dst).is_none() {
                    continue;
                }
                let used = self.used_bandwidth_between(src, dst);
                let available = self.update_available_bandwidth(src, dst, used)?;
                tracing::debug!(%src, %dst, used, available, "updated ISL available bandwidth");
            }
        }
        Ok(())
    }
}

/// A transactional network repository.
#[async_trait]
pub trait NetworkStore: Send + Sync {
    /// Starts a new transaction.
    async fn begin(&self) -> Result<Box<dyn NetworkTransaction>>;
}

/// Extension trait providing closure-based transactions.
#[async_trait]
pub trait NetworkStoreExt: NetworkStore {
    /// Runs `work` in a single transaction and commits it if `work` succeeds.
    async fn transaction<T, F>(&self, mut work: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&mut dyn NetworkTransaction) -> Result<T> + Send,
    {
        let mut tx = self.begin().await?;
        let value = work(&mut *tx)?;
        tx.commit().await?;
        Ok(value)
    }

    /// Runs `work` in a transaction, repeating the whole transaction on
    /// recoverable failures as allowed by `policy`.
    async fn transaction_with_retry<T, F>(&self, policy: &RetryPolicy, mut work: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&mut dyn NetworkTransaction) -> Result<T> + Send,
    {
        let mut retries = 0;
        loop {
            match self.transaction(&mut work).await {
                Ok(value) => return Ok(value),
                Err(e) if policy.should_retry(&e, retries) => {
                    retries += 1;
                    metrics::counter!("network_transaction_retries").increment(1);
                    tracing::warn!(
                        attempt = retries,
                        max_retries = policy.max_retries(),
                        error = %e,
                        "retrying network transaction"
                    );
                    if !policy.delay().is_zero() {
                        tokio::time::sleep(policy.delay()).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// Blanket implementation for all NetworkStore implementations
impl<T: NetworkStore + ?Sized> NetworkStoreExt for T {}
