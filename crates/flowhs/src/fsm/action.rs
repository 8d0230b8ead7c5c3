//! Units of work bound to transitions.

use async_trait::async_trait;

use super::StateMachine;
use crate::error::Result;

/// Work executed on a transition.
///
/// Implementors write [`perform`](Action::perform); the executor only calls
/// [`execute`](Action::execute), which turns any error into the machine's
/// error event so that a failing action can never stall an operation.
#[async_trait]
pub trait Action<M: StateMachine>: Send + Sync {
    async fn perform(
        &self,
        from: M::State,
        to: M::State,
        event: M::Event,
        context: &M::Context,
        fsm: &mut M,
    ) -> Result<()>;

    async fn execute(
        &self,
        from: M::State,
        to: M::State,
        event: M::Event,
        context: &M::Context,
        fsm: &mut M,
    ) {
        if let Err(error) = self.perform(from, to, event, context, fsm).await {
            tracing::error!(%from, %to, %event, %error, "flow processing failure");
            metrics::counter!("flowhs_action_failures_total").increment(1);
            fsm.fire_error(error.to_string());
        }
    }
}
