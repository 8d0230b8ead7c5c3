//! Applies events to machine instances.

use std::sync::Arc;

use super::{FsmDefinition, StateMachine};

/// Drives instances of one machine kind through its definition.
pub struct FsmExecutor<M: StateMachine> {
    definition: Arc<FsmDefinition<M>>,
}

impl<M: StateMachine> Clone for FsmExecutor<M> {
    fn clone(&self) -> Self {
        Self {
            definition: self.definition.clone(),
        }
    }
}

impl<M: StateMachine> FsmExecutor<M> {
    pub fn new(definition: Arc<FsmDefinition<M>>) -> Self {
        Self { definition }
    }

    pub fn definition(&self) -> &FsmDefinition<M> {
        &self.definition
    }

    /// Queues `event` on `fsm` and processes the queue until it is empty
    /// and the current state no longer accepts the auto-advance event.
    ///
    /// Events with no transition from the current state are logged and
    /// dropped. Returns the state the instance ends up in.
    pub async fn fire(&self, fsm: &mut M, event: M::Event, context: M::Context) -> M::State {
        fsm.core_mut().enqueue(event, context);

        loop {
            while let Some((event, context)) = fsm.core_mut().dequeue() {
                self.apply(fsm, event, context).await;
            }

            match self.definition.auto_event() {
                Some(next) if self.definition.accepts(fsm.current_state(), next) => {
                    fsm.fire(next);
                }
                _ => break,
            }
        }

        fsm.current_state()
    }

    async fn apply(&self, fsm: &mut M, event: M::Event, context: M::Context) {
        let from = fsm.current_state();
        let Some(transition) = self.definition.transition(from, event) else {
            tracing::warn!(
                fsm = self.definition.name(),
                state = %from,
                %event,
                "no transition for event, ignoring"
            );
            return;
        };

        let to = transition.to;
        tracing::debug!(fsm = self.definition.name(), %from, %to, %event, "transition");

        if let Some(action) = &transition.action {
            action.execute(from, to, event, &context, fsm).await;
        }
        fsm.core_mut().set_state(to);
    }
}
