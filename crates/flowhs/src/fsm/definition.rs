//! Transition tables.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{Action, StateMachine};
use crate::error::{FlowProcessingError, Result};

/// Target of a `(state, event)` pair.
pub struct Transition<M: StateMachine> {
    pub to: M::State,
    pub action: Option<Arc<dyn Action<M>>>,
}

impl<M: StateMachine> Clone for Transition<M> {
    fn clone(&self) -> Self {
        Self {
            to: self.to,
            action: self.action.clone(),
        }
    }
}

/// Immutable transition table of one machine kind.
///
/// Built once with [`FsmDefinition::builder`] and shared by every instance
/// of that kind.
pub struct FsmDefinition<M: StateMachine> {
    name: &'static str,
    initial: M::State,
    success: HashSet<M::State>,
    failure: HashSet<M::State>,
    auto_event: Option<M::Event>,
    transitions: HashMap<(M::State, M::Event), Transition<M>>,
}

impl<M: StateMachine> FsmDefinition<M> {
    pub fn builder(name: &'static str, initial: M::State) -> FsmDefinitionBuilder<M> {
        FsmDefinitionBuilder {
            name,
            initial,
            success: HashSet::new(),
            failure: HashSet::new(),
            auto_event: None,
            transitions: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn initial_state(&self) -> M::State {
        self.initial
    }

    /// Event fired repeatedly, once the queue drains, for as long as the
    /// current state accepts it.
    pub fn auto_event(&self) -> Option<M::Event> {
        self.auto_event
    }

    pub fn transition(&self, state: M::State, event: M::Event) -> Option<&Transition<M>> {
        self.transitions.get(&(state, event))
    }

    pub fn accepts(&self, state: M::State, event: M::Event) -> bool {
        self.transitions.contains_key(&(state, event))
    }

    pub fn is_terminal(&self, state: M::State) -> bool {
        self.success.contains(&state) || self.failure.contains(&state)
    }

    pub fn is_success(&self, state: M::State) -> bool {
        self.success.contains(&state)
    }

    pub fn is_failure(&self, state: M::State) -> bool {
        self.failure.contains(&state)
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }
}

/// Builder for [`FsmDefinition`].
pub struct FsmDefinitionBuilder<M: StateMachine> {
    name: &'static str,
    initial: M::State,
    success: HashSet<M::State>,
    failure: HashSet<M::State>,
    auto_event: Option<M::Event>,
    transitions: Vec<(M::State, M::Event, Transition<M>)>,
}

impl<M: StateMachine> FsmDefinitionBuilder<M> {
    /// Marks a terminal state that ends the operation successfully.
    pub fn success_state(mut self, state: M::State) -> Self {
        self.success.insert(state);
        self
    }

    /// Marks a terminal state that ends the operation with an error.
    pub fn failure_state(mut self, state: M::State) -> Self {
        self.failure.insert(state);
        self
    }

    pub fn auto_advance(mut self, event: M::Event) -> Self {
        self.auto_event = Some(event);
        self
    }

    /// Adds a transition without an action.
    pub fn transition(self, from: M::State, event: M::Event, to: M::State) -> Self {
        self.add(from, event, to, None)
    }

    /// Adds a transition running `action`.
    pub fn transition_with(
        self,
        from: M::State,
        event: M::Event,
        to: M::State,
        action: Arc<dyn Action<M>>,
    ) -> Self {
        self.add(from, event, to, Some(action))
    }

    /// Adds the same transition from each of `states`.
    pub fn from_each(
        mut self,
        states: impl IntoIterator<Item = M::State>,
        event: M::Event,
        to: M::State,
        action: Option<Arc<dyn Action<M>>>,
    ) -> Self {
        for from in states {
            self = self.add(from, event, to, action.clone());
        }
        self
    }

    fn add(
        mut self,
        from: M::State,
        event: M::Event,
        to: M::State,
        action: Option<Arc<dyn Action<M>>>,
    ) -> Self {
        self.transitions.push((from, event, Transition { to, action }));
        self
    }

    /// Validates and freezes the table.
    ///
    /// Fails if a terminal state has an outgoing transition, if a
    /// `(state, event)` pair is bound twice, or if no terminal state was
    /// declared.
    pub fn build(self) -> Result<FsmDefinition<M>> {
        let invalid = |reason: String| FlowProcessingError::Definition {
            fsm: self.name,
            reason,
        };

        if self.success.is_empty() && self.failure.is_empty() {
            return Err(invalid("no terminal state declared".to_string()));
        }

        let mut transitions = HashMap::with_capacity(self.transitions.len());
        for (from, event, transition) in self.transitions {
            if self.success.contains(&from) || self.failure.contains(&from) {
                return Err(invalid(format!(
                    "terminal state {from} has a transition on {event}"
                )));
            }
            if transitions.insert((from, event), transition).is_some() {
                return Err(invalid(format!(
                    "transition from {from} on {event} is defined twice"
                )));
            }
        }

        Ok(FsmDefinition {
            name: self.name,
            initial: self.initial,
            success: self.success,
            failure: self.failure,
            auto_event: self.auto_event,
            transitions,
        })
    }
}
