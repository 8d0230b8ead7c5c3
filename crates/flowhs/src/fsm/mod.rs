//! Generic table-driven finite state machine framework.
//!
//! A machine is a plain struct implementing [`StateMachine`]; its
//! transitions live in an immutable [`FsmDefinition`] shared by all
//! instances of that kind, and an [`FsmExecutor`] applies events to an
//! instance. Actions never call the executor: follow-up events go onto the
//! instance's own queue and are drained by the executor after the current
//! transition completes.

pub mod action;
pub mod definition;
pub mod executor;

use std::collections::VecDeque;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::time::{Duration, Instant};

pub use action::Action;
pub use definition::{FsmDefinition, FsmDefinitionBuilder, Transition};
pub use executor::FsmExecutor;

/// State and queue bookkeeping shared by every machine.
#[derive(Debug)]
pub struct FsmCore<S, E, C> {
    state: S,
    queue: VecDeque<(E, C)>,
    error_reason: Option<String>,
    started_at: Instant,
}

impl<S: Copy, E, C> FsmCore<S, E, C> {
    /// Creates a core positioned at `initial`.
    pub fn new(initial: S) -> Self {
        Self {
            state: initial,
            queue: VecDeque::new(),
            error_reason: None,
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: S) {
        self.state = state;
    }

    pub fn enqueue(&mut self, event: E, context: C) {
        self.queue.push_back((event, context));
    }

    pub(crate) fn dequeue(&mut self) -> Option<(E, C)> {
        self.queue.pop_front()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The first error that drove the machine to its error path.
    pub fn error_reason(&self) -> Option<&str> {
        self.error_reason.as_deref()
    }

    /// Records `reason` unless an earlier error was already recorded.
    pub fn record_error(&mut self, reason: impl Into<String>) {
        if self.error_reason.is_none() {
            self.error_reason = Some(reason.into());
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// A state machine instance.
pub trait StateMachine: Send + Sync + Sized + 'static {
    type State: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static;
    type Event: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static;
    type Context: Default + Send + Sync + 'static;

    /// Event queued by [`fire_error`](StateMachine::fire_error).
    const ERROR_EVENT: Self::Event;

    fn core(&self) -> &FsmCore<Self::State, Self::Event, Self::Context>;

    fn core_mut(&mut self) -> &mut FsmCore<Self::State, Self::Event, Self::Context>;

    fn current_state(&self) -> Self::State {
        self.core().state()
    }

    /// Queues a follow-up event with an empty context.
    fn fire(&mut self, event: Self::Event) {
        self.core_mut().enqueue(event, Self::Context::default());
    }

    /// Queues a follow-up event with the given context.
    fn fire_with(&mut self, event: Self::Event, context: Self::Context) {
        self.core_mut().enqueue(event, context);
    }

    /// Records `reason` and queues the error event.
    fn fire_error(&mut self, reason: impl Into<String>) {
        let core = self.core_mut();
        core.record_error(reason);
        core.enqueue(Self::ERROR_EVENT, Self::Context::default());
    }
}

#[cfg(test)]
pub(crate) mod test_machine {
    //! A small machine used to exercise the framework in isolation.

    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{FlowProcessingError, Result};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Light {
        Off,
        Warming,
        Ready,
        On,
        Broken,
    }

    impl Display for Light {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            Debug::fmt(self, f)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Switch {
        Next,
        Press,
        Fail,
        Error,
    }

    impl Display for Switch {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            Debug::fmt(self, f)
        }
    }

    #[derive(Debug)]
    pub struct Lamp {
        pub log: Vec<String>,
        core: FsmCore<Light, Switch, u32>,
    }

    impl Lamp {
        pub fn new() -> Self {
            Self {
                log: Vec::new(),
                core: FsmCore::new(Light::Off),
            }
        }
    }

    impl StateMachine for Lamp {
        type State = Light;
        type Event = Switch;
        type Context = u32;

        const ERROR_EVENT: Switch = Switch::Error;

        fn core(&self) -> &FsmCore<Light, Switch, u32> {
            &self.core
        }

        fn core_mut(&mut self) -> &mut FsmCore<Light, Switch, u32> {
            &mut self.core
        }
    }

    /// Logs the transition and the context it received.
    pub struct Record;

    #[async_trait]
    impl Action<Lamp> for Record {
        async fn perform(
            &self,
            from: Light,
            to: Light,
            event: Switch,
            context: &u32,
            fsm: &mut Lamp,
        ) -> Result<()> {
            fsm.log.push(format!("{from}-{event}->{to}:{context}"));
            Ok(())
        }
    }

    /// Always fails.
    pub struct Explode;

    #[async_trait]
    impl Action<Lamp> for Explode {
        async fn perform(
            &self,
            _from: Light,
            _to: Light,
            _event: Switch,
            _context: &u32,
            _fsm: &mut Lamp,
        ) -> Result<()> {
            Err(FlowProcessingError::InvalidRequest("bulb blew".into()))
        }
    }

    /// Off -Press-> Warming -Next-> Ready -Press-> On, with Error from any
    /// live state leading to Broken.
    pub fn definition() -> FsmDefinition<Lamp> {
        let record: Arc<dyn Action<Lamp>> = Arc::new(Record);
        FsmDefinition::builder("Lamp", Light::Off)
            .success_state(Light::On)
            .failure_state(Light::Broken)
            .auto_advance(Switch::Next)
            .transition_with(Light::Off, Switch::Press, Light::Warming, record.clone())
            .transition_with(Light::Warming, Switch::Next, Light::Ready, record.clone())
            .transition_with(Light::Ready, Switch::Press, Light::On, record)
            .transition_with(Light::Ready, Switch::Fail, Light::Ready, Arc::new(Explode))
            .from_each(
                [Light::Off, Light::Warming, Light::Ready],
                Switch::Error,
                Light::Broken,
                None,
            )
            .build()
            .expect("lamp definition")
    }
}
