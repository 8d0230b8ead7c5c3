//! Network model and the collaborators the flow engine consumes.
//!
//! This crate provides:
//! - The model: switches, inter-switch links, flows and flow paths
//! - A transactional repository contract with an in-memory implementation
//! - Per-flow resource allocation (cookies, meters, transit vlans)
//! - Path computation over the available network

pub mod error;
pub mod memory;
pub mod model;
pub mod pce;
pub mod resources;
pub mod store;

pub use error::{PathComputerError, PersistenceError, Result};
pub use memory::{InMemoryNetworkStore, InMemoryTransaction};
pub use model::{
    Flow, FlowEndpoint, FlowPath, FlowStatus, Isl, IslEndpoint, IslStatus, PathSegment, Switch,
    SwitchFeature, SwitchStatus,
};
pub use pce::{AvailableNetworkPathComputer, PathComputer, PathPair};
pub use resources::{FlowResources, FlowResourcesManager, PathResources};
pub use store::{NetworkStore, NetworkStoreExt, NetworkTransaction};
