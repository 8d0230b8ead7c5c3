//! Network model: switches, inter-switch links, flows and flow paths.

pub mod flow;
pub mod isl;
pub mod switch;

pub use flow::{Flow, FlowEndpoint, FlowPath, FlowStatus, PathSegment};
pub use isl::{Isl, IslEndpoint, IslStatus};
pub use switch::{Switch, SwitchFeature, SwitchStatus};
