use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a logical flow.
///
/// Flow ids are chosen by the requester, so unlike the other identifiers
/// this is a free-form string rather than a generated UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    /// Creates a flow id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlowId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for FlowId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Datapath identifier of a switch.
///
/// Rendered in the conventional colon-separated form,
/// e.g. `00:00:00:00:00:00:00:0a`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SwitchId(u64);

impl SwitchId {
    /// Creates a switch id from its raw datapath id.
    pub fn new(dpid: u64) -> Self {
        Self(dpid)
    }

    /// Returns the raw datapath id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SwitchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_be_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Error returned when a switch id string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSwitchIdError(String);

impl std::fmt::Display for ParseSwitchIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid switch id: {}", self.0)
    }
}

impl std::error::Error for ParseSwitchIdError {}

impl FromStr for SwitchId {
    type Err = ParseSwitchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != ':').collect();
        if hex.is_empty() || hex.len() > 16 {
            return Err(ParseSwitchIdError(s.to_string()));
        }
        u64::from_str_radix(&hex, 16)
            .map(Self)
            .map_err(|_| ParseSwitchIdError(s.to_string()))
    }
}

impl From<u64> for SwitchId {
    fn from(dpid: u64) -> Self {
        Self(dpid)
    }
}

/// Unique identifier of one direction of a flow (a flow path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathId(Uuid);

impl PathId {
    /// Creates a new random path id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a path id from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PathId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single command sent to a switch agent.
///
/// The agent echoes it back in its response, which is how responses are
/// correlated with the command that caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Creates a new random command id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a command id from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CommandId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier of a forwarding rule installed on a switch.
///
/// The two high flag bits encode the flow direction the rule belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cookie(u64);

impl Cookie {
    pub const FORWARD_FLAG: u64 = 0x4000_0000_0000_0000;
    pub const REVERSE_FLAG: u64 = 0x2000_0000_0000_0000;
    const VALUE_MASK: u64 = 0x0000_0000_FFFF_FFFF;

    /// Creates a cookie from its raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Builds the forward-direction cookie for an allocated unmasked value.
    pub fn forward(unmasked: u64) -> Self {
        Self(Self::FORWARD_FLAG | (unmasked & Self::VALUE_MASK))
    }

    /// Builds the reverse-direction cookie for an allocated unmasked value.
    pub fn reverse(unmasked: u64) -> Self {
        Self(Self::REVERSE_FLAG | (unmasked & Self::VALUE_MASK))
    }

    /// Returns the allocated value without direction flags.
    pub fn unmasked(&self) -> u64 {
        self.0 & Self::VALUE_MASK
    }

    pub fn is_forward(&self) -> bool {
        self.0 & Self::FORWARD_FLAG != 0
    }

    pub fn is_reverse(&self) -> bool {
        self.0 & Self::REVERSE_FLAG != 0
    }

    /// Returns the raw value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identifier of a bandwidth meter installed on an ingress switch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MeterId(u32);

impl MeterId {
    /// First meter id available for flows; lower ids are reserved for
    /// system rules.
    pub const MIN_FLOW_METER_ID: u32 = 32;

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for MeterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
