//! Switches.

use std::collections::BTreeSet;

use common::SwitchId;
use serde::{Deserialize, Serialize};

/// Operational status of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SwitchStatus {
    #[default]
    Active,
    Inactive,
}

/// Optional capabilities a switch may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SwitchFeature {
    /// The switch can enforce bandwidth with meters.
    Meters,
}

/// A switch managed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    pub switch_id: SwitchId,
    pub status: SwitchStatus,
    pub features: BTreeSet<SwitchFeature>,
}

impl Switch {
    /// Creates an active switch with meter support.
    pub fn new(switch_id: SwitchId) -> Self {
        Self {
            switch_id,
            status: SwitchStatus::Active,
            features: BTreeSet::from([SwitchFeature::Meters]),
        }
    }

    /// Removes all advertised features.
    pub fn without_features(mut self) -> Self {
        self.features.clear();
        self
    }

    pub fn with_status(mut self, status: SwitchStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == SwitchStatus::Active
    }

    pub fn supports(&self, feature: SwitchFeature) -> bool {
        self.features.contains(&feature)
    }
}
