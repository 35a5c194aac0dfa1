use std::collections::BTreeSet;

use serde::Serialize;

/// Reasons the run action is blocked. Several may be active at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusyReason {
    RunningModel,
    ApiPrognosis,
    MapMoving,
    MapLoading,
}

impl BusyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunningModel => "running-model",
            Self::ApiPrognosis => "api-prognosis",
            Self::MapMoving => "map-moving",
            Self::MapLoading => "map-loading",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BusyTracker {
    active: BTreeSet<BusyReason>,
}

impl BusyTracker {
    /// Returns true when the set changed.
    pub fn set(&mut self, reason: BusyReason, active: bool) -> bool {
        if active {
            self.active.insert(reason)
        } else {
            self.active.remove(&reason)
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn reasons(&self) -> Vec<BusyReason> {
        self.active.iter().copied().collect()
    }
}
