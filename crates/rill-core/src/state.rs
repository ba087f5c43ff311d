//! Sync cycle phases shared by the orchestrator and the presentation layer.

use serde::{Deserialize, Serialize};

/// Orchestrator state machine.
///
/// `Idle → DeterminingMode → Pulling → Reconciling → UpdatingWatermarks → Idle`,
/// with `Failed` reachable from any step and leading back to `Idle`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    DeterminingMode,
    Pulling,
    Reconciling,
    UpdatingWatermarks,
    Failed,
}

impl SyncPhase {
    /// Whether the machine may move from `self` to `next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::DeterminingMode)
                | (Self::DeterminingMode, Self::Pulling)
                | (Self::Pulling, Self::Reconciling)
                | (Self::Reconciling, Self::UpdatingWatermarks)
                | (Self::UpdatingWatermarks | Self::Failed, Self::Idle)
                | (
                    Self::Idle
                        | Self::DeterminingMode
                        | Self::Pulling
                        | Self::Reconciling
                        | Self::UpdatingWatermarks,
                    Self::Failed
                )
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DeterminingMode => "determining_mode",
            Self::Pulling => "pulling",
            Self::Reconciling => "reconciling",
            Self::UpdatingWatermarks => "updating_watermarks",
            Self::Failed => "failed",
        }
    }
}
