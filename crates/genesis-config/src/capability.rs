//! Capability level and reconciliation policy.
//!
//! Both values are read once at boot. The capability level selects which
//! lifecycle hook bodies run; it never changes for the lifetime of a
//! process.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Tier of lifecycle behaviour enabled for this process.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CapabilityLevel {
    /// Every lifecycle hook body is a no-op.
    #[default]
    Baseline,
    /// Drain, checkpoint, integrity checks and crash recovery are enabled.
    Advanced,
}

/// Outcome of resolving a textual capability level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelResolution {
    /// Level the process will run at.
    pub level: CapabilityLevel,
    /// Original text when it was absent or unrecognised and the level fell
    /// back to baseline.
    pub rejected: Option<String>,
}

impl CapabilityLevel {
    /// Resolves configuration text into a level.
    ///
    /// Absent (blank) or unrecognised values resolve to
    /// [`CapabilityLevel::Baseline`]; the offending text is returned so the
    /// caller can report it.
    #[must_use]
    pub fn resolve(raw: &str) -> LevelResolution {
        match raw.trim().parse::<Self>() {
            Ok(level) => LevelResolution {
                level,
                rejected: None,
            },
            Err(_) => LevelResolution {
                level: Self::Baseline,
                rejected: Some(raw.to_owned()),
            },
        }
    }

    /// Returns `true` when full hook bodies run.
    #[must_use]
    pub const fn is_advanced(self) -> bool {
        matches!(self, Self::Advanced)
    }
}

/// Policy for in-flight operations discovered during crash recovery.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReconcilePolicy {
    /// Offer resumable operations to the resumer; mark the rest failed.
    #[default]
    ResumeThenFail,
    /// Mark every in-flight operation failed.
    FailAll,
}

/// Error returned when a reconciliation policy cannot be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported reconcile policy '{0}' (expected resume_then_fail or fail_all)")]
pub struct ReconcilePolicyParseError(pub String);

impl ReconcilePolicy {
    /// Parses the policy strictly; unlike the capability level there is no
    /// silent fallback.
    pub fn parse_strict(raw: &str) -> Result<Self, ReconcilePolicyParseError> {
        raw.trim()
            .parse::<Self>()
            .map_err(|_| ReconcilePolicyParseError(raw.to_owned()))
    }
}
