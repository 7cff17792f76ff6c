//! Per-access outcome reports.

use crate::{QuerierId, Timestamp};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// How a single access was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessOutcome {
    /// No cached guard; built from scratch (or no policies at all).
    Miss,
    /// Cached guard still current.
    Hit,
    /// Cached guard was stale and patched by an incremental merge.
    SoftHit,
    /// Cached guard was stale and rebuilt from the full policy set.
    Regenerate,
}

impl AccessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessOutcome::Miss => "miss",
            AccessOutcome::Hit => "hit",
            AccessOutcome::SoftHit => "soft-hit",
            AccessOutcome::Regenerate => "regenerate",
        }
    }
}

impl fmt::Display for AccessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock breakdown of one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AccessTimings {
    #[serde(rename = "policy_retrieval_ms", serialize_with = "as_millis")]
    pub policy_retrieval: Duration,
    #[serde(rename = "guard_generation_ms", serialize_with = "as_millis")]
    pub guard_generation: Duration,
    #[serde(rename = "execution_ms", serialize_with = "as_millis")]
    pub execution: Duration,
}

impl AccessTimings {
    pub fn total(&self) -> Duration {
        self.policy_retrieval + self.guard_generation + self.execution
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1_000.0)
}

/// Structured record emitted for every access.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessReport {
    pub querier: QuerierId,
    pub outcome: AccessOutcome,
    /// Policies retrieved to build or patch the guard; zero on a hit.
    pub policy_count: usize,
    /// Guard parts of the artifact the query ran against.
    pub guard_parts: usize,
    pub timings: AccessTimings,
    pub recorded_at: Timestamp,
}
