//! Sieve Cache - Guard caching with staleness tracking
//!
//! Caches one compiled guard per querier and keeps it consistent with the
//! policy store:
//!
//! - [`GuardCache`]: fixed-capacity CLOCK cache of guard artifacts
//! - [`TimestampDirectory`]: latest policy-change time per querier
//! - [`MergeCostModel`]: incremental merge vs. full rebuild of a stale guard
//! - [`CacheCoordinator`]: the per-access decision path
//!
//! Reference collaborators ([`InMemoryPolicyStore`], [`GroupingGuardBuilder`])
//! and report sinks are provided for embedding and tests.

pub mod builder;
pub mod clock;
pub mod coordinator;
pub mod cost_model;
pub mod guard_cache;
pub mod report;
pub mod store;
pub mod timestamp_directory;

pub use builder::GroupingGuardBuilder;
pub use clock::{ClockCache, PutOutcome};
pub use coordinator::{AccessResult, CacheCoordinator, CoordinatorStats};
pub use cost_model::{MergeAssessment, MergeCostModel, MergeDecision, MergeStrategy, RegenerateReason};
pub use guard_cache::{CacheStats, GuardCache, GuardWrite};
pub use report::{ChannelReportSink, JsonLinesReportSink, MemoryReportSink, TracingReportSink};
pub use store::InMemoryPolicyStore;
pub use timestamp_directory::{DirectoryWrite, TimestampDirectory, TimestampRecord};
