//! trackeff-algorithms: Counting algorithms for efficiency analysis.
//!
//! This crate provides:
//! - **PresenceSet** - truth event index (dense bitmap or hash set)
//! - **TrackDeduplicator** - streaming distinct-track counter with provenance filtering
//! - **Window partitioning** - parallel counting split at (experiment, run) boundaries
//! - **EfficiencyPurityAggregator** - efficiency and purity from four counts
//! - **Multiplicity** - per-event signal/background candidate counts
//!
#![warn(missing_docs)]

mod aggregate;
mod dedup;
pub mod histogram;
mod multiplicity;
mod partition;
mod presence;

pub use aggregate::{
    AggregatorConfig, BinnedEfficiency, BinnedVariable, CountMode, EfficiencyPurityAggregator,
    EfficiencyResult, Evaluation, Metrics, Selections,
};
pub use dedup::{
    Admission, DedupConfig, DedupState, DedupStatistics, ProvenancePolicy, TrackDeduplicator,
};
pub use histogram::{EfficiencyHistogram, ErrorModel, Histogram1D};
pub use multiplicity::{
    candidate_multiplicity, event_multiplicities, EventMultiplicity, MultiplicitySummary,
};
pub use partition::{check_ordering, latched_baseline, window_partitions};
pub use presence::{DenseGrid, PresenceConfig, PresenceSet, PresenceStrategy};
