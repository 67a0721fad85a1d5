//! Streaming unique-track deduplication.
//!
//! Candidates arrive ordered by (experiment, run). Only the identities of the
//! current (experiment, run) window are kept in memory: a small ordered
//! buffer that is flushed into the running total whenever the window
//! changes and once at the end of the stream.

use crate::presence::PresenceSet;
use std::cmp::Ordering;
use trackeff_core::{Error, EventKey, Result, TrackIdentity, TrackRecord};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How the provenance (source tag) baseline is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ProvenancePolicy {
    /// Each window's opening record sets the baseline for that window.
    PerWindow,
    /// The first accepted record of the stream sets the baseline for every
    /// window; flushes do not reset it. Window-opening records are still
    /// admitted unconditionally.
    #[default]
    Latched,
    /// Source tags are not compared.
    Ignore,
}

impl ProvenancePolicy {
    /// Short name used in logs and reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PerWindow => "per-window",
            Self::Latched => "latched",
            Self::Ignore => "ignore",
        }
    }
}

/// Configuration for [`TrackDeduplicator`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DedupConfig {
    /// Provenance baseline policy.
    pub provenance: ProvenancePolicy,
    /// Fail on records whose (experiment, run) decreases.
    pub check_ordering: bool,
    /// Preset baseline for [`ProvenancePolicy::Latched`].
    ///
    /// Used when a stream is split into partitions: every partition must
    /// compare against the baseline of the whole stream.
    pub baseline: Option<i64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            provenance: ProvenancePolicy::Latched,
            check_ordering: true,
            baseline: None,
        }
    }
}

impl DedupConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the provenance policy.
    #[must_use]
    pub fn with_provenance(mut self, provenance: ProvenancePolicy) -> Self {
        self.provenance = provenance;
        self
    }

    /// Enables or disables the ordering check.
    #[must_use]
    pub fn with_check_ordering(mut self, check: bool) -> Self {
        self.check_ordering = check;
        self
    }

    /// Presets the latched provenance baseline.
    #[must_use]
    pub fn with_baseline(mut self, source: i64) -> Self {
        self.baseline = Some(source);
        self
    }
}

/// Outcome of pushing one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new distinct track was added to the window buffer.
    Accepted,
    /// The identity is already in the window buffer.
    Duplicate,
    /// The record's event has no truth presence.
    NoTruth,
    /// The record's source differs from the established baseline.
    ProvenanceMismatch,
}

/// Counters collected while deduplicating a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DedupStatistics {
    /// Records pushed.
    pub records_seen: u64,
    /// Records skipped because their event has no truth.
    pub skipped_no_truth: u64,
    /// Records skipped for a provenance mismatch.
    pub provenance_mismatches: u64,
    /// Records whose identity was already counted.
    pub duplicates: u64,
    /// Window buffer flushes.
    pub flushes: u64,
    /// Distinct tracks admitted.
    pub accepted: u64,
}

impl DedupStatistics {
    /// Adds the counters of another run (e.g. a partition).
    pub fn merge(&mut self, other: &Self) {
        self.records_seen += other.records_seen;
        self.skipped_no_truth += other.skipped_no_truth;
        self.provenance_mismatches += other.provenance_mismatches;
        self.duplicates += other.duplicates;
        self.flushes += other.flushes;
        self.accepted += other.accepted;
    }
}

/// Deduplication state for one stream.
#[derive(Debug, Default)]
pub struct DedupState {
    /// Identities of the current window, ascending.
    buffer: Vec<TrackIdentity>,
    /// Sum of flushed window sizes.
    total: u64,
    /// Established source tag.
    baseline: Option<i64>,
    /// Key of the previous record, for the ordering check.
    previous: Option<EventKey>,
    stats: DedupStatistics,
}

impl DedupState {
    /// Distinct tracks flushed so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of identities in the current window.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.buffer.len()
    }

    /// Established provenance baseline, if any.
    #[must_use]
    pub fn baseline(&self) -> Option<i64> {
        self.baseline
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        self.total += self.buffer.len() as u64;
        self.buffer.clear();
        self.stats.flushes += 1;
    }

    /// Inserts keeping ascending order, scanning from the back.
    fn insert(&mut self, identity: TrackIdentity) -> bool {
        let mut pos = self.buffer.len();
        while pos > 0 {
            match self.buffer[pos - 1].cmp(&identity) {
                Ordering::Greater => pos -= 1,
                Ordering::Equal => return false,
                Ordering::Less => break,
            }
        }
        self.buffer.insert(pos, identity);
        true
    }
}

/// Counts distinct tracks in an ordered candidate stream.
///
/// A track is counted when its event has truth presence and its source tag
/// matches the provenance baseline. The record that opens a window is
/// always admitted.
#[derive(Debug, Clone, Default)]
pub struct TrackDeduplicator {
    config: DedupConfig,
}

impl TrackDeduplicator {
    /// Creates a deduplicator with the given configuration.
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Creates a fresh state for one stream.
    #[must_use]
    pub fn create_state(&self) -> DedupState {
        DedupState {
            baseline: match self.config.provenance {
                ProvenancePolicy::Latched => self.config.baseline,
                _ => None,
            },
            ..DedupState::default()
        }
    }

    /// Pushes one record through the deduplicator.
    ///
    /// # Errors
    /// Returns `OrderingViolation` if ordering checks are enabled and the
    /// record's (experiment, run) precedes the previous record's.
    pub fn push(
        &self,
        state: &mut DedupState,
        record: &TrackRecord,
        presence: &PresenceSet,
    ) -> Result<Admission> {
        let key = record.key();
        let position = state.stats.records_seen;
        state.stats.records_seen += 1;

        if self.config.check_ordering {
            if let Some(previous) = state.previous {
                if key.window() < previous.window() {
                    return Err(Error::OrderingViolation {
                        position,
                        previous,
                        found: key,
                    });
                }
            }
            state.previous = Some(key);
        }

        if !presence.contains(&key) {
            state.stats.skipped_no_truth += 1;
            return Ok(Admission::NoTruth);
        }

        if state
            .buffer
            .last()
            .is_some_and(|last| !last.key.same_window(&key))
        {
            state.flush();
        }
        let opens_window = state.buffer.is_empty();

        let admitted = match self.config.provenance {
            ProvenancePolicy::Ignore => true,
            ProvenancePolicy::PerWindow => {
                if opens_window {
                    state.baseline = Some(record.source);
                }
                state.baseline == Some(record.source)
            }
            ProvenancePolicy::Latched => {
                let baseline = *state.baseline.get_or_insert(record.source);
                opens_window || baseline == record.source
            }
        };
        if !admitted {
            state.stats.provenance_mismatches += 1;
            return Ok(Admission::ProvenanceMismatch);
        }

        if state.insert(record.identity) {
            state.stats.accepted += 1;
            Ok(Admission::Accepted)
        } else {
            state.stats.duplicates += 1;
            Ok(Admission::Duplicate)
        }
    }

    /// Flushes the last window and returns the total count.
    pub fn finish(&self, state: &mut DedupState) -> u64 {
        state.flush();
        log::trace!(
            "dedup ({}): {} distinct of {} records, {} without truth, {} provenance mismatches, {} duplicates",
            self.config.provenance.name(),
            state.total,
            state.stats.records_seen,
            state.stats.skipped_no_truth,
            state.stats.provenance_mismatches,
            state.stats.duplicates
        );
        state.total
    }

    /// Returns the statistics collected in a state.
    #[must_use]
    pub fn statistics(&self, state: &DedupState) -> DedupStatistics {
        state.stats
    }

    /// Counts the distinct tracks of a stream.
    ///
    /// # Errors
    /// Returns `OrderingViolation` on an out-of-order stream (when checked).
    pub fn count<I>(&self, records: I, presence: &PresenceSet) -> Result<u64>
    where
        I: IntoIterator,
        I::Item: std::borrow::Borrow<TrackRecord>,
    {
        self.count_with(records, presence, |_| Ok(()))
    }

    /// Counts the distinct tracks of a stream, calling `on_accept` for every
    /// newly admitted track.
    ///
    /// # Errors
    /// Returns `OrderingViolation` on an out-of-order stream (when checked),
    /// or the first error returned by `on_accept`.
    pub fn count_with<I, F>(&self, records: I, presence: &PresenceSet, mut on_accept: F) -> Result<u64>
    where
        I: IntoIterator,
        I::Item: std::borrow::Borrow<TrackRecord>,
        F: FnMut(&TrackRecord) -> Result<()>,
    {
        use std::borrow::Borrow;

        let mut state = self.create_state();
        for record in records {
            let record = record.borrow();
            if self.push(&mut state, record, presence)? == Admission::Accepted {
                on_accept(record)?;
            }
        }
        Ok(self.finish(&mut state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceConfig;

    fn rec(exp: i32, run: i32, evt: i32, idx: i64, src: i64) -> TrackRecord {
        TrackRecord::new(EventKey::new(exp, run, evt), idx, src, 0)
    }

    fn presence(keys: &[(i32, i32, i32)]) -> PresenceSet {
        let keys: Vec<_> = keys.iter().map(|&(x, r, e)| EventKey::new(x, r, e)).collect();
        PresenceSet::build(&keys, &PresenceConfig::default())
    }

    fn stream() -> Vec<TrackRecord> {
        vec![
            rec(1, 1, 1, 5, 10),
            rec(1, 1, 1, 5, 10),
            rec(1, 1, 2, 7, 10),
            rec(1, 2, 1, 5, 99),
        ]
    }

    #[test]
    fn test_counts_distinct_tracks_with_window_opener() {
        let truth = presence(&[(1, 1, 1), (1, 1, 2), (1, 2, 1)]);
        for policy in [
            ProvenancePolicy::PerWindow,
            ProvenancePolicy::Latched,
            ProvenancePolicy::Ignore,
        ] {
            let dedup = TrackDeduplicator::new(DedupConfig::new().with_provenance(policy));
            assert_eq!(dedup.count(&stream(), &truth).unwrap(), 3, "{policy:?}");
        }
    }

    #[test]
    fn test_truth_absent_events_contribute_nothing() {
        let dedup = TrackDeduplicator::default();
        assert_eq!(dedup.count(&stream(), &presence(&[(1, 1, 1)])).unwrap(), 1);
        assert_eq!(dedup.count(&stream(), &PresenceSet::Empty).unwrap(), 0);
    }

    #[test]
    fn test_empty_stream() {
        let dedup = TrackDeduplicator::default();
        let empty: Vec<TrackRecord> = Vec::new();
        assert_eq!(dedup.count(&empty, &presence(&[(1, 1, 1)])).unwrap(), 0);
    }

    #[test]
    fn test_mismatched_source_within_window_is_skipped() {
        let truth = presence(&[(1, 1, 1), (1, 1, 2)]);
        let records = vec![rec(1, 1, 1, 1, 10), rec(1, 1, 1, 2, 11), rec(1, 1, 2, 3, 10)];

        let dedup = TrackDeduplicator::default();
        let mut state = dedup.create_state();
        let admissions: Vec<_> = records
            .iter()
            .map(|r| dedup.push(&mut state, r, &truth).unwrap())
            .collect();
        assert_eq!(
            admissions,
            vec![
                Admission::Accepted,
                Admission::ProvenanceMismatch,
                Admission::Accepted
            ]
        );
        assert_eq!(dedup.finish(&mut state), 2);

        let ignore = TrackDeduplicator::new(DedupConfig::new().with_provenance(ProvenancePolicy::Ignore));
        assert_eq!(ignore.count(&records, &truth).unwrap(), 3);
    }

    #[test]
    fn test_latched_baseline_persists_across_windows() {
        let truth = presence(&[(1, 1, 1), (1, 2, 1)]);
        let records = vec![
            rec(1, 1, 1, 1, 10),
            rec(1, 2, 1, 1, 99), // opener, admitted
            rec(1, 2, 1, 2, 99), // compared against 10
            rec(1, 2, 1, 3, 10),
        ];

        let latched = TrackDeduplicator::new(DedupConfig::new().with_provenance(ProvenancePolicy::Latched));
        assert_eq!(latched.count(&records, &truth).unwrap(), 3);

        let per_window =
            TrackDeduplicator::new(DedupConfig::new().with_provenance(ProvenancePolicy::PerWindow));
        assert_eq!(per_window.count(&records, &truth).unwrap(), 3);
        let mut state = per_window.create_state();
        for r in &records {
            per_window.push(&mut state, r, &truth).unwrap();
        }
        assert_eq!(state.baseline(), Some(99));
        assert_eq!(per_window.statistics(&state).provenance_mismatches, 1);
    }

    #[test]
    fn test_default_baseline_persists_across_flushes() {
        let truth = presence(&[(1, 1, 1), (1, 2, 1)]);
        let records = vec![
            rec(1, 1, 1, 1, 10),
            rec(1, 2, 1, 1, 99),
            rec(1, 2, 1, 2, 10),
            rec(1, 2, 1, 3, 10),
        ];

        let dedup = TrackDeduplicator::default();
        assert_eq!(dedup.config().provenance, ProvenancePolicy::Latched);
        let mut state = dedup.create_state();
        let admissions: Vec<_> = records
            .iter()
            .map(|r| dedup.push(&mut state, r, &truth).unwrap())
            .collect();
        assert_eq!(admissions, vec![Admission::Accepted; 4]);
        assert_eq!(state.baseline(), Some(10));
        assert_eq!(dedup.finish(&mut state), 4);
        assert_eq!(dedup.count_parallel(&records, &truth).unwrap(), 4);

        let per_window =
            TrackDeduplicator::new(DedupConfig::new().with_provenance(ProvenancePolicy::PerWindow));
        assert_eq!(per_window.count(&records, &truth).unwrap(), 2);
        assert_eq!(per_window.count_parallel(&records, &truth).unwrap(), 2);
    }

    #[test]
    fn test_preset_baseline() {
        let truth = presence(&[(1, 2, 1)]);
        let records = vec![rec(1, 2, 1, 1, 99), rec(1, 2, 1, 2, 99), rec(1, 2, 1, 3, 10)];
        let dedup = TrackDeduplicator::new(
            DedupConfig::new()
                .with_provenance(ProvenancePolicy::Latched)
                .with_baseline(10),
        );
        assert_eq!(dedup.count(&records, &truth).unwrap(), 2);
    }

    #[test]
    fn test_out_of_order_insertion_dedups() {
        let truth = presence(&[(1, 1, 1), (1, 1, 2)]);
        let records = vec![
            rec(1, 1, 2, 4, 0),
            rec(1, 1, 1, 9, 0),
            rec(1, 1, 2, 4, 0),
            rec(1, 1, 1, 3, 0),
            rec(1, 1, 1, 9, 0),
        ];
        let dedup = TrackDeduplicator::default();
        let mut state = dedup.create_state();
        for r in &records {
            dedup.push(&mut state, r, &truth).unwrap();
        }
        let keys: Vec<_> = state.buffer.iter().map(|i| (i.key.event, i.track_index)).collect();
        assert_eq!(keys, vec![(1, 3), (1, 9), (2, 4)]);
        assert_eq!(state.window_len(), 3);
        assert_eq!(dedup.finish(&mut state), 3);
        assert_eq!(dedup.statistics(&state).duplicates, 2);
    }

    #[test]
    fn test_ordering_violation() {
        let truth = presence(&[(1, 1, 1), (1, 2, 1)]);
        let records = vec![rec(1, 2, 1, 1, 0), rec(1, 1, 1, 1, 0)];

        let dedup = TrackDeduplicator::default();
        let err = dedup.count(&records, &truth).unwrap_err();
        assert_eq!(
            err,
            Error::OrderingViolation {
                position: 1,
                previous: EventKey::new(1, 2, 1),
                found: EventKey::new(1, 1, 1),
            }
        );

        let unchecked = TrackDeduplicator::new(DedupConfig::new().with_check_ordering(false));
        assert_eq!(unchecked.count(&records, &truth).unwrap(), 2);
    }

    #[test]
    fn test_count_with_visits_each_distinct_track() {
        let truth = presence(&[(1, 1, 1), (1, 1, 2), (1, 2, 1)]);
        let mut seen = Vec::new();
        let n = TrackDeduplicator::default()
            .count_with(&stream(), &truth, |r| {
                seen.push(r.identity.track_index);
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(seen, vec![5, 7, 5]);
    }
}
