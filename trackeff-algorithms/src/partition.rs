//! Window partitioning and parallel counting.
//!
//! Windows never share identities and the buffer is flushed between them,
//! so a stream split at (experiment, run) boundaries can be counted
//! partition by partition and summed.

use crate::dedup::{DedupStatistics, ProvenancePolicy, TrackDeduplicator};
use crate::presence::PresenceSet;
use rayon::prelude::*;
use std::ops::Range;
use trackeff_core::{Error, Result, TrackRecord};

/// Splits a stream into maximal runs of records sharing (experiment, run).
#[must_use]
pub fn window_partitions(records: &[TrackRecord]) -> Vec<Range<usize>> {
    let mut partitions = Vec::new();
    let mut start = 0;
    for (i, pair) in records.windows(2).enumerate() {
        if !pair[0].key().same_window(&pair[1].key()) {
            partitions.push(start..i + 1);
            start = i + 1;
        }
    }
    if start < records.len() {
        partitions.push(start..records.len());
    }
    partitions
}

/// Verifies that (experiment, run) never decreases along the stream.
///
/// # Errors
/// Returns `OrderingViolation` at the first decreasing record.
pub fn check_ordering(records: &[TrackRecord]) -> Result<()> {
    for (i, pair) in records.windows(2).enumerate() {
        let (previous, found) = (pair[0].key(), pair[1].key());
        if found.window() < previous.window() {
            return Err(Error::OrderingViolation {
                position: (i + 1) as u64,
                previous,
                found,
            });
        }
    }
    Ok(())
}

/// Source tag of the first record with truth presence.
#[must_use]
pub fn latched_baseline(records: &[TrackRecord], presence: &PresenceSet) -> Option<i64> {
    records
        .iter()
        .find(|record| presence.contains(&record.key()))
        .map(|record| record.source)
}

impl TrackDeduplicator {
    /// Counts distinct tracks on the rayon pool.
    ///
    /// Gives the same result as [`TrackDeduplicator::count`] under every
    /// provenance policy.
    ///
    /// # Errors
    /// Returns `OrderingViolation` on an out-of-order stream (when checked).
    pub fn count_parallel(&self, records: &[TrackRecord], presence: &PresenceSet) -> Result<u64> {
        self.count_parallel_with_statistics(records, presence)
            .map(|(total, _)| total)
    }

    /// Like [`TrackDeduplicator::count_parallel`], also returning the merged
    /// statistics of all partitions.
    ///
    /// # Errors
    /// Returns `OrderingViolation` on an out-of-order stream (when checked).
    pub fn count_parallel_with_statistics(
        &self,
        records: &[TrackRecord],
        presence: &PresenceSet,
    ) -> Result<(u64, DedupStatistics)> {
        if self.config().check_ordering {
            check_ordering(records)?;
        }

        let mut config = self.config().clone().with_check_ordering(false);
        if config.provenance == ProvenancePolicy::Latched && config.baseline.is_none() {
            config.baseline = latched_baseline(records, presence);
        }
        let partition_dedup = TrackDeduplicator::new(config);

        let partitions = window_partitions(records);
        log::debug!(
            "counting {} records in {} window partitions",
            records.len(),
            partitions.len()
        );

        let results: Vec<(u64, DedupStatistics)> = partitions
            .into_par_iter()
            .map(|range| -> Result<(u64, DedupStatistics)> {
                let mut state = partition_dedup.create_state();
                for record in &records[range] {
                    partition_dedup.push(&mut state, record, presence)?;
                }
                let total = partition_dedup.finish(&mut state);
                Ok((total, partition_dedup.statistics(&state)))
            })
            .collect::<Result<_>>()?;

        let mut stats = DedupStatistics::default();
        let mut total = 0;
        for (partial, partial_stats) in &results {
            total += partial;
            stats.merge(partial_stats);
        }
        Ok((total, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupConfig;
    use crate::presence::PresenceConfig;
    use trackeff_core::EventKey;

    fn rec(exp: i32, run: i32, evt: i32, idx: i64, src: i64) -> TrackRecord {
        TrackRecord::new(EventKey::new(exp, run, evt), idx, src, 0)
    }

    #[test]
    fn test_window_partitions() {
        let records = vec![
            rec(1, 1, 1, 0, 0),
            rec(1, 1, 4, 0, 0),
            rec(1, 2, 1, 0, 0),
            rec(2, 2, 1, 0, 0),
            rec(2, 2, 3, 0, 0),
        ];
        assert_eq!(window_partitions(&records), vec![0..2, 2..3, 3..5]);
        assert!(window_partitions(&[]).is_empty());
    }

    #[test]
    fn test_check_ordering_reports_position() {
        let records = vec![rec(1, 1, 1, 0, 0), rec(1, 3, 1, 0, 0), rec(1, 2, 1, 0, 0)];
        assert!(matches!(
            check_ordering(&records),
            Err(Error::OrderingViolation { position: 2, .. })
        ));
        assert!(check_ordering(&records[..2]).is_ok());
    }

    #[test]
    fn test_parallel_matches_sequential_for_every_policy() {
        let mut records = Vec::new();
        let mut truth = Vec::new();
        for run in 0..20 {
            for evt in 0..15 {
                if (run + evt) % 4 != 0 {
                    truth.push(EventKey::new(7, run, evt));
                }
                for idx in 0..3 {
                    let src = i64::from((run * 7 + evt + idx) % 3 == 0);
                    records.push(rec(7, run, evt, i64::from(idx % 2), src));
                }
            }
        }
        let presence = PresenceSet::build(&truth, &PresenceConfig::default());

        for policy in [
            ProvenancePolicy::PerWindow,
            ProvenancePolicy::Latched,
            ProvenancePolicy::Ignore,
        ] {
            let dedup = TrackDeduplicator::new(DedupConfig::new().with_provenance(policy));
            let sequential = dedup.count(&records, &presence).unwrap();
            let (parallel, stats) = dedup
                .count_parallel_with_statistics(&records, &presence)
                .unwrap();
            assert_eq!(sequential, parallel, "{policy:?}");
            assert_eq!(stats.accepted, parallel);
            assert_eq!(stats.records_seen, records.len() as u64);
        }
    }

    #[test]
    fn test_latched_baseline_skips_absent_events() {
        let presence = PresenceSet::build(&[EventKey::new(1, 1, 2)], &PresenceConfig::default());
        let records = vec![rec(1, 1, 1, 0, 4), rec(1, 1, 2, 0, 8)];
        assert_eq!(latched_baseline(&records, &presence), Some(8));
        assert_eq!(latched_baseline(&records, &PresenceSet::Empty), None);
    }
}
