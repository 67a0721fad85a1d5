//! Candidate multiplicity per event.
//!
//! Counts how many signal and background candidates each event carries
//! after a cut, and tallies events by that (signal, background) pair.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use trackeff_core::{EventKey, EventSchema, Record, RecordTable, Result, Selection};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Candidate counts of one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventMultiplicity {
    /// Candidates passing the cut.
    pub candidates: u32,
    /// Of which signal.
    pub signal: u32,
    /// Of which background.
    pub background: u32,
}

impl EventMultiplicity {
    fn add(&mut self, is_signal: bool) {
        self.candidates += 1;
        if is_signal {
            self.signal += 1;
        } else {
            self.background += 1;
        }
    }

    fn merge(&mut self, other: &Self) {
        self.candidates += other.candidates;
        self.signal += other.signal;
        self.background += other.background;
    }
}

/// Multiplicity summary of a candidate sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MultiplicitySummary {
    /// Events with at least one candidate passing the cut.
    pub events: u64,
    /// Signal candidates over all events.
    pub signal_candidates: u64,
    /// Background candidates over all events.
    pub background_candidates: u64,
    /// Number of events per (signal, background) candidate count.
    pub tally: BTreeMap<(u32, u32), u64>,
}

impl MultiplicitySummary {
    fn from_events(events: &HashMap<EventKey, EventMultiplicity>) -> Self {
        let mut summary = Self {
            events: events.len() as u64,
            ..Self::default()
        };
        for counts in events.values() {
            summary.signal_candidates += u64::from(counts.signal);
            summary.background_candidates += u64::from(counts.background);
            *summary.tally.entry((counts.signal, counts.background)).or_insert(0) += 1;
        }
        summary
    }

    /// Events that carry more than one candidate.
    #[must_use]
    pub fn multi_candidate_events(&self) -> u64 {
        self.tally
            .iter()
            .filter(|((sig, bkg), _)| sig + bkg > 1)
            .map(|(_, n)| n)
            .sum()
    }
}

/// Computes the candidate multiplicity of a table.
///
/// Rows failing `cut` are ignored; the rest are split into signal and
/// background by `signal`. Rows are accumulated in parallel, one partial
/// table per rayon job, and merged at the end.
///
/// # Errors
/// Returns an error if a row lacks an event key field or a field used by
/// either selection.
pub fn candidate_multiplicity(
    table: &RecordTable,
    schema: &EventSchema,
    cut: &Selection,
    signal: &Selection,
) -> Result<MultiplicitySummary> {
    let events = (0..table.len())
        .into_par_iter()
        .try_fold(HashMap::new, |mut acc, i| -> Result<HashMap<EventKey, EventMultiplicity>> {
            let row = table.row(i);
            if cut.matches(&row)? {
                let key = schema.event_key(&row)?;
                acc.entry(key).or_default().add(signal.matches(&row)?);
            }
            Ok(acc)
        })
        .try_reduce(HashMap::new, |mut a, b| {
            for (key, counts) in b {
                a.entry(key).or_default().merge(&counts);
            }
            Ok(a)
        })?;

    let summary = MultiplicitySummary::from_events(&events);
    log::debug!(
        "multiplicity: {} events, {} signal and {} background candidates",
        summary.events,
        summary.signal_candidates,
        summary.background_candidates
    );
    Ok(summary)
}

/// Per-event multiplicity of any record stream, accumulated sequentially.
///
/// # Errors
/// Same as [`candidate_multiplicity`].
pub fn event_multiplicities<I, R>(
    records: I,
    schema: &EventSchema,
    cut: &Selection,
    signal: &Selection,
) -> Result<BTreeMap<EventKey, EventMultiplicity>>
where
    I: IntoIterator<Item = R>,
    R: Record,
{
    let mut events: BTreeMap<EventKey, EventMultiplicity> = BTreeMap::new();
    for record in records {
        if cut.matches(&record)? {
            let key = schema.event_key(&record)?;
            events.entry(key).or_default().add(signal.matches(&record)?);
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackeff_core::FieldValue;

    fn table() -> RecordTable {
        let mut table = RecordTable::default();
        let rows = [
            (1, 1, 1, 1.0, 0.5),
            (1, 1, 1, 0.0, 0.5),
            (1, 1, 1, 0.0, 3.0),
            (1, 1, 2, 1.0, 0.1),
            (1, 2, 7, 0.0, 0.2),
            (1, 2, 7, 0.0, 0.3),
        ];
        for (exp, run, evt, sig, dr) in rows {
            table.push_row([
                ("__experiment__", FieldValue::from(exp)),
                ("__run__", FieldValue::from(run)),
                ("__event__", FieldValue::from(evt)),
                ("Dst_isSignal", FieldValue::from(sig)),
                ("K_dr", FieldValue::from(dr)),
            ]);
        }
        table
    }

    #[test]
    fn test_multiplicity_tally() {
        let summary = candidate_multiplicity(
            &table(),
            &EventSchema::default(),
            &Selection::parse("K_dr < 2").unwrap(),
            &Selection::parse("Dst_isSignal == 1").unwrap(),
        )
        .unwrap();

        assert_eq!(summary.events, 3);
        assert_eq!(summary.signal_candidates, 2);
        assert_eq!(summary.background_candidates, 3);
        assert_eq!(summary.tally.get(&(1, 1)), Some(&1));
        assert_eq!(summary.tally.get(&(1, 0)), Some(&1));
        assert_eq!(summary.tally.get(&(0, 2)), Some(&1));
        assert_eq!(summary.multi_candidate_events(), 2);
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let table = table();
        let cut = Selection::always();
        let signal = Selection::parse("Dst_isSignal").unwrap();
        let events = event_multiplicities(table.rows(), &EventSchema::default(), &cut, &signal).unwrap();
        let summary = candidate_multiplicity(&table, &EventSchema::default(), &cut, &signal).unwrap();

        assert_eq!(events.len() as u64, summary.events);
        assert_eq!(
            events[&EventKey::new(1, 1, 1)],
            EventMultiplicity {
                candidates: 3,
                signal: 1,
                background: 2
            }
        );
    }

    #[test]
    fn test_missing_signal_field() {
        let result = candidate_multiplicity(
            &table(),
            &EventSchema::default(),
            &Selection::always(),
            &Selection::parse("B0_isSignal == 1").unwrap(),
        );
        assert!(result.is_err());
    }
}
