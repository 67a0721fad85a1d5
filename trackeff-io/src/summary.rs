//! Sample summaries.

use serde::Serialize;
use std::collections::HashSet;
use trackeff_core::{EventSchema, RecordTable};

/// Overview of a record table, as shown by `trackeff info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    /// Number of records.
    pub rows: usize,
    /// Column names.
    pub columns: Vec<String>,
    /// Records without a complete event key.
    pub rows_without_key: usize,
    /// Distinct events.
    pub events: usize,
    /// Number of contiguous (experiment, run) windows.
    pub windows: usize,
    /// Smallest and largest experiment number.
    pub experiments: Option<(i32, i32)>,
    /// Smallest and largest run number.
    pub runs: Option<(i32, i32)>,
    /// Whether (experiment, run) never decreases along the file.
    pub ordered: bool,
}

impl TableSummary {
    /// Summarizes a table under the given schema.
    #[must_use]
    pub fn of(table: &RecordTable, schema: &EventSchema) -> Self {
        let mut summary = Self {
            rows: table.len(),
            columns: table.column_names().to_vec(),
            rows_without_key: 0,
            events: 0,
            windows: 0,
            experiments: None,
            runs: None,
            ordered: true,
        };

        let mut events = HashSet::new();
        let mut previous: Option<(i32, i32)> = None;
        for row in table.rows() {
            let Ok(key) = schema.event_key(&row) else {
                summary.rows_without_key += 1;
                continue;
            };
            events.insert(key);
            extend(&mut summary.experiments, key.experiment);
            extend(&mut summary.runs, key.run);

            let window = key.window();
            match previous {
                Some(prev) if prev == window => {}
                Some(prev) => {
                    summary.windows += 1;
                    summary.ordered &= prev < window;
                }
                None => summary.windows += 1,
            }
            previous = Some(window);
        }
        summary.events = events.len();
        summary
    }
}

fn extend(range: &mut Option<(i32, i32)>, value: i32) {
    *range = Some(match *range {
        None => (value, value),
        Some((lo, hi)) => (lo.min(value), hi.max(value)),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackeff_core::FieldValue;

    #[test]
    fn test_summary() {
        let mut table = RecordTable::default();
        for (exp, run, evt) in [(7, 3, 1), (7, 3, 1), (7, 4, 2), (7, 2, 9)] {
            table.push_row([
                ("__experiment__", FieldValue::from(exp)),
                ("__run__", FieldValue::from(run)),
                ("__event__", FieldValue::from(evt)),
            ]);
        }
        table.push_row([("__event__", FieldValue::from(5))]);

        let summary = TableSummary::of(&table, &EventSchema::default());
        assert_eq!(summary.rows, 5);
        assert_eq!(summary.rows_without_key, 1);
        assert_eq!(summary.events, 3);
        assert_eq!(summary.windows, 3);
        assert_eq!(summary.experiments, Some((7, 7)));
        assert_eq!(summary.runs, Some((2, 4)));
        assert!(!summary.ordered);
    }
}
