//! Efficiency and purity aggregation.
//!
//! Four counts are taken over the candidate sample, each under a different
//! combination of the common, signal and rank selections, and related to
//! the number of truth records:
//!
//! | count | selection |
//! |---|---|
//! | total | common |
//! | signal | common && signal |
//! | signal ranked | common && signal && rank |
//! | ranked | common && rank |

use crate::dedup::{DedupConfig, ProvenancePolicy, TrackDeduplicator};
use crate::histogram::{EfficiencyHistogram, ErrorModel, Histogram1D};
use crate::presence::{PresenceConfig, PresenceSet};
use rayon::prelude::*;
use trackeff_core::{
    EventSchema, Record, RecordTable, Result, Selection, TrackField, TrackRecord,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What is counted for each selection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CountMode {
    /// Distinct tracks read through the given fields, restricted to events
    /// with truth presence.
    Tracks(TrackField),
    /// Raw candidate rows, without deduplication or truth filtering.
    #[default]
    Candidates,
}

/// The three selections an evaluation combines.
#[derive(Debug, Clone)]
pub struct Selections {
    /// Applied to every count.
    pub common: Selection,
    /// Best-candidate selection.
    pub rank: Selection,
    /// Truth-matching selection.
    pub signal: Selection,
}

impl Default for Selections {
    fn default() -> Self {
        Self {
            common: Selection::always(),
            rank: Selection::always(),
            signal: Selection::always(),
        }
    }
}

impl Selections {
    /// Creates a selection set.
    #[must_use]
    pub fn new(common: Selection, rank: Selection, signal: Selection) -> Self {
        Self {
            common,
            rank,
            signal,
        }
    }

    /// Parses the three cut strings.
    ///
    /// # Errors
    /// Returns `Expression` if any cut string is malformed.
    pub fn parse(common: &str, rank: &str, signal: &str) -> Result<Self> {
        Ok(Self::new(
            Selection::parse(common)?,
            Selection::parse(rank)?,
            Selection::parse(signal)?,
        ))
    }

    fn fields(&self) -> impl Iterator<Item = &str> {
        self.common
            .fields()
            .iter()
            .chain(self.rank.fields())
            .chain(self.signal.fields())
            .map(String::as_str)
    }
}

/// A candidate quantity whose efficiency is also reported per bin.
///
/// Both fields may be plain field names or arithmetic expressions over
/// fields, e.g. `sqrt(K_px*K_px + K_py*K_py)`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BinnedVariable {
    /// Display name.
    pub name: String,
    /// Field or expression evaluated on candidate rows.
    pub candidate_field: String,
    /// Field or expression evaluated on truth rows.
    pub truth_field: String,
    /// Number of bins.
    pub bins: usize,
    /// Lower edge.
    pub low: f64,
    /// Upper edge.
    pub high: f64,
}

impl BinnedVariable {
    /// Creates a binned variable read from the same field on both samples.
    #[must_use]
    pub fn new(name: impl Into<String>, field: impl Into<String>, bins: usize, low: f64, high: f64) -> Self {
        let field = field.into();
        Self {
            name: name.into(),
            candidate_field: field.clone(),
            truth_field: field,
            bins,
            low,
            high,
        }
    }

    /// Reads the truth value from a different field.
    #[must_use]
    pub fn with_truth_field(mut self, field: impl Into<String>) -> Self {
        self.truth_field = field.into();
        self
    }

    fn histogram(&self) -> Result<Histogram1D> {
        Histogram1D::new(self.bins, self.low, self.high)
    }

    fn compile(&self) -> Result<VariableExpr> {
        Ok(VariableExpr {
            candidate: Selection::parse(&self.candidate_field)?,
            truth: Selection::parse(&self.truth_field)?,
        })
    }
}

/// Compiled expressions of one [`BinnedVariable`].
struct VariableExpr {
    candidate: Selection,
    truth: Selection,
}

/// Configuration for [`EfficiencyPurityAggregator`].
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AggregatorConfig {
    /// Event key fields.
    pub schema: EventSchema,
    /// What is counted.
    pub count_mode: CountMode,
    /// Deduplication settings for [`CountMode::Tracks`].
    pub dedup: DedupConfig,
    /// Truth presence index settings.
    pub presence: PresenceConfig,
    /// Run the counts on the rayon pool.
    pub parallel: bool,
    /// Quantities to histogram.
    pub binned: Vec<BinnedVariable>,
    /// Per-bin uncertainty model.
    pub error_model: ErrorModel,
}

impl AggregatorConfig {
    /// Creates the default configuration (candidate counting, sequential).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the event schema.
    #[must_use]
    pub fn with_schema(mut self, schema: EventSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Counts distinct tracks read through `track`.
    #[must_use]
    pub fn with_track_field(mut self, track: TrackField) -> Self {
        self.count_mode = CountMode::Tracks(track);
        self
    }

    /// Sets the count mode.
    #[must_use]
    pub fn with_count_mode(mut self, mode: CountMode) -> Self {
        self.count_mode = mode;
        self
    }

    /// Sets the deduplication settings.
    #[must_use]
    pub fn with_dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    /// Sets the provenance policy.
    #[must_use]
    pub fn with_provenance(mut self, policy: ProvenancePolicy) -> Self {
        self.dedup.provenance = policy;
        self
    }

    /// Sets the truth presence settings.
    #[must_use]
    pub fn with_presence(mut self, presence: PresenceConfig) -> Self {
        self.presence = presence;
        self
    }

    /// Enables or disables parallel counting.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Adds a binned variable.
    #[must_use]
    pub fn with_binned(mut self, variable: BinnedVariable) -> Self {
        self.binned.push(variable);
        self
    }

    /// Sets the per-bin uncertainty model.
    #[must_use]
    pub fn with_error_model(mut self, model: ErrorModel) -> Self {
        self.error_model = model;
        self
    }
}

/// The four counts and the truth cardinality of one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EfficiencyResult {
    /// Count under the common selection.
    pub n_total: u64,
    /// Count under common && signal.
    pub n_signal: u64,
    /// Count under common && signal && rank.
    pub n_signal_ranked: u64,
    /// Count under common && rank.
    pub n_ranked: u64,
    /// Number of truth records.
    pub n_truth: u64,
}

/// Efficiency and purity ratios (fractions, not percentages).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Metrics {
    /// `n_signal / n_truth`.
    pub efficiency: f64,
    /// `n_signal_ranked / n_truth`.
    pub efficiency_ranked: f64,
    /// `n_signal / n_total`.
    pub purity: f64,
    /// `n_signal_ranked / n_ranked`, undefined without ranked candidates.
    pub purity_ranked: Option<f64>,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

impl EfficiencyResult {
    /// Returns true if the ratios are defined (both denominators positive).
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.n_total > 0 && self.n_truth > 0
    }

    /// Returns the ratios, or `None` when there is no data for the selection.
    #[must_use]
    pub fn metrics(&self) -> Option<Metrics> {
        if !self.is_defined() {
            return None;
        }
        Some(Metrics {
            efficiency: ratio(self.n_signal, self.n_truth)?,
            efficiency_ranked: ratio(self.n_signal_ranked, self.n_truth)?,
            purity: ratio(self.n_signal, self.n_total)?,
            purity_ranked: ratio(self.n_signal_ranked, self.n_ranked),
        })
    }

    /// `n_signal / n_truth`.
    #[must_use]
    pub fn efficiency(&self) -> Option<f64> {
        self.metrics().map(|m| m.efficiency)
    }

    /// `n_signal_ranked / n_truth`.
    #[must_use]
    pub fn efficiency_ranked(&self) -> Option<f64> {
        self.metrics().map(|m| m.efficiency_ranked)
    }

    /// `n_signal / n_total`.
    #[must_use]
    pub fn purity(&self) -> Option<f64> {
        self.metrics().map(|m| m.purity)
    }

    /// `n_signal_ranked / n_ranked`.
    #[must_use]
    pub fn purity_ranked(&self) -> Option<f64> {
        self.metrics().and_then(|m| m.purity_ranked)
    }
}

/// Per-bin efficiencies of one binned variable.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BinnedEfficiency {
    /// Variable name.
    pub variable: String,
    /// Truth distribution.
    pub truth: Histogram1D,
    /// Signal distribution.
    pub signal: Histogram1D,
    /// Ranked signal distribution.
    pub signal_ranked: Histogram1D,
    /// `signal / truth` per bin.
    pub efficiency: EfficiencyHistogram,
    /// `signal_ranked / truth` per bin.
    pub efficiency_ranked: EfficiencyHistogram,
}

/// Full output of an evaluation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Evaluation {
    /// Counts.
    pub result: EfficiencyResult,
    /// Binned efficiencies, one per configured variable.
    pub binned: Vec<BinnedEfficiency>,
}

#[derive(Debug, Clone, Copy)]
struct RowFlags {
    common: bool,
    signal: bool,
    rank: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Count {
    Total,
    Signal,
    SignalRanked,
    Ranked,
}

impl Count {
    const ALL: [Count; 4] = [Count::Total, Count::Signal, Count::SignalRanked, Count::Ranked];

    fn accepts(self, flags: RowFlags) -> bool {
        flags.common
            && match self {
                Count::Total => true,
                Count::Signal => flags.signal,
                Count::SignalRanked => flags.signal && flags.rank,
                Count::Ranked => flags.rank,
            }
    }

    fn fills_histograms(self) -> bool {
        matches!(self, Count::Signal | Count::SignalRanked)
    }
}

/// Computes the four counts of an evaluation and the derived ratios.
#[derive(Debug, Clone, Default)]
pub struct EfficiencyPurityAggregator {
    config: AggregatorConfig,
}

impl EfficiencyPurityAggregator {
    /// Creates an aggregator with the given configuration.
    #[must_use]
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Evaluates the four counts against the truth sample.
    ///
    /// # Errors
    /// Returns `MissingField` if a selection, key or track field is absent,
    /// `FieldType` for a non-integer key, or `OrderingViolation` for an
    /// unordered candidate stream (tracks mode with ordering checks).
    pub fn evaluate(
        &self,
        candidates: &RecordTable,
        truth: &RecordTable,
        selections: &Selections,
    ) -> Result<EfficiencyResult> {
        self.evaluate_detailed(candidates, truth, selections)
            .map(|evaluation| evaluation.result)
    }

    /// Like [`EfficiencyPurityAggregator::evaluate`], also filling the
    /// configured binned efficiencies.
    ///
    /// # Errors
    /// Same as [`EfficiencyPurityAggregator::evaluate`], plus `ConfigError`
    /// for invalid binning.
    pub fn evaluate_detailed(
        &self,
        candidates: &RecordTable,
        truth: &RecordTable,
        selections: &Selections,
    ) -> Result<Evaluation> {
        let variables = self
            .config
            .binned
            .iter()
            .map(BinnedVariable::compile)
            .collect::<Result<Vec<_>>>()?;
        if !candidates.is_empty() {
            candidates.require_columns(selections.fields())?;
            if let CountMode::Tracks(track) = &self.config.count_mode {
                candidates.require_columns(self.config.schema.fields())?;
                candidates.require_columns(track.fields())?;
            }
            candidates.require_columns(
                variables.iter().flat_map(|v| v.candidate.fields()).map(String::as_str),
            )?;
        }
        if !truth.is_empty() {
            truth.require_columns(variables.iter().flat_map(|v| v.truth.fields()).map(String::as_str))?;
        }

        let flags = self.row_flags(candidates, selections)?;

        let counted: Vec<(u64, Vec<Histogram1D>)> = match &self.config.count_mode {
            CountMode::Tracks(track) => {
                let presence = PresenceSet::from_records(
                    truth.rows(),
                    &self.config.schema,
                    &self.config.presence,
                )?;
                let tracks = candidates
                    .rows()
                    .zip(&flags)
                    .filter(|(_, f)| f.common)
                    .map(|(row, f)| -> Result<(TrackRecord, RowFlags)> {
                        let record = track.track_record(&self.config.schema, &row, row.index())?;
                        Ok((record, *f))
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.each_count(|count| self.count_tracks(count, &tracks, &presence, candidates, &variables))?
            }
            CountMode::Candidates => {
                self.each_count(|count| self.count_candidates(count, &flags, candidates, &variables))?
            }
        };

        let result = EfficiencyResult {
            n_total: counted[0].0,
            n_signal: counted[1].0,
            n_signal_ranked: counted[2].0,
            n_ranked: counted[3].0,
            n_truth: truth.len() as u64,
        };
        log::info!(
            "total {} signal {} signal ranked {} ranked {} truth {}",
            result.n_total,
            result.n_signal,
            result.n_signal_ranked,
            result.n_ranked,
            result.n_truth
        );

        let binned = self.binned_efficiencies(truth, &variables, &counted[1].1, &counted[2].1)?;
        Ok(Evaluation { result, binned })
    }

    fn row_flags(&self, candidates: &RecordTable, selections: &Selections) -> Result<Vec<RowFlags>> {
        let flag_row = |i: usize| -> Result<RowFlags> {
            let row = candidates.row(i);
            Ok(RowFlags {
                common: selections.common.matches(&row)?,
                signal: selections.signal.matches(&row)?,
                rank: selections.rank.matches(&row)?,
            })
        };
        if self.config.parallel {
            (0..candidates.len()).into_par_iter().map(flag_row).collect()
        } else {
            (0..candidates.len()).map(flag_row).collect()
        }
    }

    fn each_count<F>(&self, count: F) -> Result<Vec<(u64, Vec<Histogram1D>)>>
    where
        F: Fn(Count) -> Result<(u64, Vec<Histogram1D>)> + Sync + Send,
    {
        if self.config.parallel {
            Count::ALL.into_par_iter().map(count).collect()
        } else {
            Count::ALL.into_iter().map(count).collect()
        }
    }

    fn empty_histograms(&self) -> Result<Vec<Histogram1D>> {
        self.config.binned.iter().map(BinnedVariable::histogram).collect()
    }

    fn fill_candidate(
        histograms: &mut [Histogram1D],
        variables: &[VariableExpr],
        row: &impl Record,
    ) -> Result<()> {
        for (hist, var) in histograms.iter_mut().zip(variables) {
            hist.fill(var.candidate.value(row)?);
        }
        Ok(())
    }

    fn count_tracks(
        &self,
        count: Count,
        tracks: &[(TrackRecord, RowFlags)],
        presence: &PresenceSet,
        candidates: &RecordTable,
        variables: &[VariableExpr],
    ) -> Result<(u64, Vec<Histogram1D>)> {
        let stream: Vec<TrackRecord> = tracks
            .iter()
            .filter(|(_, flags)| count.accepts(*flags))
            .map(|(record, _)| *record)
            .collect();
        let dedup = TrackDeduplicator::new(self.config.dedup.clone());

        if count.fills_histograms() && !self.config.binned.is_empty() {
            let mut histograms = self.empty_histograms()?;
            let n = dedup.count_with(&stream, presence, |record| {
                Self::fill_candidate(&mut histograms, variables, &candidates.row(record.row))
            })?;
            return Ok((n, histograms));
        }

        let n = if self.config.parallel {
            dedup.count_parallel(&stream, presence)?
        } else {
            dedup.count(&stream, presence)?
        };
        log::debug!("{count:?}: {n} distinct tracks from {} candidates", stream.len());
        Ok((n, Vec::new()))
    }

    fn count_candidates(
        &self,
        count: Count,
        flags: &[RowFlags],
        candidates: &RecordTable,
        variables: &[VariableExpr],
    ) -> Result<(u64, Vec<Histogram1D>)> {
        let fill = count.fills_histograms() && !self.config.binned.is_empty();
        let mut histograms = if fill { self.empty_histograms()? } else { Vec::new() };
        let mut n = 0;
        for (i, f) in flags.iter().enumerate() {
            if count.accepts(*f) {
                n += 1;
                if fill {
                    Self::fill_candidate(&mut histograms, variables, &candidates.row(i))?;
                }
            }
        }
        Ok((n, histograms))
    }

    fn binned_efficiencies(
        &self,
        truth: &RecordTable,
        variables: &[VariableExpr],
        signal: &[Histogram1D],
        signal_ranked: &[Histogram1D],
    ) -> Result<Vec<BinnedEfficiency>> {
        if self.config.binned.is_empty() {
            return Ok(Vec::new());
        }
        self.config
            .binned
            .iter()
            .zip(variables)
            .zip(signal.iter().zip(signal_ranked))
            .map(|((var, expr), (signal, signal_ranked))| -> Result<BinnedEfficiency> {
                let mut truth_hist = var.histogram()?;
                for row in truth.rows() {
                    truth_hist.fill(expr.truth.value(&row)?);
                }
                Ok(BinnedEfficiency {
                    variable: var.name.clone(),
                    efficiency: EfficiencyHistogram::divide(signal, &truth_hist, self.config.error_model)?,
                    efficiency_ranked: EfficiencyHistogram::divide(
                        signal_ranked,
                        &truth_hist,
                        self.config.error_model,
                    )?,
                    truth: truth_hist,
                    signal: signal.clone(),
                    signal_ranked: signal_ranked.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use trackeff_core::FieldValue;

    fn candidate(table: &mut RecordTable, key: (i32, i32, i32), idx: f64, src: f64, sig: bool, rank: i32) {
        table.push_row([
            ("__experiment__", FieldValue::from(key.0)),
            ("__run__", FieldValue::from(key.1)),
            ("__event__", FieldValue::from(key.2)),
            ("pi_mdstIndex", FieldValue::from(idx)),
            ("pi_particleSource", FieldValue::from(src)),
            ("pi_isSignal", FieldValue::from(sig)),
            ("rank", FieldValue::from(rank)),
            ("pt", FieldValue::from(idx / 10.0)),
        ]);
    }

    fn truth(keys: &[(i32, i32, i32)]) -> RecordTable {
        let mut table = RecordTable::default();
        for &(x, r, e) in keys {
            table.push_row([
                ("__experiment__", FieldValue::from(x)),
                ("__run__", FieldValue::from(r)),
                ("__event__", FieldValue::from(e)),
                ("pt", FieldValue::from(0.55)),
            ]);
        }
        table
    }

    fn candidates() -> RecordTable {
        let mut table = RecordTable::default();
        candidate(&mut table, (1, 1, 1), 5.0, 10.0, true, 1);
        candidate(&mut table, (1, 1, 1), 5.0, 10.0, true, 2);
        candidate(&mut table, (1, 1, 2), 7.0, 10.0, false, 1);
        candidate(&mut table, (1, 2, 1), 5.0, 99.0, true, 1);
        table
    }

    fn selections() -> Selections {
        Selections::parse("", "rank == 1", "pi_isSignal").unwrap()
    }

    #[test]
    fn test_track_counts() {
        let aggregator = EfficiencyPurityAggregator::new(
            AggregatorConfig::new().with_track_field(TrackField::for_particle("pi")),
        );
        let truth = truth(&[(1, 1, 1), (1, 1, 2), (1, 2, 1)]);
        let result = aggregator.evaluate(&candidates(), &truth, &selections()).unwrap();

        assert_eq!(
            result,
            EfficiencyResult {
                n_total: 3,
                n_signal: 2,
                n_signal_ranked: 2,
                n_ranked: 3,
                n_truth: 3,
            }
        );
        let metrics = result.metrics().unwrap();
        assert_relative_eq!(metrics.efficiency, 2.0 / 3.0);
        assert_relative_eq!(metrics.purity, 2.0 / 3.0);
        assert_relative_eq!(metrics.purity_ranked.unwrap(), 2.0 / 3.0);
    }

    #[test]
    fn test_candidate_counts() {
        let aggregator = EfficiencyPurityAggregator::default();
        let truth = truth(&[(1, 1, 1)]);
        let result = aggregator.evaluate(&candidates(), &truth, &selections()).unwrap();
        assert_eq!(result.n_total, 4);
        assert_eq!(result.n_signal, 3);
        assert_eq!(result.n_signal_ranked, 2);
        assert_eq!(result.n_ranked, 3);
        assert_eq!(result.n_truth, 1);
    }

    #[test]
    fn test_empty_inputs_are_undefined() {
        let aggregator = EfficiencyPurityAggregator::new(
            AggregatorConfig::new().with_track_field(TrackField::for_particle("pi")),
        );
        let empty_truth = aggregator
            .evaluate(&candidates(), &RecordTable::default(), &selections())
            .unwrap();
        assert_eq!(empty_truth.n_total, 0);
        assert!(empty_truth.metrics().is_none());

        let empty_candidates = aggregator
            .evaluate(&RecordTable::default(), &truth(&[(1, 1, 1)]), &selections())
            .unwrap();
        assert_eq!(empty_candidates.n_truth, 1);
        assert!(empty_candidates.efficiency().is_none());
    }

    #[test]
    fn test_purity_ranked_undefined_without_ranked() {
        let result = EfficiencyResult {
            n_total: 4,
            n_signal: 2,
            n_signal_ranked: 0,
            n_ranked: 0,
            n_truth: 5,
        };
        assert!(result.is_defined());
        assert_relative_eq!(result.efficiency().unwrap(), 0.4);
        assert!(result.purity_ranked().is_none());
    }

    #[test]
    fn test_missing_selection_field() {
        let aggregator = EfficiencyPurityAggregator::default();
        let bad = Selections::parse("K_dr < 2", "", "").unwrap();
        let err = aggregator
            .evaluate(&candidates(), &truth(&[(1, 1, 1)]), &bad)
            .unwrap_err();
        assert_eq!(err, trackeff_core::Error::missing_field("K_dr"));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let truth = truth(&[(1, 1, 1), (1, 1, 2), (1, 2, 1)]);
        for policy in [ProvenancePolicy::PerWindow, ProvenancePolicy::Latched] {
            let config = AggregatorConfig::new()
                .with_track_field(TrackField::for_particle("pi"))
                .with_provenance(policy);
            let sequential = EfficiencyPurityAggregator::new(config.clone())
                .evaluate(&candidates(), &truth, &selections())
                .unwrap();
            let parallel = EfficiencyPurityAggregator::new(config.with_parallel(true))
                .evaluate(&candidates(), &truth, &selections())
                .unwrap();
            assert_eq!(sequential, parallel);
        }
    }

    #[test]
    fn test_binned_efficiency() {
        let aggregator = EfficiencyPurityAggregator::new(
            AggregatorConfig::new()
                .with_track_field(TrackField::for_particle("pi"))
                .with_binned(BinnedVariable::new("pt", "pt", 2, 0.0, 1.0)),
        );
        let truth = truth(&[(1, 1, 1), (1, 1, 2), (1, 2, 1)]);
        let evaluation = aggregator
            .evaluate_detailed(&candidates(), &truth, &selections())
            .unwrap();

        assert_eq!(evaluation.binned.len(), 1);
        let binned = &evaluation.binned[0];
        assert_eq!(binned.truth.counts(), &[0.0, 3.0]);
        assert_eq!(binned.signal.counts(), &[0.0, 2.0]);
        assert_relative_eq!(binned.efficiency.values()[1], 2.0 / 3.0);
        assert_relative_eq!(binned.efficiency.values()[0], 0.0);
    }

    #[test]
    fn test_binned_expression() {
        let aggregator = EfficiencyPurityAggregator::new(
            AggregatorConfig::new()
                .with_track_field(TrackField::for_particle("pi"))
                .with_binned(BinnedVariable::new("2pt", "2 * pt", 2, 0.0, 2.0).with_truth_field("pt + pt")),
        );
        let truth = truth(&[(1, 1, 1), (1, 1, 2), (1, 2, 1)]);
        let evaluation = aggregator
            .evaluate_detailed(&candidates(), &truth, &selections())
            .unwrap();
        let binned = &evaluation.binned[0];
        assert_eq!(binned.truth.counts(), &[0.0, 3.0]);
        assert_eq!(binned.signal.counts(), &[0.0, 2.0]);

        let missing = EfficiencyPurityAggregator::new(
            AggregatorConfig::new().with_binned(BinnedVariable::new("p", "sqrt(pi_p)", 2, 0.0, 1.0)),
        );
        assert_eq!(
            missing.evaluate(&candidates(), &truth, &selections()).unwrap_err(),
            trackeff_core::Error::missing_field("pi_p")
        );
    }

    #[test]
    fn test_default_baseline_survives_run_change() {
        let mut table = RecordTable::default();
        candidate(&mut table, (1, 1, 1), 1.0, 10.0, true, 1);
        candidate(&mut table, (1, 2, 1), 1.0, 99.0, true, 1);
        candidate(&mut table, (1, 2, 1), 2.0, 10.0, true, 1);
        candidate(&mut table, (1, 2, 1), 3.0, 10.0, true, 1);
        let truth = truth(&[(1, 1, 1), (1, 2, 1)]);

        let config = AggregatorConfig::default().with_track_field(TrackField::for_particle("pi"));
        assert_eq!(config.dedup.provenance, ProvenancePolicy::Latched);
        let result = EfficiencyPurityAggregator::new(config.clone())
            .evaluate(&table, &truth, &Selections::default())
            .unwrap();
        assert_eq!(result.n_total, 4);
        assert_eq!(result.n_signal, 4);

        let per_window = EfficiencyPurityAggregator::new(config.with_provenance(ProvenancePolicy::PerWindow))
            .evaluate(&table, &truth, &Selections::default())
            .unwrap();
        assert_eq!(per_window.n_total, 2);
    }
}
