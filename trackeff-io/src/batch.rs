//! Batch evaluation of an analysis configuration.

use crate::config::AnalysisConfig;
use crate::reader::read_table;
use crate::report::ReportFormatter;
use crate::Result;
use serde::{Deserialize, Serialize};
use trackeff_algorithms::{BinnedEfficiency, EfficiencyPurityAggregator, EfficiencyResult, Metrics};
use trackeff_core::RecordTable;

/// Result of one particle on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Channel name.
    pub channel: String,
    /// Particle name.
    pub particle: String,
    /// Counts.
    pub result: EfficiencyResult,
    /// Ratios, absent when there is no data for the selection.
    pub metrics: Option<Metrics>,
    /// Per-bin efficiencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binned: Vec<BinnedEfficiency>,
}

impl ReportEntry {
    /// Creates an entry, deriving the ratios from the counts.
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        particle: impl Into<String>,
        result: EfficiencyResult,
        binned: Vec<BinnedEfficiency>,
    ) -> Self {
        Self {
            channel: channel.into(),
            particle: particle.into(),
            metrics: result.metrics(),
            result,
            binned,
        }
    }
}

struct LoadedChannel {
    candidates: RecordTable,
    truth: RecordTable,
}

/// Runs every particle on every channel.
///
/// Entries are ordered particle by particle, channels in configuration order
/// within each particle.
///
/// # Errors
/// Returns an error if a sample cannot be read or an evaluation fails.
pub fn run_analysis(config: &AnalysisConfig) -> Result<Vec<ReportEntry>> {
    let loaded = config
        .channels
        .iter()
        .map(|channel| -> Result<LoadedChannel> {
            Ok(LoadedChannel {
                candidates: read_table(&channel.candidates)?,
                truth: read_table(&channel.truth)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut entries = Vec::with_capacity(config.particles.len() * config.channels.len());
    for particle in &config.particles {
        let aggregator = EfficiencyPurityAggregator::new(config.aggregator_config(particle));
        for (channel, samples) in config.channels.iter().zip(&loaded) {
            log::info!("evaluating {} on {}", particle.name, channel.name);
            let selections = config.selections(channel, particle)?;
            let evaluation =
                aggregator.evaluate_detailed(&samples.candidates, &samples.truth, &selections)?;
            entries.push(ReportEntry::new(
                &channel.name,
                &particle.name,
                evaluation.result,
                evaluation.binned,
            ));
        }
    }
    Ok(entries)
}

/// Renders a batch as consecutive titled tables.
#[must_use]
pub fn format_report(entries: &[ReportEntry]) -> String {
    let formatter = ReportFormatter::new();
    let mut out = String::new();
    let mut current: Option<&str> = None;
    for entry in entries {
        if current != Some(entry.particle.as_str()) {
            out.push_str(&format!("\n {} efficiency and purity \n", entry.particle));
            current = Some(entry.particle.as_str());
        }
        out.push_str(&format!(" {} branch \n", entry.channel));
        out.push_str(&formatter.format(&entry.result));
    }
    out
}
