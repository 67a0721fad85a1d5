//! Report writers.

use crate::batch::ReportEntry;
use crate::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use trackeff_algorithms::BinnedEfficiency;

/// Writer for batch reports.
///
/// Writes report entries as CSV (one row per channel and particle) or as a
/// JSON document.
pub struct ReportWriter<W: Write = BufWriter<File>> {
    writer: W,
}

impl ReportWriter {
    /// Creates a report file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ReportWriter<W> {
    /// Wraps any writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes entries as CSV. Undefined ratios are left empty.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_csv(&mut self, entries: &[ReportEntry]) -> Result<()> {
        writeln!(
            self.writer,
            "channel,particle,n_total,n_signal,n_signal_ranked,n_ranked,n_truth,efficiency,efficiency_ranked,purity,purity_ranked"
        )?;

        for entry in entries {
            let r = &entry.result;
            let m = entry.metrics;
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{},{},{},{},{}",
                entry.channel,
                entry.particle,
                r.n_total,
                r.n_signal,
                r.n_signal_ranked,
                r.n_ranked,
                r.n_truth,
                cell(m.map(|m| m.efficiency)),
                cell(m.map(|m| m.efficiency_ranked)),
                cell(m.map(|m| m.purity)),
                cell(m.and_then(|m| m.purity_ranked)),
            )?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Writes the per-bin efficiencies of every entry as CSV.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_binned_csv(&mut self, entries: &[ReportEntry]) -> Result<()> {
        writeln!(
            self.writer,
            "channel,particle,variable,bin_low,bin_high,truth,signal,signal_ranked,efficiency,efficiency_error,efficiency_ranked,efficiency_ranked_error"
        )?;

        for entry in entries {
            for binned in &entry.binned {
                self.write_binned_rows(entry, binned)?;
            }
        }

        self.writer.flush()?;
        Ok(())
    }

    fn write_binned_rows(&mut self, entry: &ReportEntry, binned: &BinnedEfficiency) -> Result<()> {
        let width = binned.truth.bin_width();
        for bin in 0..binned.truth.bins() {
            let low = binned.truth.bin_center(bin) - width / 2.0;
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{},{},{},{},{},{}",
                entry.channel,
                entry.particle,
                binned.variable,
                low,
                low + width,
                binned.truth.counts()[bin],
                binned.signal.counts()[bin],
                binned.signal_ranked.counts()[bin],
                binned.efficiency.values()[bin],
                binned.efficiency.errors()[bin],
                binned.efficiency_ranked.values()[bin],
                binned.efficiency_ranked.errors()[bin],
            )?;
        }
        Ok(())
    }

    /// Writes entries as a pretty-printed JSON array.
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails.
    pub fn write_json(&mut self, entries: &[ReportEntry]) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, entries)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use trackeff_algorithms::EfficiencyResult;

    fn entries() -> Vec<ReportEntry> {
        let result = EfficiencyResult {
            n_total: 4,
            n_signal: 2,
            n_signal_ranked: 1,
            n_ranked: 0,
            n_truth: 8,
        };
        vec![
            ReportEntry::new("Kpi", "mu", result, Vec::new()),
            ReportEntry::new("K3pi", "mu", EfficiencyResult::default(), Vec::new()),
        ]
    }

    #[test]
    fn test_write_csv() {
        let mut writer = ReportWriter::new(Vec::new());
        writer.write_csv(&entries()).unwrap();
        let content = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "Kpi,mu,4,2,1,0,8,0.25,0.125,0.5,");
        assert_eq!(lines[2], "K3pi,mu,0,0,0,0,0,,,,");
    }

    #[test]
    fn test_write_json_file() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = ReportWriter::create(file.path()).unwrap();
        writer.write_json(&entries()).unwrap();
        drop(writer);

        let content = std::fs::read_to_string(file.path()).unwrap();
        let parsed: Vec<ReportEntry> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, entries());
        assert!(content.contains("\"n_signal_ranked\": 1"));
    }
}
