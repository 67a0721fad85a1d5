//! Analysis configuration files.
//!
//! A configuration describes a batch of evaluations: every particle is
//! evaluated on every channel. Example:
//!
//! ```json
//! {
//!   "channels": [
//!     {"name": "Kpi", "candidates": "kpi.jsonl", "truth": "mc_kpi.jsonl",
//!      "common": "K_dr < 2 && pi_dr < 2"}
//!   ],
//!   "rank": "B0_M_rank==1",
//!   "particles": [
//!     {"name": "B0", "signal": "B0_isSignal==1"},
//!     {"name": "pisoft", "signal": "pisoft_isSignal==1", "track": "pisoft"}
//!   ]
//! }
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use trackeff_algorithms::{
    AggregatorConfig, BinnedVariable, DedupConfig, ErrorModel, PresenceConfig, ProvenancePolicy,
    Selections,
};
use trackeff_core::{EventSchema, Selection, TrackField};

/// One candidate/truth sample pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name, e.g. `Kpi`.
    pub name: String,
    /// Candidate JSON-lines file.
    pub candidates: PathBuf,
    /// Truth JSON-lines file.
    pub truth: PathBuf,
    /// Channel-specific cut, combined with the global common cut.
    #[serde(default)]
    pub common: String,
}

/// One particle to evaluate on every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleConfig {
    /// Particle name, used in reports.
    pub name: String,
    /// Truth-matching cut.
    pub signal: String,
    /// Count distinct tracks of this particle prefix; candidate rows are
    /// counted when absent.
    #[serde(default)]
    pub track: Option<String>,
    /// Explicit track fields, overriding `track`.
    #[serde(default)]
    pub track_fields: Option<TrackField>,
}

impl ParticleConfig {
    /// Track fields to count, if this particle counts tracks.
    #[must_use]
    pub fn track_field(&self) -> Option<TrackField> {
        self.track_fields
            .clone()
            .or_else(|| self.track.as_deref().map(TrackField::for_particle))
    }
}

fn default_true() -> bool {
    true
}

/// A batch analysis description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Event key fields.
    #[serde(default)]
    pub schema: EventSchema,
    /// Provenance policy for track counting, `latched` when absent.
    #[serde(default)]
    pub provenance: ProvenancePolicy,
    /// Fail on unordered candidate files.
    #[serde(default = "default_true")]
    pub check_ordering: bool,
    /// Count on the rayon pool.
    #[serde(default)]
    pub parallel: bool,
    /// Cut applied to every channel.
    #[serde(default)]
    pub common: String,
    /// Best-candidate cut.
    #[serde(default)]
    pub rank: String,
    /// Samples.
    pub channels: Vec<ChannelConfig>,
    /// Particles.
    pub particles: Vec<ParticleConfig>,
    /// Quantities with per-bin efficiencies.
    #[serde(default)]
    pub binned: Vec<BinnedVariable>,
    /// Per-bin uncertainty model.
    #[serde(default)]
    pub error_model: ErrorModel,
}

impl AnalysisConfig {
    /// Loads a configuration file, resolving relative sample paths against
    /// the file's directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let config = Self::from_json(&text, base)?;
        log::info!(
            "loaded {} channels and {} particles from {}",
            config.channels.len(),
            config.particles.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parses a configuration, resolving relative paths against `base`.
    ///
    /// # Errors
    /// Returns an error if the text is not valid JSON or fails validation.
    pub fn from_json(text: &str, base: &Path) -> Result<Self> {
        let mut config: Self = serde_json::from_str(text)?;
        for channel in &mut config.channels {
            channel.candidates = resolve(base, &channel.candidates);
            channel.truth = resolve(base, &channel.truth);
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks names and cut strings.
    ///
    /// # Errors
    /// Returns `ConfigError` for empty or duplicate names, or `Expression`
    /// for malformed cuts.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::config("no channels configured"));
        }
        if self.particles.is_empty() {
            return Err(Error::config("no particles configured"));
        }
        unique_names("channel", self.channels.iter().map(|c| c.name.as_str()))?;
        unique_names("particle", self.particles.iter().map(|p| p.name.as_str()))?;

        Selection::parse(&self.common)?;
        Selection::parse(&self.rank)?;
        for channel in &self.channels {
            Selection::parse(&channel.common)?;
        }
        for particle in &self.particles {
            Selection::parse(&particle.signal)?;
        }
        Ok(())
    }

    /// Aggregator settings for one particle.
    #[must_use]
    pub fn aggregator_config(&self, particle: &ParticleConfig) -> AggregatorConfig {
        let mut config = AggregatorConfig::new()
            .with_schema(self.schema.clone())
            .with_dedup(
                DedupConfig::new()
                    .with_provenance(self.provenance)
                    .with_check_ordering(self.check_ordering),
            )
            .with_presence(PresenceConfig::default())
            .with_parallel(self.parallel)
            .with_error_model(self.error_model);
        if let Some(track) = particle.track_field() {
            config = config.with_track_field(track);
        }
        for variable in &self.binned {
            config = config.with_binned(variable.clone());
        }
        config
    }

    /// Compiled selections for one channel and particle.
    ///
    /// # Errors
    /// Returns `Expression` for a malformed cut.
    pub fn selections(&self, channel: &ChannelConfig, particle: &ParticleConfig) -> Result<Selections> {
        let common = Selection::parse(&self.common)?.and(&Selection::parse(&channel.common)?);
        Ok(Selections::new(
            common,
            Selection::parse(&self.rank)?,
            Selection::parse(&particle.signal)?,
        ))
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn unique_names<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(Error::config(format!("{kind} name must not be empty")));
        }
        if !seen.insert(name) {
            return Err(Error::config(format!("duplicate {kind} name '{name}'")));
        }
    }
    Ok(())
}
