//! Field schema: which record fields carry the event key and track identity.

use crate::event::{EventKey, Record, TrackRecord};
use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Names of the fields that make up an [`EventKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EventSchema {
    /// Experiment number field.
    pub experiment: String,
    /// Run number field.
    pub run: String,
    /// Event number field.
    pub event: String,
}

impl Default for EventSchema {
    fn default() -> Self {
        Self {
            experiment: "__experiment__".to_string(),
            run: "__run__".to_string(),
            event: "__event__".to_string(),
        }
    }
}

impl EventSchema {
    /// Creates the default ntuple schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the experiment field name.
    #[must_use]
    pub fn with_experiment(mut self, field: impl Into<String>) -> Self {
        self.experiment = field.into();
        self
    }

    /// Sets the run field name.
    #[must_use]
    pub fn with_run(mut self, field: impl Into<String>) -> Self {
        self.run = field.into();
        self
    }

    /// Sets the event field name.
    #[must_use]
    pub fn with_event(mut self, field: impl Into<String>) -> Self {
        self.event = field.into();
        self
    }

    /// Returns the three field names.
    #[must_use]
    pub fn fields(&self) -> [&str; 3] {
        [
            self.experiment.as_str(),
            self.run.as_str(),
            self.event.as_str(),
        ]
    }

    /// Reads the event key of a record.
    ///
    /// # Errors
    /// Returns an error if a key field is missing or out of the `i32` range.
    pub fn event_key<R: Record + ?Sized>(&self, record: &R) -> Result<EventKey> {
        Ok(EventKey::new(
            key_component(record, &self.experiment)?,
            key_component(record, &self.run)?,
            key_component(record, &self.event)?,
        ))
    }
}

fn key_component<R: Record + ?Sized>(record: &R, field: &str) -> Result<i32> {
    let value = record.get_i64(field)?;
    #[allow(clippy::cast_precision_loss)]
    let as_float = value as f64;
    i32::try_from(value).map_err(|_| Error::FieldType {
        field: field.to_string(),
        value: as_float,
    })
}

/// Per-particle track fields of a candidate row.
///
/// A candidate row can describe a composite decay with several tracked
/// daughters; this selects which daughter's index and source to read.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackField {
    /// Field holding the track's index in its source collection.
    pub index: String,
    /// Field holding the track's provenance tag.
    pub source: String,
}

impl TrackField {
    /// Creates a track field mapping from explicit field names.
    #[must_use]
    pub fn new(index: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            source: source.into(),
        }
    }

    /// Standard ntuple naming: `<particle>_mdstIndex` and `<particle>_particleSource`.
    #[must_use]
    pub fn for_particle(particle: &str) -> Self {
        Self::new(
            format!("{particle}_mdstIndex"),
            format!("{particle}_particleSource"),
        )
    }

    /// Returns the two field names.
    #[must_use]
    pub fn fields(&self) -> [&str; 2] {
        [self.index.as_str(), self.source.as_str()]
    }

    /// Extracts the track record of a candidate row.
    ///
    /// # Errors
    /// Returns an error if any key or track field is missing or invalid.
    pub fn track_record<R: Record + ?Sized>(
        &self,
        schema: &EventSchema,
        record: &R,
        row: usize,
    ) -> Result<TrackRecord> {
        let key = schema.event_key(record)?;
        let index = record.get_i64(&self.index)?;
        let source = record.get_i64(&self.source)?;
        Ok(TrackRecord::new(key, index, source, row))
    }
}
