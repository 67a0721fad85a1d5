//! Truth presence index.
//!
//! Answers "does the truth sample contain this event?" for the
//! deduplicator. Compact key ranges use a dense bitmap indexed by
//! `event + run * span_event + experiment * span_event * span_run`
//! (offset by the observed minimums); wide or sparse ranges fall back to
//! a hash set. Keys outside the observed ranges are absent.

use std::collections::HashSet;
use trackeff_core::{EventKey, EventSchema, Record, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Storage strategy for the presence set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PresenceStrategy {
    /// Dense bitmap when it fits `max_dense_cells`, hash set otherwise.
    #[default]
    Auto,
    /// Always use the dense bitmap (still bounded by `max_dense_cells`).
    Dense,
    /// Always use a hash set.
    Sparse,
}

/// Configuration for building a [`PresenceSet`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PresenceConfig {
    /// Storage strategy.
    pub strategy: PresenceStrategy,
    /// Largest bitmap (in bits) the dense strategy may allocate.
    pub max_dense_cells: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            strategy: PresenceStrategy::Auto,
            max_dense_cells: 1 << 27, // 16 MiB of bits
        }
    }
}

impl PresenceConfig {
    /// Sets the storage strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: PresenceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the dense bitmap size limit.
    #[must_use]
    pub fn with_max_dense_cells(mut self, cells: u64) -> Self {
        self.max_dense_cells = cells;
        self
    }
}

/// Inclusive range of one key component.
#[derive(Debug, Clone, Copy)]
struct Span {
    min: i32,
    len: u64,
}

impl Span {
    fn of(values: impl Iterator<Item = i32>) -> Option<Self> {
        let (min, max) = values.fold(None, |acc: Option<(i32, i32)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;
        let len = u64::try_from(i64::from(max) - i64::from(min) + 1).ok()?;
        Some(Self { min, len })
    }

    #[inline]
    fn offset(&self, v: i32) -> Option<u64> {
        let off = u64::try_from(i64::from(v) - i64::from(self.min)).ok()?;
        (off < self.len).then_some(off)
    }
}

/// Dense bitmap over the (experiment, run, event) box seen in the truth sample.
#[derive(Debug, Clone)]
pub struct DenseGrid {
    experiment: Span,
    run: Span,
    event: Span,
    bits: Vec<u64>,
}

impl DenseGrid {
    fn cell(&self, key: &EventKey) -> Option<u64> {
        let x = self.experiment.offset(key.experiment)?;
        let r = self.run.offset(key.run)?;
        let e = self.event.offset(key.event)?;
        Some(e + r * self.event.len + x * self.event.len * self.run.len)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn insert(&mut self, key: &EventKey) {
        if let Some(cell) = self.cell(key) {
            self.bits[(cell / 64) as usize] |= 1 << (cell % 64);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn contains(&self, key: &EventKey) -> bool {
        self.cell(key)
            .is_some_and(|cell| self.bits[(cell / 64) as usize] & (1 << (cell % 64)) != 0)
    }

    /// Number of cells in the bitmap.
    #[must_use]
    pub fn cells(&self) -> u64 {
        self.experiment.len * self.run.len * self.event.len
    }
}

/// Membership predicate over truth event keys.
#[derive(Debug, Clone, Default)]
pub enum PresenceSet {
    /// No truth records: nothing is present.
    #[default]
    Empty,
    /// Dense bitmap.
    Dense(DenseGrid),
    /// Hash set fallback.
    Sparse(HashSet<EventKey>),
}

impl PresenceSet {
    /// Builds a presence set from truth event keys.
    ///
    /// The keys need not be ordered or unique.
    #[must_use]
    pub fn build(keys: &[EventKey], config: &PresenceConfig) -> Self {
        if keys.is_empty() {
            return Self::Empty;
        }

        if config.strategy != PresenceStrategy::Sparse {
            if let Some(mut grid) = Self::dense_grid(keys, config.max_dense_cells) {
                for key in keys {
                    grid.insert(key);
                }
                log::debug!(
                    "truth presence: dense bitmap of {} cells for {} keys",
                    grid.cells(),
                    keys.len()
                );
                return Self::Dense(grid);
            }
            if config.strategy == PresenceStrategy::Dense {
                log::warn!(
                    "truth key ranges exceed {} cells; using a hash set instead",
                    config.max_dense_cells
                );
            }
        }

        let set: HashSet<EventKey> = keys.iter().copied().collect();
        log::debug!(
            "truth presence: hash set of {} events for {} keys",
            set.len(),
            keys.len()
        );
        Self::Sparse(set)
    }

    /// Builds a presence set from truth records.
    ///
    /// # Errors
    /// Returns an error if a record lacks an event key field.
    pub fn from_records<I, R>(records: I, schema: &EventSchema, config: &PresenceConfig) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: Record,
    {
        let keys = records
            .into_iter()
            .map(|record| schema.event_key(&record))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::build(&keys, config))
    }

    fn dense_grid(keys: &[EventKey], max_cells: u64) -> Option<DenseGrid> {
        let experiment = Span::of(keys.iter().map(|k| k.experiment))?;
        let run = Span::of(keys.iter().map(|k| k.run))?;
        let event = Span::of(keys.iter().map(|k| k.event))?;
        let cells = experiment
            .len
            .checked_mul(run.len)?
            .checked_mul(event.len)?;
        if cells > max_cells {
            return None;
        }
        let words = usize::try_from(cells.div_ceil(64)).ok()?;
        Some(DenseGrid {
            experiment,
            run,
            event,
            bits: vec![0; words],
        })
    }

    /// Returns true if the event has at least one truth record.
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &EventKey) -> bool {
        match self {
            Self::Empty => false,
            Self::Dense(grid) => grid.contains(key),
            Self::Sparse(set) => set.contains(key),
        }
    }

    /// Returns true if no event is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Name of the storage strategy in use.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Dense(_) => "dense",
            Self::Sparse(_) => "sparse",
        }
    }
}
