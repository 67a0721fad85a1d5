//! Event keys, track identities and record access.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifies one physics event.
///
/// Ordered lexicographically by (experiment, run, event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventKey {
    /// Experiment number.
    pub experiment: i32,
    /// Run number within the experiment.
    pub run: i32,
    /// Event number within the run.
    pub event: i32,
}

impl EventKey {
    /// Creates a new event key.
    #[inline]
    #[must_use]
    pub fn new(experiment: i32, run: i32, event: i32) -> Self {
        Self {
            experiment,
            run,
            event,
        }
    }

    /// Returns the (experiment, run) window this event belongs to.
    #[inline]
    #[must_use]
    pub fn window(&self) -> (i32, i32) {
        (self.experiment, self.run)
    }

    /// Checks if both keys belong to the same (experiment, run) window.
    #[inline]
    #[must_use]
    pub fn same_window(&self, other: &Self) -> bool {
        self.window() == other.window()
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.experiment, self.run, self.event)
    }
}

/// Identity of one physical track: the event plus the track's position in
/// its source collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackIdentity {
    /// Event the track was reconstructed in.
    pub key: EventKey,
    /// Index of the track in its source collection.
    pub track_index: i64,
}

impl TrackIdentity {
    /// Creates a new track identity.
    #[inline]
    #[must_use]
    pub fn new(key: EventKey, track_index: i64) -> Self {
        Self { key, track_index }
    }
}

/// A candidate row reduced to what the deduplicator needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackRecord {
    /// Identity of the referenced track.
    pub identity: TrackIdentity,
    /// Provenance tag of the track.
    pub source: i64,
    /// Row of the record in its originating table.
    pub row: usize,
}

impl TrackRecord {
    /// Creates a new track record.
    #[inline]
    #[must_use]
    pub fn new(key: EventKey, track_index: i64, source: i64, row: usize) -> Self {
        Self {
            identity: TrackIdentity::new(key, track_index),
            source,
            row,
        }
    }

    /// Returns the event key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> EventKey {
        self.identity.key
    }
}

/// A single field value of a record.
///
/// Ntuple columns are stored as doubles, ints or bools.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FieldValue {
    Double(f64),
    Int(i64),
    Bool(bool),
}

impl FieldValue {
    /// Returns the value as a float; bools map to 0 and 1.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Double(v) => v,
            Self::Int(v) => v as f64,
            Self::Bool(v) => f64::from(u8::from(v)),
        }
    }

    /// Returns the value as an integer, truncating doubles toward zero.
    ///
    /// Returns `None` for non-finite doubles.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Double(v) if v.is_finite() => Some(v.trunc() as i64),
            Self::Double(_) => None,
            Self::Int(v) => Some(v),
            Self::Bool(v) => Some(i64::from(v)),
        }
    }

    /// Returns true if the value is non-zero.
    #[inline]
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match *self {
            Self::Double(v) => v != 0.0,
            Self::Int(v) => v != 0,
            Self::Bool(v) => v,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Trait for named-field access to a single record.
///
/// This is the only way the core reads candidate and truth rows; it never
/// assumes a storage layout.
pub trait Record {
    /// Returns the value of the named field, if present.
    fn get(&self, field: &str) -> Option<FieldValue>;

    /// Returns the named field as a float, or `MissingField`.
    ///
    /// # Errors
    /// Returns an error if the field is absent.
    fn get_f64(&self, field: &str) -> crate::Result<f64> {
        self.get(field)
            .map(|value| value.as_f64())
            .ok_or_else(|| crate::Error::missing_field(field))
    }

    /// Returns the named field as an integer key.
    ///
    /// # Errors
    /// Returns an error if the field is absent or not representable as an integer.
    fn get_i64(&self, field: &str) -> crate::Result<i64> {
        let value = self
            .get(field)
            .ok_or_else(|| crate::Error::missing_field(field))?;
        value.as_i64().ok_or_else(|| crate::Error::FieldType {
            field: field.to_string(),
            value: value.as_f64(),
        })
    }
}

impl<R: Record + ?Sized> Record for &R {
    fn get(&self, field: &str) -> Option<FieldValue> {
        (**self).get(field)
    }
}

impl Record for std::collections::HashMap<String, FieldValue> {
    fn get(&self, field: &str) -> Option<FieldValue> {
        std::collections::HashMap::get(self, field).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_event_key_ordering() {
        let a = EventKey::new(1, 1, 5);
        let b = EventKey::new(1, 2, 0);
        let c = EventKey::new(2, 0, 0);
        assert!(a < b);
        assert!(b < c);
        assert!(a.same_window(&EventKey::new(1, 1, 9)));
        assert!(!a.same_window(&b));
    }

    #[test]
    fn test_track_identity_ordering() {
        let key = EventKey::new(1, 1, 1);
        let lo = TrackIdentity::new(key, 3);
        let hi = TrackIdentity::new(key, 7);
        let next_event = TrackIdentity::new(EventKey::new(1, 1, 2), 0);
        assert!(lo < hi);
        assert!(hi < next_event);
    }

    #[test]
    fn test_field_value_coercion() {
        assert_eq!(FieldValue::Double(5.9).as_i64(), Some(5));
        assert_eq!(FieldValue::Double(-2.5).as_i64(), Some(-2));
        assert_eq!(FieldValue::Double(f64::NAN).as_i64(), None);
        assert_eq!(FieldValue::Bool(true).as_i64(), Some(1));
        assert!((FieldValue::Int(4).as_f64() - 4.0).abs() < f64::EPSILON);
        assert!(!FieldValue::Double(0.0).is_truthy());
        assert!(FieldValue::Int(-1).is_truthy());
    }

    #[test]
    fn test_record_accessors() {
        let mut row: HashMap<String, FieldValue> = HashMap::new();
        row.insert("K_mdstIndex".to_string(), FieldValue::Double(12.0));
        row.insert("bad".to_string(), FieldValue::Double(f64::INFINITY));

        assert_eq!(row.get_i64("K_mdstIndex"), Ok(12));
        assert_eq!(
            row.get_i64("K_particleSource"),
            Err(crate::Error::missing_field("K_particleSource"))
        );
        assert!(matches!(
            row.get_i64("bad"),
            Err(crate::Error::FieldType { .. })
        ));
    }
}
