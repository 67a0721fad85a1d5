//! trackeff-core: Core types for candidate-track efficiency analysis.
//!
//! This crate provides the data model shared by the counting algorithms and
//! the readers: event keys and track identities, named-field record access,
//! columnar record tables, field schemas and selection expressions.
//!

pub mod error;
pub mod event;
pub mod schema;
pub mod selection;
pub mod table;

pub use error::{Error, Result};
pub use event::{EventKey, FieldValue, Record, TrackIdentity, TrackRecord};
pub use schema::{EventSchema, TrackField};
pub use selection::Selection;
pub use table::{RecordTable, RowRef};
