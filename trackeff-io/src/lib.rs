//! trackeff-io: Record files, analysis configuration and reports.
//!
//! This crate reads JSON-lines samples through memory-mapped files via
//! memmap2, loads batch analysis configurations and renders or writes
//! the resulting efficiency reports.
//!

pub mod batch;
pub mod config;
mod error;
mod reader;
pub mod report;
pub mod summary;
mod writer;

pub use batch::{format_report, run_analysis, ReportEntry};
pub use config::{AnalysisConfig, ChannelConfig, ParticleConfig};
pub use error::{Error, Result};
pub use reader::{parse_json_lines, read_table, JsonLinesReader, MappedFileReader};
pub use report::{format_g, ReportFormatter, NO_DATA};
pub use summary::TableSummary;
pub use writer::ReportWriter;
