//! Memory-mapped record readers.
//!
//! Records are stored as JSON lines: one flat JSON object per line whose
//! values are numbers or booleans. `null` marks a missing cell.

use crate::{Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use trackeff_core::{FieldValue, RecordTable};

/// A memory-mapped file reader.
///
/// Uses memmap2 to efficiently access file contents without
/// loading the entire file into memory.
pub struct MappedFileReader {
    mmap: Option<Mmap>,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // Zero-length files cannot be mapped.
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
            // This is the standard safety contract for memory mapping.
            #[allow(unsafe_code)]
            let mmap = unsafe { Mmap::map(&file) }
                .map_err(|e| Error::MmapError(format!("{}: {e}", path.display())))?;
            Some(mmap)
        };
        Ok(Self { mmap, path })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reader for JSON-lines record files.
pub struct JsonLinesReader {
    reader: MappedFileReader,
}

impl JsonLinesReader {
    /// Opens a JSON-lines file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            reader: MappedFileReader::open(path)?,
        })
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    /// Returns the path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    /// Parses every line into a [`RecordTable`].
    ///
    /// # Errors
    /// Returns `InvalidFormat` with the 1-based line number of the first
    /// malformed line.
    pub fn read_table(&self) -> Result<RecordTable> {
        let table = parse_json_lines(self.reader.as_bytes())?;
        log::info!(
            "read {} records with {} columns from {}",
            table.len(),
            table.column_names().len(),
            self.path().display()
        );
        Ok(table)
    }
}

/// Reads a JSON-lines file into a table.
///
/// # Errors
/// Returns an error if the file cannot be read or a line is malformed.
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<RecordTable> {
    JsonLinesReader::open(path)?.read_table()
}

type Row = Vec<(String, FieldValue)>;

/// Parses JSON-lines bytes into a table.
///
/// Lines are parsed in parallel and appended in file order. Blank lines are
/// skipped.
///
/// # Errors
/// Returns `InvalidFormat` for the first malformed line.
pub fn parse_json_lines(data: &[u8]) -> Result<RecordTable> {
    let lines: Vec<(usize, &[u8])> = data
        .split(|&b| b == b'\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line.strip_suffix(b"\r").unwrap_or(line)))
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
        .collect();

    let rows: Vec<Row> = lines
        .par_iter()
        .map(|&(number, line)| parse_line(number, line))
        .collect::<Result<_>>()?;

    let mut table = RecordTable::default();
    for row in rows {
        table.push_row(row);
    }
    Ok(table)
}

fn parse_line(number: usize, line: &[u8]) -> Result<Row> {
    let object: Map<String, Value> =
        serde_json::from_slice(line).map_err(|e| Error::InvalidFormat {
            line: number,
            message: e.to_string(),
        })?;

    let mut row = Vec::with_capacity(object.len());
    for (name, value) in object {
        let field = match value {
            Value::Null => continue,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(_) | Value::Array(_) | Value::Object(_) => {
                return Err(Error::InvalidFormat {
                    line: number,
                    message: format!("field '{name}' is not a number or bool"),
                });
            }
        };
        row.push((name, field));
    }
    Ok(row)
}
