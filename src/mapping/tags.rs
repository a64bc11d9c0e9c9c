use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use super::record_line;

/// Tag applied to combinations with no configured mapping.
pub const UNTAGGED: &str = "Untagged";

/// First-column literal identifying the optional header row.
const HEADER_FIRST_COLUMN: &str = "dstport";

const PORT_COLUMN: usize = 0;
const PROTOCOL_COLUMN: usize = 1;
const TAG_COLUMN: usize = 2;
const COLUMN_COUNT: usize = 3;

/// Errors while loading the tag mapping table. Fatal to a run.
#[derive(Error, Debug)]
pub enum MappingLoadError {
    #[error("opening tag mappings {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading tag mappings: {0}")]
    Csv(#[from] csv::Error),

    #[error("tag mappings line {line}: expected 3 columns, found {found}")]
    ColumnCount { line: u64, found: usize },

    #[error("tag mappings line {line}: invalid port {raw:?}")]
    InvalidPort { line: u64, raw: String },
}

/// Operator-defined (destination port, protocol) to tag mapping.
///
/// Indexed by port first so lookups can borrow the protocol name without
/// allocating a composite key.
#[derive(Debug, Clone, Default)]
pub struct TagMapping {
    by_port: HashMap<u16, HashMap<String, String>>,
    len: usize,
}

impl TagMapping {
    /// Creates an empty mapping; every combination resolves to [`UNTAGGED`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a mapping from a CSV file with columns `dstport,protocol,tag`.
    pub fn load(path: &Path) -> Result<Self, MappingLoadError> {
        let file = File::open(path).map_err(|source| MappingLoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mapping = Self::from_reader(file)?;
        debug!(path = %path.display(), entries = mapping.len(), "loaded tag mappings");
        Ok(mapping)
    }

    /// Parse a mapping from any CSV source.
    ///
    /// Rows whose first column is `dstport` are treated as headers and
    /// skipped. Duplicate (port, protocol) keys keep the last tag.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, MappingLoadError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut mapping = Self::new();
        for result in rdr.records() {
            let record = result?;
            let line = record_line(&record);

            if record.get(PORT_COLUMN) == Some(HEADER_FIRST_COLUMN) {
                continue;
            }
            if record.len() != COLUMN_COUNT {
                return Err(MappingLoadError::ColumnCount {
                    line,
                    found: record.len(),
                });
            }

            let raw_port = &record[PORT_COLUMN];
            let port = raw_port
                .parse::<u16>()
                .map_err(|_| MappingLoadError::InvalidPort {
                    line,
                    raw: raw_port.to_string(),
                })?;

            let protocol = &record[PROTOCOL_COLUMN];
            let tag = &record[TAG_COLUMN];
            if let Some(previous) = mapping.insert(port, protocol, tag) {
                warn!(
                    line,
                    port,
                    protocol,
                    previous = %previous,
                    tag,
                    "duplicate tag mapping, keeping the later entry",
                );
            }
        }

        Ok(mapping)
    }

    /// Insert a mapping, returning the tag it replaced.
    ///
    /// The protocol is stored lowercase.
    pub fn insert(&mut self, port: u16, protocol: &str, tag: &str) -> Option<String> {
        let previous = self
            .by_port
            .entry(port)
            .or_default()
            .insert(protocol.to_lowercase(), tag.to_string());
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Returns the configured tag for an exact (port, protocol) match.
    ///
    /// `protocol` must already be lowercase; protocol tables only hand out
    /// lowercase names.
    pub fn get(&self, port: u16, protocol: &str) -> Option<&str> {
        self.by_port
            .get(&port)
            .and_then(|protocols| protocols.get(protocol))
            .map(String::as_str)
    }

    /// Returns the tag for a combination, or [`UNTAGGED`].
    pub fn resolve(&self, port: u16, protocol: &str) -> &str {
        self.get(port, protocol).unwrap_or(UNTAGGED)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
