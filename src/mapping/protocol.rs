use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::iana::ASSIGNED_PROTOCOLS;
use super::record_line;

const NUMBER_COLUMN: usize = 0;
const NAME_COLUMN: usize = 1;

/// Errors while loading a protocol-number mapping file. Fatal to a run.
#[derive(Error, Debug)]
pub enum ProtocolMappingError {
    #[error("opening protocol mappings {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading protocol mappings: {0}")]
    Csv(#[from] csv::Error),

    #[error("protocol mappings line {line}: expected at least 2 columns, found {found}")]
    ColumnCount { line: u64, found: usize },
}

/// Protocol number to lowercase protocol name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolTable {
    names: HashMap<u16, String>,
}

impl ProtocolTable {
    /// Built-in table of IANA assigned internet protocol numbers.
    pub fn builtin() -> Self {
        Self::from_entries(ASSIGNED_PROTOCOLS.iter().copied())
    }

    /// Build a table from (number, name) pairs. Names are lowercased.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (u16, &'a str)>,
    {
        let names = entries
            .into_iter()
            .map(|(number, name)| (number, name.to_lowercase()))
            .collect();
        Self { names }
    }

    /// Load the external file if given, else fall back to [`Self::builtin`].
    pub fn resolve(path: Option<&Path>) -> Result<Self, ProtocolMappingError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let table = Self::builtin();
                debug!(entries = table.len(), "using built-in protocol table");
                Ok(table)
            }
        }
    }

    /// Load a protocol-number CSV such as the IANA `protocol-numbers-1.csv`.
    pub fn load(path: &Path) -> Result<Self, ProtocolMappingError> {
        let file = File::open(path).map_err(|source| ProtocolMappingError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_reader(file)?;
        debug!(path = %path.display(), entries = table.len(), "loaded protocol mappings");
        Ok(table)
    }

    /// Parse a protocol-number table from any CSV source.
    ///
    /// Columns beyond the second are ignored. Rows whose first column is not
    /// a plain number (headers, unassigned ranges such as `146-252`) and
    /// rows with an empty name are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ProtocolMappingError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut names = HashMap::new();
        let mut skipped = 0usize;
        for result in rdr.records() {
            let record = result?;
            if record.len() < 2 {
                return Err(ProtocolMappingError::ColumnCount {
                    line: record_line(&record),
                    found: record.len(),
                });
            }

            let Ok(number) = record[NUMBER_COLUMN].parse::<u16>() else {
                skipped += 1;
                continue;
            };
            let name = &record[NAME_COLUMN];
            if name.is_empty() {
                skipped += 1;
                continue;
            }
            names.insert(number, name.to_lowercase());
        }

        if skipped > 0 {
            debug!(skipped, "skipped non-numeric protocol mapping rows");
        }

        Ok(Self { names })
    }

    /// Returns the protocol name for a number.
    pub fn name(&self, number: u16) -> Option<&str> {
        self.names.get(&number).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
