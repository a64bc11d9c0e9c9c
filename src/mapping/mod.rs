//! Lookup tables loaded once before streaming and shared read-only.

mod iana;
pub mod protocol;
pub mod tags;

pub use protocol::{ProtocolMappingError, ProtocolTable};
pub use tags::{MappingLoadError, TagMapping, UNTAGGED};

/// 1-based line number of a CSV record, for error messages.
fn record_line(record: &csv::StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}
