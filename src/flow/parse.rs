//! Flow log line parsing.
//!
//! Splits a raw line on whitespace, checks the field count against the
//! configured [`FlowLogSchema`], and extracts the destination port and
//! protocol number. The protocol number is then resolved to a name through
//! the loaded [`ProtocolTable`].

use thiserror::Error;

use super::{FlowLogSchema, FlowRecord};
use crate::mapping::protocol::ProtocolTable;

/// Reasons a flow log line is rejected. Never fatal to a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("record has {found} fields, need at least {need}")]
    TooFewFields { found: usize, need: usize },

    #[error("destination port is not a port number: {raw:?}")]
    InvalidPort { raw: String },

    #[error("protocol is not a protocol number: {raw:?}")]
    InvalidProtocol { raw: String },

    #[error("unknown protocol number: {number}")]
    UnknownProtocol { number: u16 },
}

/// Extract the destination port and protocol number from a raw line.
pub fn parse_fields(line: &str, schema: &FlowLogSchema) -> Result<FlowRecord, RecordParseError> {
    let mut dst_port = None;
    let mut protocol = None;
    let mut found = 0;

    for (idx, field) in line.split_whitespace().enumerate() {
        found = idx + 1;
        if found == schema.dst_port_field {
            dst_port = Some(field);
        } else if found == schema.protocol_field {
            protocol = Some(field);
        }
        if found >= schema.min_fields {
            break;
        }
    }

    let (Some(dst_port), Some(protocol)) = (dst_port, protocol) else {
        return Err(RecordParseError::TooFewFields {
            found,
            need: schema.min_fields,
        });
    };
    if found < schema.min_fields {
        return Err(RecordParseError::TooFewFields {
            found,
            need: schema.min_fields,
        });
    }

    let dst_port = dst_port
        .parse::<u16>()
        .map_err(|_| RecordParseError::InvalidPort {
            raw: dst_port.to_string(),
        })?;
    let protocol_number =
        protocol
            .parse::<u16>()
            .map_err(|_| RecordParseError::InvalidProtocol {
                raw: protocol.to_string(),
            })?;

    Ok(FlowRecord {
        dst_port,
        protocol_number,
    })
}

/// A parsed record whose protocol number resolved to a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRecord<'a> {
    pub dst_port: u16,
    pub protocol_number: u16,
    /// Lowercase protocol name borrowed from the protocol table.
    pub protocol: &'a str,
}

/// Parses lines against a fixed schema and protocol table.
///
/// Immutable after construction, so a single instance is shared by every
/// batch worker.
#[derive(Debug, Clone)]
pub struct RecordParser {
    schema: FlowLogSchema,
    protocols: ProtocolTable,
}

impl RecordParser {
    pub fn new(schema: FlowLogSchema, protocols: ProtocolTable) -> Self {
        Self { schema, protocols }
    }

    pub fn schema(&self) -> &FlowLogSchema {
        &self.schema
    }

    pub fn protocols(&self) -> &ProtocolTable {
        &self.protocols
    }

    /// Parse a line and resolve its protocol number.
    pub fn parse(&self, line: &str) -> Result<ResolvedRecord<'_>, RecordParseError> {
        let record = parse_fields(line, &self.schema)?;
        let protocol = self
            .protocols
            .name(record.protocol_number)
            .ok_or(RecordParseError::UnknownProtocol {
                number: record.protocol_number,
            })?;

        Ok(ResolvedRecord {
            dst_port: record.dst_port,
            protocol_number: record.protocol_number,
            protocol,
        })
    }
}
