pub mod parse;

use anyhow::{bail, Result};

/// Positional layout of a whitespace-separated flow log record.
///
/// Field positions are 1-indexed, matching how flow log formats are
/// documented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowLogSchema {
    /// Minimum number of fields a well-formed record carries.
    pub min_fields: usize,
    /// Position of the destination port field.
    pub dst_port_field: usize,
    /// Position of the IANA protocol number field.
    pub protocol_field: usize,
}

impl FlowLogSchema {
    /// Default (version 2) flow log record layout.
    pub const V2: Self = Self {
        min_fields: 14,
        dst_port_field: 7,
        protocol_field: 8,
    };

    /// Returns the layout for a known flow log version.
    pub fn for_version(version: u8) -> Option<Self> {
        match version {
            2 => Some(Self::V2),
            _ => None,
        }
    }

    /// Checks that both extracted fields fall inside the minimum field count.
    pub fn validate(&self) -> Result<()> {
        if self.min_fields == 0 {
            bail!("min_fields must be positive");
        }
        if self.dst_port_field == 0 || self.protocol_field == 0 {
            bail!("field positions are 1-indexed and must be positive");
        }
        if self.dst_port_field > self.min_fields {
            bail!(
                "dst_port_field {} exceeds min_fields {}",
                self.dst_port_field,
                self.min_fields
            );
        }
        if self.protocol_field > self.min_fields {
            bail!(
                "protocol_field {} exceeds min_fields {}",
                self.protocol_field,
                self.min_fields
            );
        }
        if self.dst_port_field == self.protocol_field {
            bail!("dst_port_field and protocol_field must differ");
        }
        Ok(())
    }
}

impl Default for FlowLogSchema {
    fn default() -> Self {
        Self::V2
    }
}

/// Fields extracted from one validated flow log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecord {
    pub dst_port: u16,
    pub protocol_number: u16,
}
