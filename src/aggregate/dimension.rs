use std::fmt;

/// Dimension key for combination counts: destination port plus lowercase
/// protocol name.
///
/// Ordering is by port, then protocol, which is the report order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Combination {
    pub port: u16,
    pub protocol: String,
}

impl Combination {
    pub fn new(port: u16, protocol: impl Into<String>) -> Self {
        Self {
            port,
            protocol: protocol.into(),
        }
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.port, self.protocol)
    }
}
