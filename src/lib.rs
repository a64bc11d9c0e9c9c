//! Tags network flow log records by (destination port, protocol) and counts
//! them per tag and per combination.

pub mod aggregate;
pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod flow;
pub mod mapping;
pub mod report;
