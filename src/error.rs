use thiserror::Error;

use crate::engine::StreamError;
use crate::mapping::{MappingLoadError, ProtocolMappingError};
use crate::report::ReportError;

/// Fatal failure while loading the lookup tables. No report is written.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Tags(#[from] MappingLoadError),

    #[error(transparent)]
    Protocols(#[from] ProtocolMappingError),
}

/// Any fatal failure of a run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("loading mappings: {0}")]
    Load(#[from] LoadError),

    #[error("streaming flow logs: {0}")]
    Stream(#[from] StreamError),

    #[error("writing report: {0}")]
    Report(#[from] ReportError),
}
