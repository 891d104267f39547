use thiserror::Error;

use crate::types::BloodGroup;

/// Failure taxonomy for a scoring call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected request input; never retried
    InvalidInput,
    /// Reference data defect (stale or inconsistent tables)
    ConfigurationGap,
}

/// Errors surfaced at the engine boundary
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unknown blood group '{0}'")]
    UnknownBloodGroup(String),

    #[error("malformed antigen code '{0}'")]
    MalformedAntigen(String),

    #[error("antigen '{0}' is not an HLA-B/DR broad antigen")]
    UnsupportedHlaLocus(String),

    #[error("no blood group {0} donors in the pool")]
    EmptyPool(BloodGroup),

    #[error("donor pool is blood group {pool} but the candidate is {candidate}")]
    PoolMismatch {
        pool: BloodGroup,
        candidate: BloodGroup,
    },

    #[error("no matchability bands configured for blood group {0}")]
    MissingBandTable(BloodGroup),

    #[error("antigen default {rare} -> {default} crosses locus boundaries")]
    CrossLocusDefault { rare: String, default: String },

    #[error("reference data: {0}")]
    MalformedReference(String),
}

impl Error {
    /// Which side of the taxonomy this failure belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownBloodGroup(_)
            | Error::MalformedAntigen(_)
            | Error::UnsupportedHlaLocus(_)
            | Error::EmptyPool(_)
            | Error::PoolMismatch { .. } => ErrorKind::InvalidInput,
            Error::MissingBandTable(_)
            | Error::CrossLocusDefault { .. }
            | Error::MalformedReference(_) => ErrorKind::ConfigurationGap,
        }
    }
}
