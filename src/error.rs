//! Crate-wide error taxonomy.

use crate::arm::ArmError;

/// The overarching error type returned from every public entry point.
#[derive(docsplay::Display, thiserror::Error, Debug)]
pub enum Error {
    /// an ARM debug interface error occurred
    Arm(#[from] ArmError),

    /// operation timed out
    Timeout,

    /// no hardware breakpoint/watchpoint comparators are free
    NoResources,

    /// operation unsupported on this core: {0}
    Unsupported(&'static str),

    /// target {0} does not exist
    TargetNotFound(usize),

    /// host I/O failed with errno {0:?}
    HostIo(crate::semihosting::TargetErrno),

    /// {0}
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True for errors that should not invalidate an already-discovered target list.
    pub fn is_recoverable_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}
