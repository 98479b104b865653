//! Probe error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::probe::ProbeVerdict;

/// Failures a probe can hit while driving the engine or its own
/// bookkeeping.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The engine reported a failure (timeouts, transport, protocol)
    #[error("engine failure: {0}")]
    Engine(#[from] mqwatch_core::Error),

    /// The delivery journal could not be read or written
    #[error("journal {}: {source}", .path.display())]
    Journal {
        /// Journal file the operation targeted
        path: PathBuf,
        /// Underlying filesystem failure
        #[source]
        source: std::io::Error,
    },

    /// A probe addressed a broker its setup never registered
    #[error("broker {0} is not registered")]
    UnregisteredBroker(String),
}

impl ProbeError {
    /// Create a journal error with file context
    pub fn journal(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Journal { path: path.into(), source }
    }

    /// Monitoring verdict this failure maps to.
    ///
    /// Broker-side failures are critical; local bookkeeping and
    /// configuration problems say nothing about the broker and map to
    /// unknown.
    #[must_use]
    pub fn verdict(&self) -> ProbeVerdict {
        match self {
            Self::Engine(_) => ProbeVerdict::Critical,
            Self::Journal { .. } | Self::UnregisteredBroker(_) => ProbeVerdict::Unknown,
        }
    }
}

/// Result alias for probe operations.
pub type Result<T> = std::result::Result<T, ProbeError>;
