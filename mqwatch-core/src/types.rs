//! Core types shared across the engine.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Message headers as an opaque string-to-string map.
///
/// The engine interprets only [`RECEIPT_HEADER`]; every other key is carried
/// untouched for scenario code to use.
pub type Headers = HashMap<String, String>;

/// Header a sender sets to request a broker acknowledgment.
///
/// Its value is the correlation token that keys the pending-receipt table.
pub const RECEIPT_HEADER: &str = "receipt";

/// Header carrying the correlation token on a broker receipt frame.
pub const RECEIPT_ID_HEADER: &str = "receipt-id";

/// A named queue or topic on a broker.
///
/// Destinations are path-like (`/queue/alerts`, `/topic/heartbeat.prod`) and
/// validated at construction so invalid names fail before any connection is
/// attempted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Destination(String);

impl Destination {
    /// Maximum destination length in bytes
    pub const MAX_LENGTH: usize = 255;

    /// Create a new destination with validation
    ///
    /// # Errors
    /// Returns [`Error::InvalidDestination`] if the destination is empty,
    /// exceeds [`Self::MAX_LENGTH`] bytes, or contains characters outside
    /// alphanumerics, `/`, `.`, `-`, and `_`.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        Self::validate(&value)?;
        Ok(Self(value))
    }

    /// Get the destination as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the destination and return the inner string
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    fn validate(value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(Error::invalid_destination("destination cannot be empty"));
        }
        if value.len() > Self::MAX_LENGTH {
            return Err(Error::invalid_destination(format!(
                "destination exceeds {} bytes",
                Self::MAX_LENGTH
            )));
        }
        if !value
            .chars()
            .all(|c| c.is_alphanumeric() || c == '/' || c == '.' || c == '-' || c == '_')
        {
            return Err(Error::invalid_destination(format!(
                "destination contains invalid characters: {value}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Destination {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Destination {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for Destination {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> Self {
        destination.0
    }
}

/// Network endpoint of a named broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    host: String,
    port: u16,
}

impl BrokerEndpoint {
    /// Create a new broker endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Hostname or address of the broker
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the broker listens on
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
