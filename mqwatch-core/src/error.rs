//! # Engine Error Handling
//!
//! Error taxonomy for the broker connectivity engine. Timeout variants carry
//! the broker, destination, and elapsed time so a failed check can be
//! diagnosed without re-running it.

use std::time::Duration;

use thiserror::Error;

/// Engine-specific error types for broker connectivity monitoring.
///
/// An unregistered broker name is deliberately not represented here: routed
/// operations on an unknown broker are logged no-ops that return empty or
/// `false` results, per the permissive routing contract of
/// [`crate::registry::BrokerRegistry`].
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Connection was not established within the allowed budget
    #[error("timed out connecting to broker {broker} on destination {destination}: waited {:.2}s", .elapsed.as_secs_f64())]
    ConnectionTimeout {
        /// Broker label (name and endpoint)
        broker: String,
        /// Destination the connection was scoped to
        destination: String,
        /// Time spent waiting before giving up
        elapsed: Duration,
    },

    /// Expected message count was not reached within the allowed budget
    #[error("timed out waiting for messages from broker {broker} on destination {destination}: got {received} of {expected} after {:.2}s", .elapsed.as_secs_f64())]
    MessageTimeout {
        /// Broker label (name and endpoint)
        broker: String,
        /// Destination being observed
        destination: String,
        /// Number of messages the caller expected
        expected: usize,
        /// Number of messages actually recorded
        received: usize,
        /// Time spent waiting before giving up
        elapsed: Duration,
    },

    /// Outstanding sends were not acknowledged within the allowed budget
    #[error("timed out waiting for sends to broker {broker} on destination {destination} to be acknowledged: {pending} still pending after {:.2}s", .elapsed.as_secs_f64())]
    SendTimeout {
        /// Broker label (name and endpoint)
        broker: String,
        /// Destination the sends were published to
        destination: String,
        /// Number of sends still awaiting a receipt
        pending: usize,
        /// Time spent waiting before giving up
        elapsed: Duration,
    },

    /// Broker reported an error frame on a connection
    #[error("broker {broker} reported an error frame on destination {destination}: {detail}")]
    ProtocolError {
        /// Broker label (name and endpoint)
        broker: String,
        /// Destination whose connection received the frame
        destination: String,
        /// Error description extracted from the frame
        detail: String,
    },

    /// Verification of a received-message count failed
    #[error("message count mismatch on broker {broker} destination {destination}: expected {expected}, got {actual}")]
    CountMismatch {
        /// Broker label (name and endpoint)
        broker: String,
        /// Destination being verified
        destination: String,
        /// Count the caller expected
        expected: usize,
        /// Count actually recorded
        actual: usize,
    },

    /// Failure surfaced by the underlying protocol client
    #[error("transport error: {0}")]
    Transport(String),

    /// Destination failed validation
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
}

impl Error {
    /// Create a connection timeout error
    pub fn connection_timeout<B, D>(broker: B, destination: D, elapsed: Duration) -> Self
    where
        B: std::fmt::Display,
        D: std::fmt::Display,
    {
        Self::ConnectionTimeout {
            broker: broker.to_string(),
            destination: destination.to_string(),
            elapsed,
        }
    }

    /// Create a message timeout error
    pub fn message_timeout<B, D>(
        broker: B,
        destination: D,
        expected: usize,
        received: usize,
        elapsed: Duration,
    ) -> Self
    where
        B: std::fmt::Display,
        D: std::fmt::Display,
    {
        Self::MessageTimeout {
            broker: broker.to_string(),
            destination: destination.to_string(),
            expected,
            received,
            elapsed,
        }
    }

    /// Create a send timeout error
    pub fn send_timeout<B, D>(broker: B, destination: D, pending: usize, elapsed: Duration) -> Self
    where
        B: std::fmt::Display,
        D: std::fmt::Display,
    {
        Self::SendTimeout {
            broker: broker.to_string(),
            destination: destination.to_string(),
            pending,
            elapsed,
        }
    }

    /// Create a protocol error from a broker error frame
    pub fn protocol<B, D, T>(broker: B, destination: D, detail: T) -> Self
    where
        B: std::fmt::Display,
        D: std::fmt::Display,
        T: std::fmt::Display,
    {
        Self::ProtocolError {
            broker: broker.to_string(),
            destination: destination.to_string(),
            detail: detail.to_string(),
        }
    }

    /// Create a count mismatch error
    pub fn count_mismatch<B, D>(broker: B, destination: D, expected: usize, actual: usize) -> Self
    where
        B: std::fmt::Display,
        D: std::fmt::Display,
    {
        Self::CountMismatch {
            broker: broker.to_string(),
            destination: destination.to_string(),
            expected,
            actual,
        }
    }

    /// Create a transport error
    pub fn transport<T: std::fmt::Display>(message: T) -> Self {
        Self::Transport(message.to_string())
    }

    /// Create an invalid destination error
    pub fn invalid_destination<T: std::fmt::Display>(reason: T) -> Self {
        Self::InvalidDestination(reason.to_string())
    }

    /// Check if this error is a timeout (connection, message, or send)
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::MessageTimeout { .. } | Self::SendTimeout { .. }
        )
    }

    /// Time spent waiting, for timeout errors
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Self::ConnectionTimeout { elapsed, .. }
            | Self::MessageTimeout { elapsed, .. }
            | Self::SendTimeout { elapsed, .. } => Some(*elapsed),
            _ => None,
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
