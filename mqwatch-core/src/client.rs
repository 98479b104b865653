//! Protocol client abstraction.
//!
//! The engine never speaks a wire protocol itself. It drives an injected
//! [`ProtocolClient`] for connect/send/subscribe/unsubscribe/disconnect and
//! observes the connection through the [`EventListener`] callbacks the client
//! invokes from its own delivery task. Production transports and the
//! in-memory [`crate::testkit`] fabric both plug in through these traits.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    listener::EventListener,
    message::Message,
    types::{BrokerEndpoint, Destination, Headers},
};

/// Client certificate and key for mutual-TLS connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsIdentity {
    /// Path to the PEM-encoded client certificate
    pub certificate: PathBuf,
    /// Path to the PEM-encoded client private key
    pub key: PathBuf,
}

impl TlsIdentity {
    /// Create a TLS identity from certificate and key paths
    pub fn new(certificate: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self { certificate: certificate.into(), key: key.into() }
    }
}

/// Settings applied when opening connections.
///
/// The registry holds one base set; per-broker extra headers are merged in
/// when the broker is registered. Factories receive the merged options and
/// must apply the TLS identity, when present, before connecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Mutual-TLS client identity, if connections must authenticate
    pub tls: Option<TlsIdentity>,
    /// Extra headers passed to the client at connect time
    pub headers: Headers,
    /// Capacity of each per-connection history buffer
    pub history_capacity: usize,
    /// Budget used by operations that do not take an explicit timeout
    pub default_timeout: Duration,
}

impl ConnectOptions {
    /// Default capacity of each per-connection history buffer
    pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

    /// Default budget for operations without an explicit timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create options with defaults and no TLS identity
    #[must_use]
    pub fn new() -> Self {
        Self {
            tls: None,
            headers: Headers::new(),
            history_capacity: Self::DEFAULT_HISTORY_CAPACITY,
            default_timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Set the mutual-TLS client identity
    #[must_use]
    pub fn with_tls(mut self, identity: TlsIdentity) -> Self {
        self.tls = Some(identity);
        self
    }

    /// Add one connect-time header
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the per-connection history capacity
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Set the default operation timeout
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// One live connection to a broker, scoped to a single destination.
///
/// Connection establishment is asynchronous: [`connect`](Self::connect)
/// initiates it and returns, and success is reported through the listener's
/// `on_connected` callback, which the engine's wait primitives poll for.
/// Message and receipt traffic likewise arrives through listener callbacks
/// invoked from the client's delivery task.
#[async_trait]
pub trait ProtocolClient: Send + Sync + fmt::Debug {
    /// Initiate connection establishment.
    ///
    /// # Errors
    /// Returns an error only for immediate local failures; an unreachable
    /// broker surfaces as the listener never reporting connected.
    async fn connect(&self) -> Result<()>;

    /// Publish a message to a destination.
    ///
    /// The client must invoke `on_send_dispatched` on its listener as part of
    /// dispatching, so receipt-requested sends are tracked as pending from
    /// the moment this call returns.
    ///
    /// # Errors
    /// Returns a transport error if the send is refused locally.
    async fn send(&self, destination: &Destination, message: Message) -> Result<()>;

    /// Subscribe the connection to a destination.
    ///
    /// # Errors
    /// Returns a transport error if the subscription is refused.
    async fn subscribe(&self, destination: &Destination) -> Result<()>;

    /// Remove the connection's subscription to a destination.
    ///
    /// # Errors
    /// Returns a transport error if the connection is already closed.
    async fn unsubscribe(&self, destination: &Destination) -> Result<()>;

    /// Close the connection.
    ///
    /// # Errors
    /// Returns a transport error if the connection was already closed.
    async fn disconnect(&self) -> Result<()>;
}

/// Factory opening protocol clients for broker endpoints.
///
/// Implementations apply [`ConnectOptions`] (TLS identity, connect headers)
/// when constructing the client and must wire every connection event to the
/// provided listener.
#[async_trait]
pub trait ClientFactory: Send + Sync + fmt::Debug {
    /// Open an unconnected client bound to `endpoint` and `listener`.
    ///
    /// # Errors
    /// Returns a transport error if the client cannot be constructed, for
    /// example when the TLS identity files are unusable.
    async fn open(
        &self,
        endpoint: &BrokerEndpoint,
        options: &ConnectOptions,
        listener: Arc<EventListener>,
    ) -> Result<Box<dyn ProtocolClient>>;
}
