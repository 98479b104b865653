//! # Prelude
//!
//! Convenient access to the types most callers need when driving the
//! engine.

pub use crate::{
    client::{ClientFactory, ConnectOptions, ProtocolClient, TlsIdentity},
    deadline::Deadline,
    error::{Error, Result},
    listener::EventListener,
    message::Message,
    registry::BrokerRegistry,
    session::{Session, POLL_INTERVAL},
    types::{BrokerEndpoint, Destination, Headers, RECEIPT_HEADER, RECEIPT_ID_HEADER},
};

// Re-export commonly used payload types
pub use bytes::Bytes;
