//! # MQWatch Core
//!
//! Connectivity watchdog engine for message brokers.
//!
//! MQWatch drives real broker deployments through their paces: it registers
//! brokers by name, attaches producers and consumers to destinations,
//! publishes messages, and verifies within bounded time that deliveries
//! arrive and that the broker acknowledges sends. Monitoring probes and
//! integration suites build on the same engine.
//!
//! ## Features
//!
//! - **Named broker routing**: One registry addresses any number of brokers;
//!   unknown names are reported, never fatal
//! - **Bounded waits**: Every blocking check carries an explicit time budget
//!   and fails with the elapsed time when it runs out
//! - **Receipt tracking**: Sends can demand broker acknowledgment and be
//!   awaited until the broker confirms them
//! - **Bounded histories**: Received, sent, and error frames are retained in
//!   fixed-capacity buffers so long-running watchdogs stay flat on memory
//! - **Pluggable transport**: The engine speaks to brokers through a client
//!   trait; the bundled [`testkit`] runs the whole engine in-process
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//!
//! use mqwatch_core::{testkit::TestNetwork, BrokerRegistry, Destination, Headers};
//!
//! #[tokio::main]
//! async fn main() -> mqwatch_core::Result<()> {
//!     let network = TestNetwork::new();
//!     let mut registry = BrokerRegistry::new(network.factory());
//!     registry.create_broker("alpha", "mq.example.org", 61613, Headers::new()).await;
//!
//!     let orders = Destination::new("/queue/orders")?;
//!     registry.create_consumer("alpha", &orders, Duration::from_secs(5)).await?;
//!     registry.send_message("alpha", &orders, Headers::new(), "ping").await?;
//!     registry.wait_for_messages_to_arrive("alpha", &orders, 1, Duration::from_secs(5)).await?;
//!
//!     registry.destroy_all_brokers().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`registry`]: Named broker registration and operation routing
//! - [`session`]: Per-broker connections, destination roles, and the wait
//!   primitives
//! - [`listener`]: Connection event recording, histories, and the pending
//!   receipt table
//! - [`client`]: Protocol client traits and connection options
//! - [`deadline`]: Time budgets backing the wait primitives
//! - [`history`]: Fixed-capacity event retention
//! - [`message`]: Broker frames as headers plus body
//! - [`types`]: Destinations, endpoints, and reserved header names
//! - [`testkit`]: In-process broker network for exercising the engine
//! - [`prelude`]: Common imports for convenient usage

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod deadline;
pub mod error;
pub mod history;
pub mod listener;
pub mod message;
pub mod prelude;
pub mod registry;
pub mod session;
pub mod testkit;
pub mod types;

// Core re-exports for convenience
pub use crate::{
    client::{ClientFactory, ConnectOptions, ProtocolClient, TlsIdentity},
    deadline::Deadline,
    error::{Error, Result},
    history::BoundedHistory,
    listener::EventListener,
    message::Message,
    registry::BrokerRegistry,
    session::{Session, POLL_INTERVAL},
    types::{BrokerEndpoint, Destination, Headers, RECEIPT_HEADER, RECEIPT_ID_HEADER},
};
