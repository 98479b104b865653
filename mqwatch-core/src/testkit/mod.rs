//! In-process broker network for exercising the engine without a wire
//! protocol.
//!
//! [`TestNetwork`] stands in for a fleet of brokers: every client opened
//! through its factory shares one subscription table, so a message sent
//! anywhere is fanned out to every consumer of that destination, whichever
//! endpoint it connected to. Knobs make hosts unreachable, withhold receipt
//! acknowledgments, fail destinations, or add delivery latency, which is
//! enough to drive every timeout path in the engine.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use mqwatch_core::{testkit::TestNetwork, BrokerRegistry, Destination, Headers};
//!
//! # async fn demo() -> mqwatch_core::Result<()> {
//! let network = TestNetwork::new();
//! let mut registry = BrokerRegistry::new(network.factory());
//! registry.create_broker("alpha", "mq1.test", 61613, Headers::new()).await;
//!
//! let dest = Destination::new("/queue/demo")?;
//! registry.create_consumer("alpha", &dest, Duration::from_secs(2)).await?;
//! registry.send_message("alpha", &dest, Headers::new(), "ping").await?;
//! registry.wait_for_messages_to_arrive("alpha", &dest, 1, Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

mod network;

pub use network::{TestClient, TestClientFactory, TestNetwork};
