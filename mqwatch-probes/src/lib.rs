//! # MQWatch Probes
//!
//! Scenario layer on top of [`mqwatch_core`]: self-contained probes that
//! drive real broker traffic and reduce what they observe to a monitoring
//! verdict.
//!
//! ## Features
//!
//! - **Round-trip latency**: a sender half journals durable probe sends, a
//!   receiver half scheduled later measures how long each took to come
//!   back and escalates the ones that never did
//! - **Fleet fan-out**: publish a batch to a topic on one broker and
//!   verify every observer broker received it exactly once
//! - **Monitoring verdicts**: OK, WARNING, CRITICAL, and UNKNOWN with the
//!   conventional process exit codes
//! - **Structured reports**: counters and mean delay behind every verdict,
//!   serializable for downstream tooling
//!
//! ## Quick Start
//!
//! ```no_run
//! use mqwatch_core::{BrokerRegistry, Destination, testkit::TestNetwork};
//! use mqwatch_probes::{execute, BrokerTarget, DeliveryJournal, RoundtripSender};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = TestNetwork::new();
//!     let mut registry = BrokerRegistry::new(network.factory());
//!
//!     let mut sender = RoundtripSender::new(
//!         BrokerTarget::new("alpha", "mq1.example.net", 61613),
//!         Destination::new("/queue/service.health")?,
//!         DeliveryJournal::new("/var/lib/mqwatch/service.journal"),
//!     );
//!     let report = execute(&mut sender, &mut registry).await?;
//!     println!("{report}");
//!     std::process::exit(report.verdict.exit_code().into());
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`probe`]: verdicts, reports, and the setup/run/teardown driver
//! - [`roundtrip`]: journaled send/receive latency probe
//! - [`fanout`]: topic fan-out probe across a broker fleet
//! - [`journal`]: on-disk record of sends awaiting observation
//! - [`headers`]: header conventions stamped on probe traffic
//! - [`error`]: failure taxonomy and its mapping onto verdicts

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fanout;
pub mod headers;
pub mod journal;
pub mod probe;
pub mod roundtrip;

pub use crate::{
    error::{ProbeError, Result},
    fanout::FanoutProbe,
    journal::{AgeBand, AgeThresholds, DeliveryJournal, JournalRecord},
    probe::{execute, BrokerTarget, Probe, ProbeReport, ProbeVerdict},
    roundtrip::{RoundtripReceiver, RoundtripSender},
};
