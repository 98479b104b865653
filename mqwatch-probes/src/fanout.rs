//! Topic fan-out probe across a federated broker fleet.
//!
//! Publishes a batch of durable messages to a topic on one broker and
//! verifies that every observer broker in the fleet received each of them
//! exactly once. Catches broken or looping inter-broker bridges.

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use mqwatch_core::{BrokerRegistry, Deadline, Destination, Headers, TlsIdentity};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    headers,
    probe::{routed, BrokerTarget, Probe, ProbeReport, ProbeVerdict},
};

/// Default number of messages published per run.
pub const DEFAULT_MESSAGE_COUNT: usize = 10;

/// Default budget for one run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause after subscribing, so bridges pick up the new subscription.
const SUBSCRIBE_SETTLE: Duration = Duration::from_secs(1);

/// Pause after the expected count arrived, so duplicates can land.
const DELIVERY_SETTLE: Duration = Duration::from_secs(2);

/// Publish to one broker, verify arrival on every observer.
///
/// Observers are the brokers whose delivery is verified. The source may be
/// listed among them: its name is collapsed at setup and its own
/// subscription then verifies loopback delivery as well.
#[derive(Debug)]
pub struct FanoutProbe {
    source: BrokerTarget,
    observers: Vec<BrokerTarget>,
    destination: Destination,
    message_count: usize,
    timeout: Duration,
    tls: Option<TlsIdentity>,
}

impl FanoutProbe {
    /// Create a probe publishing on `source` and verifying on `observers`
    pub fn new(
        source: BrokerTarget,
        observers: Vec<BrokerTarget>,
        destination: Destination,
    ) -> Self {
        Self {
            source,
            observers,
            destination,
            message_count: DEFAULT_MESSAGE_COUNT,
            timeout: DEFAULT_TIMEOUT,
            tls: None,
        }
    }

    /// Set how many messages each run publishes
    #[must_use]
    pub fn with_message_count(mut self, count: usize) -> Self {
        self.message_count = count;
        self
    }

    /// Set the overall budget for the run
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect with a mutual-TLS identity
    #[must_use]
    pub fn with_tls(mut self, identity: TlsIdentity) -> Self {
        self.tls = Some(identity);
        self
    }

    fn batch_headers(&self, seq: usize) -> Headers {
        let mut h = Headers::new();
        h.insert(headers::PROBE_ID.to_owned(), Uuid::new_v4().to_string());
        h.insert(headers::PERSISTENT.to_owned(), "true".to_owned());
        h.insert(headers::RECEIPT_HEADER.to_owned(), format!("fanout-{seq}"));
        h
    }
}

#[async_trait]
impl Probe for FanoutProbe {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn setup(&mut self, registry: &mut BrokerRegistry) -> Result<()> {
        if let Some(identity) = &self.tls {
            registry.set_tls_identity(identity.clone());
        }
        registry
            .create_broker(&self.source.name, &self.source.host, self.source.port, Headers::new())
            .await;

        let mut seen: HashSet<&str> = HashSet::from([self.source.name.as_str()]);
        for observer in &self.observers {
            if !seen.insert(&observer.name) {
                warn!(broker = %observer.name, "name already registered, keeping the first endpoint");
                continue;
            }
            registry
                .create_broker(&observer.name, &observer.host, observer.port, Headers::new())
                .await;
        }
        Ok(())
    }

    async fn run(&mut self, registry: &mut BrokerRegistry) -> Result<ProbeReport> {
        let deadline = Deadline::new(self.timeout);

        // Subscriptions first, so every observer is routed to before the
        // batch goes out.
        for observer in &self.observers {
            routed(
                registry
                    .create_consumer(&observer.name, &self.destination, deadline.remaining())
                    .await?,
                &observer.name,
            )?;
        }
        deadline.sleep(SUBSCRIBE_SETTLE).await;

        let source = self.source.name.clone();
        routed(
            registry.create_producer(&source, &self.destination, deadline.remaining()).await?,
            &source,
        )?;
        for seq in 0..self.message_count {
            let body = format!("fan-out probe {seq} of {}", self.message_count);
            routed(
                registry
                    .send_message(&source, &self.destination, self.batch_headers(seq), body)
                    .await?,
                &source,
            )?;
        }
        routed(
            registry
                .wait_for_messages_to_be_sent(&source, &self.destination, deadline.remaining())
                .await?,
            &source,
        )?;

        for observer in &self.observers {
            routed(
                registry
                    .wait_for_messages_to_arrive(
                        &observer.name,
                        &self.destination,
                        self.message_count,
                        deadline.remaining(),
                    )
                    .await?,
                &observer.name,
            )?;
        }

        // The expected count is in; give looping bridges a chance to
        // produce the duplicate that would fail the exact-count check.
        deadline.sleep(DELIVERY_SETTLE).await;
        for observer in &self.observers {
            routed(
                registry.assert_message_count(&observer.name, &self.destination, self.message_count)?,
                &observer.name,
            )?;
        }

        info!(
            source = %source,
            observers = self.observers.len(),
            count = self.message_count,
            "fan-out batch verified on every observer",
        );
        Ok(ProbeReport::new(
            ProbeVerdict::Ok,
            format!(
                "{} message(s) from {source} reached {} observer(s) exactly once",
                self.message_count,
                self.observers.len(),
            ),
        )
        .with_counter("sent", self.message_count as u64)
        .with_counter("observers", self.observers.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ProbeError, probe::execute};
    use mqwatch_core::{testkit::TestNetwork, Error};

    fn fleet_probe() -> FanoutProbe {
        FanoutProbe::new(
            BrokerTarget::new("alpha", "mq1.test", 61613),
            vec![
                BrokerTarget::new("beta", "mq2.test", 61613),
                BrokerTarget::new("gamma", "mq3.test", 61613),
            ],
            Destination::new("/topic/mqwatch.fanout").unwrap(),
        )
        .with_message_count(3)
        .with_timeout(Duration::from_secs(5))
    }

    fn harness() -> (TestNetwork, BrokerRegistry) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("mqwatch_core=debug,mqwatch_probes=debug")
            .with_test_writer()
            .try_init();
        let network = TestNetwork::new();
        let registry = BrokerRegistry::new(network.factory());
        (network, registry)
    }

    #[tokio::test]
    async fn batch_reaches_every_observer_exactly_once() {
        let (_network, mut registry) = harness();
        let mut probe = fleet_probe();

        let report = execute(&mut probe, &mut registry).await.unwrap();
        assert_eq!(report.verdict, ProbeVerdict::Ok);
        assert_eq!(report.counters["sent"], 3);
        assert_eq!(report.counters["observers"], 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unreachable_observer_fails_the_run() {
        let (network, mut registry) = harness();
        network.set_unreachable("mq3.test");
        let mut probe = fleet_probe().with_timeout(Duration::from_secs(1));

        let err = execute(&mut probe, &mut registry).await.unwrap_err();
        assert!(matches!(err, ProbeError::Engine(Error::ConnectionTimeout { .. })));
        // Teardown still ran.
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn duplicate_observers_are_collapsed_at_setup() {
        let (_network, mut registry) = harness();
        let mut probe = FanoutProbe::new(
            BrokerTarget::new("alpha", "mq1.test", 61613),
            vec![
                BrokerTarget::new("beta", "mq2.test", 61613),
                BrokerTarget::new("beta", "mq9.test", 61613),
            ],
            Destination::new("/topic/mqwatch.fanout").unwrap(),
        );

        probe.setup(&mut registry).await.unwrap();
        assert_eq!(registry.len(), 2);
        // The first registration for the name wins.
        let endpoint = registry.session("beta").unwrap().endpoint().to_string();
        assert!(endpoint.contains("mq2.test"));
    }
}
