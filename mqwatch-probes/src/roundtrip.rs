//! Round-trip delivery probe.
//!
//! The probe is split into two halves scheduled independently, the way a
//! monitoring system runs them. The sender publishes one durable,
//! receipt-tracked probe message per run and journals it. The receiver,
//! typically minutes later, consumes the destination, crosses off every
//! journaled send it observed, measures how long each took to come back,
//! and escalates the ones still outstanding by age.

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mqwatch_core::{
    BrokerRegistry, Deadline, Destination, Headers, Message, TlsIdentity,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::Result,
    headers,
    journal::{AgeBand, AgeThresholds, DeliveryJournal, JournalRecord},
    probe::{routed, BrokerTarget, Probe, ProbeReport, ProbeVerdict},
};

/// Default budget for one probe half.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default pause for in-flight deliveries to land before reading.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);

/// Default broker-side expiry for probe messages, one day.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(86_400);

/// Default sender identity header value.
pub const DEFAULT_SENDER_NAME: &str = "mqwatch-probe";

/// Default server identity header value.
pub const DEFAULT_SERVER_ID: &str = "mqwatch";

/// Sending half: publish one journaled probe message.
#[derive(Debug)]
pub struct RoundtripSender {
    target: BrokerTarget,
    destination: Destination,
    journal: DeliveryJournal,
    sender_name: String,
    server_id: String,
    expiry: Duration,
    timeout: Duration,
    tls: Option<TlsIdentity>,
}

impl RoundtripSender {
    /// Create a sender for one broker, destination, and journal
    pub fn new(target: BrokerTarget, destination: Destination, journal: DeliveryJournal) -> Self {
        Self {
            target,
            destination,
            journal,
            sender_name: DEFAULT_SENDER_NAME.to_owned(),
            server_id: DEFAULT_SERVER_ID.to_owned(),
            expiry: DEFAULT_EXPIRY,
            timeout: DEFAULT_TIMEOUT,
            tls: None,
        }
    }

    /// Set the sender identity stamped on probe messages
    #[must_use]
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    /// Set the server identity stamped on probe messages
    #[must_use]
    pub fn with_server_id(mut self, id: impl Into<String>) -> Self {
        self.server_id = id.into();
        self
    }

    /// Set the broker-side expiry of probe messages
    #[must_use]
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
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

    fn probe_headers(&self, token: &str, sent_at: DateTime<Utc>) -> Headers {
        let expires_ms = sent_at.timestamp_millis()
            + i64::try_from(self.expiry.as_millis()).unwrap_or(i64::MAX);

        let mut h = Headers::new();
        h.insert(headers::PROBE_ID.to_owned(), token.to_owned());
        h.insert(headers::PROBE_SENDER.to_owned(), self.sender_name.clone());
        h.insert(headers::PROBE_SERVER.to_owned(), self.server_id.clone());
        h.insert(
            headers::PROBE_SENT_AT.to_owned(),
            format!("{:.6}", sent_at.timestamp_micros() as f64 / 1e6),
        );
        h.insert(headers::EXPIRES.to_owned(), expires_ms.to_string());
        h.insert(headers::PERSISTENT.to_owned(), "true".to_owned());
        h.insert(headers::RECEIPT_HEADER.to_owned(), format!("probe-{token}"));
        h
    }
}

#[async_trait]
impl Probe for RoundtripSender {
    fn name(&self) -> &str {
        "roundtrip-sender"
    }

    async fn setup(&mut self, registry: &mut BrokerRegistry) -> Result<()> {
        if let Some(identity) = &self.tls {
            registry.set_tls_identity(identity.clone());
        }
        registry
            .create_broker(&self.target.name, &self.target.host, self.target.port, Headers::new())
            .await;
        Ok(())
    }

    async fn run(&mut self, registry: &mut BrokerRegistry) -> Result<ProbeReport> {
        let deadline = Deadline::new(self.timeout);
        let broker = self.target.name.clone();

        routed(
            registry.create_producer(&broker, &self.destination, deadline.remaining()).await?,
            &broker,
        )?;

        let token = Uuid::new_v4().to_string();
        let sent_at = Utc::now();
        let probe_headers = self.probe_headers(&token, sent_at);
        routed(
            registry
                .send_message(&broker, &self.destination, probe_headers, "round-trip probe")
                .await?,
            &broker,
        )?;
        routed(
            registry
                .wait_for_messages_to_be_sent(&broker, &self.destination, deadline.remaining())
                .await?,
            &broker,
        )?;

        // Journal only after the broker acknowledged: an unacknowledged
        // send must not burden the receiver half.
        self.journal.append(&JournalRecord::new(sent_at, &token))?;
        info!(broker = %broker, token = %token, "probe message acknowledged and journaled");

        Ok(ProbeReport::new(
            ProbeVerdict::Ok,
            format!("probe {token} acknowledged by {broker}"),
        )
        .with_counter("sent", 1))
    }
}

/// Receiving half: observe journaled sends and escalate stragglers.
#[derive(Debug)]
pub struct RoundtripReceiver {
    target: BrokerTarget,
    destination: Destination,
    journal: DeliveryJournal,
    sender_name: String,
    server_id: String,
    thresholds: AgeThresholds,
    settle: Duration,
    timeout: Duration,
    tls: Option<TlsIdentity>,
}

impl RoundtripReceiver {
    /// Create a receiver for one broker, destination, and journal
    pub fn new(target: BrokerTarget, destination: Destination, journal: DeliveryJournal) -> Self {
        Self {
            target,
            destination,
            journal,
            sender_name: DEFAULT_SENDER_NAME.to_owned(),
            server_id: DEFAULT_SERVER_ID.to_owned(),
            thresholds: AgeThresholds::default(),
            settle: DEFAULT_SETTLE,
            timeout: DEFAULT_TIMEOUT,
            tls: None,
        }
    }

    /// Only match messages stamped with this sender identity
    #[must_use]
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    /// Only match messages stamped with this server identity
    #[must_use]
    pub fn with_server_id(mut self, id: impl Into<String>) -> Self {
        self.server_id = id.into();
        self
    }

    /// Set the age thresholds for outstanding sends
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: AgeThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set how long to let deliveries land before reading
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
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

    /// Tokens of the probe messages this receiver is responsible for,
    /// filtered by sender and server identity.
    fn probe_tokens(&self, messages: &[Message]) -> HashSet<String> {
        messages
            .iter()
            .filter_map(|message| {
                let token = message.header(headers::PROBE_ID)?;
                let ours = message.header(headers::PROBE_SENDER)
                    == Some(self.sender_name.as_str())
                    && message.header(headers::PROBE_SERVER) == Some(self.server_id.as_str());
                ours.then(|| token.trim().to_owned())
            })
            .collect()
    }

    fn report(&self, received: usize, had_records: bool, outcome: &Reconciliation) -> ProbeReport {
        let verdict = if outcome.critical > 0 {
            ProbeVerdict::Critical
        } else if outcome.warning > 0 {
            ProbeVerdict::Warning
        } else if received == 0 && !had_records {
            ProbeVerdict::Unknown
        } else {
            ProbeVerdict::Ok
        };

        let summary = format!(
            "matched {} of {} probe message(s), {} outstanding ({} warning, {} critical)",
            outcome.matched,
            received,
            outcome.keep.len(),
            outcome.warning,
            outcome.critical,
        );

        let mut report = ProbeReport::new(verdict, summary)
            .with_counter("received", received as u64)
            .with_counter("matched", outcome.matched as u64)
            .with_counter("old", outcome.old as u64)
            .with_counter("outstanding", outcome.keep.len() as u64)
            .with_counter("warning", outcome.warning as u64)
            .with_counter("critical", outcome.critical as u64);
        if let Some(mean) = outcome.mean_delay() {
            report = report.with_mean_delay(mean);
        }
        report
    }
}

#[async_trait]
impl Probe for RoundtripReceiver {
    fn name(&self) -> &str {
        "roundtrip-receiver"
    }

    async fn setup(&mut self, registry: &mut BrokerRegistry) -> Result<()> {
        if let Some(identity) = &self.tls {
            registry.set_tls_identity(identity.clone());
        }
        registry
            .create_broker(&self.target.name, &self.target.host, self.target.port, Headers::new())
            .await;
        Ok(())
    }

    async fn run(&mut self, registry: &mut BrokerRegistry) -> Result<ProbeReport> {
        let deadline = Deadline::new(self.timeout);
        let broker = self.target.name.clone();

        routed(
            registry.create_consumer(&broker, &self.destination, deadline.remaining()).await?,
            &broker,
        )?;
        deadline.sleep(self.settle).await;

        let messages = registry.messages(&broker, &self.destination);
        let received = self.probe_tokens(&messages);
        debug!(broker = %broker, received = received.len(), "probe messages observed");

        let records = self.journal.load()?;
        let had_records = !records.is_empty();
        let outcome = reconcile(&records, &received, Utc::now(), self.thresholds);
        self.journal.rewrite(&outcome.keep)?;

        Ok(self.report(received.len(), had_records, &outcome))
    }
}

/// Outcome of crossing journal records off against observed tokens.
#[derive(Debug, Default)]
struct Reconciliation {
    matched: usize,
    old: usize,
    warning: usize,
    critical: usize,
    delays: Vec<Duration>,
    keep: Vec<JournalRecord>,
}

impl Reconciliation {
    fn mean_delay(&self) -> Option<Duration> {
        if self.delays.is_empty() {
            return None;
        }
        let total: Duration = self.delays.iter().sum();
        Some(total / self.delays.len() as u32)
    }
}

/// Cross journal records off against the observed tokens.
///
/// Matched records are measured and dropped. Unmatched records older than
/// the youngest matched send were overtaken by a later probe and are
/// dropped as `old` (a restarted broker or a competing consumer ate them).
/// Everything else stays journaled and is classified by age.
fn reconcile(
    records: &[JournalRecord],
    received: &HashSet<String>,
    now: DateTime<Utc>,
    thresholds: AgeThresholds,
) -> Reconciliation {
    let youngest_matched = records
        .iter()
        .filter(|record| received.contains(&record.token))
        .map(|record| record.sent_at)
        .max();

    let mut outcome = Reconciliation::default();
    for record in records {
        if received.contains(&record.token) {
            outcome.matched += 1;
            outcome.delays.push(record.age(now));
            continue;
        }
        if youngest_matched.is_some_and(|youngest| record.sent_at < youngest) {
            outcome.old += 1;
            continue;
        }
        match thresholds.classify(record.age(now)) {
            AgeBand::Critical => outcome.critical += 1,
            AgeBand::Warning => outcome.warning += 1,
            AgeBand::Fresh => {},
        }
        outcome.keep.push(record.clone());
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::execute;
    use mqwatch_core::testkit::TestNetwork;
    use tempfile::tempdir;

    fn target() -> BrokerTarget {
        BrokerTarget::new("alpha", "mq1.test", 61613)
    }

    fn service_queue() -> Destination {
        Destination::new("/queue/mqwatch.roundtrip").unwrap()
    }

    fn record_at(now: DateTime<Utc>, seconds_ago: i64, token: &str) -> JournalRecord {
        JournalRecord::new(now - chrono::Duration::seconds(seconds_ago), token)
    }

    fn harness() -> TestNetwork {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("mqwatch_core=debug,mqwatch_probes=debug")
            .with_test_writer()
            .try_init();
        TestNetwork::new()
    }

    #[test]
    fn reconcile_measures_and_drops_matched_records() {
        let now = Utc::now();
        let records =
            vec![record_at(now, 120, "tok-a"), record_at(now, 60, "tok-b")];
        let received: HashSet<String> = ["tok-a", "tok-b"].iter().map(|s| (*s).to_owned()).collect();

        let outcome = reconcile(&records, &received, now, AgeThresholds::default());
        assert_eq!(outcome.matched, 2);
        assert!(outcome.keep.is_empty());
        let mean = outcome.mean_delay().unwrap();
        assert!(mean >= Duration::from_secs(89) && mean <= Duration::from_secs(91));
    }

    #[test]
    fn reconcile_drops_records_overtaken_by_a_younger_match() {
        let now = Utc::now();
        let records = vec![
            record_at(now, 300, "tok-lost"),
            record_at(now, 120, "tok-matched"),
            record_at(now, 30, "tok-fresh"),
        ];
        let received: HashSet<String> = std::iter::once("tok-matched".to_owned()).collect();

        let outcome = reconcile(&records, &received, now, AgeThresholds::default());
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.old, 1);
        assert_eq!(outcome.keep.len(), 1);
        assert_eq!(outcome.keep[0].token, "tok-fresh");
    }

    #[test]
    fn reconcile_escalates_outstanding_records_by_age() {
        let now = Utc::now();
        let records = vec![
            record_at(now, 10 * 60, "tok-fresh"),
            record_at(now, 45 * 60, "tok-warning"),
            record_at(now, 90 * 60, "tok-critical"),
        ];
        let received = HashSet::new();

        let outcome = reconcile(&records, &received, now, AgeThresholds::minutes(30, 60));
        assert_eq!(outcome.matched, 0);
        assert_eq!(outcome.warning, 1);
        assert_eq!(outcome.critical, 1);
        // Nothing matched, so nothing is old; everything stays journaled.
        assert_eq!(outcome.old, 0);
        assert_eq!(outcome.keep.len(), 3);
    }

    #[tokio::test]
    async fn sender_then_receiver_complete_a_round_trip() {
        let network = harness();
        let dir = tempdir().unwrap();
        let journal_path = dir.path().join("roundtrip.journal");
        let destination = service_queue();

        // The receiver's consumer must be up before the send so the
        // in-process fabric has somewhere to deliver.
        let receiver_network = network.clone();
        let receiver_path = journal_path.clone();
        let receiver_destination = destination.clone();
        let receiver_task = tokio::spawn(async move {
            let mut registry = BrokerRegistry::new(receiver_network.factory());
            let mut receiver = RoundtripReceiver::new(
                target(),
                receiver_destination,
                DeliveryJournal::new(receiver_path),
            )
            .with_settle(Duration::from_millis(600));
            execute(&mut receiver, &mut registry).await
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut registry = BrokerRegistry::new(network.factory());
        let mut sender =
            RoundtripSender::new(target(), destination, DeliveryJournal::new(&journal_path));
        let sent = execute(&mut sender, &mut registry).await.unwrap();
        assert_eq!(sent.verdict, ProbeVerdict::Ok);

        let report = receiver_task.await.unwrap().unwrap();
        assert_eq!(report.verdict, ProbeVerdict::Ok);
        assert_eq!(report.counters["matched"], 1);
        assert_eq!(report.counters["outstanding"], 0);
        assert!(report.mean_delay_ms.is_some());

        // The matched send is gone from the journal.
        assert!(DeliveryJournal::new(&journal_path).load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn receiver_with_nothing_to_measure_reports_unknown() {
        let network = harness();
        let dir = tempdir().unwrap();
        let mut registry = BrokerRegistry::new(network.factory());
        let mut receiver = RoundtripReceiver::new(
            target(),
            service_queue(),
            DeliveryJournal::new(dir.path().join("empty.journal")),
        )
        .with_settle(Duration::from_millis(100));

        let report = execute(&mut receiver, &mut registry).await.unwrap();
        assert_eq!(report.verdict, ProbeVerdict::Unknown);
        assert_eq!(report.counters["received"], 0);
    }

    #[tokio::test]
    async fn stale_journal_entries_escalate_the_verdict() {
        let network = harness();
        let dir = tempdir().unwrap();
        let journal = DeliveryJournal::new(dir.path().join("stale.journal"));
        journal
            .append(&JournalRecord::new(Utc::now() - chrono::Duration::hours(2), "tok-stuck"))
            .unwrap();

        let mut registry = BrokerRegistry::new(network.factory());
        let mut receiver = RoundtripReceiver::new(target(), service_queue(), journal.clone())
            .with_settle(Duration::from_millis(100));

        let report = execute(&mut receiver, &mut registry).await.unwrap();
        assert_eq!(report.verdict, ProbeVerdict::Critical);
        assert_eq!(report.counters["critical"], 1);
        // The stuck record survives for the next run to observe.
        let kept = journal.load().unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].token, "tok-stuck");
    }
}
