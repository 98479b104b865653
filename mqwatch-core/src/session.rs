//! Per-broker session owning connections, destination roles, and the
//! blocking wait primitives.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::{
    client::{ClientFactory, ConnectOptions, ProtocolClient},
    deadline::Deadline,
    error::{Error, Result},
    listener::EventListener,
    message::Message,
    types::{BrokerEndpoint, Destination, Headers},
};

/// Interval at which wait primitives re-check listener state.
///
/// The underlying client reports events asynchronously while callers run
/// synchronous, timeout-bounded logic; a short fixed-interval poll loop is
/// the bridge between the two. Timeout errors report an elapsed time of at
/// most the requested budget plus one interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A live connection and its event listener for one destination.
#[derive(Debug)]
struct ConnectionEntry {
    client: Box<dyn ProtocolClient>,
    listener: Arc<EventListener>,
}

/// Per-broker session.
///
/// Owns one connection per destination, tracks which destinations are active
/// consumers and producers, and exposes the engine's blocking wait
/// primitives. A connection exists only while its destination holds at least
/// one role (or is mid-setup); removing the last role closes it. One
/// destination may hold both roles over a single shared connection.
#[derive(Debug)]
pub struct Session {
    name: String,
    endpoint: BrokerEndpoint,
    options: ConnectOptions,
    factory: Arc<dyn ClientFactory>,
    connections: HashMap<Destination, ConnectionEntry>,
    consumers: HashSet<Destination>,
    producers: HashSet<Destination>,
}

impl Session {
    /// Create a session for one named broker
    pub fn new(
        name: impl Into<String>,
        endpoint: BrokerEndpoint,
        options: ConnectOptions,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint,
            options,
            factory,
            connections: HashMap::new(),
            consumers: HashSet::new(),
            producers: HashSet::new(),
        }
    }

    /// Name the broker was registered under
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint of the broker
    #[must_use]
    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// Whether `destination` is an active consumer
    #[must_use]
    pub fn is_consumer(&self, destination: &Destination) -> bool {
        self.consumers.contains(destination)
    }

    /// Whether `destination` is an active producer
    #[must_use]
    pub fn is_producer(&self, destination: &Destination) -> bool {
        self.producers.contains(destination)
    }

    /// Whether the connection for `destination` currently reports connected
    #[must_use]
    pub fn is_connected(&self, destination: &Destination) -> bool {
        self.listener(destination).is_some_and(|listener| listener.is_connected())
    }

    /// Received messages for `destination`, empty when no connection exists
    #[must_use]
    pub fn messages(&self, destination: &Destination) -> Vec<Message> {
        self.listener(destination).map_or_else(Vec::new, |listener| listener.received())
    }

    /// Broker error frames for `destination`, empty when no connection exists
    #[must_use]
    pub fn errors(&self, destination: &Destination) -> Vec<Message> {
        self.listener(destination).map_or_else(Vec::new, |listener| listener.errors())
    }

    /// Acknowledged sends for `destination`, empty when no connection exists
    #[must_use]
    pub fn sent(&self, destination: &Destination) -> Vec<Message> {
        self.listener(destination).map_or_else(Vec::new, |listener| listener.sent())
    }

    /// Sends still awaiting acknowledgment for `destination`
    #[must_use]
    pub fn pending_receipts(&self, destination: &Destination) -> HashMap<String, Message> {
        self.listener(destination).map_or_else(HashMap::new, |listener| listener.pending_receipts())
    }

    /// Open a fresh connection scoped to `destination` and block until the
    /// client reports it established.
    ///
    /// The TLS identity and connect headers from the session's options are
    /// applied by the factory before connecting. An existing connection for
    /// the destination is closed and replaced.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionTimeout`] when establishment is not
    /// reported within `timeout`; no connection stays registered for the
    /// destination in that case.
    pub async fn create_connection(
        &mut self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<()> {
        if let Some(stale) = self.connections.remove(destination) {
            warn!(
                broker = %self.name,
                destination = %destination,
                "replacing existing connection"
            );
            if let Err(error) = stale.client.disconnect().await {
                warn!(
                    broker = %self.name,
                    destination = %destination,
                    %error,
                    "failed to close replaced connection"
                );
            }
        }

        let listener = Arc::new(EventListener::new(
            self.label(),
            destination.clone(),
            self.options.history_capacity,
        ));
        let client =
            self.factory.open(&self.endpoint, &self.options, Arc::clone(&listener)).await?;
        client.connect().await?;

        let deadline = Deadline::new(timeout);
        loop {
            if listener.is_connected() {
                break;
            }
            if deadline.is_expired() {
                if let Err(error) = client.disconnect().await {
                    debug!(
                        broker = %self.name,
                        destination = %destination,
                        %error,
                        "cleanup disconnect after failed connect"
                    );
                }
                return Err(Error::connection_timeout(
                    self.label(),
                    destination,
                    deadline.elapsed(),
                ));
            }
            deadline.sleep(POLL_INTERVAL).await;
        }

        info!(
            broker = %self.name,
            endpoint = %self.endpoint,
            destination = %destination,
            "connection established"
        );
        self.connections.insert(destination.clone(), ConnectionEntry { client, listener });
        Ok(())
    }

    /// Create the connection for `destination` if absent, then wait for it to
    /// report connected.
    ///
    /// Idempotent; an already-established connection passes the wait on its
    /// first poll.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionTimeout`] if the connection does not report
    /// established within `timeout`.
    pub async fn ensure_connection(
        &mut self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<()> {
        if !self.connections.contains_key(destination) {
            self.create_connection(destination, timeout).await?;
        }
        self.wait_for_connection(destination, timeout).await
    }

    /// Poll the connection for `destination` until it reports connected.
    ///
    /// A destination with no registered connection is treated as never
    /// connected and times out the same way. With a zero budget, exactly one
    /// immediate check is performed before failing.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionTimeout`] carrying the elapsed time.
    pub async fn wait_for_connection(
        &self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Deadline::new(timeout);
        loop {
            if self.is_connected(destination) {
                return Ok(());
            }
            if deadline.is_expired() {
                return Err(Error::connection_timeout(
                    self.label(),
                    destination,
                    deadline.elapsed(),
                ));
            }
            deadline.sleep(POLL_INTERVAL).await;
        }
    }

    /// Mark `destination` as an active consumer, connecting and subscribing
    /// as needed.
    ///
    /// Idempotent: an existing consumer is not re-subscribed, though the
    /// connection wait still applies.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionTimeout`] if the connection is not
    /// established within `timeout`, or a transport error if the
    /// subscription is refused.
    pub async fn create_consumer(
        &mut self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_connection(destination, timeout).await?;
        if self.consumers.contains(destination) {
            debug!(broker = %self.name, destination = %destination, "consumer already active");
            return Ok(());
        }
        self.entry(destination)?.client.subscribe(destination).await?;
        self.consumers.insert(destination.clone());
        info!(broker = %self.name, destination = %destination, "consumer created");
        Ok(())
    }

    /// Mark `destination` as an active producer, connecting as needed.
    ///
    /// Idempotent.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionTimeout`] if the connection is not
    /// established within `timeout`.
    pub async fn create_producer(
        &mut self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_connection(destination, timeout).await?;
        if self.producers.insert(destination.clone()) {
            info!(broker = %self.name, destination = %destination, "producer created");
        }
        Ok(())
    }

    /// Publish a message to `destination`, creating the producer role first
    /// if it is absent (bounded by the default timeout from the options).
    ///
    /// A [`crate::types::RECEIPT_HEADER`] in `headers` makes the send tracked
    /// as pending until the broker acknowledges it.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionTimeout`] if the producer had to be created
    /// and the connection was not established in time, or a transport error
    /// if the client refuses the send.
    pub async fn send_message(
        &mut self,
        destination: &Destination,
        headers: Headers,
        body: impl Into<Bytes>,
    ) -> Result<()> {
        if !self.producers.contains(destination) {
            self.create_producer(destination, self.options.default_timeout).await?;
        }
        let message = Message::new(headers, body);
        self.entry(destination)?.client.send(destination, message).await?;
        debug!(broker = %self.name, destination = %destination, "message sent");
        Ok(())
    }

    /// Poll until the received history for `destination` holds at least
    /// `count` messages.
    ///
    /// # Errors
    /// Returns [`Error::MessageTimeout`] with the expected and recorded
    /// counts when the history does not reach `count` within `timeout`.
    pub async fn wait_for_messages_to_arrive(
        &self,
        destination: &Destination,
        count: usize,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Deadline::new(timeout);
        loop {
            let received =
                self.listener(destination).map_or(0, |listener| listener.received_count());
            if received >= count {
                return Ok(());
            }
            if deadline.is_expired() {
                return Err(Error::message_timeout(
                    self.label(),
                    destination,
                    count,
                    received,
                    deadline.elapsed(),
                ));
            }
            deadline.sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll until every receipt-requested send to `destination` has been
    /// acknowledged.
    ///
    /// # Errors
    /// Returns [`Error::SendTimeout`] with the number of sends still pending
    /// when the table does not drain within `timeout`.
    pub async fn wait_for_messages_to_be_sent(
        &self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Deadline::new(timeout);
        loop {
            let pending = self.listener(destination).map_or(0, |listener| listener.pending_count());
            if pending == 0 {
                return Ok(());
            }
            if deadline.is_expired() {
                return Err(Error::send_timeout(
                    self.label(),
                    destination,
                    pending,
                    deadline.elapsed(),
                ));
            }
            deadline.sleep(POLL_INTERVAL).await;
        }
    }

    /// Verify that exactly `expected` messages have been received on
    /// `destination`. Non-blocking.
    ///
    /// # Errors
    /// Returns [`Error::CountMismatch`] reporting both counts when the
    /// received history length differs from `expected`.
    pub fn assert_message_count(&self, destination: &Destination, expected: usize) -> Result<()> {
        let actual = self.listener(destination).map_or(0, |listener| listener.received_count());
        if actual == expected {
            Ok(())
        } else {
            Err(Error::count_mismatch(self.label(), destination, expected, actual))
        }
    }

    /// Remove the consumer role from `destination`, unsubscribing first.
    ///
    /// Closes the connection when no role remains. A destination that is not
    /// an active consumer is a logged no-op.
    ///
    /// # Errors
    /// Returns a transport error if the unsubscribe or the final disconnect
    /// is refused.
    pub async fn delete_consumer(&mut self, destination: &Destination) -> Result<()> {
        if !self.consumers.contains(destination) {
            debug!(broker = %self.name, destination = %destination, "not an active consumer");
            return Ok(());
        }
        self.entry(destination)?.client.unsubscribe(destination).await?;
        self.consumers.remove(destination);
        info!(broker = %self.name, destination = %destination, "consumer deleted");
        self.close_if_unused(destination).await
    }

    /// Remove the producer role from `destination`.
    ///
    /// Closes the connection when no role remains. A destination that is not
    /// an active producer is a logged no-op.
    ///
    /// # Errors
    /// Returns a transport error if the final disconnect is refused.
    pub async fn delete_producer(&mut self, destination: &Destination) -> Result<()> {
        if !self.producers.remove(destination) {
            debug!(broker = %self.name, destination = %destination, "not an active producer");
            return Ok(());
        }
        info!(broker = %self.name, destination = %destination, "producer deleted");
        self.close_if_unused(destination).await
    }

    /// Remove every consumer role.
    ///
    /// # Errors
    /// Returns the first deletion failure; remaining consumers keep their
    /// roles in that case.
    pub async fn delete_all_consumers(&mut self) -> Result<()> {
        let destinations: Vec<Destination> = self.consumers.iter().cloned().collect();
        for destination in destinations {
            self.delete_consumer(&destination).await?;
        }
        Ok(())
    }

    /// Remove every producer role.
    ///
    /// # Errors
    /// Returns the first deletion failure; remaining producers keep their
    /// roles in that case.
    pub async fn delete_all_producers(&mut self) -> Result<()> {
        let destinations: Vec<Destination> = self.producers.iter().cloned().collect();
        for destination in destinations {
            self.delete_producer(&destination).await?;
        }
        Ok(())
    }

    /// Tear down the session: drop every role and close every connection.
    ///
    /// Teardown is usually invoked after something already failed, so close
    /// failures are logged and swallowed rather than propagated, and calling
    /// this on an already-destroyed session is a no-op.
    pub async fn destroy(&mut self) {
        let consumers: Vec<Destination> = self.consumers.drain().collect();
        for destination in consumers {
            if let Some(entry) = self.connections.get(&destination) {
                if let Err(error) = entry.client.unsubscribe(&destination).await {
                    warn!(
                        broker = %self.name,
                        destination = %destination,
                        %error,
                        "failed to unsubscribe during teardown"
                    );
                }
            }
        }
        self.producers.clear();

        let connections: Vec<(Destination, ConnectionEntry)> = self.connections.drain().collect();
        for (destination, entry) in connections {
            if let Err(error) = entry.client.disconnect().await {
                warn!(
                    broker = %self.name,
                    destination = %destination,
                    %error,
                    "failed to close connection during teardown"
                );
            }
        }
        info!(broker = %self.name, endpoint = %self.endpoint, "session destroyed");
    }

    /// Broker label used in errors and logs: name plus endpoint.
    fn label(&self) -> String {
        format!("{} ({})", self.name, self.endpoint)
    }

    fn listener(&self, destination: &Destination) -> Option<&Arc<EventListener>> {
        self.connections.get(destination).map(|entry| &entry.listener)
    }

    fn entry(&self, destination: &Destination) -> Result<&ConnectionEntry> {
        self.connections.get(destination).ok_or_else(|| {
            Error::transport(format!(
                "no open connection for destination {destination} on broker {}",
                self.name
            ))
        })
    }

    async fn close_if_unused(&mut self, destination: &Destination) -> Result<()> {
        if self.consumers.contains(destination) || self.producers.contains(destination) {
            return Ok(());
        }
        if let Some(entry) = self.connections.remove(destination) {
            entry.client.disconnect().await?;
            info!(broker = %self.name, destination = %destination, "connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::TestNetwork;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn destination(path: &str) -> Destination {
        Destination::new(path).unwrap()
    }

    fn session_on(network: &TestNetwork) -> Session {
        Session::new(
            "alpha",
            BrokerEndpoint::new("mq1.test", 61613),
            ConnectOptions::default(),
            network.factory(),
        )
    }

    #[tokio::test]
    async fn consumer_and_producer_share_one_connection() {
        let network = TestNetwork::new();
        let mut session = session_on(&network);
        let dest = destination("/queue/shared");

        session.create_consumer(&dest, TIMEOUT).await.unwrap();
        session.create_producer(&dest, TIMEOUT).await.unwrap();

        assert!(session.is_consumer(&dest));
        assert!(session.is_producer(&dest));
        assert!(session.is_connected(&dest));
        assert_eq!(session.connections.len(), 1);
    }

    #[tokio::test]
    async fn create_consumer_is_idempotent() {
        let network = TestNetwork::new();
        let mut session = session_on(&network);
        let dest = destination("/queue/idem");

        session.create_consumer(&dest, TIMEOUT).await.unwrap();
        session.create_consumer(&dest, TIMEOUT).await.unwrap();

        assert_eq!(network.subscriber_count(&dest), 1);
    }

    #[tokio::test]
    async fn send_auto_creates_the_producer_role() {
        let network = TestNetwork::new();
        let mut session = session_on(&network);
        let dest = destination("/queue/auto");

        assert!(!session.is_producer(&dest));
        session.send_message(&dest, Headers::new(), "payload").await.unwrap();
        assert!(session.is_producer(&dest));
        assert_eq!(session.sent(&dest).len(), 1);
    }

    #[tokio::test]
    async fn deleting_last_role_closes_the_connection() {
        let network = TestNetwork::new();
        let mut session = session_on(&network);
        let dest = destination("/queue/roles");

        session.create_consumer(&dest, TIMEOUT).await.unwrap();
        session.create_producer(&dest, TIMEOUT).await.unwrap();

        session.delete_consumer(&dest).await.unwrap();
        // Producer role still holds the connection open.
        assert!(session.is_connected(&dest));

        session.delete_producer(&dest).await.unwrap();
        assert!(!session.is_connected(&dest));
        assert!(session.connections.is_empty());
        // Reads after closure return empty rather than failing.
        assert!(session.messages(&dest).is_empty());
        assert!(session.errors(&dest).is_empty());
    }

    #[tokio::test]
    async fn wait_for_connection_times_out_without_a_connection() {
        let network = TestNetwork::new();
        let session = session_on(&network);
        let dest = destination("/queue/nowhere");

        let result = session.wait_for_connection(&dest, Duration::from_millis(250)).await;
        match result {
            Err(Error::ConnectionTimeout { elapsed, .. }) => {
                assert!(elapsed >= Duration::from_millis(250));
            },
            other => panic!("expected connection timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_budget_wait_checks_once_without_sleeping() {
        let network = TestNetwork::new();
        let mut session = session_on(&network);
        let dest = destination("/queue/instant");

        session.create_consumer(&dest, TIMEOUT).await.unwrap();

        // Already connected: the single immediate check succeeds.
        session.wait_for_connection(&dest, Duration::ZERO).await.unwrap();

        // Not yet arrived: the single immediate check fails without sleeping.
        let started = std::time::Instant::now();
        let result = session.wait_for_messages_to_arrive(&dest, 1, Duration::ZERO).await;
        assert!(matches!(result, Err(Error::MessageTimeout { .. })));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn assert_message_count_reports_both_values() {
        let network = TestNetwork::new();
        let mut session = session_on(&network);
        let dest = destination("/queue/counted");

        session.create_consumer(&dest, TIMEOUT).await.unwrap();
        session.send_message(&dest, Headers::new(), "one").await.unwrap();
        session.wait_for_messages_to_arrive(&dest, 1, TIMEOUT).await.unwrap();

        session.assert_message_count(&dest, 1).unwrap();
        match session.assert_message_count(&dest, 3) {
            Err(Error::CountMismatch { expected, actual, .. }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 1);
            },
            other => panic!("expected count mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let network = TestNetwork::new();
        let mut session = session_on(&network);
        let dest = destination("/queue/teardown");

        session.create_consumer(&dest, TIMEOUT).await.unwrap();
        session.create_producer(&dest, TIMEOUT).await.unwrap();

        session.destroy().await;
        assert!(session.connections.is_empty());
        assert!(!session.is_consumer(&dest));
        assert!(!session.is_producer(&dest));

        // Second destroy finds nothing to close and must not panic or error.
        session.destroy().await;
    }
}
