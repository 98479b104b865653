//! Named-broker registry routing operations to per-broker sessions.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use tracing::{info, warn};

use crate::{
    client::{ClientFactory, ConnectOptions, TlsIdentity},
    error::Result,
    message::Message,
    session::Session,
    types::{BrokerEndpoint, Destination, Headers},
};

/// Registry of named broker sessions.
///
/// Every operation is addressed by broker name. Routing is permissive: an
/// unknown name is logged and reported through the return value (`Ok(false)`
/// or an empty collection) instead of failing, so one misconfigured broker
/// in a scenario does not abort checks against the others.
#[derive(Debug)]
pub struct BrokerRegistry {
    factory: Arc<dyn ClientFactory>,
    options: ConnectOptions,
    sessions: HashMap<String, Session>,
}

impl BrokerRegistry {
    /// Create an empty registry whose sessions connect through `factory`
    #[must_use]
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self::with_options(factory, ConnectOptions::default())
    }

    /// Create an empty registry with explicit connection options
    #[must_use]
    pub fn with_options(factory: Arc<dyn ClientFactory>, options: ConnectOptions) -> Self {
        Self { factory, options, sessions: HashMap::new() }
    }

    /// Set the TLS identity applied to brokers registered from now on
    pub fn set_tls_identity(&mut self, identity: TlsIdentity) {
        info!(certificate = %identity.certificate.display(), "TLS identity configured");
        self.options.tls = Some(identity);
    }

    /// Add a header sent with every subsequent broker's connect frames
    pub fn set_connect_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.options.headers.insert(name.into(), value.into());
    }

    /// Register a broker under `name` and open a session for it.
    ///
    /// `extra_headers` are merged over the registry-wide connect headers for
    /// this broker only. Registering a name twice destroys the session the
    /// first registration created.
    pub async fn create_broker(
        &mut self,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        extra_headers: Headers,
    ) {
        let name = name.into();
        let mut options = self.options.clone();
        options.headers.extend(extra_headers);

        let endpoint = BrokerEndpoint::new(host, port);
        info!(broker = %name, endpoint = %endpoint, "broker registered");

        let session = Session::new(name.clone(), endpoint, options, Arc::clone(&self.factory));
        if let Some(mut replaced) = self.sessions.insert(name.clone(), session) {
            warn!(broker = %name, "broker re-registered, destroying previous session");
            replaced.destroy().await;
        }
    }

    /// Names of all registered brokers
    #[must_use]
    pub fn broker_names(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Number of registered brokers
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no broker is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session for `broker`, if registered
    #[must_use]
    pub fn session(&self, broker: &str) -> Option<&Session> {
        self.sessions.get(broker)
    }

    /// Open a connection on `broker` for `destination`.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's connection failure.
    pub async fn create_connection(
        &mut self,
        broker: &str,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<bool> {
        match self.session_mut(broker, "create_connection") {
            Some(session) => session.create_connection(destination, timeout).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Ensure a connection on `broker` for `destination` exists and is up.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's connection failure.
    pub async fn ensure_connection(
        &mut self,
        broker: &str,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<bool> {
        match self.session_mut(broker, "ensure_connection") {
            Some(session) => session.ensure_connection(destination, timeout).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Wait for the connection on `broker` for `destination` to come up.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's timeout.
    pub async fn wait_for_connection(
        &self,
        broker: &str,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<bool> {
        match self.session_ref(broker, "wait_for_connection") {
            Some(session) => session.wait_for_connection(destination, timeout).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Create a consumer on `broker` for `destination`.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's failure.
    pub async fn create_consumer(
        &mut self,
        broker: &str,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<bool> {
        match self.session_mut(broker, "create_consumer") {
            Some(session) => session.create_consumer(destination, timeout).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Create a producer on `broker` for `destination`.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's failure.
    pub async fn create_producer(
        &mut self,
        broker: &str,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<bool> {
        match self.session_mut(broker, "create_producer") {
            Some(session) => session.create_producer(destination, timeout).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Send a message through `broker` to `destination`.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's failure.
    pub async fn send_message(
        &mut self,
        broker: &str,
        destination: &Destination,
        headers: Headers,
        body: impl Into<Bytes> + Send,
    ) -> Result<bool> {
        match self.session_mut(broker, "send_message") {
            Some(session) => session.send_message(destination, headers, body).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Wait for `count` messages to arrive on `broker` at `destination`.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's timeout.
    pub async fn wait_for_messages_to_arrive(
        &self,
        broker: &str,
        destination: &Destination,
        count: usize,
        timeout: Duration,
    ) -> Result<bool> {
        match self.session_ref(broker, "wait_for_messages_to_arrive") {
            Some(session) => {
                session.wait_for_messages_to_arrive(destination, count, timeout).await.map(|()| true)
            },
            None => Ok(false),
        }
    }

    /// Wait for all pending sends on `broker` at `destination` to be
    /// acknowledged.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's timeout.
    pub async fn wait_for_messages_to_be_sent(
        &self,
        broker: &str,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<bool> {
        match self.session_ref(broker, "wait_for_messages_to_be_sent") {
            Some(session) => {
                session.wait_for_messages_to_be_sent(destination, timeout).await.map(|()| true)
            },
            None => Ok(false),
        }
    }

    /// Verify the received count on `broker` at `destination`.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's count mismatch.
    pub fn assert_message_count(
        &self,
        broker: &str,
        destination: &Destination,
        expected: usize,
    ) -> Result<bool> {
        match self.session_ref(broker, "assert_message_count") {
            Some(session) => session.assert_message_count(destination, expected).map(|()| true),
            None => Ok(false),
        }
    }

    /// Delete the consumer on `broker` for `destination`.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's failure.
    pub async fn delete_consumer(
        &mut self,
        broker: &str,
        destination: &Destination,
    ) -> Result<bool> {
        match self.session_mut(broker, "delete_consumer") {
            Some(session) => session.delete_consumer(destination).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Delete the producer on `broker` for `destination`.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the session's failure.
    pub async fn delete_producer(
        &mut self,
        broker: &str,
        destination: &Destination,
    ) -> Result<bool> {
        match self.session_mut(broker, "delete_producer") {
            Some(session) => session.delete_producer(destination).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Delete every consumer on `broker`.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the first deletion failure.
    pub async fn delete_all_consumers(&mut self, broker: &str) -> Result<bool> {
        match self.session_mut(broker, "delete_all_consumers") {
            Some(session) => session.delete_all_consumers().await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Delete every producer on `broker`.
    ///
    /// Returns `Ok(false)` when the broker is unknown.
    ///
    /// # Errors
    /// Propagates the first deletion failure.
    pub async fn delete_all_producers(&mut self, broker: &str) -> Result<bool> {
        match self.session_mut(broker, "delete_all_producers") {
            Some(session) => session.delete_all_producers().await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Received messages on `broker` at `destination`, empty when the broker
    /// is unknown
    #[must_use]
    pub fn messages(&self, broker: &str, destination: &Destination) -> Vec<Message> {
        self.session_ref(broker, "messages")
            .map_or_else(Vec::new, |session| session.messages(destination))
    }

    /// Broker error frames on `broker` at `destination`, empty when the
    /// broker is unknown
    #[must_use]
    pub fn errors(&self, broker: &str, destination: &Destination) -> Vec<Message> {
        self.session_ref(broker, "errors")
            .map_or_else(Vec::new, |session| session.errors(destination))
    }

    /// Tear down and remove the session registered under `broker`.
    ///
    /// Returns `false` when the broker is unknown.
    pub async fn destroy_broker(&mut self, broker: &str) -> bool {
        match self.sessions.remove(broker) {
            Some(mut session) => {
                session.destroy().await;
                true
            },
            None => {
                warn!(broker = %broker, operation = "destroy_broker", "unknown broker");
                false
            },
        }
    }

    /// Tear down every session and empty the registry.
    ///
    /// Teardown failures inside sessions are logged, never propagated.
    pub async fn destroy_all_brokers(&mut self) {
        let sessions: Vec<(String, Session)> = self.sessions.drain().collect();
        let count = sessions.len();
        for (_, mut session) in sessions {
            session.destroy().await;
        }
        info!(brokers = count, "all brokers destroyed");
    }

    fn session_mut(&mut self, broker: &str, operation: &str) -> Option<&mut Session> {
        if !self.sessions.contains_key(broker) {
            warn!(broker = %broker, operation = %operation, "unknown broker");
        }
        self.sessions.get_mut(broker)
    }

    fn session_ref(&self, broker: &str, operation: &str) -> Option<&Session> {
        let session = self.sessions.get(broker);
        if session.is_none() {
            warn!(broker = %broker, operation = %operation, "unknown broker");
        }
        session
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

    #[tokio::test]
    async fn operations_against_unknown_brokers_are_permissive() {
        let network = TestNetwork::new();
        let mut registry = BrokerRegistry::new(network.factory());
        let dest = destination("/queue/ghost");

        assert!(!registry.create_consumer("phantom", &dest, TIMEOUT).await.unwrap());
        assert!(!registry.send_message("phantom", &dest, Headers::new(), "x").await.unwrap());
        assert!(!registry.assert_message_count("phantom", &dest, 0).unwrap());
        assert!(registry.messages("phantom", &dest).is_empty());
        assert!(registry.errors("phantom", &dest).is_empty());
        assert!(!registry.destroy_broker("phantom").await);
    }

    #[tokio::test]
    async fn routed_operations_reach_the_named_session() {
        let network = TestNetwork::new();
        let mut registry = BrokerRegistry::new(network.factory());
        let dest = destination("/queue/routed");

        registry.create_broker("alpha", "mq1.test", 61613, Headers::new()).await;
        assert!(registry.create_consumer("alpha", &dest, TIMEOUT).await.unwrap());
        assert!(registry.send_message("alpha", &dest, Headers::new(), "hello").await.unwrap());
        assert!(registry.wait_for_messages_to_arrive("alpha", &dest, 1, TIMEOUT).await.unwrap());
        assert!(registry.assert_message_count("alpha", &dest, 1).unwrap());
        assert_eq!(registry.messages("alpha", &dest).len(), 1);
    }

    #[tokio::test]
    async fn re_registering_a_broker_destroys_the_previous_session() {
        let network = TestNetwork::new();
        let mut registry = BrokerRegistry::new(network.factory());
        let dest = destination("/queue/replaced");

        registry.create_broker("alpha", "mq1.test", 61613, Headers::new()).await;
        assert!(registry.create_consumer("alpha", &dest, TIMEOUT).await.unwrap());
        assert_eq!(network.subscriber_count(&dest), 1);

        registry.create_broker("alpha", "mq2.test", 61613, Headers::new()).await;
        // The replaced session unsubscribed during teardown.
        assert_eq!(network.subscriber_count(&dest), 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.session("alpha").map(|s| s.endpoint().host().to_owned()),
            Some("mq2.test".to_owned())
        );
    }

    #[tokio::test]
    async fn connect_headers_reach_newly_registered_brokers() {
        let network = TestNetwork::new();
        let mut registry = BrokerRegistry::new(network.factory());

        registry.set_connect_header("client-id", "watchdog");
        let mut extra = Headers::new();
        extra.insert("login".to_owned(), "alpha-user".to_owned());
        registry.create_broker("alpha", "mq1.test", 61613, extra).await;

        let dest = destination("/queue/headers");
        assert!(registry.ensure_connection("alpha", &dest, TIMEOUT).await.unwrap());

        let seen = network.connect_headers(&BrokerEndpoint::new("mq1.test", 61613));
        assert_eq!(seen.get("client-id").map(String::as_str), Some("watchdog"));
        assert_eq!(seen.get("login").map(String::as_str), Some("alpha-user"));
    }

    #[tokio::test]
    async fn destroy_all_brokers_empties_the_registry() {
        let network = TestNetwork::new();
        let mut registry = BrokerRegistry::new(network.factory());
        let dest = destination("/queue/sweep");

        registry.create_broker("alpha", "mq1.test", 61613, Headers::new()).await;
        registry.create_broker("beta", "mq2.test", 61613, Headers::new()).await;
        assert!(registry.create_consumer("alpha", &dest, TIMEOUT).await.unwrap());
        assert!(registry.create_consumer("beta", &dest, TIMEOUT).await.unwrap());

        registry.destroy_all_brokers().await;
        assert!(registry.is_empty());
        assert_eq!(network.subscriber_count(&dest), 0);

        // Idempotent on an empty registry.
        registry.destroy_all_brokers().await;
    }
}
