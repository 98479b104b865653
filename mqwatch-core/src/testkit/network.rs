//! Shared in-process broker fabric plus the client implementation riding on
//! it.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, error};

use crate::{
    client::{ClientFactory, ConnectOptions, ProtocolClient},
    error::{Error, Result},
    listener::EventListener,
    message::Message,
    types::{BrokerEndpoint, Destination, Headers, RECEIPT_ID_HEADER},
};

// ================================================================================================
// Network fabric
// ================================================================================================

/// One consumer registration on the fabric.
#[derive(Debug)]
struct Subscriber {
    client: u64,
    listener: Arc<EventListener>,
}

#[derive(Debug, Default)]
struct NetworkState {
    subscribers: HashMap<Destination, Vec<Subscriber>>,
    unreachable: HashSet<String>,
    held_receipts: HashSet<Destination>,
    failing: HashMap<Destination, String>,
    latency: Option<(Duration, Duration)>,
    connects: HashMap<String, Headers>,
    next_client: u64,
}

/// In-process broker network shared by every client its factory opens.
///
/// All clients publish into and subscribe from one table, so the network
/// behaves like a federated broker fleet: a message sent through any
/// endpoint reaches every consumer of its destination. Cloning the handle
/// shares the underlying fabric.
#[derive(Debug, Clone, Default)]
pub struct TestNetwork {
    state: Arc<RwLock<NetworkState>>,
}

impl TestNetwork {
    /// Create an empty network with every host reachable
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory opening clients backed by this network
    #[must_use]
    pub fn factory(&self) -> Arc<dyn ClientFactory> {
        Arc::new(TestClientFactory { network: self.clone() })
    }

    /// Make connections to `host` hang instead of establishing
    pub fn set_unreachable(&self, host: impl Into<String>) {
        self.state.write().unreachable.insert(host.into());
    }

    /// Restore connectivity to `host`
    pub fn set_reachable(&self, host: &str) {
        self.state.write().unreachable.remove(host);
    }

    /// Stop acknowledging receipt-requested sends to `destination`
    pub fn hold_receipts(&self, destination: &Destination) {
        self.state.write().held_receipts.insert(destination.clone());
    }

    /// Resume acknowledging sends to `destination`
    pub fn release_receipts(&self, destination: &Destination) {
        self.state.write().held_receipts.remove(destination);
    }

    /// Reject sends to `destination` with a broker error frame carrying
    /// `detail`
    pub fn fail_destination(&self, destination: &Destination, detail: impl Into<String>) {
        self.state.write().failing.insert(destination.clone(), detail.into());
    }

    /// Stop rejecting sends to `destination`
    pub fn clear_failure(&self, destination: &Destination) {
        self.state.write().failing.remove(destination);
    }

    /// Delay connection establishment and delivery by a uniform random
    /// duration in `min..=max`
    pub fn set_latency(&self, min: Duration, max: Duration) {
        self.state.write().latency = Some((min, max));
    }

    /// Number of live subscriptions on `destination`
    #[must_use]
    pub fn subscriber_count(&self, destination: &Destination) -> usize {
        self.state.read().subscribers.get(destination).map_or(0, Vec::len)
    }

    /// Headers presented by the most recent connect to `endpoint`, empty if
    /// none arrived yet
    #[must_use]
    pub fn connect_headers(&self, endpoint: &BrokerEndpoint) -> Headers {
        self.state.read().connects.get(&endpoint.to_string()).cloned().unwrap_or_default()
    }

    fn sample_latency(&self) -> Option<Duration> {
        let (min, max) = self.state.read().latency?;
        Some(rand::thread_rng().gen_range(min..=max))
    }

    /// Carry one published message across the fabric: fan it out to every
    /// subscriber of the destination, then acknowledge the sender.
    async fn deliver(&self, destination: Destination, message: Message, sender: Arc<EventListener>) {
        if let Some(delay) = self.sample_latency() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.state.read().failing.get(&destination).cloned();
        if let Some(detail) = failure {
            let mut headers = Headers::new();
            headers.insert("message".to_owned(), detail);
            let frame = Message::new(headers, format!("failed to deliver to {destination}"));
            if let Err(error) = sender.on_error_frame(frame) {
                error!(%error, "broker rejected send");
            }
            return;
        }

        let targets: Vec<Arc<EventListener>> = {
            let state = self.state.read();
            state.subscribers.get(&destination).map_or_else(Vec::new, |subscribers| {
                subscribers.iter().map(|subscriber| Arc::clone(&subscriber.listener)).collect()
            })
        };
        for target in targets {
            target.on_message(message.clone());
        }

        if let Some(token) = message.receipt_request() {
            if self.state.read().held_receipts.contains(&destination) {
                debug!(destination = %destination, "receipt withheld");
            } else {
                let mut headers = Headers::new();
                headers.insert(RECEIPT_ID_HEADER.to_owned(), token.to_owned());
                sender.on_receipt(Message::new(headers, ""));
            }
        }
    }
}

// ================================================================================================
// Client
// ================================================================================================

/// Client connecting into a [`TestNetwork`].
///
/// Connection establishment and send acknowledgment are reported through
/// the listener the way a wire client would: dispatch is synchronous,
/// delivery and receipts arrive from a background task.
#[derive(Debug)]
pub struct TestClient {
    network: TestNetwork,
    endpoint: BrokerEndpoint,
    connect_headers: Headers,
    listener: Arc<EventListener>,
    id: u64,
    closed: AtomicBool,
}

impl TestClient {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::transport("client is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProtocolClient for TestClient {
    async fn connect(&self) -> Result<()> {
        self.ensure_open()?;
        self.listener.on_connecting();

        let unreachable = {
            let mut state = self.network.state.write();
            state.connects.insert(self.endpoint.to_string(), self.connect_headers.clone());
            state.unreachable.contains(self.endpoint.host())
        };
        if unreachable {
            debug!(endpoint = %self.endpoint, "host unreachable, connection will not establish");
            return Ok(());
        }

        match self.network.sample_latency() {
            Some(delay) => {
                let listener = Arc::clone(&self.listener);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    listener.on_connected();
                });
            },
            None => self.listener.on_connected(),
        }
        Ok(())
    }

    async fn send(&self, destination: &Destination, message: Message) -> Result<()> {
        self.ensure_open()?;
        self.listener.on_send_dispatched(message.clone());

        let network = self.network.clone();
        let sender = Arc::clone(&self.listener);
        let destination = destination.clone();
        tokio::spawn(async move {
            network.deliver(destination, message, sender).await;
        });
        Ok(())
    }

    async fn subscribe(&self, destination: &Destination) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.network.state.write();
        let entries = state.subscribers.entry(destination.clone()).or_default();
        if !entries.iter().any(|subscriber| subscriber.client == self.id) {
            entries
                .push(Subscriber { client: self.id, listener: Arc::clone(&self.listener) });
        }
        Ok(())
    }

    async fn unsubscribe(&self, destination: &Destination) -> Result<()> {
        let mut state = self.network.state.write();
        if let Some(entries) = state.subscribers.get_mut(destination) {
            entries.retain(|subscriber| subscriber.client != self.id);
            if entries.is_empty() {
                state.subscribers.remove(destination);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut state = self.network.state.write();
            state.subscribers.retain(|_, entries| {
                entries.retain(|subscriber| subscriber.client != self.id);
                !entries.is_empty()
            });
        }
        self.listener.on_disconnected();
        Ok(())
    }
}

/// Factory handing out [`TestClient`]s for one [`TestNetwork`].
#[derive(Debug)]
pub struct TestClientFactory {
    network: TestNetwork,
}

#[async_trait]
impl ClientFactory for TestClientFactory {
    async fn open(
        &self,
        endpoint: &BrokerEndpoint,
        options: &ConnectOptions,
        listener: Arc<EventListener>,
    ) -> Result<Box<dyn ProtocolClient>> {
        let id = {
            let mut state = self.network.state.write();
            state.next_client += 1;
            state.next_client
        };
        debug!(endpoint = %endpoint, client = id, "client opened");
        Ok(Box::new(TestClient {
            network: self.network.clone(),
            endpoint: endpoint.clone(),
            connect_headers: options.headers.clone(),
            listener,
            id,
            closed: AtomicBool::new(false),
        }))
    }
}
