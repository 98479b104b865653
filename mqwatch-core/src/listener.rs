//! Per-connection event listener bridging asynchronous protocol callbacks
//! into synchronously pollable state.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    history::BoundedHistory,
    message::Message,
    types::Destination,
};

/// State mutated by the client's delivery task and read by polling waits.
#[derive(Debug)]
struct ListenerState {
    connected: bool,
    received: BoundedHistory<Message>,
    sent: BoundedHistory<Message>,
    errors: BoundedHistory<Message>,
    pending: HashMap<String, Message>,
}

/// Sink for one connection's asynchronous protocol events.
///
/// The underlying client invokes the `on_*` callbacks from its own delivery
/// task; the engine's wait primitives poll the query side. All callbacks are
/// non-blocking and perform no I/O; state is guarded by a lock held only for
/// short, non-awaiting critical sections, so callbacks firing back to back
/// can never corrupt the history bounds or the pending-receipt invariant.
#[derive(Debug)]
pub struct EventListener {
    broker: String,
    destination: Destination,
    state: RwLock<ListenerState>,
}

impl EventListener {
    /// Create a listener for one connection, with bounded histories of
    /// `capacity` items each.
    pub fn new(broker: impl Into<String>, destination: Destination, capacity: usize) -> Self {
        Self {
            broker: broker.into(),
            destination,
            state: RwLock::new(ListenerState {
                connected: false,
                received: BoundedHistory::new(capacity),
                sent: BoundedHistory::new(capacity),
                errors: BoundedHistory::new(capacity),
                pending: HashMap::new(),
            }),
        }
    }

    /// Destination this listener's connection is scoped to
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Whether the connection currently reports established
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    /// Snapshot of received messages, oldest first
    #[must_use]
    pub fn received(&self) -> Vec<Message> {
        self.state.read().received.snapshot()
    }

    /// Number of messages currently in the received history
    #[must_use]
    pub fn received_count(&self) -> usize {
        self.state.read().received.len()
    }

    /// Snapshot of acknowledged sent messages, in acknowledgment order
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.state.read().sent.snapshot()
    }

    /// Snapshot of broker error frames, oldest first
    #[must_use]
    pub fn errors(&self) -> Vec<Message> {
        self.state.read().errors.snapshot()
    }

    /// Snapshot of sends still awaiting acknowledgment, keyed by token
    #[must_use]
    pub fn pending_receipts(&self) -> HashMap<String, Message> {
        self.state.read().pending.clone()
    }

    /// Number of sends still awaiting acknowledgment
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.read().pending.len()
    }

    /// Connection attempt has started; informational only
    pub fn on_connecting(&self) {
        debug!(broker = %self.broker, destination = %self.destination, "connecting");
    }

    /// Connection reported established
    pub fn on_connected(&self) {
        self.state.write().connected = true;
        debug!(broker = %self.broker, destination = %self.destination, "connected");
    }

    /// Connection reported lost or closed
    pub fn on_disconnected(&self) {
        self.state.write().connected = false;
        debug!(broker = %self.broker, destination = %self.destination, "disconnected");
    }

    /// A message arrived on the subscribed destination
    pub fn on_message(&self, message: Message) {
        self.state.write().received.append(message);
        debug!(broker = %self.broker, destination = %self.destination, "message received");
    }

    /// The client dispatched a send.
    ///
    /// A send carrying a receipt request is parked in the pending table under
    /// its correlation token until the broker acknowledges it; a send without
    /// one counts as sent right away.
    pub fn on_send_dispatched(&self, message: Message) {
        match message.receipt_request() {
            Some(token) => {
                let token = token.to_string();
                debug!(
                    broker = %self.broker,
                    destination = %self.destination,
                    token = %token,
                    "send awaiting receipt"
                );
                self.state.write().pending.insert(token, message);
            },
            None => {
                self.state.write().sent.append(message);
                debug!(broker = %self.broker, destination = %self.destination, "send dispatched");
            },
        }
    }

    /// The broker acknowledged a send.
    ///
    /// Moves the matching pending entry into sent history. A receipt with an
    /// unknown or absent token is ignored; the send was either never tracked
    /// or already resolved.
    pub fn on_receipt(&self, receipt: Message) {
        let Some(token) = receipt.receipt_id() else {
            debug!(broker = %self.broker, destination = %self.destination, "receipt without token");
            return;
        };
        let mut state = self.state.write();
        match state.pending.remove(token) {
            Some(message) => {
                state.sent.append(message);
                debug!(
                    broker = %self.broker,
                    destination = %self.destination,
                    token = %token,
                    "send acknowledged"
                );
            },
            None => {
                debug!(
                    broker = %self.broker,
                    destination = %self.destination,
                    token = %token,
                    "receipt for unknown token ignored"
                );
            },
        }
    }

    /// The broker reported an error frame.
    ///
    /// The frame is recorded in the error history for later inspection, and
    /// the failure is returned to the invoking delivery task so it is not
    /// silently swallowed. In-flight waits are not interrupted; they observe
    /// the recorded frame through [`Self::errors`].
    ///
    /// # Errors
    /// Always returns [`Error::ProtocolError`] describing the frame.
    pub fn on_error_frame(&self, frame: Message) -> Result<()> {
        let detail = frame
            .header("message")
            .map(str::to_string)
            .unwrap_or_else(|| String::from_utf8_lossy(frame.body()).into_owned());
        warn!(
            broker = %self.broker,
            destination = %self.destination,
            detail = %detail,
            "broker error frame"
        );
        self.state.write().errors.append(frame);
        Err(Error::protocol(&self.broker, &self.destination, detail))
    }
}
