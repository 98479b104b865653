//! Header conventions shared by the probes.
//!
//! Probe messages are identified and filtered purely through headers so
//! that unrelated traffic on a shared destination never pollutes a
//! measurement. The engine treats all of these as opaque strings.

pub use mqwatch_core::{RECEIPT_HEADER, RECEIPT_ID_HEADER};

/// Correlation token identifying one probe message.
pub const PROBE_ID: &str = "probe.id";

/// Name of the sending probe instance.
pub const PROBE_SENDER: &str = "probe.sender";

/// Identity of the monitoring server the probe runs for.
pub const PROBE_SERVER: &str = "probe.server";

/// Send time as fractional epoch seconds.
pub const PROBE_SENT_AT: &str = "probe.sent-at";

/// Broker-honored expiry as epoch milliseconds.
pub const EXPIRES: &str = "expires";

/// Broker persistence flag; probes send durable messages so restarts do
/// not eat them.
pub const PERSISTENT: &str = "persistent";
