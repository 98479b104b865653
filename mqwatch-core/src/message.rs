//! Message value type exchanged with brokers.

use bytes::Bytes;

use crate::types::{Headers, RECEIPT_HEADER, RECEIPT_ID_HEADER};

/// A message as observed by the engine: opaque headers plus an opaque body.
///
/// Messages are immutable after construction and carry no identity beyond
/// their content; scenario code correlates them through headers of its own
/// choosing. The engine itself reads only the receipt-correlation headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    headers: Headers,
    body: Bytes,
}

impl Message {
    /// Create a new message from headers and a body payload
    pub fn new(headers: Headers, body: impl Into<Bytes>) -> Self {
        Self { headers, body: body.into() }
    }

    /// All headers of the message
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Body payload of the message
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Look up a single header value
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Correlation token of a requested acknowledgment, if the sender asked
    /// for one
    #[must_use]
    pub fn receipt_request(&self) -> Option<&str> {
        self.header(RECEIPT_HEADER)
    }

    /// Correlation token carried by a broker receipt frame
    #[must_use]
    pub fn receipt_id(&self) -> Option<&str> {
        self.header(RECEIPT_ID_HEADER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_of(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn header_lookup() {
        let message = Message::new(headers_of(&[("probe.id", "abc-1")]), "payload");
        assert_eq!(message.header("probe.id"), Some("abc-1"));
        assert_eq!(message.header("missing"), None);
        assert_eq!(message.body(), &Bytes::from("payload"));
    }

    #[test]
    fn receipt_request_reads_the_receipt_header() {
        let message = Message::new(headers_of(&[(RECEIPT_HEADER, "token-7")]), "");
        assert_eq!(message.receipt_request(), Some("token-7"));
        assert_eq!(message.receipt_id(), None);
    }

    #[test]
    fn receipt_id_reads_the_acknowledgment_header() {
        let frame = Message::new(headers_of(&[(RECEIPT_ID_HEADER, "token-7")]), "");
        assert_eq!(frame.receipt_id(), Some("token-7"));
        assert_eq!(frame.receipt_request(), None);
    }
}
