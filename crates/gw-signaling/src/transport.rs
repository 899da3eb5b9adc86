//! The signaling stack boundary (§6.3): a minimal trait a real SIP-style
//! UDP transport (or a test double) implements.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;

/// One signaling request the user agent wants to send, or has received.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request method, e.g. `"INVITE"`, `"BYE"`, `"REGISTER"`.
    pub method: String,
    /// Target address-of-record.
    pub to_uri: String,
    /// The session description body, if any (offered or answered
    /// codecs, connection address for hold).
    pub body: Option<String>,
}

/// One signaling response, or an indication delivered asynchronously
/// (a provisional, a final answer, or an incoming request).
#[derive(Debug, Clone)]
pub enum Transaction {
    /// A provisional response (SIP 1xx), e.g. "180 Ringing".
    Provisional {
        /// Numeric status code.
        code: u16,
    },
    /// A final response.
    Final {
        /// Numeric status code.
        code: u16,
        /// Reason phrase.
        reason: String,
        /// The peer's session description, on a successful answer.
        body: Option<String>,
    },
    /// An incoming request from the peer (e.g. a fresh INVITE, a BYE, a
    /// re-INVITE for hold).
    Incoming {
        /// Request method.
        method: String,
        /// Originating address-of-record.
        from_uri: String,
        /// Body, if any.
        body: Option<String>,
    },
}

/// The signaling transport boundary a [`crate::agent::UserAgent`] is
/// built over (§6.3): "A signaling stack providing: bind, unbind,
/// createRequest, sendRequest, sendResponse, and a recv iterator over
/// incoming transactions."
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Bind a signaling address, authenticating with `password` if
    /// non-empty. Returns the server-granted binding expiry in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistrationRejected`] if the binding is refused.
    async fn bind(&self, address: &str, password: &str, expiry: u32) -> Result<u32, Error>;

    /// Release a previously bound address.
    async fn unbind(&self, address: &str);

    /// Send a request, returning a channel of every transaction update
    /// for it: zero or more [`Transaction::Provisional`] followed by
    /// exactly one [`Transaction::Final`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on a transport-level failure.
    async fn send_request(&self, request: Request) -> Result<mpsc::Receiver<Transaction>, Error>;

    /// Send a response to an incoming request identified by `to_uri`
    /// (the requester) and `method` (the request being answered).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on a transport-level failure.
    async fn send_response(&self, to_uri: &str, method: &str, code: u16, reason: &str, body: Option<String>) -> Result<(), Error>;

    /// Receive the next incoming transaction (a fresh request from a
    /// peer not tied to a request this agent sent).
    async fn recv(&self) -> Option<Transaction>;
}
