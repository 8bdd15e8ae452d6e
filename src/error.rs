use thiserror::Error;

/// Errors surfaced by the XMPP session manager.
///
/// These are the two kinds that escalate to the [`Supervisor`](crate::Supervisor):
/// [`Error::Credentials`] (authentication failure) and exhaustion of the
/// reconnect budget, which the session reports as [`Error::MaxReconnectsReached`].
/// Everything else is self-healing and triggers a reconnect instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("the configuration is invalid: {0}")]
    Configuration(tokio_xmpp::Error),
    #[error("the credentials were refused: {0}")]
    Credentials(tokio_xmpp::Error),
    #[error("a network error occurred: {0}")]
    Network(tokio_xmpp::Error),
    #[error("an XMPP parse error occurred: {0}")]
    XmppParseError(#[from] xmpp_parsers::Error),
    #[error("the XMPP stream ended")]
    StreamEnded,
    #[error("authentication failure")]
    AuthenticationFailure,
    #[error("Maximum reconnection attempts reached")]
    MaxReconnectsReached,
}

impl From<tokio_xmpp::Error> for Error {
    fn from(e: tokio_xmpp::Error) -> Self {
        Self::Network(e)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a product failed to parse (see `Product Model & Parser Interface`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing product id")]
    MissingProductId,
    #[error("malformed NOAAPort framing")]
    MalformedFraming,
    #[error("parser rejected the product: {0}")]
    Rejected(String),
}

impl ParseError {
    /// The stable label counted under `processing_errors` / `message.failed`.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::MissingProductId => "missing_product_id",
            ParseError::MalformedFraming => "malformed_framing",
            ParseError::Rejected(_) => "parse_error",
        }
    }
}

/// Why a sink failed to publish or start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("backend error: {0}")]
    Backend(String),
}
