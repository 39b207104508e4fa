use crate::wire::curl_client::ConnectionId;
use derive_more::From;

/// Failure reported by the transport engine itself.
///
/// Carries the engine's numeric code and its human readable description so
/// both can be surfaced on a connection's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::error::Error for EngineError {}

impl core::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine error {}: {}", self.code, self.message)
    }
}

#[cfg(feature = "engine-curl")]
impl From<curl::Error> for EngineError {
    fn from(err: curl::Error) -> Self {
        let message = match err.extra_description() {
            Some(extra) => format!("{}: {extra}", err.description()),
            None => err.description().to_string(),
        };
        Self::new(i32::try_from(err.code()).unwrap_or(i32::MAX), message)
    }
}

#[cfg(feature = "engine-curl")]
impl From<curl::MultiError> for EngineError {
    fn from(err: curl::MultiError) -> Self {
        Self::new(err.code(), err.description().to_string())
    }
}

/// HTTP client errors.
///
/// These never cross the id-addressed surface of `HttpClient`: they are
/// logged and folded into `false`/zero/empty sentinels there, and only
/// returned as-is from the `try_*` operations.
#[derive(From, Debug)]
pub enum HttpClientError {
    /// No connection is registered under the id.
    #[from(ignore)]
    UnknownConnection(ConnectionId),

    /// The connection is not Idle, so it cannot accept a new request.
    #[from(ignore)]
    InvalidState(ConnectionId),

    /// Method string is none of GET, POST, PUT, DELETE, HEAD.
    #[from(ignore)]
    UnsupportedMethod(String),

    /// The active pin profile holds a key that is not valid UTF-8.
    #[from(ignore)]
    InvalidPin(String),

    /// The engine failed to create a transfer handle.
    #[from(ignore)]
    HandleCreation(EngineError),

    /// The engine refused to register a created handle.
    #[from(ignore)]
    EngineRegistration(EngineError),

    /// Any other engine failure.
    #[from]
    Engine(EngineError),
}

impl std::error::Error for HttpClientError {}

impl core::fmt::Display for HttpClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownConnection(id) => write!(f, "Unknown connection: {id}"),
            Self::InvalidState(id) => {
                write!(f, "Connection {id} is not idle and cannot send a request")
            }
            Self::UnsupportedMethod(method) => write!(
                f,
                "Unsupported method: {method} (only GET, POST, PUT, DELETE and HEAD are supported)"
            ),
            Self::InvalidPin(profile) => {
                write!(f, "Pinned key for profile {profile} is not valid UTF-8")
            }
            Self::HandleCreation(err) => write!(f, "Failed to create transfer handle: {err}"),
            Self::EngineRegistration(err) => {
                write!(f, "Failed to register transfer handle: {err}")
            }
            Self::Engine(err) => write!(f, "Transport engine error: {err}"),
        }
    }
}
