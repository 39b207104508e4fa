//! Response state accumulated on a connection.

use std::time::Duration;

/// Final result of a transfer.
///
/// All fields stay zero/empty while the request is in flight. Completion
/// sets either `code` (success) or `error_code` plus `error` (failure).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Final HTTP status code, 0 until the transfer succeeds.
    pub code: i32,
    /// Transport-level error code, 0 when none.
    pub error_code: i32,
    pub error: String,
    pub connect_time: Duration,
    pub total_time: Duration,
    /// Downloaded bytes.
    pub download_size: f64,
    /// Average download speed in bytes per second.
    pub download_speed: f64,
}

impl Response {
    #[must_use]
    pub fn error_kind(&self) -> TransportErrorKind {
        TransportErrorKind::from_code(self.error_code)
    }
}

/// Every field readable through the id-addressed accessors, in one value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSnapshot {
    pub code: i32,
    pub error_code: i32,
    pub error: String,
    pub headers: Vec<u8>,
    pub body: Vec<u8>,
    pub connect_time: Duration,
    pub total_time: Duration,
    pub download_size: f64,
    pub download_speed: f64,
    pub finished: bool,
}

impl ResponseSnapshot {
    #[must_use]
    pub fn headers_text(&self) -> String {
        String::from_utf8_lossy(&self.headers).into_owned()
    }

    #[must_use]
    pub fn error_kind(&self) -> TransportErrorKind {
        TransportErrorKind::from_code(self.error_code)
    }
}

/// Error code recorded when a transfer completes cleanly but never received
/// a status line, so the connection still reads as finished.
pub const NO_STATUS_CODE: i32 = -1;

/// Coarse classification of libcurl result codes for hosts that map
/// transport failures onto their own status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    None,
    BadRequest,
    ConnectionFailed,
    Ssl,
    Timeout,
    Cancelled,
    Unknown(i32),
}

impl TransportErrorKind {
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::None,
            // unsupported protocol, failed init, malformed url
            1..=3 => Self::BadRequest,
            // resolve proxy/host, connect, access denied, http error,
            // redirects, got nothing, send/recv, disk full, file exists,
            // ssl connect, peer verification
            5..=7 | 9 | 22 | 35 | 47 | 51 | 52 | 55 | 56 | 70 | 73 => Self::ConnectionFailed,
            // engine not found/set/init, cert problem, cipher, ca cert,
            // use ssl failed, pinned key mismatch
            53 | 54 | 58..=60 | 64 | 66 | 90 => Self::Ssl,
            28 => Self::Timeout,
            42 => Self::Cancelled,
            other => Self::Unknown(other),
        }
    }
}
