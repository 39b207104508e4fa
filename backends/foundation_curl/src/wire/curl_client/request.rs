//! Request descriptors and the transfer plan handed to the engine.
//!
//! WHY: The caller's buffers are not guaranteed to outlive an asynchronous
//! transfer, and the boundary speaks in strings and integers.
//!
//! WHAT: `RequestDescriptor` mirrors the boundary struct, `Request` is the
//! owned and typed snapshot kept on the connection, and `TransferPlan` is
//! everything an engine needs to build a transport handle.
//!
//! HOW: Method strings are parsed once into `Method`; the plan resolves URL
//! concatenation, timeouts, proxy, pinning and header lines up front so
//! engines only translate fields into options.

use crate::config::{ClientConfig, TlsVerification};
use crate::wire::curl_client::{CertificateProvider, ConnectionId, HttpClientError};
use std::str::FromStr;
use std::time::Duration;

/// The verbs the transport is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }

    /// Parses a method string, falling back to GET for anything unsupported.
    ///
    /// The fallback is a caller programming error, so it is logged loudly.
    #[must_use]
    pub fn parse_or_get(value: &str) -> Self {
        value.parse().unwrap_or_else(|err| {
            tracing::error!("{}, falling back to GET", err);
            Method::Get
        })
    }
}

impl FromStr for Method {
    type Err = HttpClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            other => Err(HttpClientError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl core::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request parameters as they arrive from the plugin boundary.
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    pub id: i32,
    pub url: String,
    pub query: String,
    pub method: String,
    pub timeout_seconds: i32,
    pub activity_timeout_seconds: i32,
    pub proxy: Option<String>,
    /// Newline-delimited `Key: Value` lines.
    pub headers: String,
    pub body: Vec<u8>,
    pub body_length: i32,
}

impl RequestDescriptor {
    /// Converts the boundary descriptor into an owned `Request`.
    ///
    /// With `strict_methods` an unsupported method is an error; otherwise
    /// it becomes GET. The body is cut to `body_length`.
    ///
    /// # Errors
    ///
    /// Returns `HttpClientError::UnsupportedMethod` in strict mode.
    pub fn into_request(self, strict_methods: bool) -> Result<Request, HttpClientError> {
        let method = if strict_methods {
            self.method.parse()?
        } else {
            Method::parse_or_get(&self.method)
        };

        let body_length = usize::try_from(self.body_length).unwrap_or(0);
        let mut body = self.body;
        body.truncate(body_length);

        Ok(Request {
            id: ConnectionId::from(self.id),
            url: self.url,
            query: self.query,
            method,
            timeout: seconds(self.timeout_seconds),
            activity_timeout: seconds(self.activity_timeout_seconds),
            proxy: self.proxy.filter(|proxy| !proxy.is_empty()),
            headers: self.headers,
            body,
        })
    }
}

fn seconds(value: i32) -> Duration {
    Duration::from_secs(u64::try_from(value).unwrap_or(0))
}

/// Owned snapshot of a request, kept on its connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub id: ConnectionId,
    pub url: String,
    pub query: String,
    pub method: Method,
    /// Total transfer timeout; zero disables both timeouts.
    pub timeout: Duration,
    /// Connect timeout, only applied alongside a non-zero `timeout`.
    pub activity_timeout: Duration,
    pub proxy: Option<String>,
    pub headers: String,
    pub body: Vec<u8>,
}

impl Request {
    #[must_use]
    pub fn new(id: ConnectionId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeout: Duration, activity_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.activity_timeout = activity_timeout;
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        let proxy = proxy.into();
        self.proxy = if proxy.is_empty() { None } else { Some(proxy) };
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: impl Into<String>) -> Self {
        self.headers = headers.into();
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// `url`, followed by `?query` when a query is present.
    #[must_use]
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            self.url.clone()
        } else {
            format!("{}?{}", self.url, self.query)
        }
    }
}

/// Splits a newline-delimited header blob into header lines.
///
/// Trailing `\r` is trimmed and blank lines are skipped.
#[must_use]
pub fn split_header_lines(headers: &str) -> Vec<String> {
    headers
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Peer and host verification plus pin for one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsPlan {
    pub verify_peer: bool,
    pub verify_host: bool,
    pub pinned_key: Option<String>,
}

/// Everything an engine needs to configure one transport handle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransferPlan {
    pub url: String,
    pub method: Method,
    pub connect_timeout: Option<Duration>,
    pub timeout: Option<Duration>,
    pub proxy: Option<String>,
    pub tls: TlsPlan,
    pub body: Option<Vec<u8>>,
    pub headers: Vec<String>,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    /// Request HTTP/2 and wait for a multiplexed pipe.
    pub http2: bool,
    pub verbose: bool,
}

impl TransferPlan {
    /// Resolves a request against the client's configuration and pins.
    ///
    /// # Errors
    ///
    /// Returns `HttpClientError::InvalidPin` if the active pin is not UTF-8.
    pub fn build(
        request: &Request,
        certificate: &CertificateProvider,
        config: &ClientConfig,
    ) -> Result<Self, HttpClientError> {
        let (connect_timeout, timeout) = if request.timeout.is_zero() {
            (None, None)
        } else {
            (Some(request.activity_timeout), Some(request.timeout))
        };

        Ok(Self {
            url: request.full_url(),
            method: request.method,
            connect_timeout,
            timeout,
            proxy: request.proxy.clone().filter(|proxy| !proxy.is_empty()),
            tls: Self::tls_plan(certificate, config.tls_verification)?,
            body: if request.body.is_empty() {
                None
            } else {
                Some(request.body.clone())
            },
            headers: split_header_lines(&request.headers),
            follow_redirects: config.follow_redirects,
            max_redirects: config.max_redirects,
            http2: config.http2,
            verbose: config.verbose,
        })
    }

    fn tls_plan(
        certificate: &CertificateProvider,
        policy: TlsVerification,
    ) -> Result<TlsPlan, HttpClientError> {
        if policy == TlsVerification::Disabled {
            return Ok(TlsPlan::default());
        }

        let pinned_key = match certificate.pinned_key() {
            Some(key) => Some(
                String::from_utf8(key)
                    .map_err(|_| HttpClientError::InvalidPin(certificate.active().to_string()))?,
            ),
            None => None,
        };

        let verify = pinned_key.is_some() || policy == TlsVerification::Always;
        Ok(TlsPlan {
            verify_peer: verify,
            verify_host: verify,
            pinned_key,
        })
    }
}
