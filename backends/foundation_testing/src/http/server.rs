//! Test HTTP server implementation.
//!
//! WHY: Lets integration tests observe exactly what a client put on the wire
//! and control exactly what comes back.
//!
//! WHAT: `TestHttpServer` listens on localhost, parses each request into an
//! `HttpRequest`, records it, and writes the handler's `HttpResponse`.
//!
//! HOW: A non-blocking accept loop on a background thread, one thread per
//! connection, one request per connection (`Connection: close`). Chunked
//! uploads and `Expect: 100-continue` are honoured so streaming clients can
//! be tested.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

type ResponseHandler = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// A parsed request as received by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target including any query, e.g. `/items?page=2`.
    pub path: String,
    /// Header pairs in arrival order.
    pub headers: Vec<(String, String)>,
    /// Body bytes, read according to `Content-Length` or chunked encoding.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// First header value whose name matches case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Path without the query string.
    #[must_use]
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }

    /// Query string without the leading `?`, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, query)| query)
    }
}

/// Response written back for one request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code (e.g., 200)
    pub status: u16,
    /// Status text (e.g., "OK")
    pub status_text: String,
    /// Extra response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
    /// Pause before writing, for timeout tests.
    pub delay: Option<Duration>,
}

impl HttpResponse {
    /// Create 200 OK response with body.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, "OK")
            .with_header("Content-Type", "text/plain")
            .with_body(body)
    }

    /// Create 302 redirect response.
    #[must_use]
    pub fn redirect(location: &str) -> Self {
        Self::status(302, "Found").with_header("Location", location)
    }

    /// Create custom status response with an empty body.
    #[must_use]
    pub fn status(code: u16, text: &str) -> Self {
        Self {
            status: code,
            status_text: text.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            delay: None,
        }
    }

    /// Adds a response header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Replaces the response body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Delays the response by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn render(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.status_text);
        for (key, value) in &self.headers {
            head.push_str(&format!("{key}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Local HTTP/1.1 server for integration tests.
///
/// Starts on a random localhost port and stops when dropped.
///
/// # Examples
///
/// ```rust
/// use foundation_testing::http::{HttpResponse, TestHttpServer};
///
/// let server = TestHttpServer::with_response(|req| {
///     if req.route() == "/missing" {
///         HttpResponse::status(404, "Not Found")
///     } else {
///         HttpResponse::ok(b"Success")
///     }
/// });
/// assert!(server.base_url().starts_with("http://127.0.0.1:"));
/// ```
pub struct TestHttpServer {
    addr: String,
    running: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestHttpServer {
    /// Start a server answering 200 OK with body `OK` to every request.
    ///
    /// # Panics
    ///
    /// Panics if no localhost port can be bound.
    #[must_use]
    pub fn start() -> Self {
        Self::with_response(|_req| HttpResponse::ok(b"OK"))
    }

    /// Start a server answering through `handler`.
    ///
    /// # Panics
    ///
    /// Panics if no localhost port can be bound.
    #[must_use]
    pub fn with_response<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        let listener =
            TcpListener::bind("127.0.0.1:0").expect("Failed to bind test HTTP server to localhost");
        let addr = format!(
            "http://{}",
            listener.local_addr().expect("bound listener has an address")
        );
        listener
            .set_nonblocking(true)
            .expect("Failed to set non-blocking");

        let running = Arc::new(AtomicBool::new(true));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: ResponseHandler = Arc::new(handler);

        let running_flag = Arc::clone(&running);
        let request_log = Arc::clone(&requests);
        let handle = thread::spawn(move || {
            while running_flag.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        tracing::debug!("TestHttpServer accepted {peer:?}");
                        let handler = Arc::clone(&handler);
                        let request_log = Arc::clone(&request_log);
                        thread::spawn(move || {
                            if let Err(err) = Self::handle_connection(stream, &handler, &request_log)
                            {
                                tracing::debug!("TestHttpServer connection error: {err}");
                            }
                        });
                    }
                    Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(err) => {
                        tracing::debug!("TestHttpServer accept error: {err}");
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            running,
            requests,
            handle: Some(handle),
        }
    }

    /// Full URL for `path` on this server, e.g. `http://127.0.0.1:54321/test`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Base URL without a path.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.addr
    }

    /// Every request parsed so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn handle_connection(
        stream: TcpStream,
        handler: &ResponseHandler,
        request_log: &Mutex<Vec<HttpRequest>>,
    ) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        let Some(request) = Self::read_request(&mut reader, &mut writer)? else {
            return Ok(());
        };
        tracing::debug!("TestHttpServer got {} {}", request.method, request.path);

        let response = handler(&request);
        request_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        if let Some(delay) = response.delay {
            thread::sleep(delay);
        }
        writer.write_all(&response.render())?;
        writer.flush()
    }

    fn read_request(
        reader: &mut impl BufRead,
        writer: &mut impl Write,
    ) -> std::io::Result<Option<HttpRequest>> {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }

        let mut intro = line.split_whitespace();
        let (Some(method), Some(path)) = (intro.next(), intro.next()) else {
            return Ok(None);
        };
        let (method, path) = (method.to_string(), path.to_string());

        let mut headers = Vec::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }
            if let Some((key, value)) = trimmed.split_once(':') {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        let mut request = HttpRequest {
            method,
            path,
            headers,
            body: Vec::new(),
        };

        if request
            .header("Expect")
            .is_some_and(|value| value.eq_ignore_ascii_case("100-continue"))
        {
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
            writer.flush()?;
        }

        let chunked = request
            .header("Transfer-Encoding")
            .is_some_and(|value| value.eq_ignore_ascii_case("chunked"));
        if chunked {
            request.body = Self::read_chunked(reader)?;
            return Ok(Some(request));
        }

        let length = request
            .header("Content-Length")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);
        if length > 0 {
            request.body = vec![0; length];
            reader.read_exact(&mut request.body)?;
        }

        Ok(Some(request))
    }

    fn read_chunked(reader: &mut impl BufRead) -> std::io::Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(body);
            }
            let size_field = line.trim_end_matches(['\r', '\n']);
            let size_field = size_field.split(';').next().unwrap_or_default().trim();
            let size = usize::from_str_radix(size_field, 16).map_err(|err| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
            })?;

            if size == 0 {
                // trailers, up to the blank line
                loop {
                    line.clear();
                    if reader.read_line(&mut line)? == 0 || line.trim_end().is_empty() {
                        return Ok(body);
                    }
                }
            }

            let start = body.len();
            body.resize(start + size, 0);
            reader.read_exact(&mut body[start..])?;
            line.clear();
            reader.read_line(&mut line)?;
        }
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
