//! The id-addressed HTTP client.
//!
//! WHY: Plugin hosts drive networking from a per-frame loop and can only hold
//! integers across the boundary. They need to create connections, send
//! requests and poll results by id without ever receiving an error value or
//! a panic.
//!
//! WHAT: `HttpClient<E>` owns a `ConnectionRegistry`, a `CertificateProvider`
//! and a `TransportEngine`. Connections move Idle -> InFlight -> Finished;
//! the last transition only ever happens inside `update`.
//!
//! HOW: All state sits behind one mutex so the per-frame caller and the
//! pause-drain worker can both call `update`. Fallible operations have a
//! `try_*` form returning `HttpClientError`; the plain forms log and fold
//! failures into `false`, zero or empty values.

use crate::config::{ClientConfig, ConfigResult};
use crate::wire::curl_client::exchange::copy_prefix;
use crate::wire::curl_client::{
    CertificateProvider, Connection, ConnectionId, ConnectionRegistry, HttpClientError, IdSign,
    Request, RequestDescriptor, Response, ResponseSnapshot, TransferPlan, TransportEngine,
    TransportErrorKind, NO_STATUS_CODE,
};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct ClientState<E> {
    engine: E,
    registry: ConnectionRegistry,
    certificate: CertificateProvider,
    config: ClientConfig,
    running: u32,
}

/// Polled, id-addressed HTTP client over a `TransportEngine`.
///
/// # Type Parameters
///
/// * `E` - the transport, `CurlEngine` in production and
///   `MockTransportEngine` in tests.
#[derive(Debug)]
pub struct HttpClient<E: TransportEngine> {
    state: Mutex<ClientState<E>>,
}

impl<E: TransportEngine> HttpClient<E> {
    /// Creates a client, loading pin profiles from `config`.
    ///
    /// The multiplexed variant (`config.http2`) allocates negative ids.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPinEncoding` if a pin entry is malformed.
    pub fn new(engine: E, config: ClientConfig) -> ConfigResult<Self> {
        let certificate = CertificateProvider::from_entries(&config.pins)?;
        Ok(Self::with_certificate(engine, config, certificate))
    }

    /// Creates a client with an already built certificate provider.
    pub fn with_certificate(
        mut engine: E,
        config: ClientConfig,
        mut certificate: CertificateProvider,
    ) -> Self {
        if let Some(profile) = &config.pin_profile {
            certificate.set_config(profile);
        }
        engine.set_verbose(config.verbose);

        let sign = if config.http2 {
            IdSign::Negative
        } else {
            IdSign::Positive
        };

        tracing::info!(
            "Created http client (engine: {}, http2: {})",
            engine.version(),
            config.http2
        );

        Self {
            state: Mutex::new(ClientState {
                engine,
                registry: ConnectionRegistry::new(sign),
                certificate,
                config,
                running: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClientState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, id: ConnectionId, f: impl FnOnce(&Connection) -> T) -> T {
        let state = self.lock();
        f(state.registry.get(id))
    }

    /// Allocates a new, idle connection.
    pub fn create_connection(&self) -> ConnectionId {
        self.lock().registry.create()
    }

    /// Removes a connection, cancelling its transfer if still in flight.
    ///
    /// Returns false when `id` is not registered.
    pub fn destroy_connection(&self, id: ConnectionId) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(handle) = state.registry.get(id).handle() else {
            return state.registry.remove(id);
        };

        tracing::debug!("Cancelling in-flight request on connection {}", id);
        if let Err(err) = state.engine.remove_handle(handle) {
            tracing::warn!("Failed to detach handle {} of {}: {}", handle, id, err);
        }
        state.engine.cleanup_handle(handle);
        state.running = state.running.saturating_sub(1);
        state.registry.remove(id)
    }

    /// Dispatches `request` on the connection named by `request.id`.
    ///
    /// # Errors
    ///
    /// - `UnknownConnection` / `InvalidState` when the connection does not
    ///   exist or is not Idle; the connection is left untouched.
    /// - `InvalidPin`, `HandleCreation`, `EngineRegistration` for setup
    ///   failures; the message is recorded on the connection's error field
    ///   and the connection stays Idle.
    pub fn try_send(&self, request: &Request) -> Result<(), HttpClientError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let id = request.id;

        let connection = state
            .registry
            .get_mut(id)
            .ok_or(HttpClientError::UnknownConnection(id))?;
        if connection.is_active() || connection.is_finished() {
            return Err(HttpClientError::InvalidState(id));
        }

        connection.response = Response::default();
        connection.exchange.reset_response();
        connection.exchange.set_streaming(state.config.http2);

        let dispatched = TransferPlan::build(request, &state.certificate, &state.config)
            .and_then(|plan| {
                let handle = state
                    .engine
                    .create_handle(&plan, connection.exchange.clone())
                    .map_err(HttpClientError::HandleCreation)?;

                if let Err(err) = state.engine.add_handle(handle, id) {
                    state.engine.cleanup_handle(handle);
                    return Err(HttpClientError::EngineRegistration(err));
                }
                Ok(handle)
            });

        match dispatched {
            Ok(handle) => {
                connection.handle = Some(handle);
                connection.request = Some(request.clone());
                state.running += 1;
                tracing::debug!(
                    "Sent {} {} on connection {} (handle {})",
                    request.method,
                    request.url,
                    id,
                    handle
                );
                Ok(())
            }
            Err(err) => {
                connection.response.error = setup_message(&err);
                Err(err)
            }
        }
    }

    /// Dispatches `request`, returning whether it is now in flight.
    pub fn send(&self, request: &Request) -> bool {
        match self.try_send(request) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("Failed to send request on {}: {}", request.id, err);
                false
            }
        }
    }

    /// Converts a boundary descriptor and dispatches it.
    ///
    /// With `strict_methods` an unsupported method fails the send and is
    /// recorded on the connection's error field.
    ///
    /// # Errors
    ///
    /// Everything `try_send` returns, plus `UnsupportedMethod`.
    pub fn try_send_descriptor(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<(), HttpClientError> {
        let id = ConnectionId::from(descriptor.id);
        let strict = self.lock().config.strict_methods;

        match descriptor.into_request(strict) {
            Ok(request) => self.try_send(&request),
            Err(err) => {
                let mut state = self.lock();
                if let Some(connection) = state.registry.get_mut(id) {
                    if !connection.is_active() && !connection.is_finished() {
                        connection.response.error = err.to_string();
                    }
                }
                Err(err)
            }
        }
    }

    /// Boundary form of `try_send_descriptor`.
    pub fn send_descriptor(&self, descriptor: RequestDescriptor) -> bool {
        let id = descriptor.id;
        match self.try_send_descriptor(descriptor) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("Failed to send request on {}: {}", id, err);
                false
            }
        }
    }

    /// Runs one engine step and settles every completed transfer.
    pub fn update(&self) {
        let mut state = self.lock();
        Self::drive(&mut state);
    }

    /// Polls one connection.
    ///
    /// A connection that is already finished (or unknown) returns true
    /// without touching the engine; otherwise one `update` runs.
    pub fn update_connection(&self, id: ConnectionId) -> bool {
        let mut state = self.lock();
        if state.registry.get(id).is_finished() {
            return true;
        }
        Self::drive(&mut state);
        state.registry.get(id).is_finished()
    }

    fn drive(state: &mut ClientState<E>) {
        let _span = tracing::trace_span!("curl_client.update").entered();

        match state.engine.perform() {
            Ok(running) => state.running = running,
            Err(err) => tracing::error!("{}", HttpClientError::from(err)),
        }

        for completion in state.engine.read_completions() {
            let handle = completion.handle;
            if let Err(err) = state.engine.remove_handle(handle) {
                tracing::warn!("Failed to detach completed handle {}: {}", handle, err);
            }
            let info = state.engine.transfer_info(handle);
            state.engine.cleanup_handle(handle);

            let Some(connection) = state.registry.get_mut(completion.owner) else {
                tracing::warn!(
                    "Dropping completion of handle {} for unknown connection {}",
                    handle,
                    completion.owner
                );
                continue;
            };

            connection.handle = None;
            let response = &mut connection.response;
            match completion.result {
                Ok(()) if info.response_code == 0 => {
                    tracing::warn!(
                        "Connection {} completed without a status code",
                        completion.owner
                    );
                    response.error_code = NO_STATUS_CODE;
                    response.error = "Transfer completed without a status code".to_string();
                }
                Ok(()) => {
                    response.code = info.response_code;
                    tracing::debug!("Connection {} finished with {}", completion.owner, response.code);
                }
                Err(failure) => {
                    tracing::debug!(
                        "Connection {} failed with {}: {}",
                        completion.owner,
                        failure.code,
                        failure.message
                    );
                    response.error_code = failure.code;
                    response.error = failure.message;
                }
            }
            response.connect_time = info.connect_time;
            response.total_time = info.total_time;
            response.download_size = info.download_size;
            response.download_speed = info.download_speed;
        }
    }

    /// Finished means a status code or transport error is recorded. Unknown
    /// and destroyed ids are always finished.
    #[must_use]
    pub fn is_finished(&self, id: ConnectionId) -> bool {
        self.read(id, Connection::is_finished)
    }

    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().registry.contains(id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().registry.len()
    }

    /// The request snapshot stored by the last successful send.
    #[must_use]
    pub fn request(&self, id: ConnectionId) -> Option<Request> {
        self.read(id, |connection| connection.request().cloned())
    }

    #[must_use]
    pub fn response_code(&self, id: ConnectionId) -> i32 {
        self.read(id, |connection| connection.response().code)
    }

    #[must_use]
    pub fn error_code(&self, id: ConnectionId) -> i32 {
        self.read(id, |connection| connection.response().error_code)
    }

    #[must_use]
    pub fn error_kind(&self, id: ConnectionId) -> TransportErrorKind {
        self.read(id, |connection| connection.response().error_kind())
    }

    #[must_use]
    pub fn error(&self, id: ConnectionId) -> String {
        self.read(id, |connection| connection.response().error.clone())
    }

    #[must_use]
    pub fn error_len(&self, id: ConnectionId) -> usize {
        self.read(id, |connection| connection.response().error.len())
    }

    /// Copies the error message into `buffer`, returning the bytes copied.
    pub fn copy_error_into(&self, id: ConnectionId, buffer: &mut [u8]) -> usize {
        self.read(id, |connection| {
            copy_prefix(connection.response().error.as_bytes(), buffer)
        })
    }

    /// Raw response headers, lossily decoded.
    #[must_use]
    pub fn headers(&self, id: ConnectionId) -> String {
        let raw = self.read(id, |connection| connection.exchange().headers());
        String::from_utf8_lossy(&raw).into_owned()
    }

    #[must_use]
    pub fn headers_len(&self, id: ConnectionId) -> usize {
        self.read(id, |connection| connection.exchange().headers_len())
    }

    pub fn copy_headers_into(&self, id: ConnectionId, buffer: &mut [u8]) -> usize {
        self.read(id, |connection| connection.exchange().copy_headers_into(buffer))
    }

    #[must_use]
    pub fn body(&self, id: ConnectionId) -> Vec<u8> {
        self.read(id, |connection| connection.exchange().body())
    }

    #[must_use]
    pub fn body_len(&self, id: ConnectionId) -> usize {
        self.read(id, |connection| connection.exchange().body_len())
    }

    pub fn copy_body_into(&self, id: ConnectionId, buffer: &mut [u8]) -> usize {
        self.read(id, |connection| connection.exchange().copy_body_into(buffer))
    }

    /// Connect time in seconds.
    #[must_use]
    pub fn connect_time(&self, id: ConnectionId) -> f64 {
        self.read(id, |connection| connection.response().connect_time.as_secs_f64())
    }

    /// Total transfer time in seconds.
    #[must_use]
    pub fn total_time(&self, id: ConnectionId) -> f64 {
        self.read(id, |connection| connection.response().total_time.as_secs_f64())
    }

    #[must_use]
    pub fn download_size(&self, id: ConnectionId) -> f64 {
        self.read(id, |connection| connection.response().download_size)
    }

    #[must_use]
    pub fn download_speed(&self, id: ConnectionId) -> f64 {
        self.read(id, |connection| connection.response().download_speed)
    }

    /// Every response field of `id` in one read.
    #[must_use]
    pub fn snapshot(&self, id: ConnectionId) -> ResponseSnapshot {
        self.read(id, |connection| {
            let response = connection.response();
            ResponseSnapshot {
                code: response.code,
                error_code: response.error_code,
                error: response.error.clone(),
                headers: connection.exchange().headers(),
                body: connection.exchange().body(),
                connect_time: response.connect_time,
                total_time: response.total_time,
                download_size: response.download_size,
                download_speed: response.download_speed,
                finished: connection.is_finished(),
            }
        })
    }

    /// Queues an outbound duplex message.
    ///
    /// When the queue was empty the engine's read side is resumed, exactly
    /// once until the queue drains again. Returns false for unknown ids.
    pub fn send_stream_message(&self, id: ConnectionId, data: &[u8]) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        let connection = state.registry.get(id);
        if !connection.is_valid() {
            tracing::warn!("Stream message for unknown connection {}", id);
            return false;
        }
        if connection.exchange().is_outbound_closed() {
            tracing::warn!("Stream message after outbound close on {}", id);
            return false;
        }
        if data.is_empty() {
            return true;
        }

        let was_empty = connection.exchange().queue_outbound(data);
        if let (true, Some(handle)) = (was_empty, connection.handle()) {
            tracing::trace!("Resuming read side of {} for {}", handle, id);
            if let Err(err) = state.engine.resume_read(handle) {
                tracing::warn!("Failed to resume handle {} of {}: {}", handle, id, err);
            }
        }
        true
    }

    /// Ends the outbound duplex stream once queued messages have been sent.
    ///
    /// Later `send_stream_message` calls return false. Returns false for
    /// unknown ids.
    pub fn finish_stream_message(&self, id: ConnectionId) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        let connection = state.registry.get(id);
        if !connection.is_valid() {
            tracing::warn!("Stream close for unknown connection {}", id);
            return false;
        }

        let was_empty = connection.exchange().close_outbound();
        if let (true, Some(handle)) = (was_empty, connection.handle()) {
            tracing::trace!("Resuming read side of {} to end {}", handle, id);
            if let Err(err) = state.engine.resume_read(handle) {
                tracing::warn!("Failed to resume handle {} of {}: {}", handle, id, err);
            }
        }
        true
    }

    /// Bytes waiting in the inbound stream accumulator.
    #[must_use]
    pub fn stream_message_len(&self, id: ConnectionId) -> usize {
        self.read(id, |connection| connection.exchange().incoming_len())
    }

    /// Moves up to `buffer.len()` inbound stream bytes into `buffer`.
    ///
    /// Bytes that do not fit stay queued for the next call.
    pub fn take_stream_message(&self, id: ConnectionId, buffer: &mut [u8]) -> usize {
        self.read(id, |connection| connection.exchange().take_incoming_into(buffer))
    }

    /// Takes the whole inbound stream accumulator.
    #[must_use]
    pub fn take_stream_messages(&self, id: ConnectionId) -> Vec<u8> {
        self.read(id, |connection| connection.exchange().take_incoming())
    }

    /// Selects the named pin profile for subsequent sends.
    pub fn set_config(&self, name: &str) {
        self.lock().certificate.set_config(name);
    }

    pub fn set_verbose(&self, enabled: bool) {
        let mut state = self.lock();
        state.config.verbose = enabled;
        state.engine.set_verbose(enabled);
    }

    #[must_use]
    pub fn version_info(&self) -> String {
        self.lock().engine.version()
    }

    /// Whether the engine reported transfers still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().running > 0
    }

    #[must_use]
    pub fn running_requests(&self) -> u32 {
        self.lock().running
    }

    /// Cadence of the pause-drain worker for this client.
    #[must_use]
    pub fn pause_poll_interval(&self) -> std::time::Duration {
        self.lock().config.pause_poll_interval()
    }
}

fn setup_message(err: &HttpClientError) -> String {
    match err {
        HttpClientError::HandleCreation(engine) | HttpClientError::EngineRegistration(engine) => {
            engine.message.clone()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::curl_client::{EngineError, Method, MockTransportEngine};

    fn client() -> (HttpClient<MockTransportEngine>, MockTransportEngine) {
        let engine = MockTransportEngine::new();
        let client = HttpClient::new(engine.clone(), ClientConfig::default()).unwrap();
        (client, engine)
    }

    /// WHY: Sending attaches a handle and counts it as running
    /// WHAT: A successful send is in flight and not finished
    #[test]
    fn test_send_moves_to_in_flight() {
        let (client, engine) = client();
        let id = client.create_connection();

        assert!(client.send(&Request::new(id, "http://example.com")));
        assert!(!client.is_finished(id));
        assert!(client.is_running());
        assert_eq!(engine.attached_handles(), 1);
        assert_eq!(client.request(id).map(|r| r.method), Some(Method::Get));
    }

    /// WHY: A connection may only carry one request
    /// WHAT: A second send while in flight fails with InvalidState
    #[test]
    fn test_second_send_is_rejected() {
        let (client, engine) = client();
        let id = client.create_connection();
        client.send(&Request::new(id, "http://example.com"));

        let err = client
            .try_send(&Request::new(id, "http://example.com"))
            .unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidState(found) if found == id));
        assert_eq!(engine.calls().create, 1);
    }

    /// WHY: Sends against unknown ids must fail without touching the engine
    /// WHAT: try_send returns UnknownConnection
    #[test]
    fn test_send_unknown_connection() {
        let (client, engine) = client();
        let err = client
            .try_send(&Request::new(ConnectionId::from(99), "http://example.com"))
            .unwrap_err();
        assert!(matches!(err, HttpClientError::UnknownConnection(_)));
        assert_eq!(engine.calls().create, 0);
    }

    /// WHY: A failed handle creation leaves nothing to poll
    /// WHAT: send returns false and the connection stays idle
    #[test]
    fn test_handle_creation_failure() {
        let (client, engine) = client();
        let id = client.create_connection();
        engine.fail_next_create(EngineError::new(2, "out of handles"));

        assert!(!client.send(&Request::new(id, "http://example.com")));
        assert!(!client.is_running());
        assert!(!client.is_finished(id));
        assert_eq!(client.error(id), "out of handles");
        assert_eq!(engine.live_handles(), 0);
    }

    /// WHY: Completions settle response fields exactly once
    /// WHAT: A scripted 204 becomes the status code with telemetry copied
    #[test]
    fn test_update_settles_success() {
        let (client, engine) = client();
        let id = client.create_connection();
        client.send(&Request::new(id, "http://example.com"));
        engine.respond_with(id, 204, b"HTTP/1.1 204 No Content\r\n\r\n", b"");

        assert!(client.update_connection(id));
        assert_eq!(client.response_code(id), 204);
        assert_eq!(client.error_code(id), 0);
        assert!(client.total_time(id) > 0.0);
        assert!(client.headers(id).starts_with("HTTP/1.1 204"));
        assert_eq!(engine.live_handles(), 0);
        assert!(!client.is_running());
    }

    /// WHY: A clean completion with no status line must still settle, or the
    /// caller would poll it forever
    /// WHAT: Status 0 on success records NO_STATUS_CODE and finishes
    #[test]
    fn test_zero_status_completion_finishes() {
        let (client, engine) = client();
        let id = client.create_connection();
        client.send(&Request::new(id, "http://example.com"));
        engine.respond(id, 0);

        assert!(client.update_connection(id));
        assert!(client.is_finished(id));
        assert_eq!(client.response_code(id), 0);
        assert_eq!(client.error_code(id), NO_STATUS_CODE);
        assert!(!client.error(id).is_empty());
        assert_eq!(engine.live_handles(), 0);
    }

    /// WHY: Verbose toggles reach the engine
    /// WHAT: set_verbose flips the engine flag
    #[test]
    fn test_set_verbose_reaches_engine() {
        let (client, engine) = client();
        assert!(!engine.is_verbose());
        client.set_verbose(true);
        assert!(engine.is_verbose());
        assert_eq!(client.version_info(), "mock-transport/1.0");
    }
}
