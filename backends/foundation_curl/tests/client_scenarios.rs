//! Client state-machine tests against the scriptable mock engine.
//!
//! WHY: Validates the polling contract, cancellation and duplex backpressure
//! deterministically, including properties only visible as engine call counts.
//!
//! WHAT: End-to-end scenarios through `HttpClient`'s public surface.
//!
//! HOW: `MockTransportEngine` is cloned into the client; the test keeps a
//! clone to script outcomes, invoke callbacks and read counters.

use foundation_curl::config::ClientConfig;
use foundation_curl::wire::curl_client::{
    ConnectionId, ConnectionRegistry, EngineError, HttpClient, HttpClientError, IdSign, Method,
    MockTransportEngine, ReadOutcome, Request, RequestDescriptor, TransportErrorKind,
};
use std::time::Duration;
use tracing_test::traced_test;

fn plain_client() -> (HttpClient<MockTransportEngine>, MockTransportEngine) {
    let engine = MockTransportEngine::new();
    let client = HttpClient::new(engine.clone(), ClientConfig::default()).expect("valid config");
    (client, engine)
}

fn stream_client() -> (HttpClient<MockTransportEngine>, MockTransportEngine) {
    let engine = MockTransportEngine::new();
    let client = HttpClient::new(engine.clone(), ClientConfig::default().http2(true))
        .expect("valid config");
    (client, engine)
}

fn get(id: ConnectionId) -> Request {
    Request::new(id, "http://example.com")
}

// ========================================================================
// Lifecycle
// ========================================================================

/// WHY: The basic send/poll/complete cycle drives every host integration
/// WHAT: id 1 is in flight after send and reads 200 after a scripted completion
#[test]
fn test_get_request_completes_with_status() {
    let (client, engine) = plain_client();

    let id = client.create_connection();
    assert_eq!(id, ConnectionId::from(1));
    assert!(client.send(&get(id)));
    assert!(!client.is_finished(id));

    client.update();
    assert!(!client.is_finished(id), "no outcome scripted yet");

    engine.respond_with(
        id,
        200,
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n",
        b"hello",
    );
    for _ in 0..3 {
        client.update();
    }

    assert!(client.is_finished(id));
    assert_eq!(client.response_code(id), 200);
    assert_eq!(client.error_code(id), 0);
    assert_eq!(client.body(id), b"hello");
    assert_eq!(client.body_len(id), 5);
    assert!(client.headers(id).contains("Content-Length: 5"));
    assert!(client.download_size(id) > 0.0);
}

/// WHY: Unrecognized verbs are a caller bug, not a runtime failure
/// WHAT: A PATCH descriptor is sent as GET in lenient mode
#[traced_test]
#[test]
fn test_unrecognized_method_falls_back_to_get() {
    let (client, engine) = plain_client();
    let id = client.create_connection();

    let descriptor = RequestDescriptor {
        id: id.as_raw(),
        url: "http://example.com".to_string(),
        method: "PATCH".to_string(),
        ..RequestDescriptor::default()
    };

    assert!(client.send_descriptor(descriptor));
    let plans = engine.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].method, Method::Get);
    assert!(logs_contain("falling back to GET"));
}

/// WHY: Strict hosts want unsupported verbs rejected outright
/// WHAT: With strict_methods the send fails and the error field explains why
#[test]
fn test_strict_methods_rejects_unrecognized_verb() {
    let engine = MockTransportEngine::new();
    let client = HttpClient::new(engine.clone(), ClientConfig::default().strict_methods(true))
        .expect("valid config");
    let id = client.create_connection();

    let descriptor = RequestDescriptor {
        id: id.as_raw(),
        url: "http://example.com".to_string(),
        method: "PATCH".to_string(),
        ..RequestDescriptor::default()
    };

    assert!(matches!(
        client.try_send_descriptor(descriptor),
        Err(HttpClientError::UnsupportedMethod(_))
    ));
    assert!(client.error(id).contains("PATCH"));
    assert!(!client.is_finished(id));
    assert_eq!(engine.calls().create, 0);
}

/// WHY: Destroying an in-flight connection is the only cancellation path
/// WHAT: remove and cleanup run exactly once and the id reads as the sentinel
#[test]
fn test_destroy_in_flight_cancels_once() {
    let (client, engine) = plain_client();
    let id = client.create_connection();
    assert!(client.send(&get(id)));

    assert!(client.destroy_connection(id));

    let calls = engine.calls();
    assert_eq!(calls.remove, 1);
    assert_eq!(calls.cleanup, 1);
    assert_eq!(engine.live_handles(), 0);
    assert!(!client.contains(id));
    assert!(client.is_finished(id));
    assert_eq!(client.response_code(id), 0);
    assert!(!client.is_running());
}

/// WHY: Destroy must be safe in every state
/// WHAT: Idle and Finished connections are removed without engine calls
#[test]
fn test_destroy_idle_and_finished() {
    let engine = MockTransportEngine::new().with_auto_status(200);
    let client = HttpClient::new(engine.clone(), ClientConfig::default()).expect("valid config");

    let idle = client.create_connection();
    assert!(client.destroy_connection(idle));
    assert!(!client.destroy_connection(idle));

    let done = client.create_connection();
    client.send(&get(done));
    assert!(client.update_connection(done));
    let before = engine.calls();
    assert!(client.destroy_connection(done));
    assert_eq!(engine.calls().remove, before.remove);
    assert_eq!(client.connection_count(), 0);
}

/// WHY: Ids are dense and signed per registry
/// WHAT: Positive clients issue 1, 2 and multiplexed clients issue -1, -2
#[test]
fn test_sequential_ids_per_variant() {
    let (plain, _) = plain_client();
    assert_eq!(plain.create_connection(), ConnectionId::from(1));
    assert_eq!(plain.create_connection(), ConnectionId::from(2));

    let (wide, _) = stream_client();
    assert_eq!(wide.create_connection(), ConnectionId::from(-1));
    assert_eq!(wide.create_connection(), ConnectionId::from(-2));
}

// ========================================================================
// Invariants
// ========================================================================

/// WHY: Exactly one completion path may be taken and it never resets
/// WHAT: A failed transfer records only the error, and a later send is refused
#[test]
fn test_completion_is_exclusive_and_permanent() {
    let (client, engine) = plain_client();
    let ok = client.create_connection();
    let failed = client.create_connection();
    client.send(&get(ok));
    client.send(&get(failed));

    engine.respond(ok, 200);
    engine.fail(failed, 7, "Couldn't connect to server");
    client.update();

    assert_eq!(client.response_code(ok), 200);
    assert_eq!(client.error_code(ok), 0);

    assert_eq!(client.response_code(failed), 0);
    assert_eq!(client.error_code(failed), 7);
    assert_eq!(client.error(failed), "Couldn't connect to server");
    assert_eq!(client.error_kind(failed), TransportErrorKind::ConnectionFailed);

    for _ in 0..5 {
        client.update();
    }
    assert!(!client.send(&get(failed)));
    assert_eq!(client.error_code(failed), 7);
    assert_eq!(client.response_code(ok), 200);
}

/// WHY: Pollers must never spin on ids that no longer exist
/// WHAT: Never-issued, zero and destroyed ids all read as finished
#[test]
fn test_unknown_ids_read_as_finished() {
    let (client, _engine) = plain_client();
    assert!(client.is_finished(ConnectionId::from(77)));
    assert!(client.is_finished(ConnectionId::INVALID));

    let id = client.create_connection();
    assert!(!client.is_finished(id));
    client.destroy_connection(id);
    assert!(client.is_finished(id));
    assert!(client.update_connection(id));

    let snapshot = client.snapshot(id);
    assert!(snapshot.finished);
    assert_eq!(snapshot.code, 0);
    assert!(snapshot.body.is_empty());
}

/// WHY: Polling a finished id must be free
/// WHAT: update_connection on a finished id never calls perform
#[test]
fn test_update_connection_is_idempotent_once_finished() {
    let (client, engine) = plain_client();
    let id = client.create_connection();
    client.send(&get(id));
    engine.respond(id, 200);

    assert!(client.update_connection(id));
    let performs = engine.calls().perform;

    for _ in 0..10 {
        assert!(client.update_connection(id));
    }
    assert_eq!(engine.calls().perform, performs);
}

/// WHY: Polling an unfinished id drives the engine once per call
/// WHAT: Each update_connection on an in-flight id is exactly one perform
#[test]
fn test_update_connection_drives_in_flight() {
    let (client, engine) = plain_client();
    let id = client.create_connection();
    client.send(&get(id));

    assert!(!client.update_connection(id));
    assert!(!client.update_connection(id));
    assert_eq!(engine.calls().perform, 2);
}

/// WHY: Every transfer must be released exactly once
/// WHAT: After many completions no handle is left alive in the engine
#[test]
fn test_completed_handles_are_released() {
    let engine = MockTransportEngine::new().with_auto_status(204);
    let client = HttpClient::new(engine.clone(), ClientConfig::default()).expect("valid config");

    let ids: Vec<ConnectionId> = (0..16).map(|_| client.create_connection()).collect();
    for id in &ids {
        assert!(client.send(&get(*id)));
    }
    client.update();

    assert!(ids.iter().all(|id| client.response_code(*id) == 204));
    assert_eq!(engine.live_handles(), 0);
    let calls = engine.calls();
    assert_eq!(calls.remove, 16);
    assert_eq!(calls.cleanup, 16);
}

/// WHY: Opposite-sign registries must never share ids
/// WHAT: 10k allocations from each registry do not intersect
#[test]
fn test_registry_partitioning() {
    let mut plain = ConnectionRegistry::new(IdSign::Positive);
    let mut wide = ConnectionRegistry::new(IdSign::Negative);

    let mut plain_ids = std::collections::HashSet::new();
    for _ in 0..10_000 {
        plain_ids.insert(plain.create());
    }
    for _ in 0..10_000 {
        assert!(!plain_ids.contains(&wide.create()));
    }
}

// ========================================================================
// Setup failures
// ========================================================================

/// WHY: A refused registration still needs a diagnostic
/// WHAT: send is false, the engine message is recorded, the handle released
#[test]
fn test_engine_registration_failure_records_message() {
    let (client, engine) = plain_client();
    let id = client.create_connection();
    engine.fail_next_add(EngineError::new(1, "invalid multi handle"));

    assert!(!client.send(&get(id)));
    assert_eq!(client.error(id), "invalid multi handle");
    assert_eq!(client.error_code(id), 0);
    assert!(!client.is_finished(id));
    assert!(!client.is_running());
    assert_eq!(engine.live_handles(), 0);

    let mut buffer = [0u8; 7];
    assert_eq!(client.copy_error_into(id, &mut buffer), 7);
    assert_eq!(&buffer, b"invalid");
    assert_eq!(client.error_len(id), "invalid multi handle".len());

    assert!(client.send(&get(id)), "connection is idle again");
}

/// WHY: Requests are snapshotted so caller buffers can be reused
/// WHAT: The stored request and plan reflect what was sent
#[test]
fn test_request_is_snapshotted() {
    let (client, engine) = plain_client();
    let id = client.create_connection();
    let request = Request::new(id, "http://example.com/api")
        .method(Method::Post)
        .query("v=2")
        .headers("Content-Type: application/json\r\nX-Trace: 1\n")
        .body(br#"{"a":1}"#.to_vec())
        .timeouts(Duration::from_secs(30), Duration::from_secs(5));

    assert!(client.send(&request));
    assert_eq!(client.request(id), Some(request));

    let plans = engine.plans();
    let plan = &plans[0];
    assert_eq!(plan.url, "http://example.com/api?v=2");
    assert_eq!(plan.method, Method::Post);
    assert_eq!(plan.headers.len(), 2);
    assert_eq!(plan.body.as_deref(), Some(&br#"{"a":1}"#[..]));
    assert_eq!(plan.timeout, Some(Duration::from_secs(30)));
}

/// WHY: A failed perform step is an engine error, not a settled transfer
/// WHAT: The error is logged, the connection stays in flight and settles on the next step
#[test]
#[traced_test]
fn test_perform_failure_keeps_transfer_in_flight() {
    let (client, engine) = plain_client();
    let id = client.create_connection();
    assert!(client.send(&get(id)));

    engine.fail_next_perform(EngineError::new(1, "bad multi handle"));
    assert!(!client.update_connection(id));
    assert!(logs_contain("Transport engine error"));
    assert!(logs_contain("bad multi handle"));
    assert!(client.is_running());

    engine.respond(id, 200);
    assert!(client.update_connection(id));
    assert_eq!(client.response_code(id), 200);
}

// ========================================================================
// Duplex streaming
// ========================================================================

/// WHY: The engine must be resumed exactly once per empty-to-nonempty edge
/// WHAT: Two sends before draining produce one resume; a send after draining another
#[test]
fn test_stream_backpressure_resumes_once() {
    let (client, engine) = stream_client();
    let id = client.create_connection();
    assert!(client.send(&Request::new(id, "https://push.example.com").method(Method::Post)));

    let mut buffer = [0u8; 16];
    assert_eq!(engine.pull_outbound(id, &mut buffer), Some(ReadOutcome::Pause));
    assert!(engine.is_paused(id));

    assert!(client.send_stream_message(id, b"ping"));
    assert!(client.send_stream_message(id, b"pong"));
    assert_eq!(engine.calls().resume, 1);
    assert!(!engine.is_paused(id));

    assert_eq!(engine.pull_outbound(id, &mut buffer), Some(ReadOutcome::Data(8)));
    assert_eq!(&buffer[..8], b"pingpong");
    assert_eq!(engine.pull_outbound(id, &mut buffer), Some(ReadOutcome::Pause));

    assert!(client.send_stream_message(id, b"again"));
    assert_eq!(engine.calls().resume, 2);
}

/// WHY: Outbound bytes are handed out in buffer-sized pieces
/// WHAT: "hello" drains as "hel" through 3 bytes then "lo" through 10 bytes
#[test]
fn test_stream_outbound_drains_in_pieces() {
    let (client, engine) = stream_client();
    let id = client.create_connection();
    assert!(client.send(&get(id)));

    assert!(client.send_stream_message(id, b"hello"));

    let mut small = [0u8; 3];
    assert_eq!(engine.pull_outbound(id, &mut small), Some(ReadOutcome::Data(3)));
    assert_eq!(&small, b"hel");

    let mut large = [0u8; 10];
    assert_eq!(engine.pull_outbound(id, &mut large), Some(ReadOutcome::Data(2)));
    assert_eq!(&large[..2], b"lo");

    assert_eq!(engine.pull_outbound(id, &mut large), Some(ReadOutcome::Pause));
}

/// WHY: Inbound stream bytes accumulate flat and are consumed by the caller
/// WHAT: Two deliveries read as one block; a short buffer keeps the rest
#[test]
fn test_stream_inbound_accumulates() {
    let (client, engine) = stream_client();
    let id = client.create_connection();
    client.send(&get(id));

    assert!(engine.deliver(id, b"first|"));
    assert!(engine.deliver(id, b"second"));
    assert_eq!(client.stream_message_len(id), 12);
    assert_eq!(client.body_len(id), 0);

    let mut buffer = [0u8; 6];
    assert_eq!(client.take_stream_message(id, &mut buffer), 6);
    assert_eq!(&buffer, b"first|");
    assert_eq!(client.take_stream_messages(id), b"second");
    assert_eq!(client.stream_message_len(id), 0);
}

/// WHY: Stream messages for unknown connections are refused
/// WHAT: send_stream_message on a never-issued id is false and touches nothing
#[test]
fn test_stream_message_unknown_connection() {
    let (client, engine) = stream_client();
    assert!(!client.send_stream_message(ConnectionId::from(-9), b"lost"));
    assert_eq!(engine.calls().resume, 0);
}

/// WHY: Messages queued before a transfer is attached need no resume
/// WHAT: Queueing on an idle connection succeeds without engine calls
#[test]
fn test_stream_message_before_send() {
    let (client, engine) = stream_client();
    let id = client.create_connection();

    assert!(client.send_stream_message(id, b"early"));
    assert_eq!(engine.calls().resume, 0);

    assert!(client.send(&get(id)));
    let mut buffer = [0u8; 8];
    assert_eq!(engine.pull_outbound(id, &mut buffer), Some(ReadOutcome::Data(5)));
}

/// WHY: A duplex upload needs an end, or the engine waits on it forever
/// WHAT: Closing a paused stream resumes it once, drains queued bytes, then ends with zero bytes
#[test]
fn test_finish_stream_message_ends_upload() {
    let (client, engine) = stream_client();
    let id = client.create_connection();
    assert!(client.send(&Request::new(id, "https://push.example.com").method(Method::Post)));

    let mut buffer = [0u8; 16];
    assert_eq!(engine.pull_outbound(id, &mut buffer), Some(ReadOutcome::Pause));

    assert!(client.send_stream_message(id, b"last"));
    assert!(client.finish_stream_message(id));
    assert_eq!(engine.calls().resume, 1);
    assert!(!client.send_stream_message(id, b"late"));

    assert_eq!(engine.pull_outbound(id, &mut buffer), Some(ReadOutcome::Data(4)));
    assert_eq!(&buffer[..4], b"last");
    assert_eq!(engine.pull_outbound(id, &mut buffer), Some(ReadOutcome::Data(0)));
    assert!(!engine.is_paused(id));

    assert!(!client.finish_stream_message(ConnectionId::from(-9)));
}

/// WHY: Closing an already drained, paused stream must wake the engine
/// WHAT: finish_stream_message on an empty paused queue resumes, then reads end
#[test]
fn test_finish_stream_message_wakes_paused_engine() {
    let (client, engine) = stream_client();
    let id = client.create_connection();
    assert!(client.send(&get(id)));

    let mut buffer = [0u8; 4];
    assert_eq!(engine.pull_outbound(id, &mut buffer), Some(ReadOutcome::Pause));
    assert!(client.finish_stream_message(id));
    assert_eq!(engine.calls().resume, 1);
    assert_eq!(engine.pull_outbound(id, &mut buffer), Some(ReadOutcome::Data(0)));
}
