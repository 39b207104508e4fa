//! The seam between `HttpClient` and the transport that performs socket I/O.
//!
//! WHY: The client's state machine is independent of libcurl; tests need to
//! drive it deterministically and count how often the engine is touched.
//!
//! WHAT: The `TransportEngine` trait, opaque `TransferHandle`s, and the
//! `Completion` records the engine reports when a transfer settles.
//!
//! HOW: Engines own their handles and the multi-handle equivalent. The
//! client owns the engine behind its mutex, so implementations only need to
//! be `Send`, never `Sync`.

use crate::wire::curl_client::{ConnectionId, EngineError, TransferPlan, TransferSink};
use std::time::Duration;

/// Opaque reference to one transport handle owned by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferHandle(u64);

impl TransferHandle {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Timing and size telemetry read from a settled handle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransferInfo {
    pub response_code: i32,
    pub connect_time: Duration,
    pub total_time: Duration,
    pub download_size: f64,
    pub download_speed: f64,
}

/// Transport-level failure of a single transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub code: i32,
    pub message: String,
}

impl TransportFailure {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<EngineError> for TransportFailure {
    fn from(err: EngineError) -> Self {
        Self::new(err.code, err.message)
    }
}

/// One "done" notification drained from the engine.
///
/// `owner` is the connection the handle was registered for, so the client
/// matches completions back without a reverse lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub handle: TransferHandle,
    pub owner: ConnectionId,
    pub result: Result<(), TransportFailure>,
}

/// A multiplexing, non-blocking HTTP transport.
pub trait TransportEngine: Send {
    /// Builds a detached transport handle from `plan`.
    ///
    /// Header, body and stream callbacks of the handle must go to `sink`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the handle cannot be created or configured.
    fn create_handle(
        &mut self,
        plan: &TransferPlan,
        sink: TransferSink,
    ) -> Result<TransferHandle, EngineError>;

    /// Registers a created handle for `owner` so perform steps drive it.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the engine refuses the handle. The handle
    /// stays detached and must still be released with `cleanup_handle`.
    fn add_handle(&mut self, handle: TransferHandle, owner: ConnectionId)
        -> Result<(), EngineError>;

    /// Runs one non-blocking step over every registered handle.
    ///
    /// Returns the number of transfers still running.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the step itself fails.
    fn perform(&mut self) -> Result<u32, EngineError>;

    /// Drains every completion reported since the last call.
    fn read_completions(&mut self) -> Vec<Completion>;

    /// Detaches a registered handle. The handle stays readable.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the handle was not registered.
    fn remove_handle(&mut self, handle: TransferHandle) -> Result<(), EngineError>;

    /// Reads telemetry from a detached handle.
    fn transfer_info(&mut self, handle: TransferHandle) -> TransferInfo;

    /// Releases a handle. Unknown handles are ignored.
    fn cleanup_handle(&mut self, handle: TransferHandle);

    /// Un-pauses the read callback of a registered handle.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the engine rejects the resume.
    fn resume_read(&mut self, handle: TransferHandle) -> Result<(), EngineError>;

    fn set_verbose(&mut self, enabled: bool);

    /// Human readable engine and version description.
    fn version(&self) -> String;
}
