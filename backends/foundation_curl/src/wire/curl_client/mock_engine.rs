//! Scriptable in-memory `TransportEngine`.
//!
//! WHY: The client's state machine, its idempotence guarantees and its
//! backpressure signalling have to be tested without sockets, and some of
//! them can only be observed by counting engine calls.
//!
//! WHAT: `MockTransportEngine`, a cloneable engine whose transfers settle
//! when the test scripts an outcome for their owning connection. Every trait
//! call is counted and every plan recorded.
//!
//! HOW: All clones share one `Arc<Mutex<MockState>>`, so a test keeps a
//! clone after moving another into `HttpClient` and inspects or scripts it
//! from outside.

use crate::wire::curl_client::{
    Completion, ConnectionId, EngineError, ReadOutcome, TransferHandle, TransferInfo,
    TransferPlan, TransferSink, TransportEngine, TransportFailure,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const MOCK_CONNECT_TIME: Duration = Duration::from_millis(12);
const MOCK_TOTAL_TIME: Duration = Duration::from_millis(40);

/// How a transfer settles on the next perform step.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    Respond {
        status: i32,
        headers: Vec<u8>,
        body: Vec<u8>,
    },
    Fail(TransportFailure),
}

/// Number of times each engine primitive was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCallCounts {
    pub create: usize,
    pub add: usize,
    pub perform: usize,
    pub remove: usize,
    pub cleanup: usize,
    pub resume: usize,
}

#[derive(Debug)]
struct MockTransfer {
    sink: TransferSink,
    owner: Option<ConnectionId>,
    attached: bool,
    settled: bool,
    paused: bool,
    info: TransferInfo,
}

#[derive(Debug, Default)]
struct MockState {
    next_handle: u64,
    transfers: HashMap<TransferHandle, MockTransfer>,
    outcomes: HashMap<ConnectionId, ScriptedOutcome>,
    auto_status: Option<i32>,
    pending: Vec<Completion>,
    fail_next_create: Option<EngineError>,
    fail_next_add: Option<EngineError>,
    fail_next_perform: Option<EngineError>,
    calls: MockCallCounts,
    plans: Vec<TransferPlan>,
    verbose: bool,
}

impl MockState {
    fn handle_of(&self, owner: ConnectionId) -> Option<TransferHandle> {
        self.transfers
            .iter()
            .find(|(_, transfer)| transfer.attached && transfer.owner == Some(owner))
            .map(|(handle, _)| *handle)
    }

    fn outcome_for(&mut self, owner: ConnectionId) -> Option<ScriptedOutcome> {
        if let Some(outcome) = self.outcomes.remove(&owner) {
            return Some(outcome);
        }
        self.auto_status.map(|status| ScriptedOutcome::Respond {
            status,
            headers: format!("HTTP/1.1 {status} OK\r\n\r\n").into_bytes(),
            body: Vec::new(),
        })
    }
}

/// In-memory engine with scripted outcomes and call counters.
#[derive(Debug, Clone, Default)]
pub struct MockTransportEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockTransportEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every attached transfer without a scripted outcome settles with
    /// `status` on the next perform step.
    #[must_use]
    pub fn with_auto_status(self, status: i32) -> Self {
        self.lock().auto_status = Some(status);
        self
    }

    /// Settles `owner`'s transfer with `status` and empty content.
    pub fn respond(&self, owner: ConnectionId, status: i32) {
        self.respond_with(owner, status, b"", b"");
    }

    /// Settles `owner`'s transfer, delivering `headers` and `body` through
    /// its callbacks first.
    pub fn respond_with(&self, owner: ConnectionId, status: i32, headers: &[u8], body: &[u8]) {
        self.lock().outcomes.insert(
            owner,
            ScriptedOutcome::Respond {
                status,
                headers: headers.to_vec(),
                body: body.to_vec(),
            },
        );
    }

    /// Settles `owner`'s transfer with a transport failure.
    pub fn fail(&self, owner: ConnectionId, code: i32, message: &str) {
        self.lock().outcomes.insert(
            owner,
            ScriptedOutcome::Fail(TransportFailure::new(code, message)),
        );
    }

    pub fn fail_next_create(&self, error: EngineError) {
        self.lock().fail_next_create = Some(error);
    }

    pub fn fail_next_add(&self, error: EngineError) {
        self.lock().fail_next_add = Some(error);
    }

    pub fn fail_next_perform(&self, error: EngineError) {
        self.lock().fail_next_perform = Some(error);
    }

    /// Invokes the write callback of `owner`'s attached transfer.
    ///
    /// Returns false when `owner` has no attached transfer.
    pub fn deliver(&self, owner: ConnectionId, data: &[u8]) -> bool {
        let state = self.lock();
        let Some(handle) = state.handle_of(owner) else {
            return false;
        };
        state.transfers[&handle].sink.on_write(data);
        true
    }

    /// Invokes the read callback of `owner`'s attached transfer, as the
    /// engine does when it wants outbound bytes.
    ///
    /// A `Pause` result marks the transfer paused until `resume_read`.
    pub fn pull_outbound(&self, owner: ConnectionId, buffer: &mut [u8]) -> Option<ReadOutcome> {
        let mut state = self.lock();
        let handle = state.handle_of(owner)?;
        let transfer = state.transfers.get_mut(&handle)?;
        let outcome = transfer.sink.on_read(buffer);
        if outcome == ReadOutcome::Pause {
            transfer.paused = true;
        }
        Some(outcome)
    }

    /// Whether `owner`'s attached transfer has its read side paused.
    #[must_use]
    pub fn is_paused(&self, owner: ConnectionId) -> bool {
        let state = self.lock();
        state
            .handle_of(owner)
            .is_some_and(|handle| state.transfers[&handle].paused)
    }

    #[must_use]
    pub fn calls(&self) -> MockCallCounts {
        self.lock().calls
    }

    /// Every plan passed to `create_handle`, in order.
    #[must_use]
    pub fn plans(&self) -> Vec<TransferPlan> {
        self.lock().plans.clone()
    }

    /// Handles created and not yet cleaned up.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.lock().transfers.len()
    }

    /// Handles currently registered for perform steps.
    #[must_use]
    pub fn attached_handles(&self) -> usize {
        self.lock()
            .transfers
            .values()
            .filter(|transfer| transfer.attached)
            .count()
    }

    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.lock().verbose
    }
}

impl TransportEngine for MockTransportEngine {
    fn create_handle(
        &mut self,
        plan: &TransferPlan,
        sink: TransferSink,
    ) -> Result<TransferHandle, EngineError> {
        let mut state = self.lock();
        state.calls.create += 1;
        if let Some(err) = state.fail_next_create.take() {
            return Err(err);
        }

        state.next_handle += 1;
        let handle = TransferHandle::new(state.next_handle);
        state.plans.push(plan.clone());
        state.transfers.insert(
            handle,
            MockTransfer {
                sink,
                owner: None,
                attached: false,
                settled: false,
                paused: false,
                info: TransferInfo::default(),
            },
        );
        Ok(handle)
    }

    fn add_handle(
        &mut self,
        handle: TransferHandle,
        owner: ConnectionId,
    ) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.add += 1;
        if let Some(err) = state.fail_next_add.take() {
            return Err(err);
        }

        let transfer = state
            .transfers
            .get_mut(&handle)
            .ok_or_else(|| EngineError::new(1, format!("unknown handle {handle}")))?;
        if transfer.attached {
            return Err(EngineError::new(7, "handle already added"));
        }
        transfer.attached = true;
        transfer.owner = Some(owner);
        Ok(())
    }

    fn perform(&mut self) -> Result<u32, EngineError> {
        let mut state = self.lock();
        state.calls.perform += 1;
        if let Some(err) = state.fail_next_perform.take() {
            return Err(err);
        }

        let mut ready: Vec<(TransferHandle, ConnectionId)> = state
            .transfers
            .iter()
            .filter(|(_, transfer)| transfer.attached && !transfer.settled)
            .filter_map(|(handle, transfer)| transfer.owner.map(|owner| (*handle, owner)))
            .collect();
        ready.sort();

        for (handle, owner) in ready {
            let Some(outcome) = state.outcome_for(owner) else {
                continue;
            };
            let Some(transfer) = state.transfers.get_mut(&handle) else {
                continue;
            };

            transfer.settled = true;
            let result = match outcome {
                ScriptedOutcome::Respond {
                    status,
                    headers,
                    body,
                } => {
                    transfer.sink.on_header(&headers);
                    transfer.sink.on_write(&body);
                    #[allow(clippy::cast_precision_loss)]
                    let size = body.len() as f64;
                    transfer.info = TransferInfo {
                        response_code: status,
                        connect_time: MOCK_CONNECT_TIME,
                        total_time: MOCK_TOTAL_TIME,
                        download_size: size,
                        download_speed: size / MOCK_TOTAL_TIME.as_secs_f64(),
                    };
                    Ok(())
                }
                ScriptedOutcome::Fail(failure) => {
                    transfer.info = TransferInfo {
                        connect_time: MOCK_CONNECT_TIME,
                        total_time: MOCK_TOTAL_TIME,
                        ..TransferInfo::default()
                    };
                    Err(failure)
                }
            };
            state.pending.push(Completion {
                handle,
                owner,
                result,
            });
        }

        let running = state
            .transfers
            .values()
            .filter(|transfer| transfer.attached && !transfer.settled)
            .count();
        Ok(u32::try_from(running).unwrap_or(u32::MAX))
    }

    fn read_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.lock().pending)
    }

    fn remove_handle(&mut self, handle: TransferHandle) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.remove += 1;
        match state.transfers.get_mut(&handle) {
            Some(transfer) if transfer.attached => {
                transfer.attached = false;
                Ok(())
            }
            _ => Err(EngineError::new(2, format!("handle {handle} is not added"))),
        }
    }

    fn transfer_info(&mut self, handle: TransferHandle) -> TransferInfo {
        self.lock()
            .transfers
            .get(&handle)
            .map(|transfer| transfer.info)
            .unwrap_or_default()
    }

    fn cleanup_handle(&mut self, handle: TransferHandle) {
        let mut state = self.lock();
        state.calls.cleanup += 1;
        state.transfers.remove(&handle);
    }

    fn resume_read(&mut self, handle: TransferHandle) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.resume += 1;
        match state.transfers.get_mut(&handle) {
            Some(transfer) if transfer.attached => {
                transfer.paused = false;
                Ok(())
            }
            _ => Err(EngineError::new(2, format!("handle {handle} is not added"))),
        }
    }

    fn set_verbose(&mut self, enabled: bool) {
        self.lock().verbose = enabled;
    }

    fn version(&self) -> String {
        "mock-transport/1.0".to_string()
    }
}
