//! libcurl multi-interface implementation of `TransportEngine`.
//!
//! Each transfer is an `Easy2<CurlHandler>` whose callbacks forward into the
//! connection's `TransferSink`. Handles are tracked in two maps: detached
//! (created, or removed after completion) and attached (registered with the
//! multi-handle). The multi token of an attached handle is its raw id, which
//! is how completion messages are matched back to their owner.

use crate::wire::curl_client::{
    Completion, ConnectionId, EngineError, Method, ReadOutcome, TransferHandle, TransferInfo,
    TransferPlan, TransferSink, TransportEngine, TransportFailure,
};
use curl::easy::{Easy2, Handler, HttpVersion, List, ReadError, WriteError};
use curl::multi::{Easy2Handle, Multi};
use std::collections::HashMap;
use std::time::Duration;

/// Forwards libcurl callbacks into a `TransferSink`.
pub struct CurlHandler {
    sink: TransferSink,
}

impl Handler for CurlHandler {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        Ok(self.sink.on_write(data))
    }

    fn header(&mut self, data: &[u8]) -> bool {
        self.sink.on_header(data);
        true
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, ReadError> {
        if !self.sink.is_streaming() {
            return Ok(0);
        }
        match self.sink.on_read(data) {
            ReadOutcome::Data(count) => Ok(count),
            ReadOutcome::Pause => Err(ReadError::Pause),
        }
    }
}

/// Average bytes per second over the whole transfer, zero for an instant one.
fn average_speed(download_size: f64, total_time: Duration) -> f64 {
    let seconds = total_time.as_secs_f64();
    if seconds > 0.0 {
        download_size / seconds
    } else {
        0.0
    }
}

fn http2_available() -> bool {
    curl::Version::get().feature_http2()
}

/// `TransportEngine` backed by one libcurl multi-handle.
pub struct CurlEngine {
    multi: Multi,
    http2: bool,
    next_handle: u64,
    verbose: bool,
    detached: HashMap<TransferHandle, Easy2<CurlHandler>>,
    attached: HashMap<TransferHandle, (Easy2Handle<CurlHandler>, ConnectionId)>,
}

// SAFETY: the multi-handle and every easy handle are only ever touched
// through `&mut self`, and `HttpClient` keeps the engine behind its mutex,
// so no two threads use libcurl state at the same time.
unsafe impl Send for CurlEngine {}

impl core::fmt::Debug for CurlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurlEngine")
            .field("http2", &self.http2)
            .field("next_handle", &self.next_handle)
            .field("detached", &self.detached.len())
            .field("attached", &self.attached.len())
            .finish_non_exhaustive()
    }
}

impl CurlEngine {
    /// Initializes libcurl and creates the multi-handle.
    ///
    /// With `http2` the multi-handle multiplexes transfers and keeps at most
    /// one connection per host. A libcurl built without HTTP/2 keeps the
    /// single connection per host and negotiates HTTP/1.1.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the multi-handle rejects the options.
    pub fn new(http2: bool) -> Result<Self, EngineError> {
        curl::init();

        let mut multi = Multi::new();
        let multiplex = http2 && http2_available();
        if http2 {
            if multiplex {
                multi.pipelining(false, true)?;
            } else {
                tracing::warn!("libcurl has no HTTP/2 support, falling back to HTTP/1.1");
            }
            multi.set_max_host_connections(1)?;
        }

        tracing::debug!("Created curl engine (http2: {})", multiplex);
        Ok(Self {
            multi,
            http2: multiplex,
            next_handle: 0,
            verbose: false,
            detached: HashMap::new(),
            attached: HashMap::new(),
        })
    }

    fn configure(
        &self,
        easy: &mut Easy2<CurlHandler>,
        plan: &TransferPlan,
    ) -> Result<(), curl::Error> {
        easy.url(&plan.url)?;
        easy.signal(false)?;
        easy.follow_location(plan.follow_redirects)?;
        easy.max_redirections(plan.max_redirects)?;
        easy.verbose(plan.verbose || self.verbose)?;

        match plan.method {
            Method::Get => easy.get(true)?,
            Method::Post => easy.post(true)?,
            Method::Put => easy.custom_request("PUT")?,
            Method::Delete => easy.custom_request("DELETE")?,
            Method::Head => easy.nobody(true)?,
        }

        if let (Some(connect), Some(total)) = (plan.connect_timeout, plan.timeout) {
            easy.connect_timeout(connect)?;
            easy.timeout(total)?;
        }

        if let Some(proxy) = &plan.proxy {
            easy.proxy(proxy)?;
        }

        if let Some(pin) = &plan.tls.pinned_key {
            easy.pinned_public_key(pin)?;
        }
        easy.ssl_verify_peer(plan.tls.verify_peer)?;
        easy.ssl_verify_host(plan.tls.verify_host)?;

        match &plan.body {
            Some(body) => {
                easy.post_field_size(body.len() as u64)?;
                easy.post_fields_copy(body)?;
            }
            // A bodiless POST would otherwise upload through the read
            // callback; only stream transfers do that.
            None if plan.method == Method::Post && !plan.http2 => {
                easy.post_field_size(0)?;
                easy.post_fields_copy(&[])?;
            }
            None => {}
        }

        if !plan.headers.is_empty() {
            let mut list = List::new();
            for line in &plan.headers {
                list.append(line)?;
            }
            easy.http_headers(list)?;
        }

        if plan.http2 && self.http2 {
            easy.http_version(HttpVersion::V2)?;
            easy.pipewait(true)?;
        }

        Ok(())
    }

    fn token_of(handle: TransferHandle) -> Result<usize, EngineError> {
        usize::try_from(handle.as_raw())
            .map_err(|_| EngineError::new(-1, format!("handle {handle} exceeds token range")))
    }
}

impl TransportEngine for CurlEngine {
    fn create_handle(
        &mut self,
        plan: &TransferPlan,
        sink: TransferSink,
    ) -> Result<TransferHandle, EngineError> {
        let mut easy = Easy2::new(CurlHandler { sink });
        self.configure(&mut easy, plan)?;

        self.next_handle += 1;
        let handle = TransferHandle::new(self.next_handle);
        self.detached.insert(handle, easy);
        tracing::trace!("Created curl handle {} for {}", handle, plan.url);
        Ok(handle)
    }

    fn add_handle(
        &mut self,
        handle: TransferHandle,
        owner: ConnectionId,
    ) -> Result<(), EngineError> {
        let token = Self::token_of(handle)?;
        let easy = self
            .detached
            .remove(&handle)
            .ok_or_else(|| EngineError::new(-1, format!("unknown handle {handle}")))?;

        let mut attached = self.multi.add2(easy)?;
        attached.set_token(token)?;
        self.attached.insert(handle, (attached, owner));
        Ok(())
    }

    fn perform(&mut self) -> Result<u32, EngineError> {
        Ok(self.multi.perform()?)
    }

    fn read_completions(&mut self) -> Vec<Completion> {
        let mut finished: Vec<(usize, Result<(), curl::Error>)> = Vec::new();
        self.multi.messages(|message| {
            if let (Ok(token), Some(result)) = (message.token(), message.result()) {
                finished.push((token, result));
            }
        });

        finished
            .into_iter()
            .filter_map(|(token, result)| {
                let handle = TransferHandle::new(u64::try_from(token).ok()?);
                let Some((_, owner)) = self.attached.get(&handle) else {
                    tracing::warn!("Completion for unknown curl handle {}", handle);
                    return None;
                };
                Some(Completion {
                    handle,
                    owner: *owner,
                    result: result.map_err(|err| TransportFailure::from(EngineError::from(err))),
                })
            })
            .collect()
    }

    fn remove_handle(&mut self, handle: TransferHandle) -> Result<(), EngineError> {
        let (attached, _) = self
            .attached
            .remove(&handle)
            .ok_or_else(|| EngineError::new(-1, format!("handle {handle} is not added")))?;
        let easy = self.multi.remove2(attached)?;
        self.detached.insert(handle, easy);
        Ok(())
    }

    fn transfer_info(&mut self, handle: TransferHandle) -> TransferInfo {
        let Some(easy) = self.detached.get_mut(&handle) else {
            return TransferInfo::default();
        };

        let total_time = easy.total_time().unwrap_or_default();
        let download_size = easy.download_size().unwrap_or_default();
        TransferInfo {
            response_code: easy
                .response_code()
                .ok()
                .and_then(|code| i32::try_from(code).ok())
                .unwrap_or(0),
            connect_time: easy.connect_time().unwrap_or_default(),
            total_time,
            download_size,
            download_speed: average_speed(download_size, total_time),
        }
    }

    fn cleanup_handle(&mut self, handle: TransferHandle) {
        if let Some((attached, _)) = self.attached.remove(&handle) {
            if let Err(err) = self.multi.remove2(attached) {
                tracing::warn!("Failed to detach curl handle {}: {}", handle, err);
            }
        }
        self.detached.remove(&handle);
    }

    fn resume_read(&mut self, handle: TransferHandle) -> Result<(), EngineError> {
        let (attached, _) = self
            .attached
            .get(&handle)
            .ok_or_else(|| EngineError::new(-1, format!("handle {handle} is not added")))?;
        attached.unpause_read()?;
        Ok(())
    }

    fn set_verbose(&mut self, enabled: bool) {
        self.verbose = enabled;
    }

    fn version(&self) -> String {
        format!("libcurl/{}", curl::Version::get().version())
    }
}
