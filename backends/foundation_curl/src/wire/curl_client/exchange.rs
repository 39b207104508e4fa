//! Byte buffers shared between a connection and the engine callbacks.
//!
//! WHY: The engine writes headers and body bytes (and reads outbound stream
//! bytes) from inside its perform step, while the caller reads and appends
//! from its own thread. Both sides need the same buffers.
//!
//! WHAT: `TransferSink`, a cloneable handle over an `Arc<Mutex<Exchange>>`,
//! with one method per engine callback and one per caller operation.
//!
//! HOW: The connection keeps one clone, the engine's handler keeps another.
//! Every access takes the lock for the shortest possible time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Result of the engine asking for outbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were written into the engine's buffer.
    Data(usize),
    /// Nothing queued: the engine must suspend reading until resumed.
    Pause,
}

#[derive(Debug, Default)]
struct Exchange {
    streaming: bool,
    headers: Vec<u8>,
    body: Vec<u8>,
    incoming: Vec<u8>,
    outgoing: VecDeque<u8>,
    outbound_closed: bool,
}

/// Shared header, body and duplex message buffers of one connection.
#[derive(Debug, Clone, Default)]
pub struct TransferSink {
    inner: Arc<Mutex<Exchange>>,
}

impl TransferSink {
    /// Creates a sink whose inbound body bytes land in the stream queue
    /// (`streaming`) or in the response body.
    #[must_use]
    pub fn new(streaming: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Exchange {
                streaming,
                ..Exchange::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Exchange> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    pub(crate) fn set_streaming(&self, streaming: bool) {
        self.lock().streaming = streaming;
    }

    /// Header callback: appends one raw header line.
    pub fn on_header(&self, data: &[u8]) {
        self.lock().headers.extend_from_slice(data);
    }

    /// Write callback: appends inbound bytes, unconditionally.
    ///
    /// Returns the number of bytes consumed, which is always `data.len()`.
    pub fn on_write(&self, data: &[u8]) -> usize {
        let mut exchange = self.lock();
        if exchange.streaming {
            exchange.incoming.extend_from_slice(data);
        } else {
            exchange.body.extend_from_slice(data);
        }
        data.len()
    }

    /// Read callback: drains queued outbound bytes into `buffer`.
    ///
    /// An empty queue yields `ReadOutcome::Pause` rather than zero bytes,
    /// since zero would be taken as end of upload. Once the outbound side is
    /// closed, an empty queue yields `Data(0)` instead.
    pub fn on_read(&self, buffer: &mut [u8]) -> ReadOutcome {
        let mut exchange = self.lock();
        if exchange.outgoing.is_empty() {
            if exchange.outbound_closed {
                return ReadOutcome::Data(0);
            }
            return ReadOutcome::Pause;
        }

        let count = buffer.len().min(exchange.outgoing.len());
        for (slot, byte) in buffer.iter_mut().zip(exchange.outgoing.drain(..count)) {
            *slot = byte;
        }
        ReadOutcome::Data(count)
    }

    /// Queues outbound stream bytes.
    ///
    /// Returns true when the queue was empty before this call, meaning the
    /// engine may have paused reading and must be resumed by the caller.
    pub fn queue_outbound(&self, data: &[u8]) -> bool {
        let mut exchange = self.lock();
        let was_empty = exchange.outgoing.is_empty();
        exchange.outgoing.extend(data.iter().copied());
        was_empty
    }

    /// Marks the end of the outbound stream; queued bytes still drain first.
    ///
    /// Returns true when the queue was empty, so a paused engine must be
    /// resumed to observe the end.
    pub fn close_outbound(&self) -> bool {
        let mut exchange = self.lock();
        exchange.outbound_closed = true;
        exchange.outgoing.is_empty()
    }

    #[must_use]
    pub fn is_outbound_closed(&self) -> bool {
        self.lock().outbound_closed
    }

    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.lock().outgoing.len()
    }

    #[must_use]
    pub fn incoming_len(&self) -> usize {
        self.lock().incoming.len()
    }

    /// Copies up to `buffer.len()` inbound bytes and removes them.
    pub fn take_incoming_into(&self, buffer: &mut [u8]) -> usize {
        let mut exchange = self.lock();
        let count = buffer.len().min(exchange.incoming.len());
        buffer[..count].copy_from_slice(&exchange.incoming[..count]);
        exchange.incoming.drain(..count);
        count
    }

    /// Takes the whole inbound accumulator, leaving it empty.
    #[must_use]
    pub fn take_incoming(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().incoming)
    }

    #[must_use]
    pub fn headers(&self) -> Vec<u8> {
        self.lock().headers.clone()
    }

    #[must_use]
    pub fn headers_len(&self) -> usize {
        self.lock().headers.len()
    }

    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        self.lock().body.clone()
    }

    #[must_use]
    pub fn body_len(&self) -> usize {
        self.lock().body.len()
    }

    pub(crate) fn copy_headers_into(&self, buffer: &mut [u8]) -> usize {
        copy_prefix(&self.lock().headers, buffer)
    }

    pub(crate) fn copy_body_into(&self, buffer: &mut [u8]) -> usize {
        copy_prefix(&self.lock().body, buffer)
    }

    /// Clears the response buffers before a request is dispatched.
    pub(crate) fn reset_response(&self) {
        let mut exchange = self.lock();
        exchange.headers.clear();
        exchange.body.clear();
    }
}

pub(crate) fn copy_prefix(source: &[u8], buffer: &mut [u8]) -> usize {
    let count = buffer.len().min(source.len());
    buffer[..count].copy_from_slice(&source[..count]);
    count
}
