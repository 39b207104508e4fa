//! Drain-while-paused worker.
//!
//! WHY: When the host application is suspended its per-frame loop stops
//! calling `update`, yet in-flight transfers should still settle.
//!
//! WHAT: `PauseDrain` spawns one named background thread on pause that keeps
//! calling `HttpClient::update` until no transfers are running or the
//! application resumes, whichever comes first.
//!
//! HOW: A `paused` flag behind a mutex is checked on every iteration while
//! holding that lock; resuming clears the flag and signals the worker over a
//! channel so it does not sleep out its poll interval.

use crate::wire::curl_client::{HttpClient, TransportEngine};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DRAIN_THREAD_NAME: &str = "curl_pause_drain";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainSignal {
    Resume,
}

#[derive(Debug)]
struct DrainWorker {
    sender: mpsc::Sender<DrainSignal>,
    handle: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a client's transfers moving while the application is paused.
#[derive(Debug)]
pub struct PauseDrain<E: TransportEngine + 'static> {
    client: Arc<HttpClient<E>>,
    paused: Arc<Mutex<bool>>,
    interval: Duration,
    worker: Mutex<Option<DrainWorker>>,
}

impl<E: TransportEngine + 'static> PauseDrain<E> {
    /// Creates a drain for `client` polling at the client's configured
    /// pause interval.
    #[must_use]
    pub fn new(client: Arc<HttpClient<E>>) -> Self {
        let interval = client.pause_poll_interval();
        Self {
            client,
            paused: Arc::new(Mutex::new(false)),
            interval,
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn client(&self) -> &Arc<HttpClient<E>> {
        &self.client
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        *lock(&self.paused)
    }

    /// Whether a drain worker is currently alive.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Application pause hook.
    ///
    /// `true` starts a drain worker if transfers are running and none is
    /// alive yet. `false` stops the worker and waits for it to exit.
    pub fn on_application_pause(&self, paused: bool) {
        if paused {
            self.pause();
        } else {
            self.resume();
        }
    }

    fn pause(&self) {
        *lock(&self.paused) = true;

        let mut worker = lock(&self.worker);
        if worker
            .as_ref()
            .is_some_and(|existing| !existing.handle.is_finished())
        {
            return;
        }
        if let Some(finished) = worker.take() {
            Self::join(finished);
        }

        if !self.client.is_running() {
            tracing::debug!("Application paused with no running transfers");
            return;
        }

        let (sender, receiver) = mpsc::channel::<DrainSignal>();
        let client = Arc::clone(&self.client);
        let paused = Arc::clone(&self.paused);
        let interval = self.interval;

        let spawned = thread::Builder::new()
            .name(DRAIN_THREAD_NAME.to_string())
            .spawn(move || drain_loop(&client, &paused, &receiver, interval));

        match spawned {
            Ok(handle) => {
                tracing::debug!("Started pause drain worker");
                *worker = Some(DrainWorker { sender, handle });
            }
            Err(err) => tracing::error!("Failed to spawn pause drain worker: {}", err),
        }
    }

    fn resume(&self) {
        *lock(&self.paused) = false;
        let current = lock(&self.worker).take();
        if let Some(worker) = current {
            // The worker may already have exited and dropped its receiver.
            let _ = worker.sender.send(DrainSignal::Resume);
            Self::join(worker);
        }
    }

    fn join(worker: DrainWorker) {
        if worker.handle.join().is_err() {
            tracing::error!("Pause drain worker panicked");
        }
    }
}

impl<E: TransportEngine + 'static> Drop for PauseDrain<E> {
    fn drop(&mut self) {
        self.resume();
    }
}

fn drain_loop<E: TransportEngine>(
    client: &HttpClient<E>,
    paused: &Mutex<bool>,
    receiver: &mpsc::Receiver<DrainSignal>,
    interval: Duration,
) {
    let span = tracing::trace_span!("curl_client.pause_drain");
    let _enter = span.enter();

    loop {
        {
            let paused = lock(paused);
            if !*paused || !client.is_running() {
                break;
            }
            client.update();
        }

        match receiver.recv_timeout(interval) {
            Ok(DrainSignal::Resume) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    tracing::debug!("Pause drain worker stopped");
}
