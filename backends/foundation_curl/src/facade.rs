//! Opaque client tokens for the plugin boundary.
//!
//! WHY: The host runtime cannot hold Rust references. It needs a plain
//! integer it can hand back on every call, and destroying a client must not
//! leave the host with a dangling pointer.
//!
//! WHAT: `ClientTable` owns every `HttpClient` created for the host together
//! with its `PauseDrain`, keyed by a `ClientToken`.
//!
//! HOW: A `HashMap` arena with monotonically increasing tokens; token 0 is
//! never issued, so hosts can use it as "no client".

use crate::config::{ClientConfig, ConfigResult};
use crate::wire::curl_client::{HttpClient, PauseDrain, TransportEngine};
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque handle the host holds for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientToken(u64);

impl ClientToken {
    pub const NONE: ClientToken = ClientToken(0);

    #[must_use]
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for ClientToken {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for ClientToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client:{}", self.0)
    }
}

#[derive(Debug)]
struct PluginClient<E: TransportEngine + 'static> {
    client: Arc<HttpClient<E>>,
    drain: PauseDrain<E>,
}

/// Arena of clients addressed by `ClientToken`.
#[derive(Debug)]
pub struct ClientTable<E: TransportEngine + 'static> {
    next: u64,
    clients: HashMap<ClientToken, PluginClient<E>>,
}

impl<E: TransportEngine + 'static> Default for ClientTable<E> {
    fn default() -> Self {
        Self {
            next: 1,
            clients: HashMap::new(),
        }
    }
}

impl<E: TransportEngine + 'static> ClientTable<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client over `engine` and returns its token.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the configuration's pins are malformed.
    pub fn create(&mut self, engine: E, config: ClientConfig) -> ConfigResult<ClientToken> {
        let client = Arc::new(HttpClient::new(engine, config)?);
        let drain = PauseDrain::new(Arc::clone(&client));

        let token = ClientToken(self.next);
        self.next += 1;
        self.clients.insert(token, PluginClient { client, drain });
        tracing::debug!("Created {}", token);
        Ok(token)
    }

    /// Resolves a token to its client.
    #[must_use]
    pub fn get(&self, token: ClientToken) -> Option<Arc<HttpClient<E>>> {
        self.clients
            .get(&token)
            .map(|entry| Arc::clone(&entry.client))
    }

    /// Destroys a client, stopping its drain worker first.
    ///
    /// Returns false for unknown tokens.
    pub fn destroy(&mut self, token: ClientToken) -> bool {
        let Some(entry) = self.clients.remove(&token) else {
            return false;
        };
        entry.drain.on_application_pause(false);
        tracing::debug!("Destroyed {}", token);
        true
    }

    /// Forwards the host's pause notification to every client.
    pub fn on_application_pause(&self, paused: bool) {
        for entry in self.clients.values() {
            entry.drain.on_application_pause(paused);
        }
    }

    /// Whether `token`'s client is draining in the background.
    #[must_use]
    pub fn is_draining(&self, token: ClientToken) -> bool {
        self.clients
            .get(&token)
            .is_some_and(|entry| entry.drain.is_draining())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
