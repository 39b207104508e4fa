//! Connection identifiers and connection storage.
//!
//! WHY: Callers on the far side of a plugin boundary can only hold plain
//! integers, so every connection is addressed by an id handed out here.
//!
//! WHAT: `ConnectionRegistry` allocates dense, non-zero ids (signed per
//! registry so two registries never collide) and owns the `Connection`
//! records keyed by those ids.
//!
//! HOW: A wrapping counter multiplied by the registry's `IdSign`, plus a
//! `HashMap` of records. Lookups of unknown ids return a shared invalid
//! sentinel rather than failing.

use crate::wire::curl_client::{Request, Response, TransferHandle, TransferSink};
use std::collections::HashMap;

/// Identifier of a connection. Zero is reserved as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionId(i32);

impl ConnectionId {
    /// The reserved id that never names a live connection.
    pub const INVALID: ConnectionId = ConnectionId(0);

    #[must_use]
    pub fn as_raw(self) -> i32 {
        self.0
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<i32> for ConnectionId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<ConnectionId> for i32 {
    fn from(value: ConnectionId) -> Self {
        value.0
    }
}

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Polarity applied to every id a registry generates.
///
/// Plain clients use `Positive`; the multiplexed (HTTP/2) variant uses
/// `Negative` so its ids can never be mistaken for plain ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSign {
    Positive,
    Negative,
}

impl IdSign {
    fn factor(self) -> i32 {
        match self {
            IdSign::Positive => 1,
            IdSign::Negative => -1,
        }
    }
}

/// Per-connection state: the request snapshot, the transport handle while
/// in flight and the accumulated response.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    pub(crate) handle: Option<TransferHandle>,
    pub(crate) request: Option<Request>,
    pub(crate) response: Response,
    pub(crate) exchange: TransferSink,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId) -> Self {
        Self {
            id,
            handle: None,
            request: None,
            response: Response::default(),
            exchange: TransferSink::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.id.is_valid()
    }

    /// True while a transport handle is attached and not yet completed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    #[must_use]
    pub fn handle(&self) -> Option<TransferHandle> {
        self.handle
    }

    /// The request this connection was sent with, if any.
    #[must_use]
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    #[must_use]
    pub fn exchange(&self) -> &TransferSink {
        &self.exchange
    }

    /// Finished means a final status code or a transport error has been
    /// recorded, or the connection is the invalid sentinel.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !self.is_valid() || self.response.code != 0 || self.response.error_code != 0
    }
}

/// Id allocation plus ownership of every `Connection`.
#[derive(Debug)]
pub struct ConnectionRegistry {
    sign: IdSign,
    counter: i32,
    connections: HashMap<ConnectionId, Connection>,
    invalid: Connection,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(IdSign::Positive)
    }
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(sign: IdSign) -> Self {
        Self::with_counter(sign, 1)
    }

    /// Creates a registry whose next allocation uses `counter`.
    ///
    /// Values outside `1..i32::MAX` are clamped to 1.
    #[must_use]
    pub fn with_counter(sign: IdSign, counter: i32) -> Self {
        let counter = if (1..i32::MAX).contains(&counter) {
            counter
        } else {
            1
        };
        Self {
            sign,
            counter,
            connections: HashMap::new(),
            invalid: Connection::new(ConnectionId::INVALID),
        }
    }

    #[must_use]
    pub fn sign(&self) -> IdSign {
        self.sign
    }

    /// Allocates the next id and inserts a fresh, idle connection under it.
    ///
    /// # Panics
    ///
    /// Panics if the generated id is still registered. The counter only
    /// wraps after `i32::MAX - 1` allocations, so this signals a logic
    /// error rather than a runtime condition.
    pub fn create(&mut self) -> ConnectionId {
        let id = self.next_id();
        let previous = self.connections.insert(id, Connection::new(id));
        assert!(
            previous.is_none(),
            "connection id {id} generated while still registered"
        );
        tracing::debug!("Registered connection {}", id);
        id
    }

    fn next_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.counter * self.sign.factor());
        self.counter = (self.counter + 1) % i32::MAX;
        if self.counter == 0 {
            self.counter = 1;
        }
        id
    }

    /// Returns the connection for `id`, or the invalid sentinel if it is
    /// not registered. The sentinel always reports itself as finished.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> &Connection {
        self.connections.get(&id).unwrap_or(&self.invalid)
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Removes the connection, returning whether it was present.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            tracing::debug!("Removed connection {}", id);
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// WHY: Ids must start at 1 and stay dense
    /// WHAT: Two allocations on a positive registry return 1 then 2
    #[test]
    fn test_positive_registry_sequence() {
        let mut registry = ConnectionRegistry::new(IdSign::Positive);
        assert_eq!(registry.create(), ConnectionId::from(1));
        assert_eq!(registry.create(), ConnectionId::from(2));
        assert_eq!(registry.len(), 2);
    }

    /// WHY: The multiplexed variant must not collide with plain ids
    /// WHAT: Two allocations on a negative registry return -1 then -2
    #[test]
    fn test_negative_registry_sequence() {
        let mut registry = ConnectionRegistry::new(IdSign::Negative);
        assert_eq!(registry.create(), ConnectionId::from(-1));
        assert_eq!(registry.create(), ConnectionId::from(-2));
    }

    /// WHY: Unknown ids must read as finished so pollers never spin
    /// WHAT: `get` of a never-issued id returns the invalid sentinel
    #[test]
    fn test_unknown_id_returns_invalid_sentinel() {
        let registry = ConnectionRegistry::default();
        let conn = registry.get(ConnectionId::from(42));
        assert!(!conn.is_valid());
        assert!(conn.is_finished());
        assert!(!conn.is_active());
    }

    /// WHY: Removal reports presence exactly once
    /// WHAT: First remove returns true, second returns false, lookup is invalid
    #[test]
    fn test_remove_reports_presence() {
        let mut registry = ConnectionRegistry::default();
        let id = registry.create();
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(!registry.get(id).is_valid());
    }

    /// WHY: The counter wraps without ever yielding the reserved id 0
    /// WHAT: Starting one below the wrap point yields MAX-1, then 1
    #[test]
    fn test_counter_wraps_past_zero() {
        let mut registry = ConnectionRegistry::with_counter(IdSign::Positive, i32::MAX - 1);
        assert_eq!(registry.create(), ConnectionId::from(i32::MAX - 1));
        assert_eq!(registry.create(), ConnectionId::from(1));
        assert_eq!(registry.create(), ConnectionId::from(2));
    }

    /// WHY: Opposite-sign registries partition the id space
    /// WHAT: Ids from a positive and a negative registry never intersect
    #[test]
    fn test_opposite_signs_never_collide() {
        let mut plain = ConnectionRegistry::new(IdSign::Positive);
        let mut wide = ConnectionRegistry::new(IdSign::Negative);

        let plain_ids: Vec<i32> = (0..1000).map(|_| plain.create().as_raw()).collect();
        let wide_ids: Vec<i32> = (0..1000).map(|_| wide.create().as_raw()).collect();

        assert!(plain_ids.iter().all(|id| *id > 0));
        assert!(wide_ids.iter().all(|id| *id < 0));
        assert!(plain_ids.iter().all(|id| !wide_ids.contains(id)));
    }

    /// WHY: A fresh connection is idle and not finished
    /// WHAT: Created records are valid, inactive, with zeroed response
    #[test]
    fn test_fresh_connection_is_idle() {
        let mut registry = ConnectionRegistry::default();
        let id = registry.create();
        let conn = registry.get(id);
        assert!(conn.is_valid());
        assert!(!conn.is_active());
        assert!(!conn.is_finished());
        assert!(conn.request().is_none());
        assert_eq!(conn.response().code, 0);
        assert_eq!(conn.response().error_code, 0);
    }
}
