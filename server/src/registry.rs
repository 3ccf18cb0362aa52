//! Connection registry: maps admitted tokens to live stream handles.
//!
//! The registry is owned by the session server and guarded by its own lock,
//! separate from the session's game state, so a slow or dead network peer
//! never blocks action processing. A connection here is the network-side
//! binding for a player; removing it does not remove the player's record
//! from the session.

use log::info;
use shared::Packet;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmitError {
    #[error("the server is full")]
    ServerFull,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("token not recognized")]
    Unauthenticated,
    #[error("stream already active")]
    StreamAlreadyActive,
}

/// Why a connection's serving task was told to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientTimeout => write!(f, "client timeout"),
        }
    }
}

/// One admitted player's network binding. `outbound` stays `None` until
/// the player opens their duplex stream.
pub struct Connection {
    pub token: Uuid,
    pub name: String,
    pub outbound: Option<mpsc::UnboundedSender<Packet>>,
    pub last_activity: Instant,
    close_tx: Option<oneshot::Sender<CloseReason>>,
}

pub struct ConnectionRegistry {
    connections: HashMap<Uuid, Connection>,
    capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: HashMap::new(),
            capacity,
        }
    }

    /// Admits a player and mints their token. The token doubles as the
    /// player id for the session.
    pub fn admit(&mut self, name: &str) -> Result<Uuid, AdmitError> {
        if self.connections.len() >= self.capacity {
            return Err(AdmitError::ServerFull);
        }

        let token = Uuid::new_v4();
        self.connections.insert(
            token,
            Connection {
                token,
                name: name.to_string(),
                outbound: None,
                last_activity: Instant::now(),
                close_tx: None,
            },
        );
        info!("admitted {} as {}", name, token);

        Ok(token)
    }

    /// Binds a live stream to an admitted token. At most one stream per
    /// token.
    pub fn attach(
        &mut self,
        token: Uuid,
        outbound: mpsc::UnboundedSender<Packet>,
        close_tx: oneshot::Sender<CloseReason>,
    ) -> Result<(), AttachError> {
        let conn = self
            .connections
            .get_mut(&token)
            .ok_or(AttachError::Unauthenticated)?;

        if conn.outbound.is_some() {
            return Err(AttachError::StreamAlreadyActive);
        }

        conn.outbound = Some(outbound);
        conn.close_tx = Some(close_tx);
        conn.last_activity = Instant::now();
        Ok(())
    }

    /// Refreshes the liveness timestamp. Called for every inbound frame.
    pub fn touch(&mut self, token: Uuid) {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.last_activity = Instant::now();
        }
    }

    /// Removes the connection. The session keeps the player's record.
    pub fn detach(&mut self, token: Uuid) -> bool {
        if let Some(conn) = self.connections.remove(&token) {
            info!("connection {} removed", conn.token);
            true
        } else {
            false
        }
    }

    /// Stream handle for one player, if they are attached.
    pub fn outbound_for(&self, token: Uuid) -> Option<mpsc::UnboundedSender<Packet>> {
        self.connections
            .get(&token)
            .and_then(|conn| conn.outbound.clone())
    }

    /// All attached stream handles, for broadcast fan-out.
    pub fn attached(&self) -> Vec<(Uuid, mpsc::UnboundedSender<Packet>)> {
        self.connections
            .values()
            .filter_map(|conn| conn.outbound.clone().map(|out| (conn.token, out)))
            .collect()
    }

    /// Collects the close signals of connections idle past `timeout`.
    /// Each signal is taken out of its connection so an eviction fires at
    /// most once; admitted-but-never-attached connections have no serving
    /// task and are dropped directly.
    pub fn take_idle(&mut self, timeout: Duration) -> Vec<(Uuid, oneshot::Sender<CloseReason>)> {
        let mut signals = Vec::new();
        let mut orphans = Vec::new();

        for conn in self.connections.values_mut() {
            if conn.last_activity.elapsed() <= timeout {
                continue;
            }
            match conn.close_tx.take() {
                Some(close_tx) => signals.push((conn.token, close_tx)),
                None if conn.outbound.is_none() => orphans.push(conn.token),
                None => {}
            }
        }

        for token in orphans {
            info!("dropping idle unattached connection {}", token);
            self.connections.remove(&token);
        }

        signals
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_handle() -> (
        mpsc::UnboundedSender<Packet>,
        mpsc::UnboundedReceiver<Packet>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn admit_up_to_capacity() {
        let mut registry = ConnectionRegistry::new(2);

        assert!(registry.admit("alice").is_ok());
        assert!(registry.admit("bob").is_ok());
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.admit("carol"), Err(AdmitError::ServerFull));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn attach_requires_known_token() {
        let mut registry = ConnectionRegistry::new(1);
        let (out, _rx) = stream_handle();
        let (close_tx, _close_rx) = oneshot::channel();

        assert_eq!(
            registry.attach(Uuid::new_v4(), out, close_tx),
            Err(AttachError::Unauthenticated)
        );
    }

    #[test]
    fn second_attach_is_rejected() {
        let mut registry = ConnectionRegistry::new(1);
        let token = registry.admit("alice").unwrap();

        let (out1, _rx1) = stream_handle();
        let (close1, _c1) = oneshot::channel();
        assert!(registry.attach(token, out1, close1).is_ok());

        let (out2, _rx2) = stream_handle();
        let (close2, _c2) = oneshot::channel();
        assert_eq!(
            registry.attach(token, out2, close2),
            Err(AttachError::StreamAlreadyActive)
        );
    }

    #[test]
    fn detach_frees_the_slot_for_readmission() {
        let mut registry = ConnectionRegistry::new(1);
        let token = registry.admit("alice").unwrap();

        assert_eq!(registry.admit("bob"), Err(AdmitError::ServerFull));
        assert!(registry.detach(token));
        assert!(!registry.detach(token));
        assert!(registry.admit("bob").is_ok());
    }

    #[test]
    fn attached_lists_only_streams() {
        let mut registry = ConnectionRegistry::new(3);
        let a = registry.admit("alice").unwrap();
        let _b = registry.admit("bob").unwrap();

        let (out, _rx) = stream_handle();
        let (close_tx, _close_rx) = oneshot::channel();
        registry.attach(a, out, close_tx).unwrap();

        let attached = registry.attached();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].0, a);
        assert!(registry.outbound_for(a).is_some());
    }

    #[test]
    fn take_idle_fires_once_per_connection() {
        let mut registry = ConnectionRegistry::new(2);
        let a = registry.admit("alice").unwrap();

        let (out, _rx) = stream_handle();
        let (close_tx, mut close_rx) = oneshot::channel();
        registry.attach(a, out, close_tx).unwrap();

        let idle = registry.take_idle(Duration::from_secs(0));
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].0, a);

        // Signal already taken; a second sweep finds nothing.
        assert!(registry.take_idle(Duration::from_secs(0)).is_empty());

        let (_, close) = idle.into_iter().next().unwrap();
        close.send(CloseReason::ClientTimeout).unwrap();
        assert_eq!(close_rx.try_recv().unwrap(), CloseReason::ClientTimeout);
    }

    #[test]
    fn take_idle_drops_unattached_connections() {
        let mut registry = ConnectionRegistry::new(2);
        registry.admit("alice").unwrap();

        let idle = registry.take_idle(Duration::from_secs(0));
        assert!(idle.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn fresh_connections_are_not_idle() {
        let mut registry = ConnectionRegistry::new(2);
        let a = registry.admit("alice").unwrap();

        let (out, _rx) = stream_handle();
        let (close_tx, _close_rx) = oneshot::channel();
        registry.attach(a, out, close_tx).unwrap();
        registry.touch(a);

        assert!(registry.take_idle(Duration::from_secs(60)).is_empty());
        assert_eq!(registry.len(), 1);
    }
}
