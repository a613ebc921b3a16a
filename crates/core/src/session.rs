//! Downstream connection sessions and the registry that owns them.
//!
//! Sessions are keyed by [`SessionKey`], derived from the server id and its
//! connection parameters. When a server's parameters change, the next
//! lookup produces a new key; the manager then retires every session still
//! registered for that server before installing the new one, so a server
//! never has two registered sessions at once.

use crate::error::{GatewayError, GatewayResult};
use crate::transport::{DownstreamClient, TransportFactory};
use crate::types::{
    ConnectionParams, DeclaredCapabilities, DownstreamServerDescriptor, Invocation, ServerId,
    SessionKey,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Default bound on transport open + handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One live transport and protocol client for one downstream server
pub struct ConnectionSession {
    key: SessionKey,
    server_id: ServerId,
    client: Box<dyn DownstreamClient>,
    closed: AtomicBool,
}

impl ConnectionSession {
    pub fn new(key: SessionKey, server_id: ServerId, client: Box<dyn DownstreamClient>) -> Self {
        Self {
            key,
            server_id,
            client,
            closed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn list_capabilities(&self) -> GatewayResult<DeclaredCapabilities> {
        self.ensure_open()?;
        self.client.list_capabilities().await
    }

    pub async fn invoke(&self, invocation: Invocation) -> GatewayResult<serde_json::Value> {
        self.ensure_open()?;
        self.client.invoke(invocation).await
    }

    /// Close the transport. Only the first call reaches the client.
    pub async fn close(&self) -> GatewayResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(server_id = %self.server_id, session_key = %self.key, "closing session");
        self.client.close().await
    }

    fn ensure_open(&self) -> GatewayResult<()> {
        if self.is_closed() {
            return Err(GatewayError::transport(
                self.server_id.as_str(),
                "session has been closed",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("key", &self.key)
            .field("server_id", &self.server_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Registered session, possibly still being opened
type SessionSlot = Arc<OnceCell<Arc<ConnectionSession>>>;

struct RegistryEntry {
    server_id: ServerId,
    slot: SessionSlot,
}

/// Keyed registry of connection sessions
pub struct SessionManager {
    factory: Arc<dyn TransportFactory>,
    connect_timeout: Duration,
    sessions: Mutex<HashMap<SessionKey, RegistryEntry>>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_connect_timeout(factory, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(factory: Arc<dyn TransportFactory>, connect_timeout: Duration) -> Self {
        Self {
            factory,
            connect_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Session for a descriptor, keyed by its current connection parameters
    pub async fn session_for(
        &self,
        descriptor: &DownstreamServerDescriptor,
    ) -> Option<Arc<ConnectionSession>> {
        self.get_session(&descriptor.session_key(), &descriptor.id, &descriptor.connection)
            .await
    }

    /// Return the live session for `key`, opening one if needed.
    ///
    /// `None` means the server is unreachable right now; the reason is
    /// logged. Concurrent callers with the same key share a single open.
    pub async fn get_session(
        &self,
        key: &SessionKey,
        server_id: &ServerId,
        params: &ConnectionParams,
    ) -> Option<Arc<ConnectionSession>> {
        let (slot, stale) = {
            let mut sessions = self.lock();

            let existing = sessions.get(key).map(|entry| entry.slot.clone());
            if let Some(slot) = existing {
                if let Some(session) = slot.get() {
                    return Some(session.clone());
                }
                (slot, Vec::new())
            } else {
                let stale_keys: Vec<SessionKey> = sessions
                    .iter()
                    .filter(|(k, entry)| entry.server_id == *server_id && *k != key)
                    .map(|(k, _)| k.clone())
                    .collect();

                let stale: Vec<Arc<ConnectionSession>> = stale_keys
                    .iter()
                    .filter_map(|k| sessions.remove(k))
                    // A slot still opening notices it was dropped and closes itself
                    .filter_map(|entry| entry.slot.get().cloned())
                    .collect();

                let slot: SessionSlot = Arc::new(OnceCell::new());
                sessions.insert(
                    key.clone(),
                    RegistryEntry {
                        server_id: server_id.clone(),
                        slot: slot.clone(),
                    },
                );
                (slot, stale)
            }
        };

        if !stale.is_empty() {
            info!(
                server_id = %server_id,
                superseded = stale.len(),
                "connection parameters changed, retiring old session"
            );
            spawn_teardown(stale);
        }

        let opened = slot
            .get_or_try_init(|| self.open(key, server_id, params))
            .await
            .cloned();

        match opened {
            Ok(session) => {
                if self.is_registered(key, &slot) {
                    Some(session)
                } else {
                    debug!(server_id = %server_id, session_key = %key, "session superseded while opening");
                    spawn_teardown(vec![session]);
                    None
                }
            }
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "failed to open session");
                self.remove_if_same(key, &slot);
                None
            }
        }
    }

    /// Close and forget the session registered for a server, if any
    pub async fn close_server(&self, server_id: &ServerId) {
        let sessions: Vec<Arc<ConnectionSession>> = {
            let mut registry = self.lock();
            let keys: Vec<SessionKey> = registry
                .iter()
                .filter(|(_, entry)| entry.server_id == *server_id)
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter()
                .filter_map(|k| registry.remove(k))
                .filter_map(|entry| entry.slot.get().cloned())
                .collect()
        };

        close_all(sessions).await;
    }

    /// Close every live session concurrently and clear the registry
    pub async fn cleanup_all(&self) {
        let sessions: Vec<Arc<ConnectionSession>> = {
            let mut registry = self.lock();
            registry
                .drain()
                .filter_map(|(_, entry)| entry.slot.get().cloned())
                .collect()
        };

        info!(count = sessions.len(), "closing all downstream sessions");
        close_all(sessions).await;
    }

    /// Number of registered sessions, including ones still opening
    pub fn live_sessions(&self) -> usize {
        self.lock().len()
    }

    /// Server ids that currently have a registered session
    pub fn server_ids(&self) -> Vec<ServerId> {
        let mut ids: Vec<ServerId> = self
            .lock()
            .values()
            .map(|entry| entry.server_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    async fn open(
        &self,
        key: &SessionKey,
        server_id: &ServerId,
        params: &ConnectionParams,
    ) -> GatewayResult<Arc<ConnectionSession>> {
        debug!(server_id = %server_id, transport = params.kind(), "opening session");

        let client = tokio::time::timeout(self.connect_timeout, self.factory.open(server_id, params))
            .await
            .map_err(|_| {
                GatewayError::unreachable(
                    server_id,
                    format!("connect timed out after {}ms", self.connect_timeout.as_millis()),
                )
            })??;

        info!(server_id = %server_id, session_key = %key, "session opened");
        Ok(Arc::new(ConnectionSession::new(
            key.clone(),
            server_id.clone(),
            client,
        )))
    }

    fn is_registered(&self, key: &SessionKey, slot: &SessionSlot) -> bool {
        self.lock()
            .get(key)
            .map_or(false, |entry| Arc::ptr_eq(&entry.slot, slot))
    }

    fn remove_if_same(&self, key: &SessionKey, slot: &SessionSlot) {
        let mut sessions = self.lock();
        if sessions
            .get(key)
            .map_or(false, |entry| Arc::ptr_eq(&entry.slot, slot))
        {
            sessions.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, RegistryEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Close sessions on a detached task; failures are only logged
fn spawn_teardown(sessions: Vec<Arc<ConnectionSession>>) {
    tokio::spawn(close_all(sessions));
}

async fn close_all(sessions: Vec<Arc<ConnectionSession>>) {
    let closes = sessions.into_iter().map(|session| async move {
        if let Err(e) = session.close().await {
            warn!(server_id = %session.server_id(), error = %e, "error while closing session");
        }
    });
    futures::future::join_all(closes).await;
}
