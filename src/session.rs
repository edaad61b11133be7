//! Client sessions and the connection registry
//!
//! One `Client` per authenticated connection, created on a successful
//! handshake and destroyed on disconnect or transport failure. The
//! `ClientManager` map is the only structure shared across connections;
//! everything inside a `Client` is touched by its own message pump only,
//! one dispatch at a time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, ServerError};
use crate::processor::{Authenticator, AuthenticatedUser};
use crate::statement::StatementManager;
use crate::transaction::TransactionCoordinator;

/// Namespace a session starts in unless the handshake selects another.
pub const DEFAULT_NAMESPACE: &str = "public";

/// Per-connection session state.
pub struct Client {
    pub uuid: String,
    pub user: AuthenticatedUser,
    pub namespace: String,
    pub auto_commit: bool,
    /// Open-ended client metadata (application name, etc.). Recognized
    /// connection properties live as typed fields above.
    pub client_info: HashMap<String, String>,
    pub statements: StatementManager,
    pub transactions: TransactionCoordinator,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("uuid", &self.uuid)
            .field("user", &self.user)
            .field("namespace", &self.namespace)
            .field("auto_commit", &self.auto_commit)
            .field("client_info", &self.client_info)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(uuid: String, user: AuthenticatedUser) -> Self {
        Client {
            uuid,
            user,
            namespace: DEFAULT_NAMESPACE.to_string(),
            auto_commit: true,
            client_info: HashMap::new(),
            statements: StatementManager::new(),
            transactions: TransactionCoordinator::new(),
        }
    }

    /// Release all statements and roll back any active transaction.
    /// Called exactly once per session, from `ClientManager::unregister`.
    pub fn dispose(&mut self) {
        let open = self.statements.statement_count();
        if open > 0 {
            debug!(client = %self.uuid, statements = open, "releasing open statements");
        }
        self.statements.close_all();
        if let Err(e) = self.transactions.rollback() {
            warn!(client = %self.uuid, error = %e, "rollback on disposal failed");
        }
    }
}

/// Connection registry: one session per live connection identifier.
#[derive(Default)]
pub struct ClientManager {
    clients: RwLock<HashMap<String, Arc<Mutex<Client>>>>,
}

/// Handshake fields the registry needs to create a session.
pub struct Registration<'a> {
    pub client_uuid: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub auto_commit: Option<bool>,
    pub namespace: Option<&'a str>,
}

impl ClientManager {
    pub fn new() -> Self {
        ClientManager { clients: RwLock::new(HashMap::new()) }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    /// Authenticate and create a session. Rejects a second handshake for an
    /// identifier that is already registered.
    pub fn register(
        &self,
        auth: &dyn Authenticator,
        registration: Registration<'_>,
    ) -> Result<Arc<Mutex<Client>>> {
        if self.clients.read().unwrap().contains_key(registration.client_uuid) {
            return Err(ServerError::AlreadyConnected(registration.client_uuid.to_string()));
        }
        let user = auth.authenticate(registration.username, registration.password)?;

        let mut client = Client::new(registration.client_uuid.to_string(), user);
        if let Some(auto_commit) = registration.auto_commit {
            client.auto_commit = auto_commit;
        }
        if let Some(namespace) = registration.namespace {
            client.namespace = namespace.to_string();
        }

        let client = Arc::new(Mutex::new(client));
        let mut clients = self.clients.write().unwrap();
        // Re-check under the write lock; two racing handshakes with the
        // same UUID must not both register.
        if clients.contains_key(registration.client_uuid) {
            return Err(ServerError::AlreadyConnected(registration.client_uuid.to_string()));
        }
        clients.insert(registration.client_uuid.to_string(), Arc::clone(&client));
        Ok(client)
    }

    pub fn lookup(&self, uuid: &str) -> Result<Arc<Mutex<Client>>> {
        self.clients
            .read()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| ServerError::NotRegistered(uuid.to_string()))
    }

    /// Remove a session, releasing its statements and rolling back any
    /// active transaction. Idempotent.
    pub async fn unregister(&self, uuid: &str) {
        let removed = self.clients.write().unwrap().remove(uuid);
        if let Some(client) = removed {
            client.lock().await.dispose();
            debug!(client = %uuid, "session unregistered");
        }
    }
}
