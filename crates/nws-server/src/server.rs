//! Shared server state (spec.md section 5: "there is no parallelism inside
//! the core"). A single mutex guards the whole [`Registry`] plus the
//! table of parked clients -- every command runs to completion before the
//! next one starts, exactly like the original's single-threaded reactor,
//! just expressed as "hold the lock for the duration of a dispatch" rather
//! than "only one thread exists".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nws_core::{ClientId, InternalName, Registry, Vid};
use nws_wire::{NameValueMap, Value};
use tokio::sync::{oneshot, Mutex, Notify};

use crate::config::ServerConfig;
use crate::tls::{NoTls, TlsUpgrader};

/// What a parked client is eventually told, once some other connection's
/// command produces a value or purges the variable it was waiting on.
#[derive(Debug)]
pub enum Delivery {
    Value {
        value: Value,
        metadata: NameValueMap,
        cookie: (Vid, u64),
    },
    Purged,
}

/// Everything the dispatch loop touches while holding the single lock.
pub struct ServerState {
    pub registry: Registry,
    waiting: HashMap<ClientId, oneshot::Sender<Delivery>>,
    /// Process-unique suffix appended to every `mktemp ws` name, derived
    /// once at startup the same way the original derives it from its own
    /// throwaway temp file's basename (`nwss/server.py`'s `startFactory`).
    pub basename: String,
}

impl ServerState {
    fn new(basename: String) -> Self {
        ServerState {
            registry: Registry::new(),
            waiting: HashMap::new(),
            basename,
        }
    }

    /// Registers `client` as parked, to be woken by a later [`ServerState::deliver`]
    /// or [`ServerState::deliver_purged`]. Called while still holding the
    /// server lock, right before the caller drops it to await the other
    /// end of `rx`.
    pub fn park(&mut self, client: ClientId, tx: oneshot::Sender<Delivery>) {
        self.waiting.insert(client, tx);
    }

    /// Removes `client` from the parked set without waking it -- used when
    /// a disconnect races a park (the connection task is about to drop the
    /// receiver anyway, so a missing entry here is not an error).
    pub fn unpark(&mut self, client: ClientId) {
        self.waiting.remove(&client);
    }

    /// Delivers every release a store/barrier-join produced to whichever
    /// of them are still parked. A release for a client that already
    /// disconnected (and so is no longer in `waiting`) is silently
    /// dropped -- its connection task is tearing down on its own.
    pub fn deliver(&mut self, released: Vec<nws_core::Release>) {
        for r in released {
            if let Some(tx) = self.waiting.remove(&r.client) {
                let _ = tx.send(Delivery::Value {
                    value: r.value,
                    metadata: r.metadata,
                    cookie: r.cookie,
                });
            }
        }
    }

    /// Delivers "Variable purged." to every client id a `delete var`,
    /// `delete ws`, owned-workspace purge, or shutdown purge produced.
    pub fn deliver_purged(&mut self, client_ids: Vec<ClientId>) {
        for id in client_ids {
            if let Some(tx) = self.waiting.remove(&id) {
                let _ = tx.send(Delivery::Purged);
            }
        }
    }
}

/// The whole server: shared state plus the bits every connection needs a
/// handle to (the next client id, the shutdown signal, and the static
/// configuration).
pub struct Server {
    pub state: Mutex<ServerState>,
    pub shutdown: Notify,
    pub config: ServerConfig,
    pub tls: Box<dyn TlsUpgrader>,
    next_client_id: AtomicU64,
}

impl Server {
    pub fn new(config: ServerConfig, basename: String) -> Arc<Server> {
        Arc::new(Server {
            state: Mutex::new(ServerState::new(basename)),
            shutdown: Notify::new(),
            config,
            tls: Box::new(NoTls),
            next_client_id: AtomicU64::new(1),
        })
    }

    pub fn next_client_id(&self) -> ClientId {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Runs the full disconnect teardown for a connection that owned
    /// `owned` workspaces: purges every non-persistent one, delivering
    /// "Variable purged." to whoever else was parked on them (spec.md
    /// section 4.B teardown; SPEC_FULL.md B.6).
    pub async fn purge_owned(&self, owned: &[InternalName]) {
        let mut state = self.state.lock().await;
        let purges = state.registry.purge_for_owned(owned);
        for (_, client_ids) in purges {
            state.deliver_purged(client_ids);
        }
    }

    /// Global shutdown teardown (deadman-triggered close; spec.md section
    /// 4.B / SPEC_FULL.md B.7): purges every remaining workspace.
    pub async fn purge_all(&self) {
        let mut state = self.state.lock().await;
        let purges = state.registry.purge_all();
        for (_, client_ids) in purges {
            state.deliver_purged(client_ids);
        }
    }
}
