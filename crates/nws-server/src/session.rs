//! Per-connection state (spec.md section 3, "Connection state"): the
//! client's own view of external-to-internal workspace names, the set of
//! workspaces it owns, negotiated options, and session statistics.

use std::collections::HashMap;

use nws_core::{ClientId, InternalName};

/// Options negotiated during the handshake (spec.md section 4.B).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnOptions {
    pub metadata_to_server: bool,
    pub metadata_from_server: bool,
    pub deadman: bool,
    /// Long replies carry the 20-byte vid + 20-byte index cookie fields
    /// (modern/quirk handshake) versus the legacy 2-field preamble.
    pub cookie_mode: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub num_operations: u64,
    pub num_long_values: u64,
    pub last_op: Option<(String, String)>,
}

impl SessionStats {
    pub fn mark_operation(&mut self, name: &str, at: impl Into<String>) {
        self.num_operations += 1;
        self.last_op = Some((name.to_string(), at.into()));
    }

    pub fn mark_long_value(&mut self) {
        self.num_long_values += 1;
    }
}

/// A connected client. Lives for the duration of one TCP connection;
/// dropped (and its workspace-name view with it) on disconnect -- the
/// registry-level cleanup (purging owned non-persistent workspaces) is a
/// separate step the connection task drives explicitly before dropping
/// this.
pub struct Session {
    pub id: ClientId,
    pub peer: String,
    pub workspace_names: HashMap<String, InternalName>,
    pub owned: Vec<InternalName>,
    pub options: ConnOptions,
    pub stats: SessionStats,
}

impl Session {
    pub fn new(id: ClientId, peer: String) -> Self {
        Session {
            id,
            peer,
            workspace_names: HashMap::new(),
            owned: Vec::new(),
            options: ConnOptions::default(),
            stats: SessionStats::default(),
        }
    }

    /// Records that this client has opened (and may now use) `int_name`
    /// under the external name it just referenced -- the client's own
    /// snapshot, which a later `delete+recreate` by someone else leaves
    /// stale until this client references the name again (DESIGN NOTES,
    /// "two-level workspace naming").
    pub fn set_view(&mut self, ext_name: &str, int_name: InternalName) {
        self.workspace_names.insert(ext_name.to_string(), int_name);
    }

    pub fn view(&self, ext_name: &str) -> Option<&InternalName> {
        self.workspace_names.get(ext_name)
    }

    pub fn forget_view(&mut self, ext_name: &str) {
        self.workspace_names.remove(ext_name);
    }

    pub fn claim_owned(&mut self, int_name: InternalName) {
        if !self.owned.contains(&int_name) {
            self.owned.push(int_name);
        }
    }

    pub fn forget_owned(&mut self, int_name: &InternalName) {
        self.owned.retain(|n| n != int_name);
    }
}
