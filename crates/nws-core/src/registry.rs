//! The workspace registry (spec.md section 4.F, "service"): the
//! external-name-to-internal-name indirection, the internal-name-to-
//! [`Workspace`] map, and the housekeeping operations (`open`/`use ws`,
//! `mktemp ws`, `delete ws`, client disconnect cleanup) that don't belong
//! to any single workspace.
//!
//! Connection registration, per-connection owned-workspace bookkeeping and
//! verb dispatch live in `nws-server`; this crate only owns the data these
//! operations act on (DESIGN NOTES, "two-level workspace naming").

use std::collections::HashMap;

use crate::container::ClientId;
use crate::error::Failure;
use crate::workspace::Workspace;

/// `(external_name, creation_counter)` -- distinguishes successive
/// incarnations of the same external name across delete+recreate (spec.md
/// section 3, Workspace; DESIGN NOTES "two-level workspace naming").
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InternalName(String, u64);

impl InternalName {
    pub fn external_name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InternalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.0, self.1)
    }
}

const DEFAULT_WORKSPACE: &str = "__default";
const MKTEMP_ATTEMPTS: u32 = 1000;

pub struct Registry {
    ext_to_int: HashMap<String, InternalName>,
    spaces: HashMap<InternalName, Workspace>,
    counter: u64,
}

impl Registry {
    /// A fresh registry, pre-populated with the `__default` workspace the
    /// original server always creates at startup: owned by `"[system]"`,
    /// persistent, so it survives every client's disconnect
    /// (`nwss/server.py`'s `NwsService.__init__`; see DESIGN.md).
    pub fn new() -> Self {
        let mut reg = Registry {
            ext_to_int: HashMap::new(),
            spaces: HashMap::new(),
            counter: 1,
        };
        let default_name = InternalName(DEFAULT_WORKSPACE.to_string(), 0);
        let mut default_ws = Workspace::new(DEFAULT_WORKSPACE);
        default_ws.set_owner_info("[system]", true);
        reg.ext_to_int
            .insert(DEFAULT_WORKSPACE.to_string(), default_name.clone());
        reg.spaces.insert(default_name, default_ws);
        reg
    }

    /// `reference_space`: looks up `ext_name`, creating it (as a fresh
    /// internal name with a bumped counter) if unknown and `create` is
    /// true. Returns `None` if unknown and `create` is false -- the
    /// caller reports "no such workspace".
    pub fn reference_space(&mut self, ext_name: &str, create: bool) -> Option<InternalName> {
        if let Some(int_name) = self.ext_to_int.get(ext_name) {
            return Some(int_name.clone());
        }
        if !create {
            return None;
        }
        let int_name = InternalName(ext_name.to_string(), self.counter);
        self.counter += 1;
        self.spaces.insert(int_name.clone(), Workspace::new(ext_name));
        self.ext_to_int.insert(ext_name.to_string(), int_name.clone());
        Some(int_name)
    }

    pub fn get(&self, int_name: &InternalName) -> Option<&Workspace> {
        self.spaces.get(int_name)
    }

    pub fn get_mut(&mut self, int_name: &InternalName) -> Option<&mut Workspace> {
        self.spaces.get_mut(int_name)
    }

    /// `open ws` / `use ws`: references the space, and if `claim_owner` is
    /// set (only for `open ws`), stamps ownership/persistence -- a no-op
    /// if the space was already owned by someone else (spec.md section
    /// 4.F).
    pub fn open_or_use(
        &mut self,
        ext_name: &str,
        create: bool,
        claim_owner: bool,
        owner: impl Into<String>,
        persistent: bool,
    ) -> Option<InternalName> {
        let int_name = self.reference_space(ext_name, create)?;
        if claim_owner {
            if let Some(ws) = self.spaces.get_mut(&int_name) {
                ws.set_owner_info(owner, persistent);
            }
        }
        Some(int_name)
    }

    /// `delete ws`: removes both the external-name mapping and the
    /// workspace itself, purging its variables. Returns the client ids
    /// that were parked on one of its variables and must be told
    /// "Variable purged." (spec.md section 8, property 5: no later
    /// command reaches a handler through the old internal name).
    pub fn delete_workspace(&mut self, ext_name: &str) -> Result<Vec<ClientId>, Failure> {
        let int_name = self
            .ext_to_int
            .get(ext_name)
            .cloned()
            .ok_or_else(|| Failure::no_such_workspace(ext_name))?;
        let mut ws = self
            .spaces
            .remove(&int_name)
            .ok_or_else(|| Failure::no_such_workspace(ext_name))?;
        // Only drop the ext->int mapping if nothing re-created this name
        // in the meantime -- it can't in our single-threaded dispatch
        // loop, but this keeps the invariant explicit rather than relying
        // on timing (see DESIGN.md for the original's unconditional pop).
        if self.ext_to_int.get(ext_name) == Some(&int_name) {
            self.ext_to_int.remove(ext_name);
        }
        Ok(ws.purge())
    }

    /// Purges every workspace in `owned` whose persistent flag is false
    /// (spec.md section 4.B teardown / section 8 property 6). Unowned and
    /// persistent spaces are left untouched. Returns, per purged space,
    /// the client ids that must be told "Variable purged.".
    pub fn purge_for_owned(
        &mut self,
        owned: &[InternalName],
    ) -> Vec<(InternalName, Vec<ClientId>)> {
        let mut out = Vec::new();
        for int_name in owned {
            let Some(ws) = self.spaces.get(int_name) else {
                continue;
            };
            if ws.persistent() {
                continue;
            }
            let mut ws = self.spaces.remove(int_name).expect("just checked present");
            if self.ext_to_int.get(ws.name()) == Some(int_name) {
                self.ext_to_int.remove(ws.name());
            }
            out.push((int_name.clone(), ws.purge()));
        }
        out
    }

    /// Global shutdown: purges every remaining workspace, best-effort
    /// (spec.md section 4.F).
    pub fn purge_all(&mut self) -> Vec<(InternalName, Vec<ClientId>)> {
        let names: Vec<InternalName> = self.spaces.keys().cloned().collect();
        let mut out = Vec::with_capacity(names.len());
        for int_name in names {
            if let Some(mut ws) = self.spaces.remove(&int_name) {
                out.push((int_name, ws.purge()));
            }
        }
        self.ext_to_int.clear();
        out
    }

    /// `mktemp ws`: tries `template % counter + basename` up to 1000
    /// times, stepping the shared workspace-creation counter on every
    /// attempt (matching `nwss/server.py`'s `cmd_make_temp_workspace`,
    /// which consumes counter values on collisions too). `basename` is a
    /// process-unique suffix the caller derives once at startup (spec.md
    /// section 4.F).
    pub fn mktemp(&mut self, template: &str, basename: &str) -> Result<String, crate::Error> {
        for _ in 0..MKTEMP_ATTEMPTS {
            let n = self.counter;
            self.counter += 1;
            let candidate = format_template(template, n)
                .map_err(|_| crate::Error::MktempFailed(format!("bad template {template:?}")))?;
            let candidate = format!("{candidate}{basename}");
            if !self.ext_to_int.contains_key(&candidate) {
                self.reference_space(&candidate, true)
                    .expect("just confirmed the name is free");
                return Ok(candidate);
            }
        }
        Err(crate::Error::MktempFailed(format!(
            "failed to generate a unique name using {template:?}"
        )))
    }

    /// `list wss`: one formatted line per workspace (all, or just
    /// `only_ext_name` if given), sorted by external name for determinism
    /// (spec.md section 6 / SPEC_FULL.md section B.2).
    pub fn list_wss(&self, owned: &[InternalName], only_ext_name: Option<&str>) -> Vec<String> {
        let mut names: Vec<&String> = match only_ext_name {
            Some(name) => self.ext_to_int.keys().filter(|k| k.as_str() == name).collect(),
            None => self.ext_to_int.keys().collect(),
        };
        names.sort();
        names
            .into_iter()
            .filter_map(|ext_name| {
                let int_name = self.ext_to_int.get(ext_name)?;
                let ws = self.spaces.get(int_name)?;
                let marker = if owned.contains(int_name) { '>' } else { ' ' };
                Some(format!(
                    "{marker}{name}\t{owner}\t{persistent}\t{count}\t{csv}",
                    name = ext_name,
                    owner = ws.owner().unwrap_or(""),
                    persistent = if ws.persistent() { "True" } else { "False" },
                    count = ws.var_count(),
                    csv = ws.var_names_csv(),
                ))
            })
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

/// Minimal `"template % n"` support: exactly one `%d` placeholder,
/// replaced with `n`'s decimal rendering. Zero or multiple placeholders
/// are a bad-template error, matching Python's `%` operator rejecting a
/// scalar argument against a format string that doesn't have exactly one
/// conversion spec.
fn format_template(template: &str, n: u64) -> Result<String, ()> {
    if template.matches("%d").count() != 1 {
        return Err(());
    }
    Ok(template.replacen("%d", &n.to_string(), 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_workspace_is_preregistered_and_persistent() {
        let reg = Registry::new();
        let int_name = reg.reference_space_ro(DEFAULT_WORKSPACE);
        let ws = reg.get(&int_name).unwrap();
        assert_eq!(ws.owner(), Some("[system]"));
        assert!(ws.persistent());
    }

    #[test]
    fn reference_space_without_create_on_unknown_is_none() {
        let mut reg = Registry::new();
        assert!(reg.reference_space("nope", false).is_none());
    }

    #[test]
    fn delete_then_recreate_gives_a_distinct_internal_name() {
        let mut reg = Registry::new();
        let first = reg.reference_space("w", true).unwrap();
        reg.delete_workspace("w").unwrap();
        let second = reg.reference_space("w", true).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn mktemp_allocates_a_fresh_workspace_each_call() {
        let mut reg = Registry::new();
        let a = reg.mktemp("__ws__%d", "-abc").unwrap();
        let b = reg.mktemp("__ws__%d", "-abc").unwrap();
        assert_ne!(a, b);
        assert!(reg.reference_space(&a, false).is_some());
        assert!(reg.reference_space(&b, false).is_some());
    }

    #[test]
    fn mktemp_rejects_a_template_without_exactly_one_placeholder() {
        let mut reg = Registry::new();
        assert!(reg.mktemp("no-placeholder", "-x").is_err());
        assert!(reg.mktemp("%d-%d", "-x").is_err());
    }

    #[test]
    fn list_wss_marks_owned_spaces_and_sorts_by_name() {
        let mut reg = Registry::new();
        let zeta = reg.reference_space("zeta", true).unwrap();
        reg.reference_space("alpha", true).unwrap();
        let lines = reg.list_wss(&[zeta], None);
        assert_eq!(lines.len(), 3); // __default, alpha, zeta
        assert!(lines[0].starts_with(" __default\t"));
        assert!(lines[1].starts_with(" alpha\t"));
        assert!(lines[2].starts_with(">zeta\t"));
    }

    #[test]
    fn deleting_an_unknown_workspace_is_an_error() {
        let mut reg = Registry::new();
        let err = reg.delete_workspace("nope").unwrap_err();
        assert_eq!(err.status, nws_wire::Status::NO_SUCH_WORKSPACE.0);
    }

    impl Registry {
        fn reference_space_ro(&self, ext_name: &str) -> InternalName {
            self.ext_to_int.get(ext_name).unwrap().clone()
        }
    }
}
