//! A single named workspace (spec.md section 4.E): a name-to-[`Variable`]
//! binding table, ownership/persistence, and the hook extension points a
//! plugin workspace subclass would override in the original server.

use std::collections::{HashMap, HashSet};

use nws_wire::{NameValueMap, Value};

use crate::container::{ClientId, FetchOutcome, Release, StoreOutcome, Waiters};
use crate::error::Failure;
use crate::variable::{Mode, Variable};
use crate::vid::Vid;

/// Named callback points a custom workspace subclass could hook into the
/// original Python server (`__hook`/`hook_<name>`). The base workspace
/// defines none of them; this crate never builds the plugin loader that
/// would let a caller install a custom `Container`, but the hook surface
/// itself is cheap to keep so a caller embedding `nws-core` can still
/// observe lifecycle events.
#[allow(unused_variables)]
pub trait WorkspaceHooks: Send {
    fn created_ws(&mut self, ws: &str) {}
    fn destroyed_ws(&mut self, ws: &str) {}
    fn store_pre(&mut self, ws: &str, var: &str) {}
    fn store_post(&mut self, ws: &str, var: &str) {}
    fn fetch_pre(&mut self, ws: &str, var: &str) {}
    fn find_pre(&mut self, ws: &str, var: &str) {}
    fn delete_pre(&mut self, ws: &str, var: &str) {}
    fn delete_post(&mut self, ws: &str, var: &str) {}
    fn setowner_pre(&mut self, ws: &str, owner: &str) {}
    fn setowner_post(&mut self, ws: &str, owner: &str) {}
    fn purge_pre(&mut self, ws: &str) {}
    fn purge_post(&mut self, ws: &str) {}
}

#[derive(Default)]
pub struct NoopHooks;

impl WorkspaceHooks for NoopHooks {}

/// An iterated fetch/find's resume state: which variable it last touched
/// (to detect delete+recreate) and the next index to resume from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IterState {
    pub vid: Vid,
    pub index: u64,
}

pub struct Workspace {
    name: String,
    owner: Option<String>,
    persistent: bool,
    bindings: HashMap<String, Variable>,
    vids: HashSet<Vid>,
    hooks: Box<dyn WorkspaceHooks>,
}

impl Workspace {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut ws = Workspace {
            name: name.clone(),
            owner: None,
            persistent: false,
            bindings: HashMap::new(),
            vids: HashSet::new(),
            hooks: Box::new(NoopHooks),
        };
        ws.hooks.created_ws(&name);
        ws
    }

    pub fn with_hooks(name: impl Into<String>, hooks: Box<dyn WorkspaceHooks>) -> Self {
        let name = name.into();
        let mut ws = Workspace {
            name: name.clone(),
            owner: None,
            persistent: false,
            bindings: HashMap::new(),
            vids: HashSet::new(),
            hooks,
        };
        ws.hooks.created_ws(&name);
        ws
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    /// Sets ownership/persistence if nobody has claimed this workspace
    /// yet; a no-op (returning `false`) otherwise (spec.md section 4.F:
    /// "Subsequent open-ws calls on an already-owned space do not change
    /// ownership").
    pub fn set_owner_info(&mut self, owner: impl Into<String>, persistent: bool) -> bool {
        if self.is_owned() {
            return false;
        }
        let owner = owner.into();
        self.hooks.setowner_pre(&self.name, &owner);
        self.owner = Some(owner.clone());
        self.persistent = persistent;
        self.hooks.setowner_post(&self.name, &owner);
        true
    }

    fn allocate_vid(&mut self) -> Result<Vid, crate::error::Error> {
        let vid = Vid::allocate(&self.vids)?;
        self.vids.insert(vid);
        Ok(vid)
    }

    fn get_or_create(&mut self, name: &str) -> Result<&mut Variable, crate::error::Error> {
        if !self.bindings.contains_key(name) {
            let vid = self.allocate_vid()?;
            self.bindings
                .insert(name.to_string(), Variable::new(name, false, vid));
        }
        Ok(self.bindings.get_mut(name).unwrap())
    }

    /// `declare var`: creates the variable if missing (as `unknown`) and
    /// sets its mode.
    pub fn declare_var(&mut self, name: &str, mode: Mode) -> Result<(), crate::error::Error> {
        let var = self.get_or_create(name)?;
        var.set_mode(mode)?;
        Ok(())
    }

    /// Registers a hidden, internally-constructed constant variable
    /// (mirrors `create_standard_var`; never reachable via `declare
    /// var`'s wire grammar).
    pub fn declare_constant(
        &mut self,
        name: &str,
        value: Value,
    ) -> Result<(), crate::error::Error> {
        let vid = self.allocate_vid()?;
        self.bindings
            .insert(name.to_string(), Variable::constant(name, value, vid, true));
        Ok(())
    }

    fn check_iter_state(var: &Variable, iter: Option<IterState>) -> Result<(), Failure> {
        if let Some(iter) = iter {
            if iter.vid != var.vid() {
                return Err(Failure::generic("Variable id mismatch."));
            }
        }
        Ok(())
    }

    /// `fetch-var`: covers `fetch`/`fetchTry`/`ifetch`/`ifetchTry`. Like
    /// the original's `__get_var_object`, a name with no binding yet is
    /// auto-vivified as an `unknown` variable rather than rejected --
    /// "no such variable" is reachable only through `delete-var`.  The
    /// returned cookie always carries a concrete `(vid, index)`, filling
    /// in the container's default when it declined to name one.
    pub fn fetch_var(
        &mut self,
        name: &str,
        client: ClientId,
        blocking: bool,
        iter: Option<IterState>,
    ) -> Result<FetchVarOutcome, crate::error::Error> {
        let var = self.get_or_create(name)?;
        Self::check_iter_state(var, iter)?;
        self.hooks.fetch_pre(&self.name, name);
        let index = iter.map(|i| i.index);
        let (outcome, released) = var.fetch(client, blocking, index)?;
        Ok(Self::finish(var, outcome, released, iter))
    }

    /// `find-var`: covers `find`/`findTry`/`ifind`/`ifindTry`. Same
    /// auto-vivification rule as [`Workspace::fetch_var`].
    pub fn find_var(
        &mut self,
        name: &str,
        client: ClientId,
        blocking: bool,
        iter: Option<IterState>,
    ) -> Result<FetchVarOutcome, crate::error::Error> {
        let var = self.get_or_create(name)?;
        Self::check_iter_state(var, iter)?;
        self.hooks.find_pre(&self.name, name);
        let index = iter.map(|i| i.index);
        let (outcome, released) = var.find(client, blocking, index)?;
        Ok(Self::finish(var, outcome, released, iter))
    }

    fn finish(
        var: &Variable,
        outcome: FetchOutcome,
        released: Vec<Release>,
        iter: Option<IterState>,
    ) -> FetchVarOutcome {
        match outcome {
            FetchOutcome::Parked => FetchVarOutcome::Parked { released },
            FetchOutcome::Value {
                value,
                metadata,
                cookie,
            } => {
                let cookie = cookie.unwrap_or_else(|| {
                    let requested = iter.map(|i| i.index).unwrap_or(0);
                    (var.vid(), requested)
                });
                FetchVarOutcome::Value {
                    value,
                    metadata,
                    cookie,
                    released,
                }
            }
        }
    }

    /// `set-var` (`store`): auto-creates the variable as `unknown` (which
    /// then self-promotes to `fifo` on first store) the same way the
    /// original's `__get_var_object(name, create=True)` does.
    pub fn set_var(
        &mut self,
        name: &str,
        value: Value,
        metadata: NameValueMap,
    ) -> Result<StoreOutcome, crate::error::Error> {
        let var = self.get_or_create(name)?;
        self.hooks.store_pre(&self.name, name);
        let outcome = var.store(value, metadata)?;
        self.hooks.store_post(&self.name, name);
        Ok(outcome)
    }

    /// Barrier join: a `store` on a barrier-mode variable. Dispatch
    /// routes here instead of [`Workspace::set_var`] once it knows the
    /// variable's mode is `__barrier`.
    pub fn join_var(
        &mut self,
        name: &str,
        client: ClientId,
    ) -> Result<StoreOutcome, crate::error::Error> {
        let var = self.get_or_create(name)?;
        Ok(var.join(client)?)
    }

    /// `delete-var`: purges the variable's container (producing waiters
    /// that must be told "Variable purged.") and removes the binding.
    pub fn delete_var(&mut self, name: &str) -> Result<Vec<ClientId>, Failure> {
        self.hooks.delete_pre(&self.name, name);
        let mut var = self
            .bindings
            .remove(name)
            .ok_or_else(|| Failure::no_such_variable(name))?;
        self.vids.remove(&var.vid());
        let waiters = var.purge();
        self.hooks.delete_post(&self.name, name);
        Ok(all_waiters(waiters))
    }

    /// Evicts `client` from the named variable's waiter list, if the
    /// variable still exists (it may have been deleted concurrently with
    /// the disconnect that triggered this call; a no-op in that case).
    pub fn cancel_waiter(&mut self, name: &str, client: ClientId) {
        if let Some(var) = self.bindings.get_mut(name) {
            var.cancel_waiter(client);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.bindings.get(name)
    }

    /// `list vars`: every non-hidden binding, formatted and sorted by
    /// name for determinism (spec.md supplement B.2).
    pub fn list_vars(&self) -> Vec<String> {
        let mut names: Vec<&String> = self
            .bindings
            .iter()
            .filter(|(_, v)| !v.hidden())
            .map(|(k, _)| k)
            .collect();
        names.sort();
        names
            .into_iter()
            .map(|name| self.bindings[name].format_listing())
            .collect()
    }

    /// Comma-joined, sorted variable names, for `list wss`.
    pub fn var_names_csv(&self) -> String {
        let mut names: Vec<&String> = self
            .bindings
            .iter()
            .filter(|(_, v)| !v.hidden())
            .map(|(k, _)| k)
            .collect();
        names.sort();
        names
            .into_iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn var_count(&self) -> usize {
        self.bindings.values().filter(|v| !v.hidden()).count()
    }

    /// Purges every variable in this workspace (used on workspace
    /// deletion and on server shutdown); returns the waiters across all
    /// variables that must be told "Variable purged.".
    pub fn purge(&mut self) -> Vec<ClientId> {
        self.hooks.purge_pre(&self.name);
        let mut all = Vec::new();
        for (_, mut var) in self.bindings.drain() {
            all.extend(all_waiters(var.purge()));
        }
        self.vids.clear();
        self.hooks.purge_post(&self.name);
        all
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.hooks.destroyed_ws(&self.name);
    }
}

fn all_waiters(waiters: Waiters) -> Vec<ClientId> {
    let mut out: Vec<ClientId> = waiters.fetchers.into_iter().collect();
    out.extend(waiters.finders);
    out
}

/// The outcome of a fetch-var/find-var call, with any barrier/queue
/// hand-offs the caller must also deliver.
#[derive(Debug)]
pub enum FetchVarOutcome {
    Value {
        value: Value,
        metadata: NameValueMap,
        cookie: (Vid, u64),
        released: Vec<Release>,
    },
    Parked {
        released: Vec<Release>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_then_store_then_fetch_round_trips() {
        let mut ws = Workspace::new("test");
        ws.declare_var("x", Mode::Fifo).unwrap();
        ws.set_var("x", Value::short(0, b"hi".to_vec()), NameValueMap::new())
            .unwrap();
        let outcome = ws.fetch_var("x", 1, false, None).unwrap();
        match outcome {
            FetchVarOutcome::Value { value, .. } => {
                assert_eq!(value.short_bytes(), Some(b"hi".as_slice()))
            }
            FetchVarOutcome::Parked { .. } => panic!(),
        }
    }

    #[test]
    fn fetch_on_missing_variable_is_no_such_variable() {
        let mut ws = Workspace::new("test");
        let err = ws.fetch_var("nope", 1, false, None).unwrap_err();
        assert_eq!(err.status, nws_wire::Status::GENERIC_ERROR.0);
    }

    #[test]
    fn stale_iterator_cookie_after_delete_and_recreate_is_rejected() {
        let mut ws = Workspace::new("test");
        ws.declare_var("x", Mode::Fifo).unwrap();
        let old_vid = ws.get("x").unwrap().vid();
        ws.delete_var("x").unwrap();
        ws.declare_var("x", Mode::Fifo).unwrap();
        let err = ws
            .fetch_var(
                "x",
                1,
                false,
                Some(IterState {
                    vid: old_vid,
                    index: 0,
                }),
            )
            .unwrap_err();
        assert_eq!(err.reason, "Variable id mismatch.");
    }

    #[test]
    fn set_owner_info_is_sticky() {
        let mut ws = Workspace::new("test");
        assert!(ws.set_owner_info("1.2.3.4:9 (me)", true));
        assert!(!ws.set_owner_info("5.6.7.8:9 (other)", false));
        assert_eq!(ws.owner(), Some("1.2.3.4:9 (me)"));
        assert!(ws.persistent());
    }

    #[test]
    fn list_vars_excludes_hidden_and_is_sorted() {
        let mut ws = Workspace::new("test");
        ws.declare_var("zeta", Mode::Fifo).unwrap();
        ws.declare_var("alpha", Mode::Fifo).unwrap();
        ws.declare_constant("__hidden__", Value::short(0, Vec::new()))
            .unwrap();
        let listing = ws.list_vars();
        assert_eq!(listing.len(), 2);
        assert!(listing[0].starts_with("alpha\t"));
        assert!(listing[1].starts_with("zeta\t"));
    }
}
