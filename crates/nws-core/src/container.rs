//! The container union (spec.md section 4.C): FIFO, LIFO, Single, Barrier,
//! Constant, Time and Unknown each implement the same store/fetch/find
//! shape over their own storage. Modeled as a single closed enum per
//! spec.md's REDESIGN FLAGS rather than as trait objects over the
//! original's class hierarchy -- there is no `Custom` variant, since
//! third-party container plugins are out of scope.

use std::collections::{HashSet, VecDeque};

use nws_wire::{NameValueMap, Value};

use crate::error::Failure;
use crate::vid::Vid;

pub type ClientId = u64;

/// Fetchers and finders parked on a variable before it had a value. A
/// fetcher queue is FIFO (first parked, first served); finders are all
/// released together, so ordering among them doesn't matter.
#[derive(Default, Debug)]
pub struct Waiters {
    pub fetchers: VecDeque<ClientId>,
    pub finders: Vec<ClientId>,
}

impl Waiters {
    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty() && self.finders.is_empty()
    }
}

/// One delivery to a previously-parked client, produced when a store (or a
/// barrier release) wakes it up.
#[derive(Debug)]
pub struct Release {
    pub client: ClientId,
    pub value: Value,
    pub metadata: NameValueMap,
    pub cookie: (Vid, u64),
}

#[derive(Debug)]
pub struct StoreOutcome {
    pub consumed: bool,
    pub released: Vec<Release>,
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// A value satisfying the request, with the iterator cookie the
    /// container chose. `None` means the container declined to name one
    /// (spec.md section 4.C: the workspace layer then substitutes
    /// `(vid, max(0, requested_index))`).
    Value {
        value: Value,
        metadata: NameValueMap,
        cookie: Option<(Vid, u64)>,
    },
    /// No value available; the caller has been queued as a waiter.
    Parked,
}

/// `new_value`: the hand-off shared by every queue-shaped container
/// (spec.md section 4.C, common rule). Every finder receives the value and
/// is cleared from the list; the first queued fetcher (if any) receives it
/// too and is removed, in which case the caller's own store is "consumed".
fn new_value(
    vid: Vid,
    waiters: &mut Waiters,
    val_index: u64,
    value: &Value,
    metadata: &NameValueMap,
) -> (bool, Vec<Release>) {
    let mut released = Vec::with_capacity(waiters.finders.len() + 1);
    for client in waiters.finders.drain(..) {
        released.push(Release {
            client,
            value: value.clone(),
            metadata: metadata.clone(),
            cookie: (vid, val_index),
        });
    }
    let consumed = if let Some(client) = waiters.fetchers.pop_front() {
        released.push(Release {
            client,
            value: value.clone(),
            metadata: metadata.clone(),
            cookie: (vid, val_index),
        });
        true
    } else {
        false
    };
    (consumed, released)
}

/// Resolves the iterated-fetch/find target: `None` (plain fetch/find) maps
/// to the original's `-1` sentinel, meaning "whatever comes next".
fn requested(index: Option<u64>) -> i64 {
    index.map(|v| v as i64).unwrap_or(-1)
}

/// `max(requested - base + 1, 0)`, clamped into a usable index. Returns
/// `None` if the position can't be represented (treated as out-of-range,
/// i.e. park/fail, never a panic).
fn location(requested: i64, base: u64) -> Option<usize> {
    let loc = (requested - base as i64 + 1).max(0);
    usize::try_from(loc).ok()
}

#[derive(Debug, Default)]
pub struct FifoState {
    items: VecDeque<(Value, NameValueMap)>,
    base: u64,
    waiters: Waiters,
}

impl FifoState {
    fn store(&mut self, vid: Vid, value: Value, metadata: NameValueMap) -> StoreOutcome {
        let val_index = self.base + self.items.len() as u64;
        let (consumed, released) = new_value(vid, &mut self.waiters, val_index, &value, &metadata);
        if consumed {
            self.base += 1;
        } else {
            self.items.push_back((value, metadata));
        }
        StoreOutcome { consumed, released }
    }

    fn fetch(
        &mut self,
        vid: Vid,
        client: ClientId,
        blocking: bool,
        index: Option<u64>,
    ) -> Result<FetchOutcome, Failure> {
        let loc = location(requested(index), self.base).unwrap_or(1);
        if loc > 0 {
            return Err(Failure::generic("ifetch* only supported at beginning of FIFO"));
        }
        match self.items.pop_front() {
            Some((value, metadata)) => {
                let cookie = (vid, self.base);
                self.base += 1;
                Ok(FetchOutcome::Value {
                    value,
                    metadata,
                    cookie: Some(cookie),
                })
            }
            None => {
                if blocking {
                    self.waiters.fetchers.push_back(client);
                    Ok(FetchOutcome::Parked)
                } else {
                    Err(Failure::generic("no value available"))
                }
            }
        }
    }

    fn find(
        &mut self,
        vid: Vid,
        client: ClientId,
        blocking: bool,
        index: Option<u64>,
    ) -> Result<FetchOutcome, Failure> {
        let loc = location(requested(index), self.base);
        let found = loc.and_then(|loc| self.items.get(loc).map(|item| (loc, item)));
        match found {
            Some((loc, (value, metadata))) => Ok(FetchOutcome::Value {
                value: value.clone(),
                metadata: metadata.clone(),
                cookie: Some((vid, self.base + loc as u64)),
            }),
            None => {
                if blocking {
                    self.waiters.finders.push(client);
                    Ok(FetchOutcome::Parked)
                } else {
                    Err(Failure::generic("no value available"))
                }
            }
        }
    }

    fn purge(&mut self) -> Waiters {
        self.items.clear();
        std::mem::take(&mut self.waiters)
    }
}

#[derive(Debug, Default)]
pub struct LifoState {
    items: Vec<(Value, NameValueMap)>,
    waiters: Waiters,
}

impl LifoState {
    fn store(&mut self, vid: Vid, value: Value, metadata: NameValueMap) -> StoreOutcome {
        let (consumed, released) = new_value(vid, &mut self.waiters, 0, &value, &metadata);
        if !consumed {
            self.items.push((value, metadata));
        }
        StoreOutcome { consumed, released }
    }

    fn fetch(
        &mut self,
        _vid: Vid,
        client: ClientId,
        blocking: bool,
        index: Option<u64>,
    ) -> Result<FetchOutcome, Failure> {
        if index.is_some() {
            return Err(Failure::generic("ifetch* not supported on LIFO"));
        }
        match self.items.pop() {
            Some((value, metadata)) => Ok(FetchOutcome::Value {
                value,
                metadata,
                cookie: None,
            }),
            None => {
                if blocking {
                    self.waiters.fetchers.push_back(client);
                    Ok(FetchOutcome::Parked)
                } else {
                    Err(Failure::generic("no value available"))
                }
            }
        }
    }

    fn find(
        &mut self,
        _vid: Vid,
        client: ClientId,
        blocking: bool,
        index: Option<u64>,
    ) -> Result<FetchOutcome, Failure> {
        if index.is_some() {
            return Err(Failure::generic("ifind* not supported on LIFO"));
        }
        match self.items.last() {
            Some((value, metadata)) => Ok(FetchOutcome::Value {
                value: value.clone(),
                metadata: metadata.clone(),
                cookie: None,
            }),
            None => {
                if blocking {
                    self.waiters.finders.push(client);
                    Ok(FetchOutcome::Parked)
                } else {
                    Err(Failure::generic("no value available"))
                }
            }
        }
    }

    fn purge(&mut self) -> Waiters {
        self.items.clear();
        std::mem::take(&mut self.waiters)
    }
}

#[derive(Debug, Default)]
pub struct SingleState {
    item: Option<(Value, NameValueMap)>,
    base: u64,
    waiters: Waiters,
}

impl SingleState {
    fn store(&mut self, vid: Vid, value: Value, metadata: NameValueMap) -> StoreOutcome {
        let had_item = self.item.is_some();
        let val_index = self.base + if had_item { 1 } else { 0 };
        let (consumed, released) = new_value(vid, &mut self.waiters, val_index, &value, &metadata);
        if consumed {
            self.base += 1;
        } else {
            self.item = Some((value, metadata));
            // Only a replace (an existing item) bumps the index; the first
            // store into an empty Single does not (spec.md section 3: "storing
            // into a full Single... increments index"; original_source's
            // `Single.store` only does `self._index += 1` under `if
            // self._contents:`).
            if had_item {
                self.base += 1;
            }
        }
        StoreOutcome { consumed, released }
    }

    fn fetch(
        &mut self,
        vid: Vid,
        client: ClientId,
        blocking: bool,
        index: Option<u64>,
    ) -> Result<FetchOutcome, Failure> {
        let loc = location(requested(index), self.base);
        let available = loc == Some(0) && self.item.is_some();
        if available {
            let (value, metadata) = self.item.take().unwrap();
            let cookie = (vid, self.base);
            self.base += 1;
            Ok(FetchOutcome::Value {
                value,
                metadata,
                cookie: Some(cookie),
            })
        } else if blocking {
            self.waiters.fetchers.push_back(client);
            Ok(FetchOutcome::Parked)
        } else {
            Err(Failure::generic("no value available"))
        }
    }

    fn find(
        &mut self,
        vid: Vid,
        client: ClientId,
        blocking: bool,
        index: Option<u64>,
    ) -> Result<FetchOutcome, Failure> {
        let loc = location(requested(index), self.base);
        match (loc, &self.item) {
            (Some(0), Some((value, metadata))) => Ok(FetchOutcome::Value {
                value: value.clone(),
                metadata: metadata.clone(),
                cookie: Some((vid, self.base)),
            }),
            _ => {
                if blocking {
                    self.waiters.finders.push(client);
                    Ok(FetchOutcome::Parked)
                } else {
                    Err(Failure::generic("no value available"))
                }
            }
        }
    }

    fn purge(&mut self) -> Waiters {
        self.item = None;
        std::mem::take(&mut self.waiters)
    }
}

/// Group-membership barrier. `store` joins, `fetch` leaves (never blocks),
/// `find` checks in and blocks until every member has checked in, at which
/// point every finder (and the final caller) receives the member count as
/// a decimal string (spec.md section 4.C / walkthrough 5).
#[derive(Debug, Default)]
pub struct BarrierState {
    members: HashSet<ClientId>,
    finders: Vec<ClientId>,
}

impl BarrierState {
    fn store(&mut self, client: ClientId) -> Result<StoreOutcome, Failure> {
        if self.members.contains(&client) {
            return Err(Failure::generic(
                "Client attempting to join barrier group, but is already a member",
            ));
        }
        self.members.insert(client);
        Ok(StoreOutcome {
            consumed: false,
            released: Vec::new(),
        })
    }

    fn find(
        &mut self,
        vid: Vid,
        client: ClientId,
        blocking: bool,
    ) -> Result<FetchOutcome, Failure> {
        let num_members = self.members.len();
        if !blocking {
            let value = format!("{} out of {} at barrier", self.finders.len(), num_members);
            return Ok(FetchOutcome::Value {
                value: Value::short(0, value.into_bytes()),
                metadata: NameValueMap::new(),
                cookie: None,
            });
        }
        if !self.members.contains(&client) {
            return Err(Failure::generic(
                "Client has not joined this barrier group.",
            ));
        }
        if self.finders.len() == num_members.saturating_sub(1) {
            let value = Value::short(0, num_members.to_string().into_bytes());
            Ok(FetchOutcome::Value {
                value,
                metadata: NameValueMap::new(),
                cookie: Some((vid, 0)),
            })
        } else {
            self.finders.push(client);
            Ok(FetchOutcome::Parked)
        }
    }

    fn purge(&mut self) -> Waiters {
        let finders = std::mem::take(&mut self.finders);
        self.members.clear();
        Waiters {
            fetchers: VecDeque::new(),
            finders,
        }
    }
}

/// A fixed value a fetch/find always returns immediately; store is
/// always an error. Used for `Constant` and `Time` (spec.md section 4.C).
/// Neither is reachable via the wire's `declare var` mode grammar in the
/// original server -- `Constant`'s container class is defined but never
/// instantiated by the base server either, only by workspace plugins
/// (see DESIGN.md) -- so both are only constructible through
/// `Workspace::declare_constant`/`declare_time`.
#[derive(Debug)]
pub enum AttributeKind {
    Constant(Value, NameValueMap),
    Time,
}

impl AttributeKind {
    fn fetch(&self) -> FetchOutcome {
        match self {
            AttributeKind::Constant(value, metadata) => FetchOutcome::Value {
                value: value.clone(),
                metadata: metadata.clone(),
                cookie: None,
            },
            AttributeKind::Time => FetchOutcome::Value {
                value: Value::short(0, crate::time_fmt::asctime_now().into_bytes()),
                metadata: NameValueMap::new(),
                cookie: None,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct UnknownState {
    waiters: Waiters,
}

impl UnknownState {
    fn fetch(&mut self, client: ClientId, blocking: bool) -> Result<FetchOutcome, Failure> {
        if blocking {
            self.waiters.fetchers.push_back(client);
            Ok(FetchOutcome::Parked)
        } else {
            Err(Failure::generic("no value available"))
        }
    }

    fn find(&mut self, client: ClientId, blocking: bool) -> Result<FetchOutcome, Failure> {
        if blocking {
            self.waiters.finders.push(client);
            Ok(FetchOutcome::Parked)
        } else {
            Err(Failure::generic("no value available"))
        }
    }

    fn purge(&mut self) -> Waiters {
        std::mem::take(&mut self.waiters)
    }
}

#[derive(Debug)]
pub enum Container {
    Unknown(UnknownState),
    Fifo(FifoState),
    Lifo(LifoState),
    Single(SingleState),
    Barrier(BarrierState),
    Attribute(AttributeKind),
}

impl Container {
    pub fn unknown() -> Self {
        Container::Unknown(UnknownState::default())
    }

    pub fn fifo() -> Self {
        Container::Fifo(FifoState::default())
    }

    pub fn lifo() -> Self {
        Container::Lifo(LifoState::default())
    }

    pub fn single() -> Self {
        Container::Single(SingleState::default())
    }

    pub fn barrier() -> Self {
        Container::Barrier(BarrierState::default())
    }

    pub fn constant(value: Value, metadata: NameValueMap) -> Self {
        Container::Attribute(AttributeKind::Constant(value, metadata))
    }

    pub fn time() -> Self {
        Container::Attribute(AttributeKind::Time)
    }

    pub fn len(&self) -> usize {
        match self {
            Container::Unknown(_) => 0,
            Container::Fifo(s) => s.items.len(),
            Container::Lifo(s) => s.items.len(),
            Container::Single(s) => usize::from(s.item.is_some()),
            Container::Barrier(_) => 3,
            Container::Attribute(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_fetchers(&self) -> usize {
        match self {
            Container::Unknown(s) => s.waiters.fetchers.len(),
            Container::Fifo(s) => s.waiters.fetchers.len(),
            Container::Lifo(s) => s.waiters.fetchers.len(),
            Container::Single(s) => s.waiters.fetchers.len(),
            Container::Barrier(_) | Container::Attribute(_) => 0,
        }
    }

    pub fn num_finders(&self) -> usize {
        match self {
            Container::Unknown(s) => s.waiters.finders.len(),
            Container::Fifo(s) => s.waiters.finders.len(),
            Container::Lifo(s) => s.waiters.finders.len(),
            Container::Single(s) => s.waiters.finders.len(),
            Container::Barrier(s) => s.finders.len(),
            Container::Attribute(_) => 0,
        }
    }

    /// Stores a plain value into a queue-shaped container. Not valid for
    /// `Barrier` (use [`Container::join`]) or `Attribute` (always an
    /// error, handled here too for uniformity).
    pub fn store(
        &mut self,
        vid: Vid,
        value: Value,
        metadata: NameValueMap,
    ) -> Result<StoreOutcome, Failure> {
        match self {
            Container::Unknown(_) => Err(Failure::generic(
                "store called on a variable of unknown mode",
            )),
            Container::Fifo(s) => Ok(s.store(vid, value, metadata)),
            Container::Lifo(s) => Ok(s.store(vid, value, metadata)),
            Container::Single(s) => Ok(s.store(vid, value, metadata)),
            Container::Barrier(_) => Err(Failure::generic(
                "store is not supported for this variable; use join",
            )),
            Container::Attribute(_) => {
                Err(Failure::generic("Store is not supported for this variable."))
            }
        }
    }

    /// Barrier-only: joins the group. Mirrors a `Barrier.store` call.
    pub fn join(&mut self, client: ClientId) -> Result<StoreOutcome, Failure> {
        match self {
            Container::Barrier(s) => s.store(client),
            _ => Err(Failure::generic("join is only supported on barrier variables")),
        }
    }

    pub fn fetch(
        &mut self,
        vid: Vid,
        client: ClientId,
        blocking: bool,
        index: Option<u64>,
    ) -> Result<(FetchOutcome, Vec<Release>), Failure> {
        match self {
            Container::Unknown(s) => s.fetch(client, blocking).map(|o| (o, Vec::new())),
            Container::Fifo(s) => s.fetch(vid, client, blocking, index).map(|o| (o, Vec::new())),
            Container::Lifo(s) => s.fetch(vid, client, blocking, index).map(|o| (o, Vec::new())),
            Container::Single(s) => s.fetch(vid, client, blocking, index).map(|o| (o, Vec::new())),
            Container::Barrier(s) => barrier_fetch(s, vid, client),
            Container::Attribute(a) => Ok((a.fetch(), Vec::new())),
        }
    }

    pub fn find(
        &mut self,
        vid: Vid,
        client: ClientId,
        blocking: bool,
        index: Option<u64>,
    ) -> Result<(FetchOutcome, Vec<Release>), Failure> {
        match self {
            Container::Unknown(s) => s.find(client, blocking).map(|o| (o, Vec::new())),
            Container::Fifo(s) => s.find(vid, client, blocking, index).map(|o| (o, Vec::new())),
            Container::Lifo(s) => s.find(vid, client, blocking, index).map(|o| (o, Vec::new())),
            Container::Single(s) => s.find(vid, client, blocking, index).map(|o| (o, Vec::new())),
            Container::Barrier(s) => s.find(vid, client, blocking).map(|o| (o, Vec::new())),
            Container::Attribute(a) => Ok((a.fetch(), Vec::new())),
        }
    }

    /// Purges this container: every parked fetcher/finder is reported as
    /// a `Release`-shaped error ("Variable purged."), and any stored
    /// values are dropped (their backing temp files are removed once
    /// the last reference -- this one -- goes away).
    pub fn purge(&mut self) -> Waiters {
        match self {
            Container::Unknown(s) => s.purge(),
            Container::Fifo(s) => s.purge(),
            Container::Lifo(s) => s.purge(),
            Container::Single(s) => s.purge(),
            Container::Barrier(s) => s.purge(),
            Container::Attribute(_) => Waiters::default(),
        }
    }

    pub fn take_waiters(&mut self) -> Waiters {
        match self {
            Container::Unknown(s) => std::mem::take(&mut s.waiters),
            _ => Waiters::default(),
        }
    }

    /// Removes `client` from whichever waiter list it sits on, if any
    /// (spec.md section 4.B teardown / DESIGN NOTES "cyclic refs": a
    /// disconnect must evict the connection from exactly one waiter
    /// list without disturbing stored values). A barrier membership is
    /// also dropped, since a disconnected session can no longer join the
    /// release.
    pub fn cancel_waiter(&mut self, client: ClientId) {
        match self {
            Container::Unknown(s) => cancel_from(&mut s.waiters, client),
            Container::Fifo(s) => cancel_from(&mut s.waiters, client),
            Container::Lifo(s) => cancel_from(&mut s.waiters, client),
            Container::Single(s) => cancel_from(&mut s.waiters, client),
            Container::Barrier(s) => {
                s.members.remove(&client);
                s.finders.retain(|&c| c != client);
            }
            Container::Attribute(_) => {}
        }
    }

    pub fn install_waiters(&mut self, waiters: Waiters) {
        match self {
            Container::Fifo(s) => s.waiters = waiters,
            Container::Lifo(s) => s.waiters = waiters,
            Container::Single(s) => s.waiters = waiters,
            Container::Unknown(s) => s.waiters = waiters,
            Container::Barrier(s) => s.finders = waiters.finders,
            Container::Attribute(_) => {}
        }
    }
}

fn cancel_from(waiters: &mut Waiters, client: ClientId) {
    waiters.fetchers.retain(|&c| c != client);
    waiters.finders.retain(|&c| c != client);
}

fn barrier_fetch(
    state: &mut BarrierState,
    vid: Vid,
    client: ClientId,
) -> Result<(FetchOutcome, Vec<Release>), Failure> {
    // The broadcast value is the membership count as of the moment this
    // client leaves (it's still a member until the `remove` below), not
    // the count afterward -- released finders are told how many peers
    // they waited with, including the one that just triggered release
    // (original_source/nwss/stdvars.py's `Barrier.fetch`, line 593).
    let num_members = state.members.len();
    if !state.members.remove(&client) {
        return Err(Failure::generic(
            "Client has not joined this barrier group.",
        ));
    }
    let mut released = Vec::new();
    if state.finders.len() >= state.members.len() {
        let value = Value::short(0, num_members.to_string().into_bytes());
        for finder in state.finders.drain(..) {
            released.push(Release {
                client: finder,
                value: value.clone(),
                metadata: NameValueMap::new(),
                cookie: (vid, 0),
            });
        }
    }
    Ok((
        FetchOutcome::Value {
            value: Value::short(0, Vec::new()),
            metadata: NameValueMap::new(),
            cookie: None,
        },
        released,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vid() -> Vid {
        Vid::allocate(&Default::default()).unwrap()
    }

    fn val(bytes: &[u8]) -> Value {
        Value::short(0, bytes.to_vec())
    }

    #[test]
    fn fifo_store_then_fetch_is_order_preserving() {
        let mut c = Container::fifo();
        let vid = vid();
        c.store(vid, val(b"a"), NameValueMap::new()).unwrap();
        c.store(vid, val(b"b"), NameValueMap::new()).unwrap();
        let (outcome, released) = c.fetch(vid, 1, false, None).unwrap();
        assert!(released.is_empty());
        match outcome {
            FetchOutcome::Value { value, .. } => {
                assert_eq!(value.short_bytes(), Some(b"a".as_slice()))
            }
            FetchOutcome::Parked => panic!("expected a value"),
        }
    }

    #[test]
    fn fifo_non_blocking_fetch_on_empty_fails() {
        let mut c = Container::fifo();
        let err = c.fetch(vid(), 1, false, None).unwrap_err();
        assert_eq!(err.reason, "no value available");
    }

    #[test]
    fn fifo_blocking_fetch_parks_then_store_delivers() {
        let mut c = Container::fifo();
        let vid = vid();
        let (outcome, _) = c.fetch(vid, 42, true, None).unwrap();
        assert!(matches!(outcome, FetchOutcome::Parked));
        let out = c.store(vid, val(b"hi"), NameValueMap::new()).unwrap();
        assert!(out.consumed);
        assert_eq!(out.released.len(), 1);
        assert_eq!(out.released[0].client, 42);
    }

    #[test]
    fn fifo_ifetch_requires_head_position() {
        let mut c = Container::fifo();
        let vid = vid();
        c.store(vid, val(b"a"), NameValueMap::new()).unwrap();
        let err = c.fetch(vid, 1, false, Some(5)).unwrap_err();
        assert!(err.reason.contains("ifetch* only supported"));
    }

    #[test]
    fn lifo_is_last_in_first_out() {
        let mut c = Container::lifo();
        let vid = vid();
        c.store(vid, val(b"a"), NameValueMap::new()).unwrap();
        c.store(vid, val(b"b"), NameValueMap::new()).unwrap();
        let (outcome, _) = c.fetch(vid, 1, false, None).unwrap();
        match outcome {
            FetchOutcome::Value { value, .. } => {
                assert_eq!(value.short_bytes(), Some(b"b".as_slice()))
            }
            FetchOutcome::Parked => panic!(),
        }
    }

    #[test]
    fn lifo_rejects_iterated_fetch() {
        let mut c = Container::lifo();
        let err = c.fetch(vid(), 1, false, Some(0)).unwrap_err();
        assert!(err.reason.contains("not supported on LIFO"));
    }

    #[test]
    fn single_replaces_prior_value() {
        let mut c = Container::single();
        let vid = vid();
        c.store(vid, val(b"a"), NameValueMap::new()).unwrap();
        c.store(vid, val(b"b"), NameValueMap::new()).unwrap();
        let (outcome, _) = c.fetch(vid, 1, false, None).unwrap();
        match outcome {
            FetchOutcome::Value { value, .. } => {
                assert_eq!(value.short_bytes(), Some(b"b".as_slice()))
            }
            FetchOutcome::Parked => panic!(),
        }
    }

    #[test]
    fn single_first_store_does_not_bump_index_but_replace_does() {
        let mut c = Container::single();
        let vid = vid();
        c.store(vid, val(b"a"), NameValueMap::new()).unwrap();
        let (outcome, _) = c.fetch(vid, 1, false, None).unwrap();
        match outcome {
            FetchOutcome::Value { cookie, .. } => assert_eq!(cookie, Some((vid, 0))),
            FetchOutcome::Parked => panic!(),
        }

        // A store into an empty Single again: index still doesn't advance
        // past what the prior fetch already bumped it to.
        c.store(vid, val(b"b"), NameValueMap::new()).unwrap();
        c.store(vid, val(b"c"), NameValueMap::new()).unwrap(); // replaces "b"
        let (outcome, _) = c.fetch(vid, 1, false, None).unwrap();
        match outcome {
            FetchOutcome::Value { value, cookie, .. } => {
                assert_eq!(value.short_bytes(), Some(b"c".as_slice()));
                assert_eq!(cookie, Some((vid, 1)));
            }
            FetchOutcome::Parked => panic!(),
        }
    }

    #[test]
    fn barrier_releases_all_finders_when_last_joins() {
        let mut c = Container::barrier();
        c.join(1).unwrap();
        c.join(2).unwrap();
        c.join(3).unwrap();
        let vid = vid();
        let (outcome, _) = c.find(vid, 1, true, None).unwrap();
        assert!(matches!(outcome, FetchOutcome::Parked));
        let (outcome, _) = c.find(vid, 2, true, None).unwrap();
        assert!(matches!(outcome, FetchOutcome::Parked));
        let (outcome, released) = c.find(vid, 3, true, None).unwrap();
        assert_eq!(released.len(), 2);
        match outcome {
            FetchOutcome::Value { value, .. } => {
                assert_eq!(value.short_bytes(), Some(b"3".as_slice()))
            }
            FetchOutcome::Parked => panic!(),
        }
    }

    #[test]
    fn barrier_non_member_find_is_an_error() {
        let mut c = Container::barrier();
        let err = c.find(vid(), 99, true, None).unwrap_err();
        assert!(err.reason.contains("has not joined"));
    }

    #[test]
    fn barrier_find_try_never_blocks() {
        let mut c = Container::barrier();
        c.join(1).unwrap();
        let (outcome, _) = c.find(vid(), 1, false, None).unwrap();
        match outcome {
            FetchOutcome::Value { value, .. } => {
                let text = String::from_utf8(value.short_bytes().unwrap().to_vec()).unwrap();
                assert_eq!(text, "0 out of 1 at barrier");
            }
            FetchOutcome::Parked => panic!(),
        }
    }

    #[test]
    fn constant_rejects_store_and_always_returns_same_value() {
        let mut c = Container::constant(val(b"pi"), NameValueMap::new());
        assert!(c.store(vid(), val(b"x"), NameValueMap::new()).is_err());
        let (outcome, _) = c.fetch(vid(), 1, false, None).unwrap();
        match outcome {
            FetchOutcome::Value { value, .. } => {
                assert_eq!(value.short_bytes(), Some(b"pi".as_slice()))
            }
            FetchOutcome::Parked => panic!(),
        }
    }

    #[test]
    fn cancel_waiter_removes_a_parked_fetcher_only() {
        let mut c = Container::fifo();
        let vid = vid();
        c.fetch(vid, 1, true, None).unwrap();
        c.fetch(vid, 2, true, None).unwrap();
        c.cancel_waiter(1);
        let out = c.store(vid, val(b"v"), NameValueMap::new()).unwrap();
        assert_eq!(out.released.len(), 1);
        assert_eq!(out.released[0].client, 2);
    }

    #[test]
    fn unknown_parks_and_transfers_waiters_on_promotion() {
        let mut c = Container::unknown();
        let (outcome, _) = c.fetch(1, true, None).unwrap();
        assert!(matches!(outcome, FetchOutcome::Parked));
        let waiters = c.take_waiters();
        assert_eq!(waiters.fetchers.len(), 1);

        let mut fifo = Container::fifo();
        fifo.install_waiters(waiters);
        let vid = vid();
        let out = fifo.store(vid, val(b"v"), NameValueMap::new()).unwrap();
        assert!(out.consumed);
        assert_eq!(out.released[0].client, 1);
    }
}
