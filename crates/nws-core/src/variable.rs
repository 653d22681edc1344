//! The `Variable` wrapper (spec.md section 4.D): binds a name and an
//! immutable-once-set mode to a container, and owns the variable's vid.

use nws_wire::NameValueMap;
use nws_wire::Value;

use crate::container::{ClientId, Container, FetchOutcome, Release, StoreOutcome, Waiters};
use crate::error::Failure;
use crate::vid::Vid;

/// The mode a variable was declared with. Tracked separately from the
/// container discriminant because `multi` is a distinct mode string that
/// maps onto the same `Lifo` container as `lifo` (spec.md's open
/// question: "a faithful reimplementation should preserve this alias but
/// surface the ambiguity" -- `list vars` reports the mode the caller
/// declared, not the container it happens to share).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Unknown,
    Fifo,
    Lifo,
    Single,
    Multi,
    Time,
    Barrier,
    /// Internal-only: reachable through [`crate::workspace::Workspace::declare_constant`],
    /// never through the wire `declare var` verb's mode grammar (see
    /// DESIGN.md).
    Constant,
}

impl Mode {
    /// Parses a `declare var` mode string. `"custom"` is recognized by
    /// the original grammar but always rejected here: plugin containers
    /// are out of scope.
    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "unknown" => Some(Mode::Unknown),
            "fifo" => Some(Mode::Fifo),
            "lifo" => Some(Mode::Lifo),
            "single" => Some(Mode::Single),
            "multi" => Some(Mode::Multi),
            "__time" => Some(Mode::Time),
            "__barrier" => Some(Mode::Barrier),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Unknown => "unknown",
            Mode::Fifo => "fifo",
            Mode::Lifo => "lifo",
            Mode::Single => "single",
            Mode::Multi => "multi",
            Mode::Time => "__time",
            Mode::Barrier => "__barrier",
            Mode::Constant => "constant",
        }
    }

    fn new_container(self, constant: Option<(Value, NameValueMap)>) -> Container {
        match self {
            Mode::Unknown => Container::unknown(),
            Mode::Fifo => Container::fifo(),
            Mode::Lifo | Mode::Multi => Container::lifo(),
            Mode::Single => Container::single(),
            Mode::Time => Container::time(),
            Mode::Barrier => Container::barrier(),
            Mode::Constant => {
                let (value, metadata) = constant.expect("constant mode requires a value");
                Container::constant(value, metadata)
            }
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Variable {
    name: String,
    mode: Mode,
    vid: Vid,
    hidden: bool,
    container: Container,
}

impl Variable {
    /// A freshly-declared variable starts in `unknown` mode with no vid
    /// assigned; callers (the workspace) assign the vid via
    /// [`Variable::bind_vid`] once inserted into the id table.
    pub fn new(name: impl Into<String>, hidden: bool, vid: Vid) -> Self {
        Variable {
            name: name.into(),
            mode: Mode::Unknown,
            vid,
            hidden,
            container: Container::unknown(),
        }
    }

    pub fn standard(name: impl Into<String>, mode: Mode, vid: Vid, hidden: bool) -> Self {
        Variable {
            name: name.into(),
            mode,
            vid,
            hidden,
            container: mode.new_container(None),
        }
    }

    pub fn constant(name: impl Into<String>, value: Value, vid: Vid, hidden: bool) -> Self {
        Variable {
            name: name.into(),
            mode: Mode::Constant,
            vid,
            hidden,
            container: Container::constant(value, NameValueMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn vid(&self) -> Vid {
        self.vid
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn num_values(&self) -> usize {
        self.container.len()
    }

    pub fn num_fetchers(&self) -> usize {
        self.container.num_fetchers()
    }

    pub fn num_finders(&self) -> usize {
        self.container.num_finders()
    }

    /// `list vars` formatting: `name\tcount\tfetchers\tfinders\tmode`.
    pub fn format_listing(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            self.name,
            self.num_values(),
            self.num_fetchers(),
            self.num_finders(),
            self.mode
        )
    }

    /// Sets the mode of a still-`unknown` variable, transferring any
    /// waiters parked before the mode was known. Changing an
    /// already-concrete mode is always an error (spec.md section 4.D).
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), Failure> {
        if self.mode == Mode::Unknown {
            let waiters = self.container.take_waiters();
            let mut container = mode.new_container(None);
            container.install_waiters(waiters);
            self.container = container;
            self.mode = mode;
            Ok(())
        } else if self.mode != mode {
            Err(Failure::bad_mode_transition("mode is already set to incompatible value"))
        } else {
            Ok(())
        }
    }

    /// Stores a value, auto-promoting an `unknown` variable to `fifo`
    /// first (spec.md section 4.D: "promote to FIFO and store").
    pub fn store(&mut self, value: Value, metadata: NameValueMap) -> Result<StoreOutcome, Failure> {
        if self.mode == Mode::Unknown {
            self.set_mode(Mode::Fifo)?;
        }
        self.container.store(self.vid, value, metadata)
    }

    /// Barrier-only join, performed by a `store` on a barrier-mode
    /// variable at the dispatch layer.
    pub fn join(&mut self, client: ClientId) -> Result<StoreOutcome, Failure> {
        self.container.join(client)
    }

    pub fn fetch(
        &mut self,
        client: ClientId,
        blocking: bool,
        index: Option<u64>,
    ) -> Result<(FetchOutcome, Vec<Release>), Failure> {
        self.container.fetch(self.vid, client, blocking, index)
    }

    pub fn find(
        &mut self,
        client: ClientId,
        blocking: bool,
        index: Option<u64>,
    ) -> Result<(FetchOutcome, Vec<Release>), Failure> {
        self.container.find(self.vid, client, blocking, index)
    }

    /// Purges this variable's container, returning the waiters that must
    /// be told "Variable purged." by the caller (the workspace, which
    /// owns client delivery).
    pub fn purge(&mut self) -> Waiters {
        self.container.purge()
    }

    /// Evicts `client` from this variable's waiter list on disconnect.
    pub fn cancel_waiter(&mut self, client: ClientId) {
        self.container.cancel_waiter(client);
    }
}
