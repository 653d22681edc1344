//! Workspace, variable and container object model for the NWS coordination
//! server (spec.md section 3-4: components C, D, E, F).
//!
//! This crate is transport-agnostic: it knows nothing about sockets,
//! framing, or handshakes (that is `nws-wire` and the `nws-server` binary).
//! It models the pure state machine -- workspaces, variables, containers,
//! waiter queues, and the global registry that ties external workspace
//! names to internal ones -- so that it can be driven synchronously from a
//! single-threaded dispatch loop (spec.md section 5: "there is no
//! parallelism inside the core").

pub mod container;
pub mod error;
pub mod registry;
pub mod time_fmt;
pub mod variable;
pub mod vid;
pub mod workspace;

pub use container::{ClientId, FetchOutcome, Release, StoreOutcome};
pub use error::{Error, Failure, Result};
pub use registry::{InternalName, Registry};
pub use variable::{Mode, Variable};
pub use vid::Vid;
pub use workspace::{FetchVarOutcome, IterState, Workspace, WorkspaceHooks};
