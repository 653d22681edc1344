use thiserror::Error;

/// A user-level workspace/variable failure, carrying the wire status code
/// and the `nwsReason` string a short or long error reply reports back to
/// the client. Distinct from [`Error`]'s other variants, which describe
/// conditions that never reach the wire (internal invariant violations,
/// id-space exhaustion).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct Failure {
    pub status: u16,
    pub reason: String,
}

impl Failure {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Failure {
            status,
            reason: reason.into(),
        }
    }

    pub fn generic(reason: impl Into<String>) -> Self {
        Failure::new(nws_wire::Status::GENERIC_ERROR.0, reason)
    }

    pub fn no_such_workspace(name: &str) -> Self {
        Failure::new(
            nws_wire::Status::NO_SUCH_WORKSPACE.0,
            format!("No such workspace: {name}"),
        )
    }

    /// spec.md section 6 only lists `0100`/`2000`/`2001` as specific wire
    /// codes; "no such variable" falls into its "otherwise 0001" clause
    /// (`nwss/server.py` never calls `send_error` with any status but
    /// those three and the default `1`), so this reports `GENERIC_ERROR`
    /// on the wire and distinguishes itself only through `reason`.
    pub fn no_such_variable(name: &str) -> Self {
        Failure::new(
            nws_wire::Status::GENERIC_ERROR.0,
            format!("No such variable: {name}"),
        )
    }

    /// Also a generic-error status on the wire, per the same spec.md
    /// clause as [`Failure::no_such_variable`].
    pub fn bad_mode_transition(reason: impl Into<String>) -> Self {
        Failure::new(nws_wire::Status::GENERIC_ERROR.0, reason)
    }

    pub fn not_opened_by_client(name: &str) -> Self {
        Failure::new(
            nws_wire::Status::NOT_OPENED_BY_CLIENT.0,
            format!("Workspace {name} was not opened by this client"),
        )
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// A user-level error that should be reported to the client rather
    /// than crash the connection (spec.md section 4.C/7).
    #[error("{0}")]
    User(#[from] Failure),
    /// The variable-id space is exhausted after 1000 collision retries
    /// (spec.md section 4.D).
    #[error("Unable to allocate a unique variable id after 1000 attempts")]
    VidSpaceExhausted,
    /// `mktemp ws` could not find a free name after 1000 attempts, or its
    /// template is malformed.
    #[error("mktemp ws failed: {0}")]
    MktempFailed(String),
    /// An internal invariant was violated; this is always a server bug,
    /// never a user mistake.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
