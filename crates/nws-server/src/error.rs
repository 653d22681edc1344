//! Connection-fatal errors (spec.md section 7: "protocol errors ... then
//! close the connection"), distinct from [`nws_core::Failure`], which is
//! always reported to the client and never tears down the connection.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnError {
    #[error(transparent)]
    Wire(#[from] nws_wire::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Core(#[from] nws_core::Error),
}

pub type Result<T> = std::result::Result<T, ConnError>;
