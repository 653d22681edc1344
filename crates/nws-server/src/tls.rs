//! TLS upgrade hook point (spec.md section 4.B: "upgrades the socket to
//! TLS before accepting commands").
//!
//! Context creation and certificate management are delegated to the
//! deployment (SPEC_FULL.md Non-goals): this crate defines where a real
//! implementation plugs in, not how it loads a cert. A deployment that
//! wants TLS implements [`TlsUpgrader::upgrade`] over a real acceptor
//! (e.g. `tokio_rustls::TlsAcceptor`, built from its own `ServerConfig`
//! outside this crate, the same delegation the retrieval pack's
//! smb-transport crate uses for its own TLS config), and `handshake.rs`
//! calls it once the client has asked for `SSL:"1"` and the server has
//! advertised it. [`NoTls`] never advertises the option, so its
//! `upgrade` is unreachable in practice.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

/// A transport `TlsUpgrader` can read, write, and replace: any stream
/// concrete enough to hand to a TLS acceptor and boxed so the connection
/// loop doesn't need to know which transport (plain or already-upgraded)
/// it's holding.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub trait TlsUpgrader: Send + Sync {
    fn available(&self) -> bool;

    /// Consumes the plaintext stream and returns the encrypted one.
    /// Only called when `available()` returned true and the client then
    /// requested `SSL:"1"`; a real implementation performs the TLS
    /// server handshake here and hands back the resulting
    /// `tokio_rustls::server::TlsStream` boxed as `dyn AsyncStream`.
    fn upgrade<'a>(
        &'a self,
        io: Box<dyn AsyncStream>,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Box<dyn AsyncStream>>> + Send + 'a>>;
}

/// The default upgrader: never advertises TLS, so `upgrade` is never
/// called in practice. It returns an error rather than panicking in case
/// a future caller ever invokes it outside that guard.
pub struct NoTls;

impl TlsUpgrader for NoTls {
    fn available(&self) -> bool {
        false
    }

    fn upgrade<'a>(
        &'a self,
        _io: Box<dyn AsyncStream>,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Box<dyn AsyncStream>>> + Send + 'a>> {
        Box::pin(async {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "no TLS acceptor configured",
            ))
        })
    }
}
