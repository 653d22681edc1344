//! Library half of the NWS-compatible coordination server: the accept
//! loop and everything it drives (spec.md section 2's "Data flow" wired
//! up to a real `tokio` TCP listener). `main.rs` is a thin front-end over
//! [`run`]; `tests/` drives this crate directly against an in-process
//! listener the same way `smb`'s integration tests drive a connection
//! against a real share.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod reply;
pub mod server;
pub mod session;
pub mod tls;

use std::sync::Arc;

use tokio::net::TcpListener;

pub use config::ServerConfig;
pub use server::Server;

/// Derives the process-unique `mktemp ws` suffix from a throwaway temp
/// file's generated name (spec.md section 4.F), kept alive for the
/// server's lifetime and only removed at shutdown -- its *name*, not its
/// contents, is what other concurrent server instances sharing the same
/// temp dir need to stay collision-free.
pub fn derive_basename(
    temp_dir: &std::path::Path,
) -> std::io::Result<(String, tempfile::NamedTempFile)> {
    let file = tempfile::Builder::new().prefix(".nws-").tempfile_in(temp_dir)?;
    let name = file
        .path()
        .file_name()
        .expect("tempfile always names its file")
        .to_string_lossy()
        .into_owned();
    Ok((name, file))
}

/// Binds `config.bind` and runs the accept loop until a deadman
/// connection's close triggers [`Server::shutdown`], then purges every
/// remaining workspace and returns. Exposed separately from `main` so
/// tests can run a real server against `127.0.0.1:0` and recover its
/// actual bound address.
pub async fn run(config: ServerConfig) -> std::io::Result<()> {
    let (basename, basename_file) = derive_basename(&config.temp_dir)?;
    let listener = TcpListener::bind(config.bind).await?;
    log::info!("listening on {}", listener.local_addr()?);

    let server = Server::new(config, basename);
    accept_loop(&server, listener).await;

    server.purge_all().await;
    drop(basename_file);
    log::info!("server stopped");
    Ok(())
}

/// Like [`run`], but hands the bound listener's local address back to
/// the caller over `ready` the moment the socket is up, for tests that
/// bind to port 0 and need to learn which port the OS actually chose.
pub async fn run_with_ready(
    config: ServerConfig,
    ready: tokio::sync::oneshot::Sender<std::net::SocketAddr>,
) -> std::io::Result<()> {
    let (basename, basename_file) = derive_basename(&config.temp_dir)?;
    let listener = TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;
    log::info!("listening on {addr}");
    let _ = ready.send(addr);

    let server = Server::new(config, basename);
    accept_loop(&server, listener).await;

    server.purge_all().await;
    drop(basename_file);
    log::info!("server stopped");
    Ok(())
}

async fn accept_loop(server: &Arc<Server>, listener: TcpListener) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("failed to accept a connection: {e}");
                        continue;
                    }
                };
                let server = Arc::clone(server);
                tokio::spawn(async move {
                    connection::handle(server, stream, peer).await;
                });
            }
            _ = server.shutdown.notified() => {
                log::info!("shutdown requested, no longer accepting new connections");
                break;
            }
        }
    }
}
