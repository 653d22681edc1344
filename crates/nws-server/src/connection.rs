//! Per-connection task (spec.md section 4.B): runs the handshake once,
//! then loops reading and dispatching commands until the socket closes or
//! a protocol error ends the connection, and drives the teardown spec.md
//! section 4.B describes for both paths.

use std::net::SocketAddr;
use std::sync::Arc;

use nws_wire::map::read_map;
use nws_wire::tuple::read_argument_tuple;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;

use crate::dispatch::dispatch;
use crate::error::{ConnError, Result};
use crate::handshake;
use crate::reply;
use crate::server::Server;
use crate::session::Session;
use crate::tls::AsyncStream;

/// Applies the socket options spec.md section 5 requires on every
/// accepted connection. `TCP_NODELAY` has a native `tokio` setter;
/// `SO_KEEPALIVE` does not, so we reach for `socket2::SockRef`, which
/// operates on the stream's raw descriptor without taking it away from
/// `tokio` (same pattern as `spark-transport-tcp`'s `TcpSocketConfig::apply`
/// in the retrieval pack; see DESIGN.md).
fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let sock = socket2::SockRef::from(stream);
    sock.set_keepalive(true)?;
    Ok(())
}

/// Runs one client connection to completion. Never returns an error to
/// the caller -- every failure path is logged and followed by the same
/// disconnect teardown, matching spec.md section 4.B's "on close (clean
/// or reset)" clause applying uniformly to both cases.
pub async fn handle(server: Arc<Server>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = configure_socket(&stream) {
        log::warn!("failed to configure socket options for {peer}: {e}");
    }

    let client = server.next_client_id();
    let mut session = Session::new(client, peer.to_string());
    let io: Box<dyn AsyncStream> = Box::new(stream);

    log::info!("client {client} connected from {peer}");

    match run(&server, &mut session, client, io).await {
        Ok(()) => log::info!("client {client} ({peer}) disconnected"),
        Err(e) => log::info!("client {client} ({peer}) disconnected: {e}"),
    }

    server.purge_owned(&session.owned).await;
    if session.options.deadman {
        log::warn!("client {client} held the deadman option; shutting down");
        server.shutdown.notify_waiters();
    }
}

async fn run(
    server: &Arc<Server>,
    session: &mut Session,
    client: nws_core::ClientId,
    mut io: Box<dyn AsyncStream>,
) -> Result<()> {
    let (opts, ssl_granted) = handshake::negotiate(&mut *io, server.tls.available()).await?;
    session.options.cookie_mode = opts.cookie_mode;
    session.options.deadman = opts.deadman;
    session.options.metadata_to_server = opts.metadata_to_server;
    session.options.metadata_from_server = opts.metadata_from_server;

    if ssl_granted {
        // spec.md section 4.B: "the server sends A000 and immediately
        // upgrades the socket to TLS before accepting commands." The ack
        // already went out inside `negotiate`; this call owns the stream
        // so it can swap the transport in place.
        io = server
            .tls
            .upgrade(io)
            .await
            .map_err(|e| ConnError::Protocol(format!("TLS upgrade failed: {e}")))?;
    }

    let (mut r, mut w) = tokio::io::split(io);

    let spill = nws_wire::SpillConfig::new(server.config.long_value_threshold, &server.config.temp_dir);

    loop {
        let metadata = if session.options.metadata_to_server {
            read_map(&mut r).await?
        } else {
            Vec::new()
        };

        let mut operands = match read_argument_tuple(&mut r, &spill).await {
            Ok(operands) => operands,
            Err(e) => {
                let e = ConnError::from(e);
                report_before_close(&mut w, session, &e).await;
                return Err(e);
            }
        };
        if operands.is_empty() {
            return Err(ConnError::Protocol("empty argument tuple".to_string()));
        }
        let verb = operands.remove(0).into_string().map_err(|_| {
            ConnError::Protocol("verb operand is not a valid string".to_string())
        })?;

        if let Err(e) = dispatch(server, session, client, &mut r, &mut w, &verb, operands, metadata).await {
            report_before_close(&mut w, session, &e).await;
            return Err(e);
        }
    }
}

/// Tells the client why before closing, when the failure has a reason
/// worth reporting (spec.md section 7: "short error reply if feasible,
/// then close"). Covers protocol violations and a failed value spill
/// (SPEC_FULL.md section 5: spill failure must still surface a short
/// error rather than just dropping the connection); other wire errors
/// (truncated frames, bad UTF-8) have no coherent reply to send, since
/// the stream itself can no longer be trusted to frame a reply. A write
/// failure here just means the socket is already gone, which is fine --
/// we're closing anyway.
async fn report_before_close<W: AsyncWrite + Unpin>(w: &mut W, session: &Session, e: &ConnError) {
    let reason = match e {
        ConnError::Protocol(reason) => reason.clone(),
        ConnError::Wire(nws_wire::Error::SpillFailed(size, io_err)) => {
            format!("failed to spill {size}-byte value to disk: {io_err}")
        }
        _ => return,
    };
    let _ = reply::send_short_error(w, &session.options, nws_wire::Status::GENERIC_ERROR, &reason).await;
}
