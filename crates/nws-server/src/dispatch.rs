//! Verb dispatch (spec.md section 4.F "Dispatch" / section 6 "Verbs and
//! operand lists"): turns one decoded argument tuple into the effects on
//! [`crate::server::Server`] and the reply bytes written back to the
//! client.

use std::sync::Arc;

use nws_core::{ClientId, FetchVarOutcome, Mode, Vid};
use nws_wire::{NameValueMap, Payload, Status, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::oneshot;

use crate::error::{ConnError, Result};
use crate::reply;
use crate::server::{Delivery, Server};
use crate::session::Session;

/// `GET_OP_PROPERTIES`: (remove, block, iterate) per verb in the
/// fetch/find family (spec.md section 4.F).
fn get_op_properties(verb: &str) -> Option<(bool, bool, bool)> {
    Some(match verb {
        "fetch" => (true, true, false),
        "fetchTry" => (true, false, false),
        "find" => (false, true, false),
        "findTry" => (false, false, false),
        "ifetch" => (true, true, true),
        "ifetchTry" => (true, false, true),
        "ifind" => (false, true, true),
        "ifindTry" => (false, false, true),
        _ => return None,
    })
}

fn is_get_family(verb: &str) -> bool {
    get_op_properties(verb).is_some()
}

/// Dispatches one command. Writes exactly one reply to `w` before
/// returning (never zero, unlike the original's silent-drop on an
/// unexpected exception -- see DESIGN.md).
///
/// `r` is only consulted by the fetch/find family, and only once a
/// request has actually parked: a concurrent read lets us notice the
/// connection closing (or the client pipelining another command while
/// blocked, itself a protocol error -- spec.md section 7) while we are
/// not otherwise reading from the socket.
pub async fn dispatch<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    server: &Arc<Server>,
    session: &mut Session,
    client: ClientId,
    r: &mut R,
    w: &mut W,
    verb: &str,
    mut operands: Vec<Payload>,
    metadata: NameValueMap,
) -> Result<()> {
    session.stats.mark_operation(verb, nws_core::time_fmt::asctime_now());

    if is_get_family(verb) {
        return cmd_get(server, session, client, r, w, verb, operands, metadata).await;
    }

    match verb {
        "declare var" => cmd_declare_var(server, session, w, operands).await,
        "delete ws" => cmd_delete_workspace(server, session, w, operands).await,
        "delete var" => cmd_delete_var(server, session, w, operands).await,
        "list vars" => cmd_list_vars(server, session, w, operands).await,
        "list wss" => cmd_list_workspaces(server, session, w, operands).await,
        "mktemp ws" => cmd_make_temp_workspace(server, session, w, operands).await,
        "open ws" | "use ws" => cmd_open_workspace(server, session, w, verb, operands).await,
        "store" => cmd_store(server, session, client, w, operands, metadata).await,
        "deadman" => cmd_deadman(session, w).await,
        _ => {
            drain(&mut operands);
            reply::send_short_error(
                w,
                &session.options,
                Status::GENERIC_ERROR,
                &format!("Unknown verb \"{verb}\""),
            )
            .await?;
            Ok(())
        }
    }
}

/// Spilled operands the handler doesn't use must still be accounted for
/// (their temp files are cleaned up on drop); this just documents the
/// intent at call sites that ignore trailing operands.
fn drain(_operands: &mut [Payload]) {}

fn take_str(operands: &mut Vec<Payload>, index: usize, what: &str) -> Result<String> {
    if index >= operands.len() {
        return Err(ConnError::Protocol(format!("missing operand: {what}")));
    }
    operands
        .remove(index)
        .into_string()
        .map_err(|_| ConnError::Protocol(format!("operand {what} is not a valid string")))
}

/// Resolves `ext_name` through the client's own view (DESIGN NOTES,
/// "two-level workspace naming"): every verb except `delete ws` looks a
/// workspace up this way.
fn resolve_ws(session: &Session, ext_name: &str) -> std::result::Result<nws_core::InternalName, nws_core::Failure> {
    session
        .view(ext_name)
        .cloned()
        .ok_or_else(|| nws_core::Failure::not_opened_by_client(ext_name))
}

async fn cmd_declare_var<W: AsyncWrite + Unpin>(
    server: &Arc<Server>,
    session: &mut Session,
    w: &mut W,
    mut operands: Vec<Payload>,
) -> Result<()> {
    let ext_name = take_str(&mut operands, 0, "ws")?;
    let var_name = take_str(&mut operands, 0, "var")?;
    let mode_str = take_str(&mut operands, 0, "mode")?;

    let mut state = server.state.lock().await;
    let result = (|| -> std::result::Result<(), nws_core::Failure> {
        let int_name = resolve_ws(session, &ext_name)?;
        let mode = Mode::parse(&mode_str).ok_or_else(|| {
            nws_core::Failure::generic(format!("Cannot change variable mode to \"{mode_str}\"."))
        })?;
        let ws = state
            .registry
            .get_mut(&int_name)
            .ok_or_else(|| nws_core::Failure::no_such_workspace(&ext_name))?;
        ws.declare_var(&var_name, mode).map_err(|e| match e {
            nws_core::Error::User(f) => f,
            other => nws_core::Failure::generic(other.to_string()),
        })
    })();
    drop(state);

    match result {
        Ok(()) => {
            reply::send_short(w, &session.options, Status::SUCCESS, &NameValueMap::new()).await?;
        }
        Err(f) => {
            reply::send_short_error(w, &session.options, Status(f.status), &f.reason).await?;
        }
    }
    Ok(())
}

async fn cmd_delete_workspace<W: AsyncWrite + Unpin>(
    server: &Arc<Server>,
    session: &mut Session,
    w: &mut W,
    mut operands: Vec<Payload>,
) -> Result<()> {
    let ext_name = take_str(&mut operands, 0, "ws")?;

    let mut state = server.state.lock().await;
    let result = state.registry.delete_workspace(&ext_name);
    match result {
        Ok(purged) => {
            state.deliver_purged(purged);
            drop(state);
            session.forget_view(&ext_name);
            session.owned.retain(|n| n.external_name() != ext_name);
            reply::send_short(w, &session.options, Status::SUCCESS, &NameValueMap::new()).await?;
        }
        Err(f) => {
            drop(state);
            reply::send_short_error(w, &session.options, Status(f.status), &f.reason).await?;
        }
    }
    Ok(())
}

async fn cmd_delete_var<W: AsyncWrite + Unpin>(
    server: &Arc<Server>,
    session: &mut Session,
    w: &mut W,
    mut operands: Vec<Payload>,
) -> Result<()> {
    let ext_name = take_str(&mut operands, 0, "ws")?;
    let var_name = take_str(&mut operands, 0, "var")?;

    let mut state = server.state.lock().await;
    let result = (|| -> std::result::Result<Vec<ClientId>, nws_core::Failure> {
        let int_name = resolve_ws(session, &ext_name)?;
        let ws = state
            .registry
            .get_mut(&int_name)
            .ok_or_else(|| nws_core::Failure::no_such_workspace(&ext_name))?;
        ws.delete_var(&var_name)
    })();

    match result {
        Ok(purged) => {
            state.deliver_purged(purged);
            drop(state);
            reply::send_short(w, &session.options, Status::SUCCESS, &NameValueMap::new()).await?;
        }
        Err(f) => {
            drop(state);
            reply::send_short_error(w, &session.options, Status(f.status), &f.reason).await?;
        }
    }
    Ok(())
}

async fn cmd_get<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    server: &Arc<Server>,
    session: &mut Session,
    client: ClientId,
    r: &mut R,
    w: &mut W,
    verb: &str,
    mut operands: Vec<Payload>,
    _metadata: NameValueMap,
) -> Result<()> {
    let (remove, blocking, iterate) = get_op_properties(verb).expect("verb already matched");

    let ext_name = take_str(&mut operands, 0, "ws")?;
    let var_name = take_str(&mut operands, 0, "var")?;

    // Trim whitespace the way the original does, since the vid operand
    // travels in a fixed-width space-padded field (spec.md section 6).
    let iter_state = if iterate {
        let vid_str = take_str(&mut operands, 0, "vid")?;
        let index_str = take_str(&mut operands, 0, "val_index")?;
        let vid_str = vid_str.trim();
        if vid_str.is_empty() {
            None
        } else {
            let vid = Vid::from_wire(vid_str)
                .ok_or_else(|| ConnError::Protocol("malformed vid operand".to_string()))?;
            let index: u64 = index_str
                .trim()
                .parse()
                .map_err(|_| ConnError::Protocol("malformed val_index operand".to_string()))?;
            Some(nws_core::IterState { vid, index })
        }
    } else {
        None
    };

    let mut state = server.state.lock().await;
    let int_name = match resolve_ws(session, &ext_name) {
        Ok(n) => n,
        Err(f) => {
            drop(state);
            reply::send_long_error(w, &session.options, Status(f.status), &f.reason).await?;
            return Ok(());
        }
    };
    let ws = match state.registry.get_mut(&int_name) {
        Some(ws) => ws,
        None => {
            drop(state);
            let f = nws_core::Failure::no_such_workspace(&ext_name);
            reply::send_long_error(w, &session.options, Status(f.status), &f.reason).await?;
            return Ok(());
        }
    };

    let outcome = if remove {
        ws.fetch_var(&var_name, client, blocking, iter_state)
    } else {
        ws.find_var(&var_name, client, blocking, iter_state)
    };

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            drop(state);
            let f = to_failure(e);
            reply::send_long_error(w, &session.options, Status(f.status), &f.reason).await?;
            return Ok(());
        }
    };

    match outcome {
        FetchVarOutcome::Value {
            value,
            metadata,
            cookie,
            released,
        } => {
            state.deliver(released);
            drop(state);
            reply::send_long(w, &session.options, Status::SUCCESS, &value, cookie, &metadata).await?;
            Ok(())
        }
        FetchVarOutcome::Parked { released } => {
            let (tx, rx) = oneshot::channel();
            state.park(client, tx);
            state.deliver(released);
            drop(state);

            match wait_parked(r, rx).await {
                ParkOutcome::Delivered(Delivery::Value {
                    value,
                    metadata,
                    cookie,
                }) => {
                    reply::send_long(w, &session.options, Status::SUCCESS, &value, cookie, &metadata).await?;
                    Ok(())
                }
                ParkOutcome::Delivered(Delivery::Purged) => {
                    reply::send_long_error(w, &session.options, Status::GENERIC_ERROR, "Variable purged.").await?;
                    Ok(())
                }
                ParkOutcome::Disconnected => {
                    // The socket closed while we were parked: no reply is
                    // possible, and -- per spec.md section 4.B teardown
                    // and DESIGN NOTES "cyclic refs" -- we must evict
                    // ourselves from the waiter list exactly once, since
                    // no later store will ever find us there otherwise.
                    unpark_and_cancel(server, &int_name, &var_name, client).await;
                    Err(ConnError::Protocol("connection closed while blocked".to_string()))
                }
                ParkOutcome::ProtocolViolation => {
                    unpark_and_cancel(server, &int_name, &var_name, client).await;
                    reply::send_long_error(
                        w,
                        &session.options,
                        Status::GENERIC_ERROR,
                        "command received on a connection already blocked in fetch/find",
                    )
                    .await?;
                    Err(ConnError::Protocol(
                        "command arrived while blocked in fetch/find".to_string(),
                    ))
                }
            }
        }
    }
}

enum ParkOutcome {
    Delivered(Delivery),
    /// The socket hit EOF (or an I/O error) while we were parked.
    Disconnected,
    /// The client sent more bytes while this connection was already
    /// blocking in fetch/find -- a protocol violation (spec.md section
    /// 4.B: "a command arriving on an already-blocking connection...").
    ProtocolViolation,
}

/// Waits for either a delivery (store/purge elsewhere) or activity on the
/// read half, which can only mean the client disconnected or pipelined a
/// command it isn't allowed to send yet. `dispatch` does not otherwise
/// read from `r` while parked (spec.md section 4.B: "the connection reads
/// no further commands until the waiter fires"), so this probe read is
/// the only thing that can resolve besides `rx`.
async fn wait_parked<R: AsyncRead + Unpin>(
    r: &mut R,
    rx: oneshot::Receiver<Delivery>,
) -> ParkOutcome {
    let mut probe = [0u8; 1];
    tokio::pin!(rx);
    tokio::select! {
        biased;
        delivery = &mut rx => match delivery {
            Ok(d) => ParkOutcome::Delivered(d),
            Err(_) => ParkOutcome::Disconnected,
        },
        read = r.read(&mut probe) => match read {
            Ok(0) | Err(_) => ParkOutcome::Disconnected,
            Ok(_) => ParkOutcome::ProtocolViolation,
        },
    }
}

/// Removes `client` from the server's parked-client table and from the
/// variable's own waiter list. Safe to call even if the variable or
/// workspace has since been deleted (then there is nothing left to
/// evict from).
async fn unpark_and_cancel(
    server: &Arc<Server>,
    int_name: &nws_core::InternalName,
    var_name: &str,
    client: ClientId,
) {
    let mut state = server.state.lock().await;
    state.unpark(client);
    if let Some(ws) = state.registry.get_mut(int_name) {
        ws.cancel_waiter(var_name, client);
    }
}

fn to_failure(e: nws_core::Error) -> nws_core::Failure {
    match e {
        nws_core::Error::User(f) => f,
        other => nws_core::Failure::new(Status::INTERNAL_ERROR.0, other.to_string()),
    }
}

async fn cmd_list_vars<W: AsyncWrite + Unpin>(
    server: &Arc<Server>,
    session: &mut Session,
    w: &mut W,
    mut operands: Vec<Payload>,
) -> Result<()> {
    let ext_name = take_str(&mut operands, 0, "ws")?;

    let state = server.state.lock().await;
    let result = (|| -> std::result::Result<String, nws_core::Failure> {
        let int_name = resolve_ws(session, &ext_name)?;
        let ws = state
            .registry
            .get(&int_name)
            .ok_or_else(|| nws_core::Failure::no_such_workspace(&ext_name))?;
        let mut listing = ws.list_vars().join("\n");
        listing.push('\n');
        Ok(listing)
    })();
    drop(state);

    match result {
        Ok(listing) => {
            let value = Value::short(0, listing.into_bytes());
            reply::send_long(
                w,
                &session.options,
                Status::SUCCESS,
                &value,
                (Vid::zero(), 0),
                &NameValueMap::new(),
            )
            .await?;
        }
        Err(f) => {
            reply::send_long_error(w, &session.options, Status(f.status), &f.reason).await?;
        }
    }
    Ok(())
}

async fn cmd_list_workspaces<W: AsyncWrite + Unpin>(
    server: &Arc<Server>,
    session: &mut Session,
    w: &mut W,
    mut operands: Vec<Payload>,
) -> Result<()> {
    let ext_name_wanted = if operands.is_empty() {
        None
    } else {
        Some(take_str(&mut operands, 0, "ws")?)
    };

    let state = server.state.lock().await;
    let lines = state
        .registry
        .list_wss(&session.owned, ext_name_wanted.as_deref());
    drop(state);

    let mut listing = lines.join("\n");
    listing.push('\n');
    let value = Value::short(0, listing.into_bytes());
    reply::send_long(
        w,
        &session.options,
        Status::SUCCESS,
        &value,
        (Vid::zero(), 0),
        &NameValueMap::new(),
    )
    .await?;
    Ok(())
}

async fn cmd_make_temp_workspace<W: AsyncWrite + Unpin>(
    server: &Arc<Server>,
    session: &Session,
    w: &mut W,
    mut operands: Vec<Payload>,
) -> Result<()> {
    let template = if operands.is_empty() {
        "__ws__%d".to_string()
    } else {
        take_str(&mut operands, 0, "template")?
    };

    let mut state = server.state.lock().await;
    let basename = state.basename.clone();
    let result = state.registry.mktemp(&template, &basename);
    drop(state);

    // The session never learns this name through `open ws`/`use ws`'s
    // ownership path -- `mktemp ws` is a non-owning reference, matching
    // the original's `__reference_space(new_name, client, True, metadata)`
    // call with no subsequent `owned_workspaces.add`. The caller typically
    // follows up with its own `open ws` if it wants to own what it made.
    match result {
        Ok(name) => {
            let value = Value::short(0, name.into_bytes());
            reply::send_long(
                w,
                &session.options,
                Status::SUCCESS,
                &value,
                (Vid::zero(), 0),
                &NameValueMap::new(),
            )
            .await?;
        }
        Err(e) => {
            let msg = match &e {
                nws_core::Error::MktempFailed(m) => m.clone(),
                other => other.to_string(),
            };
            reply::send_long_error(w, &session.options, Status::GENERIC_ERROR, &msg).await?;
        }
    }
    Ok(())
}

async fn cmd_open_workspace<W: AsyncWrite + Unpin>(
    server: &Arc<Server>,
    session: &mut Session,
    w: &mut W,
    verb: &str,
    mut operands: Vec<Payload>,
) -> Result<()> {
    let ext_name = take_str(&mut operands, 0, "ws")?;
    let owner_label = take_str(&mut operands, 0, "owner_label")?;
    let persistent_str = take_str(&mut operands, 0, "persistent")?;
    let create_str = if operands.is_empty() {
        "yes".to_string()
    } else {
        take_str(&mut operands, 0, "create")?
    };

    let create = create_str == "yes";
    let persistent = persistent_str == "yes";
    let claim_owner = verb == "open ws";
    let owner = format!("{} ({owner_label})", session.peer);

    let mut state = server.state.lock().await;
    let int_name = state
        .registry
        .open_or_use(&ext_name, create, claim_owner, owner, persistent);
    drop(state);

    match int_name {
        Some(int_name) => {
            session.set_view(&ext_name, int_name.clone());
            if claim_owner {
                session.claim_owned(int_name);
            }
            reply::send_short(w, &session.options, Status::SUCCESS, &NameValueMap::new()).await?;
        }
        None => {
            reply::send_short_error(w, &session.options, Status::NO_SUCH_WORKSPACE, "No such workspace.").await?;
        }
    }
    Ok(())
}

async fn cmd_store<W: AsyncWrite + Unpin>(
    server: &Arc<Server>,
    session: &mut Session,
    client: ClientId,
    w: &mut W,
    mut operands: Vec<Payload>,
    metadata: NameValueMap,
) -> Result<()> {
    let ext_name = take_str(&mut operands, 0, "ws")?;
    let var_name = take_str(&mut operands, 0, "var")?;
    let type_desc_str = take_str(&mut operands, 0, "type_desc")?;
    if operands.is_empty() {
        return Err(ConnError::Protocol("missing operand: data".to_string()));
    }
    let data = operands.remove(0);

    let type_desc: u32 = type_desc_str
        .trim()
        .parse()
        .map_err(|_| ConnError::Protocol("type-desc operand is not a decimal integer".to_string()))?;
    if data.is_long() || data.len() >= server.config.long_value_threshold {
        session.stats.mark_long_value();
    }
    let value = data.into_value(type_desc);

    let mut state = server.state.lock().await;
    let result = (|| -> std::result::Result<nws_core::StoreOutcome, nws_core::Failure> {
        let int_name = resolve_ws(session, &ext_name)?;
        let ws = state
            .registry
            .get_mut(&int_name)
            .ok_or_else(|| nws_core::Failure::no_such_workspace(&ext_name))?;
        let is_barrier = ws.get(&var_name).map(|v| v.mode() == Mode::Barrier).unwrap_or(false);
        if is_barrier {
            ws.join_var(&var_name, client)
        } else {
            ws.set_var(&var_name, value, metadata)
        }
        .map_err(|e| match e {
            nws_core::Error::User(f) => f,
            other => nws_core::Failure::generic(other.to_string()),
        })
    })();

    match result {
        Ok(outcome) => {
            state.deliver(outcome.released);
            drop(state);
            reply::send_short(w, &session.options, Status::SUCCESS, &NameValueMap::new()).await?;
        }
        Err(f) => {
            drop(state);
            reply::send_short_error(w, &session.options, Status(f.status), &f.reason).await?;
        }
    }
    Ok(())
}

async fn cmd_deadman<W: AsyncWrite + Unpin>(session: &mut Session, w: &mut W) -> Result<()> {
    session.options.deadman = true;
    reply::send_short(w, &session.options, Status::SUCCESS, &NameValueMap::new()).await?;
    Ok(())
}
