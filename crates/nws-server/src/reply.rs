//! Reply framing (spec.md section 4.B/6): short and long replies, with or
//! without the negotiated metadata-from-server map and cookie fields.

use nws_core::Vid;
use nws_wire::{frame::write_decimal, map::write_map, NameValueMap, Status, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::session::ConnOptions;

/// Sends a short reply: optional metadata map, then the 4-byte status.
pub async fn send_short<W: AsyncWrite + Unpin>(
    w: &mut W,
    opts: &ConnOptions,
    status: Status,
    metadata: &NameValueMap,
) -> nws_wire::Result<()> {
    if opts.metadata_from_server {
        write_map(w, metadata).await?;
    }
    w.write_all(&status.to_wire()).await?;
    Ok(())
}

/// Sends a long reply: optional metadata map, status, type descriptor,
/// cookie fields (cookie mode only), length, then the value bytes.
///
/// `vid.to_wire()` already renders a 20-character zero-padded decimal --
/// the original's `'%-20.20s'` preamble format is applied to that same
/// already-20-char string, so it is a no-op there; we skip reproducing
/// the pointless left-justify/truncate step (see DESIGN.md).
pub async fn send_long<W: AsyncWrite + Unpin>(
    w: &mut W,
    opts: &ConnOptions,
    status: Status,
    value: &Value,
    cookie: (Vid, u64),
    metadata: &NameValueMap,
) -> nws_wire::Result<()> {
    if opts.metadata_from_server {
        write_map(w, metadata).await?;
    }
    w.write_all(&status.to_wire()).await?;
    write_decimal::<20, _>(w, value.type_desc() as u64).await?;
    if opts.cookie_mode {
        w.write_all(cookie.0.to_wire().as_bytes()).await?;
        write_decimal::<20, _>(w, cookie.1).await?;
    }
    write_decimal::<20, _>(w, value.len()).await?;
    value.write_body(w).await?;
    Ok(())
}

/// A short error reply: `nwsReason` set in the metadata map when metadata
/// is negotiated (spec.md section 6).
pub async fn send_short_error<W: AsyncWrite + Unpin>(
    w: &mut W,
    opts: &ConnOptions,
    status: Status,
    reason: &str,
) -> nws_wire::Result<()> {
    send_short(w, opts, status, &error_metadata(reason)).await
}

/// A long error reply: an empty string value, same status/reason
/// convention as [`send_short_error`].
pub async fn send_long_error<W: AsyncWrite + Unpin>(
    w: &mut W,
    opts: &ConnOptions,
    status: Status,
    reason: &str,
) -> nws_wire::Result<()> {
    let value = Value::short(0, Vec::new());
    send_long(w, opts, status, &value, (Vid::zero(), 0), &error_metadata(reason)).await
}

fn error_metadata(reason: &str) -> NameValueMap {
    vec![("nwsReason".to_string(), reason.to_string())]
}
