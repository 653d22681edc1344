//! Connection handshake (spec.md section 4.B): legacy/modern/quirk
//! negotiation of the initial 4-byte token, and -- for the modern path --
//! the options-advertise/options-request dance that turns on metadata and
//! deadman behavior for the rest of the connection.

use nws_wire::map::{read_map, write_map};
use nws_wire::NameValueMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ConnError, Result};
use crate::session::ConnOptions;

const DEFAULT_OPTION_KEYS: &[&str] = &[
    "MetadataToServer",
    "MetadataFromServer",
    "KillServerOnClose",
];

/// Runs the handshake to completion, returning the negotiated options and
/// whether the client asked for (and was granted) `SSL:"1"`. `tls_available`
/// advertises `SSL` as a supported option and gates whether a request for
/// it is granted; the caller (`connection.rs`) is responsible for actually
/// invoking [`crate::tls::TlsUpgrader::upgrade`] once this returns true,
/// since the upgrade needs to own the stream this function only borrows.
pub async fn negotiate<S>(io: &mut S, tls_available: bool) -> Result<(ConnOptions, bool)>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut token = [0u8; 4];
    io.read_exact(&mut token).await.map_err(nws_wire::Error::Io)?;

    let mut opts = ConnOptions::default();

    if token[0] == b'X' {
        opts.cookie_mode = true;
        advertise_options(io, tls_available).await?;
        let ssl_granted = negotiate_modern_options(io, &mut opts, tls_available).await?;
        return Ok((opts, ssl_granted));
    }

    if &token != b"0000" && &token != b"1111" {
        opts.cookie_mode = true;
    }
    io.write_all(b"2223").await.map_err(nws_wire::Error::Io)?;
    Ok((opts, false))
}

async fn advertise_options<S: AsyncWrite + Unpin + ?Sized>(io: &mut S, tls_available: bool) -> Result<()> {
    io.write_all(b"P000").await.map_err(nws_wire::Error::Io)?;
    let mut advertised: NameValueMap = DEFAULT_OPTION_KEYS
        .iter()
        .map(|k| (k.to_string(), String::new()))
        .collect();
    if tls_available {
        advertised.push(("SSL".to_string(), String::new()));
    }
    write_map(io, &advertised).await?;
    Ok(())
}

/// Returns whether the client requested and was granted `SSL:"1"`. The
/// actual upgrade happens after this returns (see [`negotiate`]'s doc
/// comment); this function only decides and acknowledges it on the wire.
async fn negotiate_modern_options<S>(
    io: &mut S,
    opts: &mut ConnOptions,
    tls_available: bool,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut token = [0u8; 4];
    io.read_exact(&mut token).await.map_err(nws_wire::Error::Io)?;
    if &token != b"R000" {
        return Err(ConnError::Protocol(
            "expected R000 options request".to_string(),
        ));
    }

    // Options arrive as a plain counted map: a 4-digit count followed by
    // `count` counted-short name/value pairs (the original's `DictReceiver`
    // reads the same shape).
    let requested: NameValueMap = read_map(io).await?;

    if !options_are_known(&requested) {
        io.write_all(b"F000").await.map_err(nws_wire::Error::Io)?;
        return Err(ConnError::Protocol(
            "client requested an unsupported option".to_string(),
        ));
    }

    let ssl_granted = if nws_wire::map::map_get(&requested, "SSL") == Some("1") {
        if !tls_available {
            io.write_all(b"F000").await.map_err(nws_wire::Error::Io)?;
            return Err(ConnError::Protocol(
                "SSL requested but not available".to_string(),
            ));
        }
        true
    } else {
        false
    };

    if nws_wire::map::map_get(&requested, "KillServerOnClose") == Some("1") {
        opts.deadman = true;
    }
    if nws_wire::map::map_get(&requested, "MetadataToServer") == Some("1") {
        opts.metadata_to_server = true;
    }
    if nws_wire::map::map_get(&requested, "MetadataFromServer") == Some("1") {
        opts.metadata_from_server = true;
    }

    io.write_all(b"A000").await.map_err(nws_wire::Error::Io)?;
    Ok(ssl_granted)
}

fn options_are_known(requested: &NameValueMap) -> bool {
    requested
        .iter()
        .all(|(k, _)| DEFAULT_OPTION_KEYS.contains(&k.as_str()) || k == "SSL")
}
