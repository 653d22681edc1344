//! Primitive counted-length framing.
//!
//! Every multi-byte integer on the wire is ASCII decimal, left-padded with
//! zeros to a fixed width (4 or 20 characters; spec.md section 6). These
//! helpers are the pull-style building blocks every other frame shape
//! (name/value map, argument tuple, long reply) is built from: each call
//! reads or writes an exact byte count, matching the "declare
//! `(next_handler, exact_byte_count)`" contract of spec.md section 4.A.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Reads `WIDTH` ASCII decimal digits and parses them as a length/count.
///
/// A non-numeric or negative count is a malformed frame and terminates the
/// connection (spec.md section 4.A).
pub async fn read_decimal<const WIDTH: usize, R: AsyncRead + Unpin>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; WIDTH];
    r.read_exact(&mut buf).await?;
    let s = std::str::from_utf8(&buf)
        .map_err(|_| Error::Malformed("non-ASCII decimal count".to_string()))?;
    s.trim()
        .parse::<u64>()
        .map_err(|_| Error::Malformed(format!("invalid decimal count {s:?}")))
}

/// Writes `value` as `WIDTH` zero-padded ASCII decimal digits.
pub async fn write_decimal<const WIDTH: usize, W: AsyncWrite + Unpin>(
    w: &mut W,
    value: u64,
) -> Result<()> {
    let rendered = format!("{value:0width$}", width = WIDTH);
    if rendered.len() != WIDTH {
        return Err(Error::Malformed(format!(
            "value {value} does not fit in {WIDTH} decimal digits"
        )));
    }
    w.write_all(rendered.as_bytes()).await?;
    Ok(())
}

/// Reads a "counted short" frame: a 4-digit length followed by that many
/// bytes. Used for handshake tokens, option maps, and names.
pub async fn read_counted_short<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>> {
    let len = read_decimal::<4, _>(r).await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes a "counted short" frame.
pub async fn write_counted_short<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> Result<()> {
    write_decimal::<4, _>(w, data.len() as u64).await?;
    w.write_all(data).await?;
    Ok(())
}

pub async fn read_counted_short_str<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    Ok(String::from_utf8(read_counted_short(r).await?)?)
}

pub async fn write_counted_short_str<W: AsyncWrite + Unpin>(w: &mut W, s: &str) -> Result<()> {
    write_counted_short(w, s.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn roundtrips_counted_short() {
        let mut buf = Vec::new();
        write_counted_short(&mut buf, b"hello").await.unwrap();
        assert_eq!(buf, b"0005hello");
        let mut cursor = Cursor::new(buf);
        let back = read_counted_short(&mut cursor).await.unwrap();
        assert_eq!(back, b"hello");
    }

    #[tokio::test]
    async fn rejects_non_numeric_count() {
        let mut cursor = Cursor::new(b"abcd".to_vec());
        let err = read_decimal::<4, _>(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }
}
