//! Name/value map framing (spec.md section 4.A): a 4-digit count followed
//! by that many name/value pairs, each a pair of "counted short" frames.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::frame::{
    read_counted_short_str, read_decimal, write_counted_short_str, write_decimal,
};

/// An ordered name/value map, as used for option negotiation and
/// per-command metadata.
pub type NameValueMap = Vec<(String, String)>;

pub async fn read_map<R: AsyncRead + Unpin>(r: &mut R) -> Result<NameValueMap> {
    let count = read_decimal::<4, _>(r).await? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let name = read_counted_short_str(r).await?;
        let value = read_counted_short_str(r).await?;
        out.push((name, value));
    }
    Ok(out)
}

pub async fn write_map<W: AsyncWrite + Unpin>(w: &mut W, map: &NameValueMap) -> Result<()> {
    write_decimal::<4, _>(w, map.len() as u64).await?;
    for (name, value) in map {
        write_counted_short_str(w, name).await?;
        write_counted_short_str(w, value).await?;
    }
    Ok(())
}

/// Convenience lookup, since maps are small and order rarely matters once
/// negotiated.
pub fn map_get<'a>(map: &'a NameValueMap, key: &str) -> Option<&'a str> {
    map.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
