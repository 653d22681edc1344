//! The in-memory-or-file-backed [`Value`] object (spec.md section 3, component G).

use std::sync::Arc;

use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Chunk size used when streaming a long value's backing file to the wire
/// (spec.md section 4.B / 6: 16 KiB).
pub const SPILL_CHUNK_SIZE: usize = 16 * 1024;

/// A stored value: either held in memory ("short") or backed by a
/// uniquely-named temp file ("long"). Cloning a `Value` clones the handle,
/// not the bytes -- the backing file is reference-counted and removed when
/// the last clone is dropped (spec.md section 3: "reference-counted
/// cleanup"). This is exactly `tempfile::NamedTempFile`'s own drop
/// behavior, so wrapping it in an `Arc` is sufficient: the file persists as
/// long as any container, waiter hand-off, or in-flight reply holds a
/// clone, and disappears the instant none do.
#[derive(Clone, Debug)]
pub struct Value {
    type_desc: u32,
    body: Body,
}

#[derive(Clone, Debug)]
enum Body {
    Short(Arc<[u8]>),
    Long { file: Arc<NamedTempFile>, len: u64 },
}

impl Value {
    pub fn short(type_desc: u32, bytes: Vec<u8>) -> Self {
        Value {
            type_desc,
            body: Body::Short(Arc::from(bytes.into_boxed_slice())),
        }
    }

    pub fn long(type_desc: u32, file: NamedTempFile, len: u64) -> Self {
        Value {
            type_desc,
            body: Body::Long {
                file: Arc::new(file),
                len,
            },
        }
    }

    pub fn type_desc(&self) -> u32 {
        self.type_desc
    }

    pub fn len(&self) -> u64 {
        match &self.body {
            Body::Short(b) => b.len() as u64,
            Body::Long { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_long(&self) -> bool {
        matches!(self.body, Body::Long { .. })
    }

    /// Bytes if this value is short-form; `None` for long (file-backed)
    /// values, which must be streamed via [`Value::write_body`].
    pub fn short_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Short(b) => Some(b),
            Body::Long { .. } => None,
        }
    }

    /// Streams this value's bytes to `w`, in 16 KiB chunks for long values.
    pub async fn write_body<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        match &self.body {
            Body::Short(b) => {
                w.write_all(b).await?;
            }
            Body::Long { file, len } => {
                let mut f = File::open(file.path()).await?;
                let mut buf = [0u8; SPILL_CHUNK_SIZE];
                let mut remaining = *len;
                while remaining > 0 {
                    let take = remaining.min(buf.len() as u64) as usize;
                    read_exact_from(&mut f, &mut buf[..take]).await?;
                    w.write_all(&buf[..take]).await?;
                    remaining -= take as u64;
                }
            }
        }
        Ok(())
    }
}

async fn read_exact_from<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_value_round_trips() {
        let v = Value::short(7, b"hello".to_vec());
        assert_eq!(v.len(), 5);
        assert!(!v.is_long());
        let mut out = Vec::new();
        v.write_body(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn long_value_streams_and_cleans_up_on_last_drop() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let payload = vec![b'x'; SPILL_CHUNK_SIZE * 2 + 17];
        std::io::Write::write_all(&mut file, &payload).unwrap();
        let path = file.path().to_path_buf();
        let v = Value::long(1, file, payload.len() as u64);
        let clone = v.clone();

        let mut out = Vec::new();
        v.write_body(&mut out).await.unwrap();
        assert_eq!(out, payload);
        assert!(path.exists());

        drop(v);
        assert!(path.exists(), "file must survive while a clone is held");
        drop(clone);
        assert!(!path.exists(), "file must be removed once unreferenced");
    }
}
