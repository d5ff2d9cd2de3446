//! Length-prefixed JSON framing used by every control-plane exchange
//! (spec §4.1): a 4-byte big-endian length header followed by that many
//! bytes of UTF-8 JSON. A binary payload of a caller-declared size may
//! follow a frame directly on the same stream; this module reads/writes
//! that payload too, since the two are never separated on the wire.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FramingError;

/// Sanity cap on a single JSON frame body. Well above any real command;
/// guards against a hostile or buggy peer claiming a multi-gigabyte frame.
pub const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

fn map_eof(e: std::io::Error) -> FramingError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FramingError::ConnectionClosed
    } else {
        FramingError::Io(e)
    }
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON frame and decode it as `T`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, FramingError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(map_eof)?;
    let len = u32::from_be_bytes(len_buf) as u64;
    if len > MAX_FRAME_LEN {
        return Err(FramingError::PayloadTooLarge {
            declared: len,
            limit: MAX_FRAME_LEN,
        });
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(map_eof)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Read exactly `size` bytes of a binary payload declared by the frame
/// that preceded it (a STORE request or RETRIEVE reply).
pub async fn read_payload<R>(reader: &mut R, size: u64) -> Result<Vec<u8>, FramingError>
where
    R: AsyncRead + Unpin,
{
    if size > MAX_FRAME_LEN {
        return Err(FramingError::PayloadTooLarge {
            declared: size,
            limit: MAX_FRAME_LEN,
        });
    }
    let mut buf = vec![0u8; size as usize];
    reader.read_exact(&mut buf).await.map_err(map_eof)?;
    Ok(buf)
}

/// Write a binary payload immediately following a frame.
pub async fn write_payload<W>(writer: &mut W, data: &[u8]) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::io::duplex;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    #[tokio::test]
    async fn frame_round_trips() {
        let (mut a, mut b) = duplex(4096);
        write_frame(&mut a, &Ping { n: 7 }).await.unwrap();
        let got: Ping = read_frame(&mut b).await.unwrap();
        assert_eq!(got, Ping { n: 7 });
    }

    #[tokio::test]
    async fn frame_then_payload_round_trips() {
        let (mut a, mut b) = duplex(4096);
        write_frame(&mut a, &Ping { n: 1 }).await.unwrap();
        write_payload(&mut a, b"hello").await.unwrap();

        let _got: Ping = read_frame(&mut b).await.unwrap();
        let payload = read_payload(&mut b, 5).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn short_read_on_length_header_is_connection_closed() {
        let (a, mut b) = duplex(4096);
        drop(a);
        let err = read_frame::<_, Ping>(&mut b).await.unwrap_err();
        assert!(matches!(err, FramingError::ConnectionClosed));
    }

    #[tokio::test]
    async fn oversized_declared_length_is_rejected() {
        let (mut a, mut b) = duplex(8);
        let len = (MAX_FRAME_LEN + 1) as u32;
        a.write_all(&len.to_be_bytes()).await.unwrap();
        let err = read_frame::<_, Ping>(&mut b).await.unwrap_err();
        assert!(matches!(err, FramingError::PayloadTooLarge { .. }));
    }
}
