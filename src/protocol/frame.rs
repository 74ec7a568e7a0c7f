//! Length-prefixed message framing.
//!
//! Each wire message is a 4-byte big-endian length followed by exactly that
//! many payload bytes; the length covers the payload only. Frames are
//! always written in one piece so that concurrent writers on different
//! connections can never interleave within a message.

use crate::{VoltError, VoltResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Upper bound accepted for a single frame; the server never sends more.
pub(crate) const MAX_FRAME_LENGTH: usize = 50 * 1024 * 1024;

/// Composes the length prefix and payload into one buffer.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn frame(payload: &[u8]) -> VoltResult<Vec<u8>> {
    if payload.is_empty() || payload.len() > MAX_FRAME_LENGTH {
        return Err(VoltError::Usage(format!(
            "frame payload of {} bytes is outside 1..={MAX_FRAME_LENGTH}",
            payload.len()
        )));
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Writes one frame with a single `write_all`, then flushes.
pub(crate) async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    w: &mut W,
    payload: &[u8],
) -> VoltResult<()> {
    let buf = frame(payload)?;
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

/// Reads one frame: length prefix, then exactly that many payload bytes.
///
/// EOF in either phase maps to `ConnectionLost`; a non-positive or
/// oversized length is a protocol violation and maps to
/// `MalformedResponse` (the caller faults the connection, no further bytes
/// are read).
pub(crate) async fn read_frame<R: tokio::io::AsyncRead + Unpin>(
    rdr: &mut R,
) -> VoltResult<Vec<u8>> {
    let mut len_bytes = [0_u8; 4];
    rdr.read_exact(&mut len_bytes).await.map_err(eof_to_lost)?;
    let len = i32::from_be_bytes(len_bytes);
    if len <= 0 {
        return Err(VoltError::malformed(format!("frame length {len}")));
    }
    #[allow(clippy::cast_sign_loss)]
    let len = len as usize;
    if len > MAX_FRAME_LENGTH {
        return Err(VoltError::malformed(format!(
            "frame length {len} exceeds the {MAX_FRAME_LENGTH} byte limit"
        )));
    }
    let mut payload = vec![0_u8; len];
    rdr.read_exact(&mut payload).await.map_err(eof_to_lost)?;
    Ok(payload)
}

fn eof_to_lost(e: std::io::Error) -> VoltError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        VoltError::ConnectionLost
    } else {
        VoltError::Io { source: e }
    }
}

#[cfg(test)]
mod tests {
    use super::{frame, read_frame, write_frame, MAX_FRAME_LENGTH};
    use crate::VoltError;

    #[test]
    fn frame_layout() {
        let buf = frame(&[1, 2, 3]).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, 1, 2, 3]);
    }

    #[test]
    fn empty_and_oversized_payloads_are_rejected() {
        assert!(frame(&[]).is_err());
        // length check happens before any allocation-sized copy
        let oversized = vec![0_u8; MAX_FRAME_LENGTH + 1];
        assert!(frame(&oversized).is_err());
    }

    #[tokio::test]
    async fn roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"payload").await.unwrap();
        let payload = read_frame(&mut buf.as_slice()).await.unwrap();
        assert_eq!(payload, b"payload");
    }

    #[tokio::test]
    async fn negative_length_is_malformed() {
        let bytes = (-1_i32).to_be_bytes();
        match read_frame(&mut bytes.as_slice()).await {
            Err(VoltError::MalformedResponse(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_length_is_malformed() {
        let bytes = 0_i32.to_be_bytes();
        assert!(matches!(
            read_frame(&mut bytes.as_slice()).await,
            Err(VoltError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn eof_is_connection_lost() {
        // truncated length prefix
        assert!(matches!(
            read_frame(&mut [0_u8, 0].as_slice()).await,
            Err(VoltError::ConnectionLost)
        ));
        // truncated payload
        let mut bytes = 5_i32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"ab");
        assert!(matches!(
            read_frame(&mut bytes.as_slice()).await,
            Err(VoltError::ConnectionLost)
        ));
    }
}
