//! Length-prefixed framing for `Envelope`s
//!
//! A frame is a 4-byte little-endian payload length followed by the payload:
//! the bincode encoding of an `Envelope` (fixed-width integers, little-endian,
//! `u32` variant tag first). The header is always decoded explicitly from
//! bytes so the format does not depend on host byte order.
//!
//! Reading is two-phase: exactly `HEADER_LEN` bytes for the length, then
//! exactly that many payload bytes. A clean end of stream is only accepted on
//! a frame boundary; anywhere else it is a truncated frame.

use crate::error::CodecError;
use crate::Envelope;
use bincode::Options;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length header in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest payload a frame may declare (16 MiB). Snapshots are the only
/// messages that grow; this still fits millions of tiles.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

/// Serializes the envelope body without a header.
pub fn encode_payload(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(wire_options().serialize(envelope)?)
}

/// Parses an envelope body. Unknown tags and trailing bytes are rejected.
pub fn decode_payload(payload: &[u8]) -> Result<Envelope, CodecError> {
    Ok(wire_options().deserialize(payload)?)
}

/// Encodes a complete frame, header included.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let payload = encode_payload(envelope)?;
    let len = payload_len(payload.len())?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes one complete frame. The buffer must hold exactly the header plus
/// the payload length it declares.
pub fn decode(frame: &[u8]) -> Result<Envelope, CodecError> {
    if frame.len() < HEADER_LEN {
        return Err(CodecError::Truncated);
    }
    let (header, payload) = frame.split_at(HEADER_LEN);
    let declared = checked_len(read_header(header))?;

    if payload.len() < declared {
        return Err(CodecError::Truncated);
    }
    if payload.len() != declared {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    decode_payload(payload)
}

/// Reads the next frame from a stream.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new header.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Envelope>, CodecError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(CodecError::Truncated)
            };
        }
        filled += n;
    }

    let len = checked_len(read_header(&header))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Io(e)
        }
    })?;

    decode_payload(&payload).map(Some)
}

/// Writes one frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode(envelope)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

fn read_header(header: &[u8]) -> u32 {
    let mut bytes = [0u8; HEADER_LEN];
    bytes.copy_from_slice(&header[..HEADER_LEN]);
    u32::from_le_bytes(bytes)
}

fn checked_len(declared: u32) -> Result<usize, CodecError> {
    let len = declared as usize;
    if len == 0 {
        return Err(CodecError::EmptyFrame);
    }
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(len)
}

fn payload_len(len: usize) -> Result<u32, CodecError> {
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    // Bounded by MAX_FRAME_LEN above.
    Ok(len as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Delta, Snapshot};
    use tokio_test::io::Builder;

    fn sample_envelopes() -> Vec<Envelope> {
        vec![
            Envelope::Delta(Delta::new((2, 3), true)),
            Envelope::Delta(Delta::new((i32::MIN, i32::MAX), false)),
            Envelope::Snapshot(Snapshot::default()),
            Envelope::Snapshot(Snapshot::new([(0, 0), (-5, 7), (100, -100)])),
        ]
    }

    #[test]
    fn test_roundtrip() {
        for envelope in sample_envelopes() {
            let frame = encode(&envelope).unwrap();
            assert_eq!(decode(&frame).unwrap(), envelope);
        }
    }

    #[test]
    fn test_delta_frame_layout() {
        let frame = encode(&Envelope::Delta(Delta::new((2, 3), true))).unwrap();

        // tag (4) + x (4) + y (4) + enabled (1)
        let mut expected = 13u32.to_le_bytes().to_vec();
        expected.extend_from_slice(&0u32.to_le_bytes());
        expected.extend_from_slice(&2i32.to_le_bytes());
        expected.extend_from_slice(&3i32.to_le_bytes());
        expected.push(1);

        assert_eq!(frame, expected);
    }

    #[test]
    fn test_empty_snapshot_has_nonzero_payload() {
        let frame = encode(&Envelope::Snapshot(Snapshot::default())).unwrap();
        let declared = read_header(&frame[..HEADER_LEN]);
        assert!(declared > 0);
        assert_eq!(declared as usize, frame.len() - HEADER_LEN);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let payload = 7u32.to_le_bytes();
        let err = decode_payload(&payload).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
        assert!(err.is_framing());
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        let mut payload = encode_payload(&Envelope::Delta(Delta::new((1, 1), true))).unwrap();
        let last = payload.len() - 1;
        payload[last] = 2;
        assert!(matches!(
            decode_payload(&payload),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_trailing_payload_bytes_are_rejected() {
        let mut payload = encode_payload(&Envelope::Delta(Delta::new((1, 1), true))).unwrap();
        payload.push(0);
        assert!(decode_payload(&payload).is_err());
    }

    #[test]
    fn test_decode_short_header() {
        assert!(matches!(decode(&[1, 0]), Err(CodecError::Truncated)));
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut frame = encode(&Envelope::Delta(Delta::new((1, 1), true))).unwrap();
        frame.push(0);
        assert!(matches!(
            decode(&frame),
            Err(CodecError::LengthMismatch {
                declared: 13,
                actual: 14
            })
        ));

        frame.truncate(10);
        assert!(matches!(decode(&frame), Err(CodecError::Truncated)));
    }

    #[test]
    fn test_decode_zero_length_frame() {
        assert!(matches!(
            decode(&0u32.to_le_bytes()),
            Err(CodecError::EmptyFrame)
        ));
    }

    #[test]
    fn test_decode_oversized_header() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes();
        assert!(matches!(
            decode(&header),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_frames_in_order() {
        let first = Envelope::Snapshot(Snapshot::new([(2, 3)]));
        let second = Envelope::Delta(Delta::new((2, 3), false));

        let mut mock = Builder::new()
            .read(&encode(&first).unwrap())
            .read(&encode(&second).unwrap())
            .build();

        assert_eq!(read_frame(&mut mock).await.unwrap(), Some(first));
        assert_eq!(read_frame(&mut mock).await.unwrap(), Some(second));
        assert_eq!(read_frame(&mut mock).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_frame_split_across_reads() {
        let envelope = Envelope::Delta(Delta::new((-4, 9), true));
        let frame = encode(&envelope).unwrap();

        let mut mock = Builder::new()
            .read(&frame[..2])
            .read(&frame[2..6])
            .read(&frame[6..])
            .build();

        assert_eq!(read_frame(&mut mock).await.unwrap(), Some(envelope));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_header() {
        let mut mock = Builder::new().read(&[13, 0]).build();
        assert!(matches!(
            read_frame(&mut mock).await,
            Err(CodecError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_payload() {
        let frame = encode(&Envelope::Delta(Delta::new((1, 2), true))).unwrap();
        let mut mock = Builder::new().read(&frame[..frame.len() - 3]).build();
        assert!(matches!(
            read_frame(&mut mock).await,
            Err(CodecError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_io_error() {
        let mut mock = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            ))
            .build();
        let err = read_frame(&mut mock).await.unwrap_err();
        assert!(matches!(err, CodecError::Io(_)));
        assert!(!err.is_framing());
    }

    #[tokio::test]
    async fn test_write_frame_bytes() {
        let envelope = Envelope::Snapshot(Snapshot::new([(1, 2), (3, 4)]));
        let expected = encode(&envelope).unwrap();

        let mut mock = Builder::new().write(&expected).build();
        write_frame(&mut mock, &envelope).await.unwrap();
    }
}
