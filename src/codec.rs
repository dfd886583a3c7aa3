//! Length-prefixed framing for protocol messages
//!
//! Wire format: `[length: u32 BE][bincode-encoded Message]`. One frame per
//! connection in practice, but the readers below do not assume it.

use crate::error::{NetworkError, Result};
use crate::message::Message;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};

/// Maximum frame body size (16 MB).
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Length prefix size (4 bytes).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for the 4-byte big-endian length prefix.
pub fn frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_PREFIX_SIZE)
        .big_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Encodes a message into a complete frame.
pub fn encode_frame(msg: &Message, max_frame_length: usize) -> Result<Vec<u8>> {
    let payload = msg.to_bytes()?;
    if payload.len() > max_frame_length {
        return Err(NetworkError::MessageTooLarge {
            size: payload.len(),
            max_size: max_frame_length,
        }
        .into());
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Read one framed message, waiting until the whole body has arrived.
///
/// Bytes past the first frame are left unread.
pub async fn read_message<R>(reader: R, max_frame_length: usize) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, frame_codec(max_frame_length));
    match frames.next().await {
        Some(Ok(frame)) => Message::from_bytes(&frame),
        Some(Err(e)) => Err(framing_error(e).into()),
        None => Err(NetworkError::ConnectionClosed.into()),
    }
}

/// Write one framed message, then shut the writer down.
pub async fn write_message<W>(mut writer: W, msg: &Message, max_frame_length: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg, max_frame_length)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

fn framing_error(err: std::io::Error) -> NetworkError {
    match err.kind() {
        std::io::ErrorKind::InvalidData => NetworkError::InvalidMessage {
            reason: err.to_string(),
        },
        std::io::ErrorKind::UnexpectedEof => NetworkError::ConnectionClosed,
        _ => NetworkError::InvalidMessage {
            reason: format!("read failed: {}", err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageData, MessageType};
    use crate::network::PeerId;

    fn sample() -> Message {
        Message::new(
            PeerId::from_parts("127.0.0.1", 4000),
            MessageType::NewMagicNumber,
            MessageData::MagicNumber(6),
        )
    }

    #[test]
    fn test_frame_prefix_is_big_endian_length() {
        let frame = encode_frame(&sample(), MAX_FRAME_LENGTH).unwrap();
        let body_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(body_len, frame.len() - LENGTH_PREFIX_SIZE);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_rejected() {
        let frame = encode_frame(&sample(), MAX_FRAME_LENGTH).unwrap();
        assert!(read_message(&frame[..frame.len() - 1], MAX_FRAME_LENGTH)
            .await
            .is_err());
        assert!(read_message(&frame[..2], MAX_FRAME_LENGTH).await.is_err());
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let err = encode_frame(&sample(), 4).unwrap_err();
        assert!(matches!(
            err,
            crate::ChainletError::Network(NetworkError::MessageTooLarge { max_size: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_written_frame_reads_back_over_a_stream() {
        let (client, server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            write_message(client, &sample(), MAX_FRAME_LENGTH).await
        });
        let received = read_message(server, MAX_FRAME_LENGTH).await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(received, sample());
    }

    #[tokio::test]
    async fn test_written_bytes_match_encoded_frame() {
        let mut written = Vec::new();
        write_message(&mut written, &sample(), MAX_FRAME_LENGTH)
            .await
            .unwrap();
        assert_eq!(written, encode_frame(&sample(), MAX_FRAME_LENGTH).unwrap());
    }

    #[tokio::test]
    async fn test_closed_stream_reports_connection_closed() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let err = read_message(server, MAX_FRAME_LENGTH).await.unwrap_err();
        assert!(matches!(
            err,
            crate::ChainletError::Network(NetworkError::ConnectionClosed)
        ));
    }
}
