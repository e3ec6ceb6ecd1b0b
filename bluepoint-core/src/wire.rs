//! Framing: length-prefix (4 bytes LE) + bincode payload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::Message;

const LEN_SIZE: usize = 4;
/// Control messages only; payload bytes are streamed outside of frames.
const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Encode a message into a single frame: 4 bytes LE length + bincode payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&n| n <= MAX_FRAME_LEN)
        .ok_or(FrameEncodeError::TooLarge)?;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes consumed.
/// A datagram or buffer shorter than its length prefix yields `NeedMore`.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    let Some(prefix) = bytes.get(..LEN_SIZE) else {
        return Err(FrameDecodeError::NeedMore);
    };
    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    let end = LEN_SIZE + len as usize;
    let Some(body) = bytes.get(LEN_SIZE..end) else {
        return Err(FrameDecodeError::NeedMore);
    };
    let msg: Message = bincode::deserialize(body)?;
    Ok((msg, end))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

/// Errors reading or writing frames on a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
}

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> Result<(), FrameIoError> {
    let frame = encode_frame(msg)?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Read exactly one frame. EOF before a full frame is an I/O error.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Message, FrameIoError> {
    let mut prefix = [0u8; LEN_SIZE];
    r.read_exact(&mut prefix).await?;
    let len = u32::from_le_bytes(prefix);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge.into());
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body).map_err(FrameDecodeError::Decode)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PROTOCOL_VERSION;

    fn sample_beacon() -> Message {
        Message::Beacon {
            protocol_version: PROTOCOL_VERSION,
            device_id: "7c:2e:0d:11:42:9a".into(),
            name: "Pixel".into(),
            device_class: 0x5a020c,
            push_port: 45681,
        }
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_frame(&sample_beacon()).unwrap();
        assert!(matches!(
            decode_frame(&frame[..2]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn oversized_prefix_rejected() {
        let mut bogus = (MAX_FRAME_LEN + 1).to_le_bytes().to_vec();
        bogus.extend_from_slice(&[0; 8]);
        assert!(matches!(decode_frame(&bogus), Err(FrameDecodeError::TooLarge)));
    }

    #[test]
    fn back_to_back_frames() {
        let a = sample_beacon();
        let b = Message::Verdict { accept: false };
        let mut buf = encode_frame(&a).unwrap();
        let first_len = buf.len();
        buf.extend_from_slice(&encode_frame(&b).unwrap());
        let (m1, n1) = decode_frame(&buf).unwrap();
        assert_eq!(n1, first_len);
        let (m2, n2) = decode_frame(&buf[n1..]).unwrap();
        assert_eq!(n1 + n2, buf.len());
        assert_eq!(m1, a);
        assert_eq!(m2, b);
    }

    #[tokio::test]
    async fn stream_exchange() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let offer = Message::Offer {
            file_name: "promo.jpg".into(),
            length: 2048,
        };
        write_frame(&mut client, &offer).await.unwrap();
        assert_eq!(read_frame(&mut server).await.unwrap(), offer);
    }

    #[tokio::test]
    async fn eof_mid_frame_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let frame = encode_frame(&Message::Complete { ok: true }).unwrap();
        client.write_all(&frame[..3]).await.unwrap();
        drop(client);
        assert!(matches!(read_frame(&mut server).await, Err(FrameIoError::Io(_))));
    }
}
