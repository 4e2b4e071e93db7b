//! Length-prefixed message framing for IPC.
//!
//! Messages are framed with a 4-byte big-endian length prefix followed by
//! the JSON payload:
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  JSON payload    |
//! +----------------+------------------+
//! ```
//!
//! A zero length is never valid, and lengths above [`MAX_MESSAGE_SIZE`]
//! are rejected on both sides before any payload is written or allocated.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

const LENGTH_PREFIX: usize = 4;

/// Encodes a message to bytes with length prefix.
///
/// Returns the complete framed message ready for transmission. Fails with
/// [`ProtocolError::MessageTooLarge`] if the serialized message exceeds
/// [`MAX_MESSAGE_SIZE`].
///
/// # Example
///
/// ```rust
/// use codervpn_protocol::{encode_message, ClientMessage, Envelope, StatusRequest};
///
/// let envelope = Envelope::request(1, ClientMessage::Status(StatusRequest {}));
/// let bytes = encode_message(&envelope).unwrap();
/// assert!(bytes.len() > 4); // At least length prefix
/// ```
pub fn encode_message<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let json = serde_json::to_vec(message).map_err(ProtocolError::Serialization)?;
    check_size(json.len() as u64)?;

    let mut buffer = Vec::with_capacity(LENGTH_PREFIX + json.len());
    buffer.extend_from_slice(&(json.len() as u32).to_be_bytes());
    buffer.extend_from_slice(&json);
    Ok(buffer)
}

/// Decodes a message from bytes with length prefix.
///
/// The input should be a complete framed message (length prefix + payload).
///
/// # Example
///
/// ```rust
/// use codervpn_protocol::{decode_message, encode_message, ClientMessage, Envelope, StatusRequest};
///
/// let envelope = Envelope::request(7, ClientMessage::Status(StatusRequest {}));
/// let bytes = encode_message(&envelope).unwrap();
/// let decoded: Envelope<ClientMessage> = decode_message(&bytes).unwrap();
/// assert_eq!(decoded.rpc.msg_id, 7);
/// ```
pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> ProtocolResult<T> {
    if data.len() < LENGTH_PREFIX {
        return Err(ProtocolError::IncompleteMessage {
            expected: LENGTH_PREFIX,
            received: data.len(),
        });
    }

    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    check_length(len)?;

    if data.len() < LENGTH_PREFIX + len {
        return Err(ProtocolError::IncompleteMessage {
            expected: LENGTH_PREFIX + len,
            received: data.len(),
        });
    }

    let json = &data[LENGTH_PREFIX..LENGTH_PREFIX + len];
    serde_json::from_slice(json).map_err(ProtocolError::InvalidPayload)
}

fn check_size(size: u64) -> ProtocolResult<()> {
    if size > MAX_MESSAGE_SIZE as u64 {
        return Err(ProtocolError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

fn check_length(len: usize) -> ProtocolResult<()> {
    if len == 0 {
        return Err(ProtocolError::EmptyMessage);
    }
    check_size(len as u64)
}

/// Reads framed messages from an async byte stream.
pub struct FrameReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a new FrameReader wrapping the given reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads a single framed message.
    ///
    /// Returns `Ok(None)` if the stream ends before any byte of a new frame.
    /// A stream ending in the middle of a frame is
    /// [`ProtocolError::IncompleteMessage`]; a payload that does not decode
    /// is [`ProtocolError::InvalidPayload`].
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> ProtocolResult<Option<T>> {
        let mut len_buf = Vec::with_capacity(LENGTH_PREFIX);
        let received = (&mut self.reader)
            .take(LENGTH_PREFIX as u64)
            .read_to_end(&mut len_buf)
            .await?;
        if received == 0 {
            return Ok(None);
        }
        if received < LENGTH_PREFIX {
            return Err(ProtocolError::IncompleteMessage {
                expected: LENGTH_PREFIX,
                received,
            });
        }

        let len = u32::from_be_bytes([len_buf[0], len_buf[1], len_buf[2], len_buf[3]]) as usize;
        check_length(len)?;

        let mut payload = Vec::with_capacity(len);
        let received = (&mut self.reader)
            .take(len as u64)
            .read_to_end(&mut payload)
            .await?;
        if received < len {
            return Err(ProtocolError::IncompleteMessage {
                expected: len,
                received,
            });
        }

        let message = serde_json::from_slice(&payload).map_err(ProtocolError::InvalidPayload)?;
        Ok(Some(message))
    }

    /// Returns a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Returns a mutable reference to the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Unwraps this FrameReader, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes framed messages to an async byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates a new FrameWriter wrapping the given writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a single framed message and flushes it.
    ///
    /// Nothing is written if the message is too large.
    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> ProtocolResult<()> {
        let data = encode_message(message)?;
        self.write_frame(&data).await
    }

    /// Writes a frame produced by [`encode_message`] and flushes it.
    pub async fn write_frame(&mut self, frame: &[u8]) -> ProtocolResult<()> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the underlying writer.
    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Returns a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Returns a mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Unwraps this FrameWriter, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
