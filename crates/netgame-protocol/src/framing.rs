//! Length-prefixed message framing.
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  JSON body       |
//! +----------------+------------------+
//! ```
//!
//! [`encode_message`] produces a complete frame up front, which lets senders
//! serialize once and write the same bytes to many connections.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

const PREFIX_LEN: usize = 4;

/// Encodes a message to a complete frame (length prefix + JSON body).
///
/// ```rust
/// use netgame_protocol::encode_message;
///
/// let bytes = encode_message(&"ping").unwrap();
/// assert_eq!(&bytes[..4], &6u32.to_be_bytes());
/// ```
pub fn encode_message<T: Serialize + ?Sized>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut buffer = vec![0u8; PREFIX_LEN];
    serde_json::to_writer(&mut buffer, message)?;

    let len = buffer.len() - PREFIX_LEN;
    check_len(len)?;

    buffer[..PREFIX_LEN].copy_from_slice(&(len as u32).to_be_bytes());
    Ok(buffer)
}

/// Decodes one complete frame (length prefix + body).
pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> ProtocolResult<T> {
    let Some(len_bytes) = data.get(..PREFIX_LEN) else {
        return Err(ProtocolError::IncompleteMessage {
            expected: PREFIX_LEN,
            received: data.len(),
        });
    };

    let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    check_len(len)?;

    let Some(body) = data.get(PREFIX_LEN..PREFIX_LEN + len) else {
        return Err(ProtocolError::IncompleteMessage {
            expected: PREFIX_LEN + len,
            received: data.len(),
        });
    };

    Ok(serde_json::from_slice(body)?)
}

fn check_len(len: usize) -> ProtocolResult<()> {
    if len == 0 {
        return Err(ProtocolError::EmptyMessage);
    }
    if len > MAX_MESSAGE_SIZE as usize {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
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

    /// Reads the body of the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream (EOF before any byte of
    /// the next frame). EOF inside a frame is an error.
    pub async fn read_frame(&mut self) -> ProtocolResult<Option<Vec<u8>>> {
        let mut len_buf = [0u8; PREFIX_LEN];
        let mut filled = 0;
        while filled < PREFIX_LEN {
            let n = self.reader.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(ProtocolError::IncompleteMessage {
                    expected: PREFIX_LEN,
                    received: filled,
                });
            }
            filled += n;
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        check_len(len)?;

        let mut body = Vec::with_capacity(len);
        let received = (&mut self.reader)
            .take(len as u64)
            .read_to_end(&mut body)
            .await?;
        if received < len {
            return Err(ProtocolError::IncompleteMessage {
                expected: len,
                received,
            });
        }

        Ok(Some(body))
    }

    /// Reads and decodes the next frame.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> ProtocolResult<Option<T>> {
        match self.read_frame().await? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
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

    /// Writes a frame produced by [`encode_message`].
    pub async fn write_frame(&mut self, frame: &[u8]) -> ProtocolResult<()> {
        self.writer.write_all(frame).await?;
        Ok(())
    }

    /// Encodes and writes a single message.
    pub async fn write_message<T: Serialize + ?Sized>(&mut self, message: &T) -> ProtocolResult<()> {
        let frame = encode_message(message)?;
        self.write_frame(&frame).await
    }

    /// Flushes the underlying writer.
    pub async fn flush(&mut self) -> ProtocolResult<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Unwraps this FrameWriter, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
