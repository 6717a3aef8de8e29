//! Wire format shared by the server and the interactive client.
//!
//! Client to server: a bare 4-byte signed integer in network byte order, with
//! no further framing. Server to client: newline-terminated text lines, three
//! per classified number. The client has no length prefix to go on, so it
//! detects the end of a burst by sniffing for [`FIRST_MARKER`] or
//! [`NOT_FIRST_MARKER`] in what it has received so far.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of one encoded number on the wire.
pub const NUMBER_LEN: usize = 4;

/// Reserved value asking the server to close the connection without replying.
pub const TERMINATOR: i32 = -1;

/// Substring carried by the third line of every burst.
pub const FIRST_MARKER: &str = "first number";

/// Substring carried by the third line of every burst after the first.
pub const NOT_FIRST_MARKER: &str = "not the first";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: need {needed} bytes, got {available}")]
    MalformedMessage { needed: usize, available: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub fn encode_number(number: i32) -> [u8; NUMBER_LEN] {
    number.to_be_bytes()
}

pub fn decode_number(bytes: &[u8]) -> Result<i32, ProtocolError> {
    let Some(head) = bytes.get(..NUMBER_LEN) else {
        return Err(ProtocolError::MalformedMessage {
            needed: NUMBER_LEN,
            available: bytes.len(),
        });
    };

    let mut raw = [0u8; NUMBER_LEN];
    raw.copy_from_slice(head);
    Ok(i32::from_be_bytes(raw))
}

/// Reads exactly one number from `reader`.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before sending
/// anything. A stream that ends part-way through a number is a protocol
/// violation and yields [`ProtocolError::MalformedMessage`].
pub async fn read_number<R>(reader: &mut R) -> Result<Option<i32>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; NUMBER_LEN];
    let mut filled = 0;

    while filled < NUMBER_LEN {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::MalformedMessage {
                needed: NUMBER_LEN,
                available: filled,
            });
        }
        filled += read;
    }

    decode_number(&buf).map(Some)
}

pub async fn write_number<W>(writer: &mut W, number: i32) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_number(number)).await?;
    writer.flush().await
}

/// True once `received` holds the line that closes a burst.
pub fn contains_burst_marker(received: &str) -> bool {
    received.contains(NOT_FIRST_MARKER) || received.contains(FIRST_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_in_network_byte_order() {
        assert_eq!(encode_number(1), [0, 0, 0, 1]);
        assert_eq!(encode_number(TERMINATOR), [0xff, 0xff, 0xff, 0xff]);
        assert_eq!(encode_number(0x0102_0304), [1, 2, 3, 4]);
    }

    #[test]
    fn decode_reverses_encode_at_the_edges() {
        for number in [0, 7, -7, TERMINATOR, i32::MIN, i32::MAX] {
            let decoded = decode_number(&encode_number(number)).expect("decode");
            assert_eq!(decoded, number);
        }
    }

    #[test]
    fn decode_rejects_short_input() {
        let err = decode_number(&[0, 1]).expect_err("short input must fail");
        assert!(matches!(
            err,
            ProtocolError::MalformedMessage {
                needed: 4,
                available: 2
            }
        ));
    }

    #[tokio::test]
    async fn read_number_reports_clean_close_as_none() {
        let (writer, mut reader) = tokio::io::duplex(64);
        drop(writer);

        let number = read_number(&mut reader).await.expect("clean close");
        assert_eq!(number, None);
    }

    #[tokio::test]
    async fn read_number_rejects_truncated_message() {
        let (mut writer, mut reader) = tokio::io::duplex(64);
        writer.write_all(&[0, 0, 1]).await.expect("write");
        drop(writer);

        let err = read_number(&mut reader).await.expect_err("truncated");
        assert!(matches!(
            err,
            ProtocolError::MalformedMessage {
                needed: 4,
                available: 3
            }
        ));
    }

    #[tokio::test]
    async fn read_number_reassembles_split_writes() {
        let (mut writer, mut reader) = tokio::io::duplex(64);
        let bytes = encode_number(-42);

        let send = tokio::spawn(async move {
            writer.write_all(&bytes[..1]).await.expect("first half");
            tokio::task::yield_now().await;
            writer.write_all(&bytes[1..]).await.expect("second half");
        });

        let number = read_number(&mut reader).await.expect("read");
        assert_eq!(number, Some(-42));
        send.await.expect("writer task");
    }

    #[test]
    fn burst_marker_matches_both_third_lines() {
        assert!(contains_burst_marker(
            "This is the first number sent by this client.\n"
        ));
        assert!(contains_burst_marker(
            "This is not the first number sent by this client.\n"
        ));
        assert!(!contains_burst_marker("The number 4 is even.\n"));
    }
}
