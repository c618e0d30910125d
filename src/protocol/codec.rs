//! # Line Codec
//!
//! Turns commands into wire bytes and raw frames back into text.
//!
//! Decoding never fails: bytes that are not valid UTF-8 are read as Latin-1,
//! where every byte maps to the code point of the same value.

use bytes::{BufMut, Bytes, BytesMut};

/// Terminator appended to every outgoing command
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Result of decoding one raw frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOutcome {
    /// Decoded text with surrounding whitespace (including `\r`) removed
    pub text: String,

    /// Set when the frame was not valid UTF-8 and Latin-1 was used instead
    pub lossy_fallback: bool,
}

/// Encode a command for transmission
///
/// # Examples
///
/// ```
/// use imu_link::protocol::codec::encode;
///
/// assert_eq!(&encode("START")[..], b"START\r\n");
/// ```
pub fn encode(command: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(command.len() + LINE_TERMINATOR.len());
    buf.put_slice(command.as_bytes());
    buf.put_slice(LINE_TERMINATOR);
    buf.freeze()
}

/// Decode a raw frame into a trimmed text line
///
/// # Examples
///
/// ```
/// use imu_link::protocol::codec::decode;
///
/// let outcome = decode(b"DATA:1,2\r");
/// assert_eq!(outcome.text, "DATA:1,2");
/// assert!(!outcome.lossy_fallback);
/// ```
pub fn decode(frame: &[u8]) -> DecodeOutcome {
    match std::str::from_utf8(frame) {
        Ok(text) => DecodeOutcome {
            text: text.trim().to_string(),
            lossy_fallback: false,
        },
        Err(_) => {
            let text: String = frame.iter().map(|&b| char::from(b)).collect();
            DecodeOutcome {
                text: text.trim().to_string(),
                lossy_fallback: true,
            }
        }
    }
}
