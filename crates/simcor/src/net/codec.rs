// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame codec for SimCor connections.
//!
//! Length-prefixed JSON, one frame per message:
//! ```text
//! +----------------+----------------------------------+
//! | Length (4B BE) | JSON { identity, message }       |
//! +----------------+----------------------------------+
//! ```

use crate::error::TcpError;
use crate::message::{SimCorMsg, TransactionIdentity};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// One message on the wire, tagged with the transaction it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub identity: Option<TransactionIdentity>,
    pub message: SimCorMsg,
}

/// Write one frame.
pub fn write_frame<W: Write>(
    writer: &mut W,
    frame: &Frame,
    max_message_size: usize,
) -> Result<(), CodecError> {
    let json = serde_json::to_vec(frame)
        .map_err(|e| CodecError::Protocol(format!("Serialize error: {}", e)))?;

    if json.len() > max_message_size {
        return Err(CodecError::TooLarge {
            size: json.len(),
            max: max_message_size,
        });
    }

    let len = json.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&json)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` if the peer closed the stream before a new frame began.
pub fn read_frame<R: Read>(reader: &mut R, max_message_size: usize) -> Result<Option<Frame>, CodecError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CodecError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(CodecError::Protocol("Empty frame".into()));
    }
    if len > max_message_size {
        return Err(CodecError::TooLarge {
            size: len,
            max: max_message_size,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;

    let frame = serde_json::from_slice(&body)
        .map_err(|e| CodecError::Protocol(format!("Invalid JSON: {}", e)))?;
    Ok(Some(frame))
}

/// Codec error types.
#[derive(Debug)]
pub enum CodecError {
    Io(io::Error),
    Protocol(String),
    TooLarge { size: usize, max: usize },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Protocol(s) => write!(f, "Protocol error: {}", s),
            Self::TooLarge { size, max } => write!(f, "Frame too large: {} > {}", size, max),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for TcpError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => e.into(),
            other => TcpError::protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TcpErrorKind;
    use crate::message::{Address, MsgType};
    use std::io::Cursor;

    fn frame() -> Frame {
        Frame {
            identity: Some(TransactionIdentity::new(7, 1, 0)),
            message: SimCorMsg::new(
                MsgType::Command,
                Some(Address::new("MDL-01")),
                "propose",
                Some("0.1 0.2 0.3".into()),
            ),
        }
    }

    #[test]
    fn test_frame_through_buffer() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame(), 1024).unwrap();

        let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(declared, buf.len() - 4);

        let parsed = read_frame(&mut Cursor::new(buf), 1024).unwrap().unwrap();
        assert_eq!(parsed, frame());
    }

    #[test]
    fn test_clean_eof_is_none() {
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut empty, 1024).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, &frame(), 8).unwrap_err();
        assert!(matches!(err, CodecError::TooLarge { .. }));

        let mut header = Cursor::new(10_000u32.to_be_bytes().to_vec());
        let err = read_frame(&mut header, 64).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_truncated_body_is_closed_connection() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame(), 1024).unwrap();
        buf.truncate(buf.len() - 3);

        let err: TcpError = read_frame(&mut Cursor::new(buf), 1024).unwrap_err().into();
        assert_eq!(err.kind, TcpErrorKind::ConnectionClosed);
    }

    #[test]
    fn test_garbage_body_is_protocol_error() {
        let mut buf = 3u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"xyz");
        let err: TcpError = read_frame(&mut Cursor::new(buf), 1024).unwrap_err().into();
        assert_eq!(err.kind, TcpErrorKind::Protocol);
    }
}
