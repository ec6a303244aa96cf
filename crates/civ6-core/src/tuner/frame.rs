//! Tuner framing: `u32 length (LE) | u8 tag | payload`.

use crate::error::{GameError, Result};

pub const FRAME_HEADER_LEN: usize = 5;

/// Default cap on a single payload. Map dumps are printed row by row so
/// nothing legitimate comes close.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Tags seen on the tuner socket.
pub mod tag {
    /// Informational frames (`APP:`, `LSQ:`, status chatter).
    pub const INFO: u8 = 1;
    /// Client → server script requests.
    pub const COMMAND: u8 = 3;
    /// Script print output, `O\0<context>: <text>`.
    pub const OUTPUT: u8 = 4;
    /// Script errors, `ERR:<message>`.
    pub const ERROR: u8 = 5;
}

pub const ERROR_PREFIX: &[u8] = b"ERR:";
pub const IDENTITY_PREFIX: &str = "APP:";
pub const STATE_LIST_PREFIX: &str = "LSQ:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    pub fn command(text: &str) -> Self {
        Self::new(tag::COMMAND, text.as_bytes())
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.tag, &self.payload)
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame, and
    /// `Ok(Some((frame, consumed)))` otherwise. The length check happens as
    /// soon as the header is available so an oversized frame is rejected
    /// before its body is buffered.
    pub fn decode(buf: &[u8], max_frame_bytes: usize) -> Result<Option<(Frame, usize)>> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if length > max_frame_bytes {
            return Err(GameError::OversizedFrame {
                max: max_frame_bytes,
                got: length,
            });
        }
        let total = FRAME_HEADER_LEN + length;
        if buf.len() < total {
            return Ok(None);
        }
        let frame = Frame {
            tag: buf[4],
            payload: buf[FRAME_HEADER_LEN..total].to_vec(),
        };
        Ok(Some((frame, total)))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn is_error(&self) -> bool {
        is_error(&self.payload)
    }

    pub fn output_value(&self) -> Option<String> {
        output_value(&self.payload)
    }
}

pub fn encode_frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.push(tag);
    buf.extend_from_slice(payload);
    buf
}

pub fn is_error(payload: &[u8]) -> bool {
    payload.starts_with(ERROR_PREFIX)
}

/// Extract `<value>` from an output payload `O\0<context>: <value>`.
pub fn output_value(payload: &[u8]) -> Option<String> {
    let rest = payload.strip_prefix(b"O\0")?;
    let text = std::str::from_utf8(rest).ok()?;
    let (_context, value) = text.split_once(": ")?;
    Some(value.trim_end_matches(['\r', '\n']).to_string())
}

/// Build an output payload. Used by the test tuner server.
pub fn output_payload(context: &str, value: &str) -> Vec<u8> {
    let mut buf = b"O\0".to_vec();
    buf.extend_from_slice(context.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_various_sizes() {
        for len in [0usize, 1, 255, 65_536, 1024 * 1024] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let bytes = encode_frame(tag::OUTPUT, &payload);
            let (frame, used) = Frame::decode(&bytes, DEFAULT_MAX_FRAME_BYTES)
                .unwrap()
                .unwrap();
            assert_eq!(used, bytes.len());
            assert_eq!(frame.tag, tag::OUTPUT);
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn test_decode_needs_more_bytes() {
        let bytes = Frame::command("CMD:0:print(1)").encode();
        assert!(Frame::decode(&bytes[..3], 1024).unwrap().is_none());
        assert!(Frame::decode(&bytes[..bytes.len() - 1], 1024).unwrap().is_none());
    }

    #[test]
    fn test_decode_two_frames_back_to_back() {
        let mut bytes = Frame::new(tag::INFO, "APP:HOST/1.0").encode();
        bytes.extend(Frame::new(tag::INFO, "LSQ:0:GameCore_Tuner").encode());
        let (first, used) = Frame::decode(&bytes, 1024).unwrap().unwrap();
        assert_eq!(first.text(), "APP:HOST/1.0");
        let (second, _) = Frame::decode(&bytes[used..], 1024).unwrap().unwrap();
        assert_eq!(second.text(), "LSQ:0:GameCore_Tuner");
    }

    #[test]
    fn test_oversized_rejected_from_header() {
        let mut header = (2_000_000u32).to_le_bytes().to_vec();
        header.push(tag::OUTPUT);
        let err = Frame::decode(&header, 1024 * 1024).unwrap_err();
        assert!(matches!(
            err,
            GameError::OversizedFrame { max: 1_048_576, got: 2_000_000 }
        ));
    }

    #[test]
    fn test_output_value() {
        assert_eq!(
            output_value(b"O\0GameCore_Tuner: hello world").as_deref(),
            Some("hello world")
        );
        assert_eq!(
            output_value(&output_payload("InGame", "---END---")).as_deref(),
            Some("---END---")
        );
        assert_eq!(output_value(b"O\0InGame: a: b").as_deref(), Some("a: b"));
        assert!(output_value(b"ERR:BAD_CALL").is_none());
        assert!(output_value(b"Onothing").is_none());
        assert!(output_value(b"O\0no separator").is_none());
    }

    #[test]
    fn test_is_error() {
        assert!(is_error(b"ERR:BAD_CALL"));
        assert!(!is_error(b"O\0x: ERR:"));
    }
}
