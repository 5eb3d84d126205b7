//! Tag-byte framing on top of the COBS layer.
//!
//! A decoded frame payload is `<tag><body>`: the tag's upper three bits are
//! the protocol marker `0b101`, the lower five the command code (0..=31).
//! On the wire a frame is the COBS encoding of the payload followed by a
//! single `0x00` delimiter.

use crate::cobs;
use thiserror::Error;

/// Mask selecting the protocol marker bits of the tag byte.
pub const PROTO_MASK: u8 = 0b1110_0000;
/// Expected protocol marker value.
pub const PROTO_VAL: u8 = 0b1010_0000;
/// Mask selecting the command code bits of the tag byte.
pub const CODE_MASK: u8 = 0b0001_1111;

/// Framing-layer failures. All are non-fatal: the reader logs the error,
/// drops the frame, and resynchronises at the next zero byte.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short ({0} bytes)")]
    TooShort(usize),
    #[error("frame empty after decode")]
    Empty,
    #[error("bad protocol marker in tag 0x{0:02X}")]
    BadProtocol(u8),
    #[error("command code 0x{0:02X} out of range")]
    BadCode(u8),
}

/// Frame `body` under command `code`, returning the on-wire bytes
/// (COBS-encoded payload plus the trailing `0x00` delimiter).
pub fn encode(code: u8, body: &[u8]) -> Result<Vec<u8>, FrameError> {
    if code & CODE_MASK != code {
        return Err(FrameError::BadCode(code));
    }
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(PROTO_VAL | code);
    payload.extend_from_slice(body);
    let mut out = cobs::encode(&payload);
    out.push(0);
    Ok(out)
}

/// Decode one delimited frame (`data` excludes the trailing zero byte).
/// Returns the command code and body.
pub fn decode(data: &[u8]) -> Result<(u8, Vec<u8>), FrameError> {
    if data.len() <= 1 {
        return Err(FrameError::TooShort(data.len()));
    }
    let payload = cobs::decode(data);
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }
    let tag = payload[0];
    if tag & PROTO_MASK != PROTO_VAL {
        return Err(FrameError::BadProtocol(tag));
    }
    Ok((tag & CODE_MASK, payload[1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_codes() {
        for code in 0u8..=31 {
            let body = vec![code, 0x00, 0xFF, 0x42];
            let wire = encode(code, &body).unwrap();
            assert_eq!(*wire.last().unwrap(), 0, "delimiter missing");
            assert!(
                !wire[..wire.len() - 1].contains(&0),
                "zero byte inside encoded frame"
            );
            let (got_code, got_body) = decode(&wire[..wire.len() - 1]).unwrap();
            assert_eq!(got_code, code);
            assert_eq!(got_body, body);
        }
    }

    #[test]
    fn round_trip_empty_body() {
        let wire = encode(7, &[]).unwrap();
        let (code, body) = decode(&wire[..wire.len() - 1]).unwrap();
        assert_eq!(code, 7);
        assert!(body.is_empty());
    }

    #[test]
    fn code_out_of_range_rejected() {
        assert_eq!(encode(32, b"x"), Err(FrameError::BadCode(32)));
        assert_eq!(encode(0xFF, b"x"), Err(FrameError::BadCode(0xFF)));
    }

    #[test]
    fn too_short_rejected() {
        assert_eq!(decode(&[]), Err(FrameError::TooShort(0)));
        assert_eq!(decode(&[0x01]), Err(FrameError::TooShort(1)));
    }

    #[test]
    fn bad_marker_rejected() {
        // Payload whose tag byte carries the wrong protocol marker.
        let mut wire = crate::cobs::encode(&[0b0100_0001, 0xAA]);
        wire.push(0);
        assert_eq!(
            decode(&wire[..wire.len() - 1]),
            Err(FrameError::BadProtocol(0b0100_0001))
        );
    }

    #[test]
    fn corrupt_cobs_rejected_as_empty() {
        // A code byte promising more data than present decodes to nothing.
        assert_eq!(decode(&[9, 1, 2]), Err(FrameError::Empty));
    }
}
