//! WebSocket binary frame codec (RFC6455 subset).
//!
//! Decoding works against an accumulation buffer: bytes may arrive split
//! across any number of transport reads, and `decode` returns `Ok(None)`
//! until one whole frame is buffered. The returned [`Frame`] reports how
//! many bytes it consumed so the caller can drain the buffer and try again
//! on the remainder.
//!
//! Fragmented messages (continuation frames), extensions and sub-protocols
//! are not supported; every frame this engine produces or accepts is a
//! single FIN-bit frame.

use crate::error::FrameError;

/// Upper bound on a declared payload. The peer controls the 64-bit length
/// field, so anything above this is rejected before buffering begins.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Frame purpose tag. Anything outside this set is rejected at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Text,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x1 => Some(Opcode::Text),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Opcode::Text => 0x1,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

/// One decoded frame. Ephemeral: constructed per decode call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub fin: bool,
    pub masked: bool,
    /// Payload bytes, already unmasked.
    pub payload: Vec<u8>,
    /// Total bytes this frame occupied in the source buffer
    /// (header + length extension + mask key + payload).
    pub consumed: usize,
}

/// Decode zero-or-one frame from the front of `buf`.
///
/// `Ok(None)` means the buffer does not yet hold a complete frame; nothing
/// was consumed and the caller must keep the buffer for the next arrival.
pub fn decode(buf: &[u8]) -> Result<Option<Frame>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode_bits = buf[0] & 0x0F;
    let opcode =
        Opcode::from_bits(opcode_bits).ok_or(FrameError::UnsupportedOpcode(opcode_bits))?;

    let masked = buf[1] & 0x80 != 0;
    let mut len = (buf[1] & 0x7F) as usize;
    let mut offset = 2;

    if len == 126 {
        if buf.len() < 4 {
            return Ok(None);
        }
        len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        offset = 4;
    } else if len == 127 {
        if buf.len() < 10 {
            return Ok(None);
        }
        let mut wide = [0u8; 8];
        wide.copy_from_slice(&buf[2..10]);
        let declared = u64::from_be_bytes(wide);
        if declared > MAX_PAYLOAD_BYTES as u64 {
            return Err(FrameError::PayloadTooLarge(declared));
        }
        len = declared as usize;
        offset = 10;
    }

    let key = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < offset + len {
        return Ok(None);
    }

    let mut payload = buf[offset..offset + len].to_vec();
    if let Some(key) = key {
        apply_mask(&mut payload, key);
    }

    Ok(Some(Frame {
        opcode,
        fin,
        masked,
        payload,
        consumed: offset + len,
    }))
}

/// XOR each payload byte with `key[index % 4]`. Masking is its own inverse.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode an unmasked server→peer text frame with minimal length encoding.
pub fn encode_text(payload: &str) -> Vec<u8> {
    encode(Opcode::Text, payload.as_bytes(), None)
}

/// Encode a masked peer→server text frame.
pub fn encode_text_masked(payload: &str, key: [u8; 4]) -> Vec<u8> {
    encode(Opcode::Text, payload.as_bytes(), Some(key))
}

/// Encode a ping/pong/close frame. Control payloads are capped at 125 bytes.
pub fn encode_control(
    opcode: Opcode,
    payload: &[u8],
    key: Option<[u8; 4]>,
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > 125 {
        return Err(FrameError::ControlPayloadTooLong);
    }
    Ok(encode(opcode, payload, key))
}

fn encode(opcode: Opcode, payload: &[u8], key: Option<[u8; 4]>) -> Vec<u8> {
    let mask_bit = if key.is_some() { 0x80 } else { 0x00 };
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(0x80 | opcode.bits());

    match payload.len() {
        n if n < 126 => out.push(mask_bit | n as u8),
        n if n < 65536 => {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }

    match key {
        Some(key) => {
            out.extend_from_slice(&key);
            let mut body = payload.to_vec();
            apply_mask(&mut body, key);
            out.extend_from_slice(&body);
        }
        None => out.extend_from_slice(payload),
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(len: usize) {
        let payload: String = "x".repeat(len);
        let encoded = encode_text(&payload);
        let frame = decode(&encoded).unwrap().expect("complete frame");
        assert_eq!(frame.opcode, Opcode::Text);
        assert!(frame.fin);
        assert!(!frame.masked);
        assert_eq!(frame.payload, payload.as_bytes());
        assert_eq!(frame.consumed, encoded.len());
    }

    #[test]
    fn test_roundtrip_length_boundaries() {
        for len in [0, 125, 126, 65535, 65536] {
            roundtrip(len);
        }
    }

    #[test]
    fn test_length_encoding_is_minimal() {
        assert_eq!(encode_text(&"a".repeat(125))[1], 125);
        assert_eq!(encode_text(&"a".repeat(126))[1], 126);
        assert_eq!(encode_text(&"a".repeat(65535))[1], 126);
        assert_eq!(encode_text(&"a".repeat(65536))[1], 127);
    }

    #[test]
    fn test_masked_roundtrip() {
        let key = [0x37, 0xFA, 0x21, 0x3D];
        let encoded = encode_text_masked("Hello", key);
        // Mask bit set, payload not on the wire in the clear.
        assert_eq!(encoded[1] & 0x80, 0x80);
        assert_ne!(&encoded[6..], b"Hello");

        let frame = decode(&encoded).unwrap().expect("complete frame");
        assert!(frame.masked);
        assert_eq!(frame.payload, b"Hello");
        assert_eq!(frame.consumed, encoded.len());
    }

    #[test]
    fn test_mask_is_involution() {
        let key = [0xDE, 0xAD, 0xBE, 0xEF];
        let original: Vec<u8> = (0u8..=255).collect();
        let mut masked = original.clone();
        apply_mask(&mut masked, key);
        assert_ne!(masked, original);
        apply_mask(&mut masked, key);
        assert_eq!(masked, original);
    }

    #[test]
    fn test_every_prefix_is_insufficient() {
        let encoded = encode_text_masked("partial delivery", [1, 2, 3, 4]);
        for cut in 0..encoded.len() {
            assert_eq!(
                decode(&encoded[..cut]).unwrap(),
                None,
                "prefix of {cut} bytes decoded as a full frame"
            );
        }
    }

    #[test]
    fn test_split_reassembly_at_every_boundary() {
        let encoded = encode_text_masked("split me anywhere", [9, 8, 7, 6]);
        let whole = decode(&encoded).unwrap().unwrap();

        for cut in 0..encoded.len() {
            let mut buf = encoded[..cut].to_vec();
            assert_eq!(decode(&buf).unwrap(), None);
            buf.extend_from_slice(&encoded[cut..]);
            let reassembled = decode(&buf).unwrap().expect("complete after second chunk");
            assert_eq!(reassembled, whole);
        }
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut buf = encode_text("first");
        buf.extend_from_slice(&encode_text("second"));

        let first = decode(&buf).unwrap().unwrap();
        assert_eq!(first.payload, b"first");
        buf.drain(..first.consumed);

        let second = decode(&buf).unwrap().unwrap();
        assert_eq!(second.payload, b"second");
        buf.drain(..second.consumed);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_control_frames() {
        let ping = encode_control(Opcode::Ping, &[], None).unwrap();
        assert_eq!(ping, vec![0x89, 0x00]);
        let pong = encode_control(Opcode::Pong, &[], None).unwrap();
        assert_eq!(pong, vec![0x8A, 0x00]);
        let close = encode_control(Opcode::Close, &[], None).unwrap();
        assert_eq!(close, vec![0x88, 0x00]);

        let frame = decode(&ping).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Ping);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_oversized_control_payload_rejected() {
        let body = vec![0u8; 126];
        assert!(matches!(
            encode_control(Opcode::Ping, &body, None),
            Err(FrameError::ControlPayloadTooLong)
        ));
    }

    #[test]
    fn test_absurd_declared_length_rejected() {
        // Masked frame header claiming a u64::MAX payload. Must come back
        // as an error, not an arithmetic overflow in the length check.
        let mut buf = vec![0x81, 0xFF];
        buf.extend_from_slice(&u64::MAX.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3, 4]);
        assert!(matches!(
            decode(&buf),
            Err(FrameError::PayloadTooLarge(u64::MAX))
        ));

        // One byte over the cap is rejected; at the cap the decoder simply
        // waits for the rest of the payload.
        let mut over = vec![0x81, 0x7F];
        over.extend_from_slice(&(MAX_PAYLOAD_BYTES as u64 + 1).to_be_bytes());
        assert!(matches!(decode(&over), Err(FrameError::PayloadTooLarge(_))));

        let mut at_cap = vec![0x81, 0x7F];
        at_cap.extend_from_slice(&(MAX_PAYLOAD_BYTES as u64).to_be_bytes());
        assert_eq!(decode(&at_cap).unwrap(), None);
    }

    #[test]
    fn test_unsupported_opcode_rejected() {
        // Opcode 0x2 (binary) is outside this engine's subset.
        let buf = [0x82, 0x01, 0xFF];
        assert!(matches!(
            decode(&buf),
            Err(FrameError::UnsupportedOpcode(0x2))
        ));
    }
}
