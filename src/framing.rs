/*! Byte-stuffed replay-capture framing (§4.1, §6).

Generalized from the teacher's KISS encoder (`kiss.rs`): this spec's
recorded-capture wire format is the same delimiter/escape convention —
delimiter `0xC0`, escape `0xDB`, with `0xDB 0xDC` standing in for a
literal `0xC0` and `0xDB 0xDD` for a literal `0xDB` — just without KISS's
leading command-byte. The teacher only implements the encode direction;
decode is added here since the replay source needs it.
*/

use crate::error::{FramingError, Result};

const FEND: u8 = 0xC0;
const FESC: u8 = 0xDB;
const TFEND: u8 = 0xDC;
const TFESC: u8 = 0xDD;

/// Byte-stuff `payload` into one delimited frame.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(FEND);
    for &b in payload {
        match b {
            FEND => out.extend_from_slice(&[FESC, TFEND]),
            FESC => out.extend_from_slice(&[FESC, TFESC]),
            b => out.push(b),
        }
    }
    out.push(FEND);
    out
}

/// Un-stuff one already-delimited frame's interior bytes (no leading or
/// trailing `FEND`).
pub fn decode(stuffed: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(stuffed.len());
    let mut it = stuffed.iter().copied();
    while let Some(b) = it.next() {
        if b == FESC {
            match it.next() {
                Some(TFEND) => out.push(FEND),
                Some(TFESC) => out.push(FESC),
                _ => return Err(FramingError::BadEscape.into()),
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

/// Streaming decoder: buffers bytes from a capture and emits each
/// complete (non-empty) frame once a closing delimiter is seen, per
/// §4.1/§6. Empty frames (`FEND FEND`) are silently ignored.
#[derive(Default)]
pub struct Decoder {
    buf: Vec<u8>,
    in_frame: bool,
}

impl Decoder {
    /// Create a new, empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns `Some(frame)` when a delimiter closes a
    /// non-empty buffer. A closing delimiter always resets the buffer,
    /// even when the frame fails to decode, so a bad escape sequence
    /// desyncs at most one frame (§7: "bad delimiter escape" is counted
    /// and dropped, not fatal).
    pub fn push(&mut self, b: u8) -> Result<Option<Vec<u8>>> {
        if b == FEND {
            if !self.in_frame || self.buf.is_empty() {
                self.in_frame = true;
                return Ok(None);
            }
            let result = decode(&self.buf);
            self.buf.clear();
            self.in_frame = false;
            return result.map(Some);
        }
        self.in_frame = true;
        self.buf.push(b);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_left_inverse() {
        for payload in [
            &b""[..],
            &b"abc"[..],
            &[0xC0][..],
            &[0xDB][..],
            &[0xC0, 0xDB, 0xC0, 0xDB][..],
            &(0..=255u8).collect::<Vec<_>>()[..],
        ] {
            let stuffed = encode(payload);
            assert_eq!(stuffed[0], FEND);
            assert_eq!(*stuffed.last().unwrap(), FEND);
            let unstuffed = decode(&stuffed[1..stuffed.len() - 1]).unwrap();
            assert_eq!(unstuffed, payload, "roundtrip failed for {payload:?}");
        }
    }

    #[test]
    fn streaming_decoder_finds_frames() {
        let mut d = Decoder::new();
        let mut frames = Vec::new();
        for &b in &encode(b"hello") {
            if let Some(f) = d.push(b).unwrap() {
                frames.push(f);
            }
        }
        assert_eq!(frames, vec![b"hello".to_vec()]);
    }

    #[test]
    fn empty_frames_ignored() {
        let mut d = Decoder::new();
        // FEND FEND FEND: two adjacent delimiters, no payload between.
        assert!(d.push(FEND).unwrap().is_none());
        assert!(d.push(FEND).unwrap().is_none());
        assert!(d.push(FEND).unwrap().is_none());
    }

    #[test]
    fn concatenated_frames() {
        let mut d = Decoder::new();
        let mut bytes = encode(b"one");
        bytes.extend(encode(b"two"));
        let mut frames = Vec::new();
        for b in bytes {
            if let Some(f) = d.push(b).unwrap() {
                frames.push(f);
            }
        }
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn bad_escape_is_an_error() {
        let mut d = Decoder::new();
        d.push(FEND).unwrap();
        d.push(FESC).unwrap();
        d.push(b'x').unwrap();
        assert!(d.push(FEND).is_err());
    }

    #[test]
    fn bad_escape_resyncs_for_the_next_frame() {
        let mut d = Decoder::new();
        d.push(FEND).unwrap();
        d.push(FESC).unwrap();
        d.push(b'x').unwrap();
        assert!(d.push(FEND).is_err());
        // The bad frame's bytes must not leak into the next one.
        let mut frames = Vec::new();
        for &b in &encode(b"ok") {
            if let Some(f) = d.push(b).unwrap() {
                frames.push(f);
            }
        }
        assert_eq!(frames, vec![b"ok".to_vec()]);
    }
}
