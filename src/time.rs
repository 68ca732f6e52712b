/*! Time decoder (§3 TimeRecord, §4.4, §6).

Parses a fixed-layout timestamp record (`[discriminant:1][seconds:4]`,
big-endian) and emits [`TimeEvent`]s. Never touches file-assembly state,
per §4.4.

Grounded on the teacher's small single-purpose parser blocks (e.g.
`constant_source.rs`) for the "parse fixed layout, emit value" shape.
*/

use std::time::{Duration, UNIX_EPOCH};

use log::info;

use crate::block::{Block, BlockName, BlockRet};
use crate::error::{Error, Result};
use crate::stream::{NCReadStream, NCWriteStream};

/// Discriminant byte for a time record (§6).
pub const TIME_RECORD: u8 = 0x01;

/// Length of a time-service payload: discriminant + 4-byte seconds.
pub const TIME_PAYLOAD_LEN: usize = 5;

/// A decoded time beacon: a wall-clock instant at one-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeEvent {
    /// Seconds since the Unix epoch.
    pub epoch_seconds: u32,
}

impl TimeEvent {
    /// This event's instant as a [`std::time::SystemTime`].
    #[must_use]
    pub fn as_system_time(&self) -> std::time::SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.epoch_seconds as u64)
    }
}

/// Parse one time-service payload.
pub fn parse(payload: &[u8]) -> Result<TimeEvent> {
    if payload.len() != TIME_PAYLOAD_LEN || payload[0] != TIME_RECORD {
        return Err(Error::MalformedRecord(format!(
            "time record: want {TIME_PAYLOAD_LEN} bytes starting with {TIME_RECORD:#04x}, got {} bytes starting with {:?}",
            payload.len(),
            payload.first()
        )));
    }
    let epoch_seconds = u32::from_be_bytes(payload[1..5].try_into().unwrap());
    Ok(TimeEvent { epoch_seconds })
}

/// Serialize a time event back to wire form (inverse of [`parse`]).
#[must_use]
pub fn serialize(ev: &TimeEvent) -> Vec<u8> {
    let mut out = Vec::with_capacity(TIME_PAYLOAD_LEN);
    out.push(TIME_RECORD);
    out.extend_from_slice(&ev.epoch_seconds.to_be_bytes());
    out
}

/// Time-decoder block: consumes raw time-service payloads, emits
/// [`TimeEvent`]s, and logs each one at `info!` (§6).
pub struct TimeDecoder {
    src: NCReadStream<Vec<u8>>,
    dst: NCWriteStream<TimeEvent>,
    malformed: u64,
}

impl TimeDecoder {
    /// Create a new decoder reading from `src`.
    #[must_use]
    pub fn new(src: NCReadStream<Vec<u8>>) -> (Self, NCReadStream<TimeEvent>) {
        let (dst, rx) = crate::stream::new_nocopy_stream();
        (
            Self {
                src,
                dst,
                malformed: 0,
            },
            rx,
        )
    }

    /// Count of payloads that failed to parse.
    #[must_use]
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}

impl BlockName for TimeDecoder {
    fn block_name(&self) -> &str {
        "TimeDecoder"
    }
}

impl Block for TimeDecoder {
    fn work(&mut self) -> Result<BlockRet> {
        let Some((payload, tags)) = self.src.pop() else {
            return Ok(BlockRet::Noop);
        };
        match parse(&payload) {
            Ok(ev) => {
                info!("TimeDecoder: beacon at {} epoch seconds", ev.epoch_seconds);
                self.dst.push(ev, tags);
            }
            Err(e) => {
                self.malformed += 1;
                log::debug!("TimeDecoder: {e}");
            }
        }
        Ok(BlockRet::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ev = TimeEvent {
            epoch_seconds: 1_700_000_000,
        };
        assert_eq!(parse(&serialize(&ev)).unwrap(), ev);
    }

    #[test]
    fn rejects_wrong_discriminant() {
        let mut wire = serialize(&TimeEvent { epoch_seconds: 5 });
        wire[0] = 0xff;
        assert!(parse(&wire).is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(parse(&[TIME_RECORD, 1, 2]).is_err());
    }

    #[test]
    fn block_emits_events() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut dec, out) = TimeDecoder::new(rx);
        tx.push(serialize(&TimeEvent { epoch_seconds: 42 }), &[][..]);
        dec.work().unwrap();
        assert_eq!(out.pop().unwrap().0.epoch_seconds, 42);
        assert_eq!(dec.malformed_count(), 0);
    }
}
