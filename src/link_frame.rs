/*! Link frame parser (§3 Frame, §4.2).

Validates the outer envelope (`[service_id:1][payload:variable][crc16:2]`)
and yields the service id plus inner payload. Pure and idempotent per
§4.2: parsing never mutates anything beyond this block's own drop
counters.

Grounded on the teacher's CRC-then-yield shape in `hdlc_deframer.rs`,
simplified since link frames here are byte-aligned, not bit-stuffed.
*/

use log::debug;

use crate::block::{Block, BlockName, BlockRet};
use crate::crc::crc16;
use crate::error::{FramingError, Result};
use crate::stream::{NCReadStream, NCWriteStream};

/// Minimum frame length: one service-id byte plus a 2-byte CRC.
pub const MIN_FRAME_LEN: usize = 3;

/// A validated link frame: service id plus its inner payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// Routing identifier (§3 ServiceId).
    pub service_id: u8,
    /// Payload carried by this frame, CRC already stripped and verified.
    pub payload: Vec<u8>,
}

/// Parse one raw frame. Exposed standalone (in addition to the block
/// wrapper below) so the round-trip property in §8 can be tested
/// directly against [`serialize`].
pub fn parse(raw: &[u8]) -> Result<LinkFrame> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(FramingError::ShortFrame.into());
    }
    let (body, crc_bytes) = raw.split_at(raw.len() - 2);
    let got = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
    let want = crc16(body);
    if got != want {
        return Err(FramingError::BadCrc.into());
    }
    Ok(LinkFrame {
        service_id: body[0],
        payload: body[1..].to_vec(),
    })
}

/// Serialize a link frame back to its wire form (inverse of [`parse`]).
#[must_use]
pub fn serialize(frame: &LinkFrame) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + frame.payload.len() + 2);
    body.push(frame.service_id);
    body.extend_from_slice(&frame.payload);
    let crc = crc16(&body);
    body.extend_from_slice(&crc.to_be_bytes());
    body
}

/// Running counters for dropped frames, surfaced in the stats snapshot.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct LinkFrameStats {
    /// Frames dropped for being shorter than [`MIN_FRAME_LEN`].
    pub short_frames: u64,
    /// Frames dropped for a CRC mismatch.
    pub bad_crc: u64,
}

/// Block wrapper: consumes raw frames, emits validated [`LinkFrame`]s.
pub struct LinkFrameParser {
    src: NCReadStream<Vec<u8>>,
    dst: NCWriteStream<LinkFrame>,
    stats: LinkFrameStats,
}

impl LinkFrameParser {
    /// Create a new parser reading raw frames from `src`.
    #[must_use]
    pub fn new(src: NCReadStream<Vec<u8>>) -> (Self, NCReadStream<LinkFrame>) {
        let (dst, rx) = crate::stream::new_nocopy_stream();
        (
            Self {
                src,
                dst,
                stats: LinkFrameStats::default(),
            },
            rx,
        )
    }

    /// Current drop counters.
    #[must_use]
    pub fn stats(&self) -> LinkFrameStats {
        self.stats
    }
}

impl BlockName for LinkFrameParser {
    fn block_name(&self) -> &str {
        "LinkFrameParser"
    }
}

impl Block for LinkFrameParser {
    fn work(&mut self) -> Result<BlockRet> {
        let Some((raw, tags)) = self.src.pop() else {
            return Ok(BlockRet::Noop);
        };
        match parse(&raw) {
            Ok(frame) => {
                self.dst.push(frame, tags);
                Ok(BlockRet::Ok)
            }
            Err(crate::error::Error::Framing(FramingError::ShortFrame)) => {
                self.stats.short_frames += 1;
                debug!("LinkFrameParser: dropping short frame ({} bytes)", raw.len());
                Ok(BlockRet::Ok)
            }
            Err(crate::error::Error::Framing(FramingError::BadCrc)) => {
                self.stats.bad_crc += 1;
                debug!("LinkFrameParser: dropping frame with bad CRC");
                Ok(BlockRet::Ok)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let frame = LinkFrame {
            service_id: 7,
            payload: vec![1, 2, 3, 4],
        };
        let wire = serialize(&frame);
        assert_eq!(parse(&wire).unwrap(), frame);
    }

    #[test]
    fn deterministic_parse() {
        let frame = LinkFrame {
            service_id: 1,
            payload: vec![9, 9, 9],
        };
        let wire = serialize(&frame);
        assert_eq!(parse(&wire).unwrap(), parse(&wire).unwrap());
    }

    #[test]
    fn short_frame_rejected() {
        assert!(matches!(
            parse(&[1, 2]),
            Err(crate::error::Error::Framing(FramingError::ShortFrame))
        ));
    }

    #[test]
    fn bad_crc_rejected() {
        let frame = LinkFrame {
            service_id: 1,
            payload: vec![1],
        };
        let mut wire = serialize(&frame);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert!(matches!(
            parse(&wire),
            Err(crate::error::Error::Framing(FramingError::BadCrc))
        ));
    }

    #[test]
    fn block_counts_drops() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut block, out) = LinkFrameParser::new(rx);
        tx.push(vec![1, 2], &[][..]); // too short
        block.work().unwrap();
        assert_eq!(block.stats().short_frames, 1);
        assert!(out.is_empty());

        let good = serialize(&LinkFrame {
            service_id: 2,
            payload: vec![5],
        });
        tx.push(good, &[][..]);
        block.work().unwrap();
        assert_eq!(out.pop().unwrap().0.service_id, 2);
    }
}
