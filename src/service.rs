/*! Service demultiplexer (§4.3, §9).

Routes a validated [`crate::link_frame::LinkFrame`] to the time-service
handler, the file-service handler, or — for any other service id — a
debug-level hex dump and a counter. Dispatch is synchronous and in
frame-arrival order, since it's just a `match` inside `work()`: no
threads, no reordering.

Grounded on the teacher's `tee.rs` fan-out-block shape, generalized from
"duplicate to N outputs" to "route to one of N outputs by a discriminant
already carried in the item".
*/

use std::collections::HashMap;

use log::debug;

use crate::block::{Block, BlockName, BlockRet};
use crate::error::Result;
use crate::link_frame::LinkFrame;
use crate::stream::{NCReadStream, NCWriteStream};

/// Time service (§3 ServiceId, §4.4).
pub const SERVICE_TIME: u8 = 0x01;
/// File delivery service (§3 ServiceId, §4.5).
pub const SERVICE_FILE: u8 = 0x02;

/// Demultiplexer block.
pub struct ServiceDemux {
    src: NCReadStream<LinkFrame>,
    time_dst: NCWriteStream<Vec<u8>>,
    file_dst: NCWriteStream<Vec<u8>>,
    unknown_counts: HashMap<u8, u64>,
}

impl ServiceDemux {
    /// Create a new demultiplexer reading link frames from `src`.
    #[must_use]
    pub fn new(
        src: NCReadStream<LinkFrame>,
    ) -> (Self, NCReadStream<Vec<u8>>, NCReadStream<Vec<u8>>) {
        let (time_dst, time_rx) = crate::stream::new_nocopy_stream();
        let (file_dst, file_rx) = crate::stream::new_nocopy_stream();
        (
            Self {
                src,
                time_dst,
                file_dst,
                unknown_counts: HashMap::new(),
            },
            time_rx,
            file_rx,
        )
    }

    /// Per-service-id counts of frames routed to no handler (§4.3, §9).
    #[must_use]
    pub fn unknown_counts(&self) -> &HashMap<u8, u64> {
        &self.unknown_counts
    }
}

impl BlockName for ServiceDemux {
    fn block_name(&self) -> &str {
        "ServiceDemux"
    }
}

impl Block for ServiceDemux {
    fn work(&mut self) -> Result<BlockRet> {
        let Some((frame, tags)) = self.src.pop() else {
            return Ok(BlockRet::Noop);
        };
        match frame.service_id {
            SERVICE_TIME => self.time_dst.push(frame.payload, tags),
            SERVICE_FILE => self.file_dst.push(frame.payload, tags),
            other => {
                *self.unknown_counts.entry(other).or_insert(0) += 1;
                debug!(
                    "ServiceDemux: unknown service {other:#04x}, {} bytes: {}",
                    frame.payload.len(),
                    hex_dump(&frame.payload)
                );
            }
        }
        Ok(BlockRet::Ok)
    }
}

fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
