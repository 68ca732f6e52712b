/*! Frame sources (§4.1).

Two implementations share the same output contract (a stream of raw,
already-delimited frame payloads): [`LiveSource`] reads UDP datagrams,
one per frame; [`ReplaySource`] re-runs a recorded byte-stuffed capture
through [`crate::framing::Decoder`].

Grounded on the teacher's `tcp_source.rs` (blocking read into a buffer,
`BlockRet::EOF` on a closed connection) for the general source-block
shape, and `file_source.rs` for the file-backed variant.
*/

use std::io::Read;
use std::net::UdpSocket;
use std::time::Duration;

use log::{debug, warn};

use crate::block::{Block, BlockName, BlockRet};
use crate::error::Result;
use crate::framing::Decoder;
use crate::graph::CancellationToken;
use crate::stream::NCWriteStream;

/// Read timeout used so the UDP source can notice cancellation between
/// datagrams instead of blocking forever.
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Running counters for a frame source, surfaced in the stats snapshot.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct FrameSourceStats {
    /// Bad byte-stuffing escape sequences encountered and dropped (§4.1,
    /// §7 FramingError: "bad delimiter escape"). Always zero for
    /// [`LiveSource`], which carries no byte-stuffing layer.
    pub bad_escapes: u64,
}

/// Common interface over both frame-source variants so [`crate::pipeline`]
/// can hold either behind one `Box<dyn FrameSource>` while still reaching
/// its counters.
pub trait FrameSource: Block {
    /// Current counters for this source.
    fn stats(&self) -> FrameSourceStats;
}

/// Live UDP datagram source: each datagram is exactly one link frame.
pub struct LiveSource {
    sock: UdpSocket,
    dst: NCWriteStream<Vec<u8>>,
    cancel: CancellationToken,
}

impl LiveSource {
    /// Bind a UDP socket at `addr` (`host:port`) and create the source.
    pub fn new(
        addr: &str,
        cancel: CancellationToken,
    ) -> Result<(Self, crate::stream::NCReadStream<Vec<u8>>)> {
        let sock = UdpSocket::bind(addr)?;
        sock.set_read_timeout(Some(POLL_TIMEOUT))?;
        let (dst, rx) = crate::stream::new_nocopy_stream();
        Ok((Self { sock, dst, cancel }, rx))
    }
}

impl BlockName for LiveSource {
    fn block_name(&self) -> &str {
        "LiveSource"
    }
}

impl Block for LiveSource {
    fn work(&mut self) -> Result<BlockRet> {
        if self.cancel.is_canceled() {
            return Ok(BlockRet::EOF);
        }
        let mut buf = [0u8; 65536];
        match self.sock.recv(&mut buf) {
            Ok(n) => {
                self.dst.push(buf[..n].to_vec(), &[][..]);
                Ok(BlockRet::Ok)
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(BlockRet::Noop)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl FrameSource for LiveSource {
    fn stats(&self) -> FrameSourceStats {
        FrameSourceStats::default()
    }
}

/// Replay source: reads a recorded capture through the byte-stuffing
/// decoder, one frame per `work()` call that finds one.
pub struct ReplaySource<R> {
    reader: R,
    decoder: Decoder,
    dst: NCWriteStream<Vec<u8>>,
    eof: bool,
    stats: FrameSourceStats,
}

impl<R: Read> ReplaySource<R> {
    /// Create a new replay source reading from `reader`.
    #[must_use]
    pub fn new(reader: R) -> (Self, crate::stream::NCReadStream<Vec<u8>>) {
        let (dst, rx) = crate::stream::new_nocopy_stream();
        (
            Self {
                reader,
                decoder: Decoder::new(),
                dst,
                eof: false,
                stats: FrameSourceStats::default(),
            },
            rx,
        )
    }
}

impl<R> BlockName for ReplaySource<R> {
    fn block_name(&self) -> &str {
        "ReplaySource"
    }
}

impl<R: Read> Block for ReplaySource<R> {
    fn work(&mut self) -> Result<BlockRet> {
        if self.eof {
            return Ok(BlockRet::EOF);
        }
        let mut byte = [0u8; 1];
        loop {
            let n = self.reader.read(&mut byte)?;
            if n == 0 {
                debug!("ReplaySource: end of capture");
                self.eof = true;
                return Ok(BlockRet::EOF);
            }
            match self.decoder.push(byte[0]) {
                Ok(Some(frame)) => {
                    self.dst.push(frame, &[][..]);
                    return Ok(BlockRet::Ok);
                }
                Ok(None) => continue,
                Err(e) => {
                    self.stats.bad_escapes += 1;
                    warn!("ReplaySource: bad escape sequence, resyncing: {e}");
                    continue;
                }
            }
        }
    }
}

impl<R: Read> FrameSource for ReplaySource<R> {
    fn stats(&self) -> FrameSourceStats {
        self.stats
    }
}
