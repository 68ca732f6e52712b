/*! Pipeline: wires every stage together (§2, §5).

Frame source -> link frame parser -> service demultiplexer -> (time
decoder | file service parser -> carousel/file tracker -> file emitter).
Every stage is polled once per round, source first, in the order data
flows, matching §5's single-threaded cooperative model: one frame is
drawn and carried as far downstream as it will go before the next round
begins.

Grounded on the teacher's `blockchain!`-built example receivers (e.g.
`ax25-9600-rx.rs`), generalized from "one linear chain wired into a
`Graph`" to a fixed, branching topology held as named concrete fields so
each stage's counters stay reachable for the stats snapshot (the
teacher's own `Graph` erases blocks behind `Box<dyn Block>`, at the cost
of losing access to anything but aggregate timing).
*/

use std::io::Read;
use std::path::PathBuf;

use crate::block::{Block, BlockRet};
use crate::emitter::{EmitterStats, FileEmitter};
use crate::error::Result;
use crate::file_service::FileServiceParser;
use crate::frame_source::{FrameSource, FrameSourceStats, LiveSource, ReplaySource};
use crate::graph::CancellationToken;
use crate::link_frame::{LinkFrameParser, LinkFrameStats};
use crate::service::ServiceDemux;
use crate::time::TimeDecoder;
use crate::tracker::{Tracker, TrackerStats};

/// Snapshot of every stage's running counters (§6, ambient stack).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineStats {
    pub frame_source: FrameSourceStats,
    pub link_frame: LinkFrameStats,
    pub unknown_services: std::collections::HashMap<u8, u64>,
    pub time_malformed: u64,
    pub file_service: crate::file_service::FileServiceStats,
    pub tracker: TrackerStats,
    pub emitter: EmitterStats,
}

/// Tunable resource bounds for the carousel/file tracker (§5).
#[derive(Debug, Clone, Copy)]
pub struct TrackerLimits {
    pub max_assemblies: usize,
    pub orphan_capacity: usize,
    pub age_out_ticks: Option<u64>,
}

impl Default for TrackerLimits {
    fn default() -> Self {
        Self {
            max_assemblies: 256,
            orphan_capacity: 1024,
            age_out_ticks: None,
        }
    }
}

/// The full receiver pipeline.
pub struct Pipeline {
    source: Box<dyn FrameSource>,
    link_frame: LinkFrameParser,
    demux: ServiceDemux,
    time_decoder: TimeDecoder,
    file_parser: FileServiceParser,
    tracker: Tracker,
    emitter: FileEmitter,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline reading live UDP datagrams from `addr`.
    pub fn new_live(
        addr: &str,
        output_dir: PathBuf,
        limits: TrackerLimits,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (source, raw_rx) = LiveSource::new(addr, cancel.clone())?;
        Ok(Self::wire(Box::new(source), raw_rx, output_dir, limits, cancel))
    }

    /// Build a pipeline replaying a recorded, byte-stuffed capture.
    pub fn new_replay<R: Read + 'static>(
        reader: R,
        output_dir: PathBuf,
        limits: TrackerLimits,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (source, raw_rx) = ReplaySource::new(reader);
        Self::wire(Box::new(source), raw_rx, output_dir, limits, cancel)
    }

    fn wire(
        source: Box<dyn FrameSource>,
        raw_rx: crate::stream::NCReadStream<Vec<u8>>,
        output_dir: PathBuf,
        limits: TrackerLimits,
        cancel: CancellationToken,
    ) -> Self {
        let (link_frame, frame_rx) = LinkFrameParser::new(raw_rx);
        let (demux, time_rx, file_rx) = ServiceDemux::new(frame_rx);
        let (time_decoder, _time_events) = TimeDecoder::new(time_rx);
        let (file_parser, record_rx) = FileServiceParser::new(file_rx);
        let (tracker, completed_rx) = Tracker::new(
            record_rx,
            limits.max_assemblies,
            limits.orphan_capacity,
            limits.age_out_ticks,
        );
        let emitter = FileEmitter::new(completed_rx, output_dir);
        Self {
            source,
            link_frame,
            demux,
            time_decoder,
            file_parser,
            tracker,
            emitter,
            cancel,
        }
    }

    /// A token that, once cancelled, stops [`Pipeline::run`] (§5:
    /// "cancellation is exterior").
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll every stage once, source to sink. Returns `true` if nothing
    /// happened anywhere this round (every stage is `Noop` or `EOF`).
    pub fn step(&mut self) -> Result<bool> {
        let mut all_done = true;
        let mut ran = |ret: BlockRet| {
            if ret == BlockRet::Ok {
                all_done = false;
            }
        };
        ran(self.source.work()?);
        ran(self.link_frame.work()?);
        ran(self.demux.work()?);
        ran(self.time_decoder.work()?);
        ran(self.file_parser.work()?);
        ran(self.tracker.work()?);
        ran(self.emitter.work()?);
        Ok(all_done)
    }

    /// Run until every stage is permanently idle or cancellation fires.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_canceled() {
                return Ok(());
            }
            if self.step()? {
                return Ok(());
            }
        }
    }

    /// Snapshot every stage's counters.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frame_source: self.source.stats(),
            link_frame: self.link_frame.stats(),
            unknown_services: self.demux.unknown_counts().clone(),
            time_malformed: self.time_decoder.malformed_count(),
            file_service: self.file_parser.stats(),
            tracker: self.tracker.stats(),
            emitter: self.emitter.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::encode;
    use crate::file_service::{serialize_announcement, serialize_block, AnnouncementRecord, BlockRecord};
    use crate::link_frame::{serialize, LinkFrame};
    use crate::service::SERVICE_FILE;

    #[test]
    fn end_to_end_replay_emits_a_file() {
        let announcement = AnnouncementRecord {
            carousel_id: 1,
            file_id: 1,
            file_len: 6,
            block_size: 3,
            k: 2,
            n: 2,
            code_id: 0,
            filename: "hello.txt".to_string(),
            signature: vec![],
        };
        let blocks = [
            BlockRecord {
                carousel_id: 1,
                file_id: 1,
                block_index: 0,
                payload: b"abc".to_vec(),
            },
            BlockRecord {
                carousel_id: 1,
                file_id: 1,
                block_index: 1,
                payload: b"def".to_vec(),
            },
        ];

        let mut capture = Vec::new();
        capture.extend(encode(&serialize(&LinkFrame {
            service_id: SERVICE_FILE,
            payload: serialize_announcement(&announcement),
        })));
        for b in &blocks {
            capture.extend(encode(&serialize(&LinkFrame {
                service_id: SERVICE_FILE,
                payload: serialize_block(b),
            })));
        }

        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            Pipeline::new_replay(std::io::Cursor::new(capture), dir.path().to_path_buf(), TrackerLimits::default());
        pipeline.run().unwrap();

        let written = std::fs::read(dir.path().join("hello.txt")).unwrap();
        assert_eq!(written, b"abcdef");
        assert_eq!(pipeline.stats().emitter.files_written, 1);
    }

    #[test]
    fn bad_escape_is_surfaced_in_pipeline_stats() {
        let mut capture = vec![0xC0, 0xDB, b'x', 0xC0]; // one malformed frame
        capture.extend(encode(&serialize(&LinkFrame {
            service_id: SERVICE_FILE,
            payload: serialize_announcement(&AnnouncementRecord {
                carousel_id: 1,
                file_id: 1,
                file_len: 0,
                block_size: 1,
                k: 0,
                n: 0,
                code_id: 0,
                filename: "empty.bin".to_string(),
                signature: vec![],
            }),
        })));

        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            Pipeline::new_replay(std::io::Cursor::new(capture), dir.path().to_path_buf(), TrackerLimits::default());
        pipeline.run().unwrap();
        assert_eq!(pipeline.stats().frame_source.bad_escapes, 1);
    }
}
