/*! Carousel / file tracker (§4.6).

Central reassembler: keyed by `(carousel_id, file_id)`, it admits
announcements and blocks, tests for completion via the fast path (all
systematic blocks present) or the FEC path ([`crate::ldpc`]), and emits
completed files. Runs single-threaded and cooperatively per §5: one
record in, fully processed, before the next.

Grounded on the teacher's `burst_tagger.rs` (buffering keyed state across
calls, retiring it on a completion signal) and `tcp_server.rs` (bounded
map of live sessions keyed by a peer identity, evicted on overflow).
*/

use std::collections::{HashMap, VecDeque};

use log::{debug, info, warn};

use crate::block::{Block, BlockName, BlockRet};
use crate::error::{DecodeOutcome, Result};
use crate::file_service::{AnnouncementRecord, BlockRecord, FileServiceRecord};
use crate::ldpc::{self, LdpcCode};
use crate::stream::{NCReadStream, NCWriteStream};

/// Identifies a file's reassembly state.
pub type CarouselKey = (u32, u32);

/// A completed file, ready for the emitter (§4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    /// Announced output name.
    pub filename: String,
    /// Reassembled bytes, truncated to the announced file length.
    pub data: Vec<u8>,
}

/// Per-file reassembly state.
struct FileAssembly {
    announcement: AnnouncementRecord,
    blocks: HashMap<u32, Vec<u8>>,
    last_touched: u64,
}

impl FileAssembly {
    fn new(announcement: AnnouncementRecord, now: u64) -> Self {
        Self {
            announcement,
            blocks: HashMap::new(),
            last_touched: now,
        }
    }

    fn complete_fast_path(&self) -> bool {
        (0..self.announcement.k).all(|i| self.blocks.contains_key(&i))
    }

    fn emit(&self) -> CompletedFile {
        let mut data = Vec::with_capacity(self.announcement.file_len as usize);
        for i in 0..self.announcement.k {
            data.extend_from_slice(&self.blocks[&i]);
        }
        data.truncate(self.announcement.file_len as usize);
        CompletedFile {
            filename: self.announcement.filename.clone(),
            data,
        }
    }
}

/// Running counters for the tracker's decisions, surfaced in the stats
/// snapshot.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct TrackerStats {
    /// Blocks dropped as exact duplicates of an already-stored index.
    pub duplicate_blocks: u64,
    /// Blocks that replaced a conflicting payload at the same index.
    pub conflicting_blocks: u64,
    /// Blocks with an out-of-range index, dropped.
    pub out_of_range_blocks: u64,
    /// Orphan blocks buffered pending their announcement.
    pub orphans_buffered: u64,
    /// Orphan blocks dropped because the orphan buffer was full.
    pub orphans_dropped: u64,
    /// Assemblies evicted to stay within `max_assemblies`.
    pub assemblies_evicted: u64,
    /// Assemblies discarded by the age-out sweep.
    pub assemblies_aged_out: u64,
    /// Files successfully emitted.
    pub files_emitted: u64,
    /// FEC decode attempts that reported `Insufficient`.
    pub fec_insufficient: u64,
}

/// Bounded FIFO of blocks awaiting an announcement for their key (§4.6).
struct OrphanBuffer {
    capacity: usize,
    queue: VecDeque<(CarouselKey, BlockRecord)>,
}

impl OrphanBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
        }
    }

    /// Returns `true` if the block was buffered, `false` if dropped for
    /// capacity.
    fn push(&mut self, key: CarouselKey, block: BlockRecord) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back((key, block));
        true
    }

    fn drain_for(&mut self, key: CarouselKey) -> Vec<BlockRecord> {
        let mut out = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.queue.len());
        for (k, b) in self.queue.drain(..) {
            if k == key {
                out.push(b);
            } else {
                remaining.push_back((k, b));
            }
        }
        self.queue = remaining;
        out
    }
}

/// The carousel / file tracker.
pub struct Tracker {
    src: NCReadStream<FileServiceRecord>,
    dst: NCWriteStream<CompletedFile>,
    assemblies: HashMap<CarouselKey, FileAssembly>,
    lru: VecDeque<CarouselKey>,
    orphans: OrphanBuffer,
    max_assemblies: usize,
    /// Age-out threshold in the same logical clock as `now`; `None`
    /// disables age-out (the default, per §4.6).
    age_out: Option<u64>,
    now: u64,
    stats: TrackerStats,
}

impl Tracker {
    /// Create a new tracker reading file-service records from `src`.
    ///
    /// `max_assemblies` bounds concurrent in-flight files (least-recently-
    /// touched evicted on overflow). `orphan_capacity` bounds the FIFO of
    /// blocks buffered ahead of their announcement. `age_out` is the
    /// number of `tick()` calls of inactivity before an assembly is
    /// discarded; `None` disables age-out.
    #[must_use]
    pub fn new(
        src: NCReadStream<FileServiceRecord>,
        max_assemblies: usize,
        orphan_capacity: usize,
        age_out: Option<u64>,
    ) -> (Self, NCReadStream<CompletedFile>) {
        let (dst, rx) = crate::stream::new_nocopy_stream();
        (
            Self {
                src,
                dst,
                assemblies: HashMap::new(),
                lru: VecDeque::new(),
                orphans: OrphanBuffer::new(orphan_capacity),
                max_assemblies,
                age_out,
                now: 0,
                stats: TrackerStats::default(),
            },
            rx,
        )
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    /// Number of assemblies currently open.
    #[must_use]
    pub fn open_assemblies(&self) -> usize {
        self.assemblies.len()
    }

    fn touch(&mut self, key: CarouselKey) {
        self.lru.retain(|k| *k != key);
        self.lru.push_back(key);
    }

    fn evict_if_over_capacity(&mut self) {
        while self.assemblies.len() > self.max_assemblies {
            let Some(oldest) = self.lru.pop_front() else {
                break;
            };
            if self.assemblies.remove(&oldest).is_some() {
                self.stats.assemblies_evicted += 1;
                warn!("Tracker: evicted assembly {oldest:?} over capacity");
            }
        }
    }

    fn on_announcement(&mut self, a: AnnouncementRecord) {
        let key = (a.carousel_id, a.file_id);
        let now = self.now;
        match self.assemblies.get_mut(&key) {
            None => {
                let mut assembly = FileAssembly::new(a, now);
                for orphan in self.orphans.drain_for(key) {
                    insert_block(&mut assembly, orphan, &mut self.stats);
                }
                self.assemblies.insert(key, assembly);
                self.touch(key);
                self.evict_if_over_capacity();
            }
            Some(existing) => {
                if existing.announcement.compatible_with(&a) {
                    existing.announcement = a;
                } else {
                    info!("Tracker: incompatible re-announcement for {key:?}, starting new generation");
                    *existing = FileAssembly::new(a, now);
                }
                existing.last_touched = now;
                self.touch(key);
            }
        }
        if let Some(completed) = self.try_complete(key) {
            self.dst.push(completed, &[][..]);
        }
    }

    /// Inner CRC (§4.7) is already verified by [`crate::file_service`]
    /// before a `BlockRecord` reaches here; bad-CRC blocks never arrive.
    fn on_block(&mut self, b: BlockRecord) {
        let key = (b.carousel_id, b.file_id);
        match self.assemblies.get_mut(&key) {
            None => {
                if self.orphans.push(key, b) {
                    self.stats.orphans_buffered += 1;
                } else {
                    self.stats.orphans_dropped += 1;
                }
                return;
            }
            Some(assembly) => {
                assembly.last_touched = self.now;
                insert_block(assembly, b, &mut self.stats);
            }
        }
        self.touch(key);
        if let Some(completed) = self.try_complete(key) {
            self.dst.push(completed, &[][..]);
        }
    }

    /// Test completion for `key` via the fast path, then the FEC path
    /// (§4.6); on success, removes and returns the finished assembly.
    fn try_complete(&mut self, key: CarouselKey) -> Option<CompletedFile> {
        let assembly = self.assemblies.get(&key)?;
        if assembly.complete_fast_path() {
            let out = assembly.emit();
            self.assemblies.remove(&key);
            self.lru.retain(|k| *k != key);
            self.stats.files_emitted += 1;
            info!("Tracker: {} complete via fast path", out.filename);
            return Some(out);
        }

        let a = &assembly.announcement;
        if (assembly.blocks.len() as u32) < a.k {
            return None;
        }
        let code = LdpcCode::new(a.code_id, a.k, a.n);
        match ldpc::decode(&code, &assembly.blocks) {
            DecodeOutcome::Recovered(systematic) => {
                let assembly = self.assemblies.get_mut(&key).unwrap();
                for (i, payload) in systematic.into_iter().enumerate() {
                    assembly.blocks.insert(i as u32, payload);
                }
                let out = assembly.emit();
                self.assemblies.remove(&key);
                self.lru.retain(|k| *k != key);
                self.stats.files_emitted += 1;
                info!("Tracker: {} complete via FEC path", out.filename);
                Some(out)
            }
            DecodeOutcome::Insufficient => {
                self.stats.fec_insufficient += 1;
                None
            }
        }
    }

    /// Advance the tracker's logical clock and discard assemblies that
    /// have been idle past the age-out threshold (§4.6). `work()` calls
    /// this once per received file-service record with an incrementing
    /// tick counter; exposed directly so tests and other callers can
    /// drive it without pushing records through.
    pub fn sweep(&mut self, now: u64) {
        self.now = now;
        let Some(threshold) = self.age_out else {
            return;
        };
        let stale: Vec<CarouselKey> = self
            .assemblies
            .iter()
            .filter(|(_, a)| now.saturating_sub(a.last_touched) >= threshold)
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            self.assemblies.remove(&key);
            self.lru.retain(|k| *k != key);
            self.stats.assemblies_aged_out += 1;
            debug!("Tracker: aged out assembly {key:?}");
        }
    }
}

fn insert_block(assembly: &mut FileAssembly, b: BlockRecord, stats: &mut TrackerStats) {
    if b.block_index >= assembly.announcement.n {
        stats.out_of_range_blocks += 1;
        return;
    }
    match assembly.blocks.get(&b.block_index) {
        Some(existing) if *existing == b.payload => {
            stats.duplicate_blocks += 1;
        }
        Some(_) => {
            stats.conflicting_blocks += 1;
            assembly.blocks.insert(b.block_index, b.payload);
        }
        None => {
            assembly.blocks.insert(b.block_index, b.payload);
        }
    }
}

impl BlockName for Tracker {
    fn block_name(&self) -> &str {
        "Tracker"
    }
}

impl Block for Tracker {
    fn work(&mut self) -> Result<BlockRet> {
        let Some((rec, _tags)) = self.src.pop() else {
            return Ok(BlockRet::Noop);
        };
        self.sweep(self.now + 1);
        match rec {
            FileServiceRecord::Announcement(a) => self.on_announcement(a),
            FileServiceRecord::Block(b) => self.on_block(b),
        }
        Ok(BlockRet::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(k: u32, n: u32, file_len: u64, block_size: u32) -> AnnouncementRecord {
        AnnouncementRecord {
            carousel_id: 1,
            file_id: 1,
            file_len,
            block_size,
            k,
            n,
            code_id: 0,
            filename: "out.bin".to_string(),
            signature: vec![],
        }
    }

    fn block(index: u32, byte: u8, len: usize) -> BlockRecord {
        BlockRecord {
            carousel_id: 1,
            file_id: 1,
            block_index: index,
            payload: vec![byte; len],
        }
    }

    fn push(tx: &NCWriteStream<FileServiceRecord>, rec: FileServiceRecord) {
        tx.push(rec, &[][..]);
    }

    #[test]
    fn fast_path_emits_when_all_systematic_present() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut tracker, out) = Tracker::new(rx, 16, 16, None);
        push(&tx, FileServiceRecord::Announcement(announcement(2, 2, 6, 4)));
        tracker.work().unwrap();
        for i in 0..2 {
            push(&tx, FileServiceRecord::Block(block(i, i as u8 + 1, 4)));
            tracker.work().unwrap();
        }
        let completed = out.pop().unwrap().0;
        assert_eq!(completed.filename, "out.bin");
        assert_eq!(completed.data, vec![1, 1, 1, 1, 2]);
        assert_eq!(tracker.stats().files_emitted, 1);
        assert_eq!(tracker.open_assemblies(), 0);
    }

    #[test]
    fn duplicate_block_is_counted_not_stored_twice() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut tracker, _out) = Tracker::new(rx, 16, 16, None);
        push(&tx, FileServiceRecord::Announcement(announcement(2, 2, 8, 4)));
        tracker.work().unwrap();
        push(&tx, FileServiceRecord::Block(block(0, 9, 4)));
        tracker.work().unwrap();
        push(&tx, FileServiceRecord::Block(block(0, 9, 4)));
        tracker.work().unwrap();
        assert_eq!(tracker.stats().duplicate_blocks, 1);
    }

    #[test]
    fn conflicting_block_replaces_with_last_write_wins() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut tracker, out) = Tracker::new(rx, 16, 16, None);
        push(&tx, FileServiceRecord::Announcement(announcement(1, 1, 4, 4)));
        tracker.work().unwrap();
        push(&tx, FileServiceRecord::Block(block(0, 1, 4)));
        tracker.work().unwrap();
        push(&tx, FileServiceRecord::Block(block(0, 2, 4)));
        tracker.work().unwrap();
        assert_eq!(tracker.stats().conflicting_blocks, 1);
        let completed = out.pop().unwrap().0;
        assert_eq!(completed.data, vec![2, 2, 2, 2]);
    }

    #[test]
    fn orphan_blocks_are_admitted_once_announcement_arrives() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut tracker, out) = Tracker::new(rx, 16, 16, None);
        for i in 0..2 {
            push(&tx, FileServiceRecord::Block(block(i, i as u8 + 1, 4)));
            tracker.work().unwrap();
        }
        assert_eq!(tracker.stats().orphans_buffered, 2);
        push(&tx, FileServiceRecord::Announcement(announcement(2, 2, 8, 4)));
        tracker.work().unwrap();
        let completed = out.pop().unwrap().0;
        assert_eq!(completed.data, vec![1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn orphan_buffer_drops_oldest_on_overflow() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut tracker, _out) = Tracker::new(rx, 16, 1, None);
        push(&tx, FileServiceRecord::Block(block(0, 1, 4)));
        tracker.work().unwrap();
        push(&tx, FileServiceRecord::Block(block(1, 2, 4)));
        tracker.work().unwrap();
        assert_eq!(tracker.stats().orphans_buffered, 1);
        assert_eq!(tracker.stats().orphans_dropped, 1);
    }

    #[test]
    fn fec_path_recovers_missing_blocks() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut tracker, out) = Tracker::new(rx, 16, 16, None);
        push(&tx, FileServiceRecord::Announcement(announcement(4, 6, 32, 8)));
        tracker.work().unwrap();

        let systematic: Vec<Vec<u8>> = (0..4u32).map(|i| vec![i as u8 + 1; 8]).collect();
        let code = LdpcCode::new(0, 4, 6);
        push(&tx, FileServiceRecord::Block(BlockRecord {
            carousel_id: 1,
            file_id: 1,
            block_index: 0,
            payload: systematic[0].clone(),
        }));
        tracker.work().unwrap();
        push(&tx, FileServiceRecord::Block(BlockRecord {
            carousel_id: 1,
            file_id: 1,
            block_index: 2,
            payload: systematic[2].clone(),
        }));
        tracker.work().unwrap();
        push(&tx, FileServiceRecord::Block(BlockRecord {
            carousel_id: 1,
            file_id: 1,
            block_index: 4,
            payload: code.encode_parity(0, &systematic),
        }));
        tracker.work().unwrap();
        assert!(out.is_empty());
        push(&tx, FileServiceRecord::Block(BlockRecord {
            carousel_id: 1,
            file_id: 1,
            block_index: 5,
            payload: code.encode_parity(1, &systematic),
        }));
        tracker.work().unwrap();

        let completed = out.pop().unwrap().0;
        assert_eq!(completed.data, systematic.concat());
    }

    #[test]
    fn eviction_reclaims_least_recently_touched() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut tracker, _out) = Tracker::new(rx, 1, 16, None);
        push(&tx, FileServiceRecord::Announcement(announcement(2, 2, 8, 4)));
        tracker.work().unwrap();
        let mut a2 = announcement(2, 2, 8, 4);
        a2.file_id = 2;
        push(&tx, FileServiceRecord::Announcement(a2));
        tracker.work().unwrap();
        assert_eq!(tracker.open_assemblies(), 1);
        assert_eq!(tracker.stats().assemblies_evicted, 1);
    }

    #[test]
    fn age_out_discards_idle_assemblies() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut tracker, _out) = Tracker::new(rx, 16, 16, Some(5));
        push(&tx, FileServiceRecord::Announcement(announcement(2, 2, 8, 4)));
        tracker.work().unwrap();
        tracker.sweep(10);
        assert_eq!(tracker.open_assemblies(), 0);
        assert_eq!(tracker.stats().assemblies_aged_out, 1);
    }

    #[test]
    fn incompatible_reannouncement_starts_new_generation() {
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let (mut tracker, _out) = Tracker::new(rx, 16, 16, None);
        push(&tx, FileServiceRecord::Announcement(announcement(2, 2, 8, 4)));
        tracker.work().unwrap();
        push(&tx, FileServiceRecord::Block(block(0, 1, 4)));
        tracker.work().unwrap();
        push(&tx, FileServiceRecord::Announcement(announcement(3, 3, 12, 4)));
        tracker.work().unwrap();
        assert!(!tracker
            .assemblies
            .get(&(1, 1))
            .unwrap()
            .blocks
            .contains_key(&0));
    }
}
