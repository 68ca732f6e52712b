/*! File service parser (§3 AnnouncementRecord / BlockRecord, §4.5, §6).

Distinguishes announcement records from block records by a leading
discriminant byte and parses each into a structured form. Signature
bytes are captured but never validated, per §1's stated scope.

The inner block CRC (§4.7) is computed over the block index and payload
only, matching §4.7's text ("a CRC ... over its index + payload")
literally rather than additionally covering the discriminant and
carousel/file ids, since those are already covered end-to-end by the
outer link-frame CRC (§4.2) over the whole payload.

Grounded on the teacher's `sigmf.rs` for the general shape of parsing a
structured, length-prefixed metadata record, and `hdlc_deframer.rs`'s
defensive length-check-before-slice style.
*/

use log::debug;

use crate::block::{Block, BlockName, BlockRet};
use crate::crc::crc16;
use crate::error::{Error, Result};
use crate::stream::{NCReadStream, NCWriteStream};

/// Discriminant for an announcement record (§6).
pub const ANNOUNCEMENT: u8 = 0x01;
/// Discriminant for a block record (§6).
pub const BLOCK: u8 = 0x02;

/// Minimum announcement payload: discriminant + carousel id + file id +
/// file length + block size + k + n + code id + two 2-byte length
/// prefixes (filename, signature), each possibly empty.
const ANNOUNCEMENT_FIXED_LEN: usize = 1 + 4 + 4 + 8 + 4 + 4 + 4 + 4 + 2 + 2;

/// Fixed portion of a block record: discriminant + carousel id + file id
/// + block index, with the inner CRC trailing the payload.
const BLOCK_FIXED_LEN: usize = 1 + 4 + 4 + 4;
/// Block records carry a trailing 2-byte inner CRC (§4.7).
const BLOCK_CRC_LEN: usize = 2;

/// A file descriptor broadcast ahead of / during a file's transmission
/// (§3 AnnouncementRecord).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementRecord {
    /// Logical channel this file is broadcast on.
    pub carousel_id: u32,
    /// Identifier of this file within its carousel.
    pub file_id: u32,
    /// Total length of the reconstructed file, in bytes.
    pub file_len: u64,
    /// Size of each block, in bytes (the terminal block may be shorter
    /// in spirit, but is still transmitted padded to this size).
    pub block_size: u32,
    /// Number of systematic blocks (`k`).
    pub k: u32,
    /// Total number of transmitted blocks, systematic + parity (`n`).
    pub n: u32,
    /// Selects the LDPC parity-check structure (§4.8).
    pub code_id: u32,
    /// Announced file name / path.
    pub filename: String,
    /// Opaque signature bytes. Captured, never validated (§1).
    pub signature: Vec<u8>,
}

impl AnnouncementRecord {
    /// True if `other` describes a compatible update to the same file:
    /// same block size and same `(k, n)` shape, so that already-received
    /// blocks can still be trusted (§4.6).
    #[must_use]
    pub fn compatible_with(&self, other: &AnnouncementRecord) -> bool {
        self.block_size == other.block_size
            && self.k == other.k
            && self.n == other.n
            && self.file_len == other.file_len
    }
}

/// A single fragment of a file (§3 BlockRecord).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    /// Carousel the file this block belongs to is broadcast on.
    pub carousel_id: u32,
    /// File this block belongs to.
    pub file_id: u32,
    /// 0-based index among all `n` transmitted blocks.
    pub block_index: u32,
    /// Raw payload of exactly `block_size` bytes (except possibly the
    /// terminal systematic block).
    pub payload: Vec<u8>,
}

/// Either kind of file-service record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileServiceRecord {
    /// A new or updated announcement.
    Announcement(AnnouncementRecord),
    /// One fragment of a file.
    Block(BlockRecord),
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedRecord(msg.into())
}

fn take_u32(data: &[u8], at: &mut usize) -> u32 {
    let v = u32::from_be_bytes(data[*at..*at + 4].try_into().unwrap());
    *at += 4;
    v
}

fn take_u64(data: &[u8], at: &mut usize) -> u64 {
    let v = u64::from_be_bytes(data[*at..*at + 8].try_into().unwrap());
    *at += 8;
    v
}

fn take_u16(data: &[u8], at: &mut usize) -> u16 {
    let v = u16::from_be_bytes(data[*at..*at + 2].try_into().unwrap());
    *at += 2;
    v
}

fn parse_announcement(data: &[u8]) -> Result<AnnouncementRecord> {
    if data.len() < ANNOUNCEMENT_FIXED_LEN {
        return Err(malformed(format!(
            "announcement shorter than fixed header: {} < {ANNOUNCEMENT_FIXED_LEN}",
            data.len()
        )));
    }
    let mut at = 1; // skip discriminant
    let carousel_id = take_u32(data, &mut at);
    let file_id = take_u32(data, &mut at);
    let file_len = take_u64(data, &mut at);
    let block_size = take_u32(data, &mut at);
    let k = take_u32(data, &mut at);
    let n = take_u32(data, &mut at);
    let code_id = take_u32(data, &mut at);
    let name_len = take_u16(data, &mut at) as usize;
    if data.len() < at + name_len + 2 {
        return Err(malformed("announcement truncated before filename"));
    }
    let filename = String::from_utf8(data[at..at + name_len].to_vec())
        .map_err(|e| malformed(format!("filename not utf-8: {e}")))?;
    at += name_len;
    let sig_len = take_u16(data, &mut at) as usize;
    if data.len() != at + sig_len {
        return Err(malformed("announcement has trailing or missing bytes"));
    }
    let signature = data[at..at + sig_len].to_vec();
    if n < k {
        return Err(malformed(format!("n ({n}) < k ({k})")));
    }
    Ok(AnnouncementRecord {
        carousel_id,
        file_id,
        file_len,
        block_size,
        k,
        n,
        code_id,
        filename,
        signature,
    })
}

/// Serialize an announcement back to wire form (inverse of parsing).
#[must_use]
pub fn serialize_announcement(a: &AnnouncementRecord) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(ANNOUNCEMENT);
    out.extend_from_slice(&a.carousel_id.to_be_bytes());
    out.extend_from_slice(&a.file_id.to_be_bytes());
    out.extend_from_slice(&a.file_len.to_be_bytes());
    out.extend_from_slice(&a.block_size.to_be_bytes());
    out.extend_from_slice(&a.k.to_be_bytes());
    out.extend_from_slice(&a.n.to_be_bytes());
    out.extend_from_slice(&a.code_id.to_be_bytes());
    out.extend_from_slice(&(a.filename.len() as u16).to_be_bytes());
    out.extend_from_slice(a.filename.as_bytes());
    out.extend_from_slice(&(a.signature.len() as u16).to_be_bytes());
    out.extend_from_slice(&a.signature);
    out
}

/// Bytes the inner CRC (§4.7: "a CRC ... over its index + payload") is
/// computed over: the block index followed by the payload, deliberately
/// excluding the discriminant and carousel/file ids that the outer
/// link-frame CRC (§4.2) already covers across the whole payload.
fn block_crc_input(block_index: u32, payload: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(4 + payload.len());
    input.extend_from_slice(&block_index.to_be_bytes());
    input.extend_from_slice(payload);
    input
}

fn parse_block(data: &[u8]) -> Result<BlockRecord> {
    if data.len() < BLOCK_FIXED_LEN + BLOCK_CRC_LEN {
        return Err(malformed(format!(
            "block shorter than fixed header + crc: {} < {}",
            data.len(),
            BLOCK_FIXED_LEN + BLOCK_CRC_LEN
        )));
    }
    let mut at = 1; // skip discriminant
    let carousel_id = take_u32(data, &mut at);
    let file_id = take_u32(data, &mut at);
    let block_index = take_u32(data, &mut at);
    let body_end = data.len() - BLOCK_CRC_LEN;
    let payload = data[at..body_end].to_vec();
    let got_crc = u16::from_be_bytes([data[body_end], data[body_end + 1]]);
    let want_crc = crc16(&block_crc_input(block_index, &payload));
    if got_crc != want_crc {
        return Err(Error::Integrity(format!(
            "block {block_index} of file {file_id}: bad inner crc"
        )));
    }
    Ok(BlockRecord {
        carousel_id,
        file_id,
        block_index,
        payload,
    })
}

/// Serialize a block record back to wire form, with a valid inner CRC.
#[must_use]
pub fn serialize_block(b: &BlockRecord) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(BLOCK);
    body.extend_from_slice(&b.carousel_id.to_be_bytes());
    body.extend_from_slice(&b.file_id.to_be_bytes());
    body.extend_from_slice(&b.block_index.to_be_bytes());
    body.extend_from_slice(&b.payload);
    let crc = crc16(&block_crc_input(b.block_index, &b.payload));
    body.extend_from_slice(&crc.to_be_bytes());
    body
}

/// Parse one file-service payload, dispatching on its discriminant byte.
pub fn parse(payload: &[u8]) -> Result<FileServiceRecord> {
    match payload.first() {
        Some(&ANNOUNCEMENT) => parse_announcement(payload).map(FileServiceRecord::Announcement),
        Some(&BLOCK) => parse_block(payload).map(FileServiceRecord::Block),
        Some(other) => Err(malformed(format!("unknown record discriminant {other:#04x}"))),
        None => Err(malformed("empty file-service payload")),
    }
}

/// Running counters for dropped file-service records.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct FileServiceStats {
    /// Records that failed to parse (§4.5 MalformedRecord).
    pub malformed: u64,
    /// Block records whose inner CRC didn't match (§4.7).
    pub integrity_errors: u64,
}

/// Block wrapper: consumes raw file-service payloads, emits
/// [`FileServiceRecord`]s.
pub struct FileServiceParser {
    src: NCReadStream<Vec<u8>>,
    dst: NCWriteStream<FileServiceRecord>,
    stats: FileServiceStats,
}

impl FileServiceParser {
    /// Create a new parser reading from `src`.
    #[must_use]
    pub fn new(src: NCReadStream<Vec<u8>>) -> (Self, NCReadStream<FileServiceRecord>) {
        let (dst, rx) = crate::stream::new_nocopy_stream();
        (
            Self {
                src,
                dst,
                stats: FileServiceStats::default(),
            },
            rx,
        )
    }

    /// Current drop counters.
    #[must_use]
    pub fn stats(&self) -> FileServiceStats {
        self.stats
    }
}

impl BlockName for FileServiceParser {
    fn block_name(&self) -> &str {
        "FileServiceParser"
    }
}

impl Block for FileServiceParser {
    fn work(&mut self) -> Result<BlockRet> {
        let Some((payload, tags)) = self.src.pop() else {
            return Ok(BlockRet::Noop);
        };
        match parse(&payload) {
            Ok(rec) => self.dst.push(rec, tags),
            Err(Error::Integrity(msg)) => {
                self.stats.integrity_errors += 1;
                debug!("FileServiceParser: {msg}");
            }
            Err(e) => {
                self.stats.malformed += 1;
                debug!("FileServiceParser: {e}");
            }
        }
        Ok(BlockRet::Ok)
    }
}
