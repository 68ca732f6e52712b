/*! Receiver for a one-way satellite file-broadcast service.

A frame source feeds a fixed pipeline: link-frame parsing and CRC
check, service demultiplexing, time decoding, file-service record
parsing, carousel/file reassembly with LDPC-based erasure recovery, and
final file emission. See [`pipeline::Pipeline`] for how the stages are
wired together, and `DESIGN.md` at the repository root for how each
module is grounded.
*/

pub mod block;
pub mod config;
pub mod crc;
pub mod emitter;
pub mod error;
pub mod file_service;
pub mod frame_source;
pub mod framing;
pub mod graph;
pub mod ldpc;
pub mod link_frame;
pub mod pipeline;
pub mod service;
pub mod stream;
pub mod time;
pub mod tracker;
