/*! File emitter (§4.9).

Writes a completed file to an output directory under its announced name,
path-sanitised so a malicious or malformed announcement can't escape the
output directory, and resolves a same-name collision with a numeric
suffix rather than overwriting.

Grounded on the teacher's `pdu_writer.rs` (write-received-item-to-output-
directory shape); the sanitisation and collision handling are new, since
`pdu_writer.rs`'s own output names are locally generated timestamps and
never need defending against.
*/

use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;

use crate::block::{Block, BlockName, BlockRet};
use crate::error::{Error, Result};
use crate::stream::NCReadStream;
use crate::tracker::CompletedFile;

/// Strip everything that would let an announced filename escape the
/// output directory: path separators collapse to their final component,
/// and `.`/`..` components are dropped.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = Path::new(name)
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("_");
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Pick a non-colliding path under `dir` for `filename`, appending a
/// numeric suffix (`name-1.ext`, `name-2.ext`, ...) if needed.
fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let ext = path.extension().and_then(|s| s.to_str());
    for n in 1u64.. {
        let name = match ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        let candidate = dir.join(&name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("u64 suffix space exhausted");
}

/// Running counters for emitted files.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct EmitterStats {
    /// Files successfully written.
    pub files_written: u64,
    /// Files that failed to write (§6 non-zero exit on output error).
    pub write_errors: u64,
}

/// File-emitter block: consumes completed files, writes them under
/// `output_dir`.
pub struct FileEmitter {
    src: NCReadStream<CompletedFile>,
    output_dir: PathBuf,
    stats: EmitterStats,
}

impl FileEmitter {
    /// Create a new emitter writing completed files under `output_dir`.
    #[must_use]
    pub fn new(src: NCReadStream<CompletedFile>, output_dir: PathBuf) -> Self {
        Self {
            src,
            output_dir,
            stats: EmitterStats::default(),
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> EmitterStats {
        self.stats
    }

    fn write(&self, file: &CompletedFile) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| Error::Output(format!("creating output directory: {e}")))?;
        let name = sanitize_filename(&file.filename);
        let path = unique_path(&self.output_dir, &name);
        let mut f = std::fs::File::create(&path)
            .map_err(|e| Error::Output(format!("creating {path:?}: {e}")))?;
        f.write_all(&file.data)
            .map_err(|e| Error::Output(format!("writing {path:?}: {e}")))?;
        Ok(path)
    }
}

impl BlockName for FileEmitter {
    fn block_name(&self) -> &str {
        "FileEmitter"
    }
}

impl Block for FileEmitter {
    fn work(&mut self) -> Result<BlockRet> {
        let Some((file, _tags)) = self.src.pop() else {
            return Ok(BlockRet::Noop);
        };
        match self.write(&file) {
            Ok(path) => {
                self.stats.files_written += 1;
                info!("FileEmitter: wrote {} bytes to {path:?}", file.data.len());
            }
            Err(e) => {
                self.stats.write_errors += 1;
                log::error!("FileEmitter: {e}");
            }
        }
        Ok(BlockRet::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_traversal_and_absolute_paths() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename("/etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename("weather.png"), "weather.png");
        assert_eq!(sanitize_filename("./a/../b"), "a_b");
        assert_eq!(sanitize_filename(".."), "unnamed");
    }

    #[test]
    fn writes_file_under_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let mut emitter = FileEmitter::new(rx, dir.path().to_path_buf());
        tx.push(
            CompletedFile {
                filename: "weather.png".to_string(),
                data: vec![1, 2, 3],
            },
            &[][..],
        );
        emitter.work().unwrap();
        let written = std::fs::read(dir.path().join("weather.png")).unwrap();
        assert_eq!(written, vec![1, 2, 3]);
        assert_eq!(emitter.stats().files_written, 1);
    }

    #[test]
    fn collision_gets_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let mut emitter = FileEmitter::new(rx, dir.path().to_path_buf());
        for byte in [1u8, 2u8] {
            tx.push(
                CompletedFile {
                    filename: "dup.bin".to_string(),
                    data: vec![byte],
                },
                &[][..],
            );
            emitter.work().unwrap();
        }
        assert_eq!(std::fs::read(dir.path().join("dup.bin")).unwrap(), vec![1]);
        assert_eq!(std::fs::read(dir.path().join("dup-1.bin")).unwrap(), vec![2]);
    }

    #[test]
    fn traversal_attempt_stays_inside_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = crate::stream::new_nocopy_stream();
        let mut emitter = FileEmitter::new(rx, dir.path().to_path_buf());
        tx.push(
            CompletedFile {
                filename: "../../../etc/passwd".to_string(),
                data: vec![0xff],
            },
            &[][..],
        );
        emitter.work().unwrap();
        assert!(dir.path().join("etc_passwd").exists());
    }
}
