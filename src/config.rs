/*! Command-line configuration (§6, ambient stack).

Grounded on the teacher's example receivers (e.g. `ax25-9600-rx.rs`'s
`Opt`): a single `clap::Parser` struct, short/long flags, and a `-v`
verbosity counter fed straight to `stderrlog`.
*/

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::pipeline::TrackerLimits;

/// Receiver for a one-way satellite file-broadcast service.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Path to a recorded, byte-stuffed capture to replay. Omit for live
    /// UDP reception on `--listen` (§6 CLI surface).
    pub replay: Option<PathBuf>,

    /// Address to bind for live UDP frame reception (`host:port`).
    #[arg(long = "listen", default_value = "0.0.0.0:9000")]
    pub listen: String,

    /// Directory to write reassembled files into (§6: `./downloads` by
    /// default).
    #[arg(short = 'o', long = "output", default_value = "downloads")]
    pub output: PathBuf,

    /// Verbosity; repeat for more detail (`-v`, `-vv`, ...).
    #[arg(short, long, default_value = "0")]
    pub verbose: usize,

    /// Maximum number of concurrent in-flight file assemblies.
    #[arg(long = "max-assemblies", default_value = "256")]
    pub max_assemblies: usize,

    /// Maximum number of orphan blocks buffered ahead of their
    /// announcement.
    #[arg(long = "orphan-capacity", default_value = "1024")]
    pub orphan_capacity: usize,

    /// Discard an assembly after this much idle time. Default: never
    /// (§4.6's "no blocks received for N seconds", default disabled to
    /// allow long carousels).
    #[arg(long = "age-out", value_parser = humantime::parse_duration)]
    pub age_out: Option<Duration>,
}

impl Config {
    /// Parse from `std::env::args()`.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Resource bounds for the carousel/file tracker, derived from this
    /// configuration. The tracker's logical clock advances one tick per
    /// received frame (§9 SUPPLEMENTED FEATURES), so a wall-clock
    /// duration is not a direct fit; `age_out` is treated as a number of
    /// ticks for simplicity, sized generously (1 tick ~ 1 frame).
    #[must_use]
    pub fn tracker_limits(&self) -> TrackerLimits {
        TrackerLimits {
            max_assemblies: self.max_assemblies,
            orphan_capacity: self.orphan_capacity,
            age_out_ticks: self.age_out.map(|d| d.as_secs().max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_live_invocation() {
        let cfg = Config::parse_from(["satreceiver"]);
        assert_eq!(cfg.listen, "0.0.0.0:9000");
        assert!(cfg.replay.is_none());
        assert_eq!(cfg.output, PathBuf::from("downloads"));
    }

    #[test]
    fn parses_replay_and_age_out() {
        let cfg = Config::parse_from([
            "satreceiver",
            "capture.bin",
            "-o",
            "out",
            "--age-out",
            "10m",
        ]);
        assert_eq!(cfg.replay, Some(PathBuf::from("capture.bin")));
        assert_eq!(cfg.age_out, Some(Duration::from_secs(600)));
    }
}
