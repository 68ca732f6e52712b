/*! CLI entry point.

Grounded on the teacher's example receivers (e.g. `ax25-9600-rx.rs`):
parse flags, set up logging, build the pipeline, wire `ctrlc` to its
cancellation token, run, print stats. Exit code 0 on clean EOF/signal,
non-zero on a fatal transport error (§6).
*/

use satreceiver::config::Config;
use satreceiver::error::Error;
use satreceiver::pipeline::Pipeline;

fn main() {
    let opt = Config::parse_args();
    stderrlog::new()
        .module(module_path!())
        .module("satreceiver")
        .quiet(false)
        .verbosity(opt.verbose)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .expect("failed to initialize logging");

    if let Err(e) = run(&opt) {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

fn run(opt: &Config) -> satreceiver::error::Result<()> {
    let mut pipeline = match &opt.replay {
        Some(path) => {
            let f = std::fs::File::open(path).map_err(Error::Transport)?;
            Pipeline::new_replay(f, opt.output.clone(), opt.tracker_limits())
        }
        None => Pipeline::new_live(&opt.listen, opt.output.clone(), opt.tracker_limits())?,
    };

    let cancel = pipeline.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("received interrupt, shutting down");
        cancel.cancel();
    })
    .expect("error setting Ctrl-C handler");

    log::info!("satreceiver running");
    pipeline.run()?;

    let stats = pipeline.stats();
    log::info!(
        "done: {} file(s) written, {} write error(s)",
        stats.emitter.files_written,
        stats.emitter.write_errors
    );
    if let Ok(json) = serde_json::to_string_pretty(&stats) {
        log::debug!("final stats:\n{json}");
    }
    Ok(())
}
