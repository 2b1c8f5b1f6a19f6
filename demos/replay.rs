use log::{info, warn};
use similari_fusion::prelude::{FrameProcessor, FrameStats, FusionOptions, LogObserver};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Replays recorded snapshots, one JSON document per line.
///
/// ```text
/// RUST_LOG=info cargo run --example replay -- snapshots.jsonl [options.json]
/// ```
/// With `-` (or no argument) snapshots are read from stdin.
///
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let input: Box<dyn BufRead> = match args.first().map(String::as_str) {
        None | Some("-") => Box::new(BufReader::new(io::stdin())),
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
    };
    let opts = match args.get(1) {
        Some(path) => FusionOptions::from_json_file(Path::new(path))?,
        None => FusionOptions::default(),
    };
    info!("Replaying with {:?}", opts);

    let mut engine = FrameProcessor::new(opts, LogObserver);
    let mut total = FrameStats::default();
    for (n, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match engine.process_json(&line) {
            Ok(stats) => {
                total.plates += stats.plates;
                total.vehicles += stats.vehicles;
                total.skipped += stats.skipped;
                total.reports += stats.reports;
                total.merges += stats.merges;
                total.finalized += stats.finalized;
                total.evicted += stats.evicted;
            }
            Err(e) => warn!("Line {} is skipped: {}", n + 1, e),
        }
    }
    total.finalized += engine.finalize_all();
    drop(engine);

    info!("Done: {:?}", total);
    Ok(())
}
