use std::error::Error;
use std::time::Instant;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use shmq::{CancelToken, QueueConfig, QueueFactory};

#[derive(Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmq-bench.toml")]
    config: String,
    #[clap(short = 'n', long = "count", default_value_t = 1_000_000)]
    count: u64,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct BenchConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();
    let opts: Opts = Opts::parse();
    let cfg: BenchConfig = confy::load_path(&opts.config)?;
    let mut subscriber = QueueFactory::create_subscriber(&cfg.queue)?;

    let mut total_bytes = 0u64;
    let start = Instant::now();
    for _ in 0..opts.count {
        let message = subscriber.dequeue(&CancelToken::none())?;
        total_bytes += message.len() as u64;
    }
    let duration = start.elapsed();
    let iops = (opts.count as f64 / duration.as_millis().max(1) as f64) * 1_000f64;
    println!(
        "{:#?}K messages consumed/s ({} bytes). Total time: {:#?}",
        (iops / 1000f64) as u64,
        total_bytes,
        duration
    );
    Ok(())
}
