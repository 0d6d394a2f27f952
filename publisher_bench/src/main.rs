use std::error::Error;
use std::time::Instant;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use shmq::{QueueConfig, QueueFactory};

#[derive(Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmq-bench.toml")]
    config: String,
    #[clap(short = 'n', long = "count", default_value_t = 1_000_000)]
    count: u64,
    #[clap(short = 's', long = "size", default_value_t = 64)]
    size: usize,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct BenchConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();
    let opts: Opts = Opts::parse();
    let cfg: BenchConfig = confy::load_path(&opts.config)?;
    let mut publisher = QueueFactory::create_publisher(&cfg.queue)?;

    let message: Vec<u8> = (0..opts.size).map(|i| i as u8).collect();
    let start = Instant::now();
    for _ in 0..opts.count {
        while !publisher.try_enqueue(&message)? {
            std::thread::yield_now();
        }
    }
    let duration = start.elapsed();
    let iops = (opts.count as f64 / duration.as_millis().max(1) as f64) * 1_000f64;
    println!(
        "{:#?}K messages published/s. Total time: {:#?}",
        (iops / 1000f64) as u64,
        duration
    );
    Ok(())
}
