use std::error::Error;
use std::io::{self, BufRead};

use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use shmq::{QueueConfig, QueueFactory};

#[derive(Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmq-publisher.toml")]
    config: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct PublisherConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();
    let opts: Opts = Opts::parse();
    let cfg: PublisherConfig = confy::load_path(&opts.config)?;
    let mut publisher = QueueFactory::create_publisher(&cfg.queue)?;

    let stdin = io::stdin();
    let mut published = 0u64;
    for line in stdin.lock().lines() {
        let line = line?;
        while !publisher.try_enqueue(line.as_bytes())? {
            std::thread::yield_now();
        }
        published += 1;
    }
    println!("published {} messages", published);
    Ok(())
}
