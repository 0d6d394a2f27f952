use std::error::Error;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use shmq::{CancelToken, QueueConfig, QueueFactory};

#[derive(Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmq-subscriber.toml")]
    config: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct SubscriberConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();
    let opts: Opts = Opts::parse();
    let cfg: SubscriberConfig = confy::load_path(&opts.config)?;
    let mut subscriber = QueueFactory::create_subscriber(&cfg.queue)?;

    loop {
        let message = subscriber.dequeue(&CancelToken::none())?;
        println!("{}", String::from_utf8_lossy(&message));
    }
}
