use crate::core::QueueConfig;
use crate::errors::QueueError;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;

// Queue-name tags for the two directions of a channel. The server publishes
// on the "P" queue and consumes the "S" queue; a client does the inverse.
const SERVER_OUT_TAG: &str = "P";
const SERVER_IN_TAG: &str = "S";

/// A bidirectional duplex built from two independent one-way queues.
///
/// No ordering is guaranteed across the two directions. Dropping the channel
/// disposes both halves.
pub struct Channel {
    publisher: Publisher,
    subscriber: Subscriber,
}

impl Channel {
    /// Opens both queues derived from `cfg.queue_name`.
    ///
    /// The side with `as_client = false` publishes on the "P"-tagged queue
    /// and subscribes to the "S"-tagged one; the client side is the inverse,
    /// so a server/client pair ends up talking to each other.
    pub fn new(cfg: &QueueConfig, as_client: bool) -> Result<Channel, QueueError> {
        let server_out = tagged_config(cfg, SERVER_OUT_TAG);
        let server_in = tagged_config(cfg, SERVER_IN_TAG);
        let (publisher_cfg, subscriber_cfg) = if as_client {
            (server_in, server_out)
        } else {
            (server_out, server_in)
        };
        Ok(Channel {
            publisher: Publisher::new(&publisher_cfg)?,
            subscriber: Subscriber::new(&subscriber_cfg)?,
        })
    }

    pub fn publisher(&mut self) -> &mut Publisher {
        &mut self.publisher
    }

    pub fn subscriber(&mut self) -> &mut Subscriber {
        &mut self.subscriber
    }

    /// Splits the channel into its two halves.
    pub fn into_parts(self) -> (Publisher, Subscriber) {
        (self.publisher, self.subscriber)
    }
}

fn tagged_config(cfg: &QueueConfig, tag: &str) -> QueueConfig {
    QueueConfig {
        queue_name: format!("{}{}", tag, cfg.queue_name),
        ..cfg.clone()
    }
}

/// Top-level entry point mirroring the queue configuration surface.
pub struct QueueFactory;

impl QueueFactory {
    pub fn create_publisher(cfg: &QueueConfig) -> Result<Publisher, QueueError> {
        Publisher::new(cfg)
    }

    pub fn create_subscriber(cfg: &QueueConfig) -> Result<Subscriber, QueueError> {
        Subscriber::new(cfg)
    }

    pub fn create_channel(cfg: &QueueConfig, as_client: bool) -> Result<Channel, QueueError> {
        Channel::new(cfg, as_client)
    }
}
