//! A shared memory queue (`shmq`) for inter-process communication (IPC) or
//! intra-process messaging where high performance is desired.
//!
//! # Overview
//! This crate provides a single-producer / multi-consumer FIFO of
//! variable-length byte messages that lives in a named shared memory region.
//! Any number of OS processes mapping the same region observe one unified
//! queue: a publisher appends messages at the tail, subscribers consume them
//! from the head, with blocking or non-blocking semantics.
//!
//! Key components:
//! - [`QueueConfig`](crate::core::QueueConfig): Configuration for a queue,
//!   including its name, backing directory and region capacity. Use
//!   [`QueueConfig::builder()`](crate::core::QueueConfig::builder) to
//!   construct.
//! - [`Publisher`](publisher::Publisher): Appends messages, either by copy
//!   ([`try_enqueue`](publisher::Publisher::try_enqueue)) or zero-copy
//!   ([`try_enqueue_reserve`](publisher::Publisher::try_enqueue_reserve)).
//! - [`Subscriber`](subscriber::Subscriber): Consumes messages, with copying,
//!   user-buffered and zero-copy in-place APIs, each in a non-blocking and a
//!   blocking flavour.
//! - [`Channel`](channel::Channel): A duplex built from two independent
//!   one-way queues, and [`QueueFactory`](channel::QueueFactory) as the
//!   top-level entry point.
//! - [`QueueError`](errors::QueueError): Crate error type.
//!
//! # Concurrency Model and Safety
//!
//! There is no user-space lock spanning processes. All coordination happens
//! through atomic compare-and-swap on fields inside the shared region:
//!
//! - **Tail advance (publisher):** A publisher claims a slot by CAS-advancing
//!   the 64-bit tail counter. After the CAS succeeds the slot belongs to that
//!   publisher exclusively; the body is written and the slot header is
//!   committed afterwards with release ordering, so a subscriber that observes
//!   a committed slot also observes its body in full.
//!
//! - **Head advance (subscribers):** A subscriber claims the head slot by
//!   CAS-ing its state from `ReadyToBeConsumed` to `LockedToBeConsumed`,
//!   drains it, zeroes it, and CAS-advances the head counter. Losing a race
//!   at any of these steps is normal and reported as "nothing dequeued".
//!
//! - **The signal is a hint.** A named counting semaphore couples the two
//!   sides so that blocked subscribers wake promptly, but correctness never
//!   depends on it: subscribers re-check the queue on a timed ladder even if
//!   a wakeup is lost.
//!
//! The design assumes one active publisher per queue. Multiple publishers
//! advance the tail correctly, but delivery-order and recovery guarantees are
//! only specified for a single producer. A process crash between claiming a
//! slot and committing its header leaves the queue stuck at that slot; crash
//! recovery is out of scope.

#[cfg(not(target_pointer_width = "64"))]
compile_error!("shmq uses 64-bit offsets in its shared layout and does not support 32-bit targets");

pub mod errors;
pub mod core;
pub mod ring;
pub mod signal;
pub mod cancel;
pub mod publisher;
pub mod subscriber;
pub mod channel;
#[cfg(test)]
mod tests;

pub use crate::cancel::{CancelSource, CancelToken};
pub use crate::channel::{Channel, QueueFactory};
pub use crate::core::QueueConfig;
pub use crate::errors::{QueueError, SignalError};
pub use crate::publisher::Publisher;
pub use crate::subscriber::Subscriber;
