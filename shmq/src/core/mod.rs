use std::mem;
use std::sync::atomic::AtomicI64;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use serde_derive::{Deserialize, Serialize};
use shared_memory::{Shmem, ShmemConf, ShmemError};

use crate::errors::QueueError;
use crate::ring::CircularBuffer;

/// Size of the [`QueueHeader`] at the start of the region.
pub const QUEUE_HEADER_SIZE: usize = 16;

/// Size of the per-slot message header, padded so slot bodies are 8-aligned.
pub const MESSAGE_HEADER_SIZE: usize = 16;

/// Byte offset of the `state` field inside a slot.
pub(crate) const STATE_OFFSET: i64 = 0;
/// Byte offset of the `body_length` field inside a slot.
pub(crate) const BODY_LENGTH_OFFSET: i64 = 8;

/// Smallest legal region: the queue header plus one 8-byte body unit.
pub const MIN_BYTES_CAPACITY: usize = QUEUE_HEADER_SIZE + 8;

pub static DEFAULT_QUEUE_NAME: &str = "shmq-queue";

/// Per-slot lifecycle, stored as a 32-bit value at the slot start.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Vacant = 0,
    ReadyToBeConsumed = 1,
    LockedToBeConsumed = 2,
    Aborted = 3,
}

/// Mutable queue state at offset 0 of the shared region.
///
/// Both offsets are absolute, unbounded counters; the ring position of an
/// offset is its value modulo the body capacity. They only ever grow.
#[repr(C)]
pub struct QueueHeader {
    pub head_offset: AtomicI64,
    pub tail_offset: AtomicI64,
}

const _: () = assert!(mem::size_of::<QueueHeader>() == QUEUE_HEADER_SIZE);
const _: () = assert!(mem::align_of::<QueueHeader>() == 8);

/// Fixed layout of the header at the start of every slot.
///
/// Slots may cross the ring's wrap point, so the queue never materializes
/// this struct in place; the state and body length are reached through
/// [`STATE_OFFSET`] and [`BODY_LENGTH_OFFSET`] instead. The struct pins the
/// layout those offsets implement.
#[repr(C)]
pub struct MessageHeader {
    pub state: i32,
    _pad: i32,
    pub body_length: i32,
    _pad_tail: i32,
}

const _: () = assert!(mem::size_of::<MessageHeader>() == MESSAGE_HEADER_SIZE);

#[inline]
pub const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Total ring bytes occupied by a message with `body_length` body bytes.
#[inline]
pub const fn slot_size(body_length: usize) -> usize {
    align8(MESSAGE_HEADER_SIZE + body_length)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, used verbatim (with platform prefixes) for the region
    /// backing file and the coupling semaphore. Must not contain a path
    /// separator.
    pub queue_name: String,
    /// Directory holding the region backing file on POSIX.
    pub data_dir: String,
    /// Total region size in bytes, header included. Must be a multiple of 8.
    pub bytes_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            queue_name: String::from(DEFAULT_QUEUE_NAME),
            data_dir: String::from("."),
            bytes_capacity: 1024 * 1024,
        }
    }
}

impl QueueConfig {
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder {
            config: QueueConfig::default(),
        }
    }

    /// Body bytes available for slots.
    pub fn body_capacity(&self) -> usize {
        self.bytes_capacity - QUEUE_HEADER_SIZE
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        if self.queue_name.is_empty() {
            return Err(QueueError::InvalidArgument(
                "queue_name must not be empty".to_string(),
            ));
        }
        if self.queue_name.contains(['/', '\\']) {
            return Err(QueueError::InvalidArgument(format!(
                "queue_name {:?} must not contain a path separator",
                self.queue_name
            )));
        }
        if self.bytes_capacity < MIN_BYTES_CAPACITY {
            return Err(QueueError::InvalidArgument(format!(
                "bytes_capacity {} is below the minimum {}",
                self.bytes_capacity, MIN_BYTES_CAPACITY
            )));
        }
        if self.bytes_capacity % 8 != 0 {
            return Err(QueueError::InvalidArgument(format!(
                "bytes_capacity {} must be a multiple of 8",
                self.bytes_capacity
            )));
        }
        Ok(())
    }

    fn region_file(&self) -> String {
        format!("{}/{}", self.data_dir, self.queue_name)
    }
}

pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    pub fn queue_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.queue_name = name.into();
        self
    }

    pub fn data_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn bytes_capacity(mut self, capacity: usize) -> Self {
        self.config.bytes_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<QueueConfig, QueueError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn open_linked(cfg: &QueueConfig) -> Result<Box<Shmem>, QueueError> {
    let shmem = ShmemConf::new().flink(cfg.region_file()).open()?;
    if shmem.len() < cfg.bytes_capacity {
        return Err(QueueError::InvalidArgument(format!(
            "existing region {} holds {} bytes, expected at least {}",
            cfg.queue_name,
            shmem.len(),
            cfg.bytes_capacity
        )));
    }
    Ok(Box::new(shmem))
}

/// Creates the region if absent, opens it otherwise.
///
/// Every participant uses the same call; the first one to arrive creates the
/// zero-filled region (head and tail both 0), later ones map the existing one.
pub fn region_context(cfg: &QueueConfig) -> Result<Box<Shmem>, QueueError> {
    cfg.validate()?;
    match ShmemConf::new()
        .size(cfg.bytes_capacity)
        .flink(cfg.region_file())
        .create()
    {
        Ok(v) => Ok(Box::new(v)),
        Err(ShmemError::LinkExists) => open_linked(cfg),
        Err(e) => Err(QueueError::SharedMemory(e)),
    }
}

/// A mapped queue region plus the typed views into it.
pub struct QueueRegion {
    shmem: Box<Shmem>,
}

// The region is only ever mutated through the atomic slot protocol, and the
// mapping stays valid for as long as the owning QueueRegion lives.
unsafe impl Send for QueueRegion {}

impl QueueRegion {
    pub fn new(cfg: &QueueConfig) -> Result<QueueRegion, QueueError> {
        let shmem = region_context(cfg)?;
        Ok(QueueRegion { shmem })
    }

    pub fn header(&self) -> &QueueHeader {
        unsafe { &*(self.shmem.as_ptr() as *const QueueHeader) }
    }

    /// Ring view over the body bytes behind the queue header.
    pub fn body(&self) -> CircularBuffer {
        unsafe {
            CircularBuffer::new(
                self.shmem.as_ptr().add(QUEUE_HEADER_SIZE),
                (self.shmem.len() - QUEUE_HEADER_SIZE) as i64,
            )
        }
    }
}

// macOS caps sem names at 31 bytes including the NUL; after the "/" namespace
// prefix and the one-byte coupling tag, 27 bytes remain for the queue name.
#[cfg(target_os = "macos")]
const MAX_GENERATED_NAME_LEN: usize = 27;
#[cfg(not(target_os = "macos"))]
const MAX_GENERATED_NAME_LEN: usize = 128;

/// Produces a random queue name over the lowercase Latin alphabet.
///
/// Mixes a cryptographic RNG with the low bits of the wall clock so that two
/// processes generating a name in the same instant still diverge.
pub fn random_queue_name(length: usize) -> String {
    let length = length.min(MAX_GENERATED_NAME_LEN);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let mut name = String::with_capacity(length);
    for i in 0..length {
        let clock_bits = (nanos >> ((i % 4) * 8)) as u8;
        let value = (OsRng.next_u32() as u8) ^ clock_bits;
        name.push((b'a' + value % 26) as char);
    }
    name
}
