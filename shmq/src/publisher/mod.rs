use std::sync::atomic::Ordering;

use crate::cancel::CancelToken;
use crate::core::{
    slot_size, QueueConfig, QueueRegion, SlotState, BODY_LENGTH_OFFSET, MESSAGE_HEADER_SIZE,
    STATE_OFFSET,
};
use crate::errors::QueueError;
use crate::ring::{CircularBuffer, WrappedByteSpanMut};
use crate::signal::{coupling_signal_name, Signal};

/// Appends messages to a shared-memory queue.
///
/// A queue is designed for one active publisher. The tail-advance CAS is
/// correct under several concurrent publishers, but ordering and recovery
/// guarantees are only given for one.
///
/// Dropping the publisher disposes it; messages already enqueued stay in the
/// region for subscribers to drain.
pub struct Publisher {
    region: QueueRegion,
    body: CircularBuffer,
    signal: Signal,
}

impl Publisher {
    /// Creates the queue region and coupling semaphore if absent, opens them
    /// otherwise.
    pub fn new(cfg: &QueueConfig) -> Result<Publisher, QueueError> {
        let region = QueueRegion::new(cfg)?;
        let body = region.body();
        let signal = Signal::create_or_open(&coupling_signal_name(&cfg.queue_name), 0, false)?;
        Ok(Publisher {
            region,
            body,
            signal,
        })
    }

    /// Copies `message` into the queue.
    ///
    /// Returns `false` when the queue has no room for the message; that is
    /// the only non-error outcome besides success.
    pub fn try_enqueue(&mut self, message: &[u8]) -> Result<bool, QueueError> {
        self.enqueue_with(message.len(), |span| {
            if span.try_write(message) {
                Some(message.len())
            } else {
                None
            }
        })
    }

    /// Zero-copy enqueue: reserves `reserve_bytes` and hands the reserved
    /// span to `writer`, which returns the number of bytes actually written.
    ///
    /// A return of 0 (or a panic inside `writer`) aborts the message: the
    /// slot is still committed, marked aborted, and silently reaped by the
    /// next subscriber. `writer` is not invoked at all when the queue is
    /// full. Returns `true` only for a committed, non-aborted message.
    pub fn try_enqueue_reserve<F>(
        &mut self,
        reserve_bytes: usize,
        writer: F,
        cancel: &CancelToken,
    ) -> Result<bool, QueueError>
    where
        F: FnOnce(&mut WrappedByteSpanMut<'_>, &CancelToken) -> usize,
    {
        self.enqueue_with(reserve_bytes, |span| {
            let written = writer(span, cancel);
            if written == 0 || written > reserve_bytes {
                None
            } else {
                Some(written)
            }
        })
    }

    /// The enqueue core.
    ///
    /// 1. Snapshot head and tail; fail on insufficient room.
    /// 2. CAS the tail past the slot; the range is then exclusively ours.
    /// 3. Fill the body.
    /// 4. Commit the slot header (ready or aborted) and release the signal.
    ///
    /// Steps 3–4 run under a drop guard: once the tail CAS lands, the slot
    /// exists and subscribers must always find a parseable header behind it,
    /// even if the fill panics.
    fn enqueue_with<F>(&mut self, reserve: usize, fill: F) -> Result<bool, QueueError>
    where
        F: FnOnce(&mut WrappedByteSpanMut<'_>) -> Option<usize>,
    {
        let header = self.region.header();
        let slot = slot_size(reserve) as i64;
        loop {
            let head = header.head_offset.load(Ordering::Acquire);
            let tail = header.tail_offset.load(Ordering::Acquire);
            if slot > self.body.capacity() - (tail - head) {
                return Ok(false);
            }
            if header
                .tail_offset
                .compare_exchange(tail, tail + slot, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Another publisher moved the tail first; retry with a fresh
                // snapshot.
                continue;
            }

            let mut commit = SlotCommit {
                body: &self.body,
                signal: &self.signal,
                slot_offset: tail,
                body_length: reserve,
                state: SlotState::Aborted,
            };
            let mut span = self
                .body
                .wrapped_span_mut(tail + MESSAGE_HEADER_SIZE as i64, reserve)?;
            let outcome = fill(&mut span);
            if let Some(written) = outcome {
                commit.state = SlotState::ReadyToBeConsumed;
                commit.body_length = written;
            }
            drop(commit);
            return Ok(outcome.is_some());
        }
    }
}

/// Commits the slot header when dropped.
///
/// Starts out as an abort record carrying the full reservation (so the slot
/// size stays computable) and is upgraded in place on success. Runs during
/// unwinding too, which is what keeps a panicking writer from wedging the
/// queue.
struct SlotCommit<'a> {
    body: &'a CircularBuffer,
    signal: &'a Signal,
    slot_offset: i64,
    body_length: usize,
    state: SlotState,
}

impl Drop for SlotCommit<'_> {
    fn drop(&mut self) {
        unsafe {
            self.body
                .atomic_i32(self.slot_offset + BODY_LENGTH_OFFSET)
                .store(self.body_length as i32, Ordering::Relaxed);
            self.body
                .atomic_i32(self.slot_offset + STATE_OFFSET)
                .store(self.state as i32, Ordering::Release);
        }
        // The slot is committed and visible; a subscriber blocked on the
        // semaphore must be woken or the queue silently loses progress.
        if let Err(e) = self.signal.release() {
            tracing::error!(
                "semaphore release failed after committing a slot: {}; aborting",
                e
            );
            std::process::abort();
        }
    }
}
