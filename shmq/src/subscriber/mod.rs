use std::sync::atomic::Ordering;
use std::thread;

use crate::cancel::{CancelSource, CancelToken};
use crate::core::{
    slot_size, QueueConfig, QueueRegion, SlotState, BODY_LENGTH_OFFSET, MESSAGE_HEADER_SIZE,
    STATE_OFFSET,
};
use crate::errors::{QueueError, SignalError};
use crate::ring::{CircularBuffer, WrappedByteSpan};
use crate::signal::{coupling_signal_name, Signal};

// Busy-yield iterations before falling back to timed semaphore waits.
const SPIN_YIELDS: u32 = 16;
// The timed-wait ladder grows 1, 2, 4, 8 and saturates here, bounding both
// idle CPU and the wake-up latency for cancellation.
const MAX_WAIT_MS: i64 = 10;

/// Outcome of one non-blocking pass over the head slot.
enum Attempt<R> {
    /// Nothing consumable: queue empty, slot not yet committed, or locked by
    /// another subscriber. Blocking callers back off.
    Empty,
    /// Lost a race; a retry is worthwhile immediately.
    Busy,
    Done(R),
}

/// A head slot this subscriber holds in `LockedToBeConsumed`.
struct LockedSlot {
    head: i64,
    body_length: usize,
}

/// Consumes messages from a shared-memory queue.
///
/// Any number of subscribers may drain one queue; each message is delivered
/// to exactly one of them. Dropping the subscriber disposes it and cancels
/// its local blocking operations.
pub struct Subscriber {
    region: QueueRegion,
    body: CircularBuffer,
    signal: Signal,
    local_cancel: CancelSource,
}

impl Subscriber {
    /// Creates the queue region and coupling semaphore if absent, opens them
    /// otherwise.
    pub fn new(cfg: &QueueConfig) -> Result<Subscriber, QueueError> {
        let region = QueueRegion::new(cfg)?;
        let body = region.body();
        let signal = Signal::create_or_open(&coupling_signal_name(&cfg.queue_name), 0, false)?;
        Ok(Subscriber {
            region,
            body,
            signal,
            local_cancel: CancelSource::new(),
        })
    }

    /// Dequeues one message into a fresh buffer without blocking.
    ///
    /// `None` means nothing was consumable right now: the queue is empty,
    /// the head slot is not committed yet, or another subscriber won it.
    pub fn try_dequeue(&mut self, cancel: &CancelToken) -> Result<Option<Vec<u8>>, QueueError> {
        self.check_cancelled(cancel)?;
        match self.try_claim()? {
            Attempt::Done(slot) => Ok(Some(self.take_vec(&slot)?)),
            _ => Ok(None),
        }
    }

    /// Like [`try_dequeue`](Self::try_dequeue) but copies into `dest`,
    /// truncating to its size. Returns the bytes copied.
    pub fn try_dequeue_into(
        &mut self,
        dest: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<Option<usize>, QueueError> {
        self.check_cancelled(cancel)?;
        match self.try_claim()? {
            Attempt::Done(slot) => Ok(Some(self.take_into(&slot, dest))),
            _ => Ok(None),
        }
    }

    /// Zero-copy dequeue: hands the head message's span to `reader` without
    /// copying it out of the region.
    ///
    /// `reader` returns `true` to consume the message and `false` to roll
    /// back, leaving it for the next dequeue. Returns `true` only when a
    /// message was consumed.
    pub fn try_dequeue_inplace<F>(&mut self, reader: F, cancel: &CancelToken) -> Result<bool, QueueError>
    where
        F: FnOnce(&WrappedByteSpan<'_>) -> bool,
    {
        self.check_cancelled(cancel)?;
        match self.try_claim()? {
            Attempt::Done(slot) => self.take_inplace(&slot, reader),
            _ => Ok(false),
        }
    }

    /// Blocking [`try_dequeue`](Self::try_dequeue); sleeps on the signal
    /// while the queue stays empty.
    pub fn dequeue(&mut self, cancel: &CancelToken) -> Result<Vec<u8>, QueueError> {
        self.block_on(cancel, |s| match s.try_claim()? {
            Attempt::Done(slot) => Ok(Attempt::Done(s.take_vec(&slot)?)),
            Attempt::Busy => Ok(Attempt::Busy),
            Attempt::Empty => Ok(Attempt::Empty),
        })
    }

    /// Blocking [`try_dequeue_into`](Self::try_dequeue_into).
    pub fn dequeue_into(
        &mut self,
        dest: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<usize, QueueError> {
        self.block_on(cancel, |s| match s.try_claim()? {
            Attempt::Done(slot) => Ok(Attempt::Done(s.take_into(&slot, dest))),
            Attempt::Busy => Ok(Attempt::Busy),
            Attempt::Empty => Ok(Attempt::Empty),
        })
    }

    /// Blocking [`try_dequeue_inplace`](Self::try_dequeue_inplace).
    ///
    /// Returns `false` only when `reader` rolled the message back.
    pub fn dequeue_inplace<F>(&mut self, reader: F, cancel: &CancelToken) -> Result<bool, QueueError>
    where
        F: FnOnce(&WrappedByteSpan<'_>) -> bool,
    {
        let mut reader = Some(reader);
        self.block_on(cancel, move |s| match s.try_claim()? {
            Attempt::Done(slot) => {
                let reader = reader.take().expect("locked slot delivered twice");
                Ok(Attempt::Done(s.take_inplace(&slot, reader)?))
            }
            Attempt::Busy => Ok(Attempt::Busy),
            Attempt::Empty => Ok(Attempt::Empty),
        })
    }

    fn check_cancelled(&self, cancel: &CancelToken) -> Result<(), QueueError> {
        if cancel.is_cancelled() || self.local_cancel.is_cancelled() {
            Err(QueueError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The dequeue core: lock the head slot or report why not.
    ///
    /// Aborted slots are reaped here, invisibly to the caller, and the scan
    /// moves on to the slot behind them.
    fn try_claim(&self) -> Result<Attempt<LockedSlot>, QueueError> {
        let header = self.region.header();
        loop {
            let head = header.head_offset.load(Ordering::Acquire);
            let tail = header.tail_offset.load(Ordering::Acquire);
            if head == tail {
                return Ok(Attempt::Empty);
            }
            let state = unsafe { self.body.atomic_i32(head + STATE_OFFSET) };
            let observed = state.load(Ordering::Acquire);
            if observed != SlotState::ReadyToBeConsumed as i32
                && observed != SlotState::Aborted as i32
            {
                // Not committed by the publisher yet, or locked by a peer.
                return Ok(Attempt::Empty);
            }
            if state
                .compare_exchange(
                    observed,
                    SlotState::LockedToBeConsumed as i32,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                return Ok(Attempt::Busy);
            }
            // A peer may have consumed this very slot and advanced the head
            // between our snapshot and the lock; if so the lock we took is on
            // a recycled slot and must be handed back.
            if header.head_offset.load(Ordering::Acquire) != head {
                state.store(observed, Ordering::Release);
                return Ok(Attempt::Busy);
            }
            let body_length = unsafe {
                self.body
                    .atomic_i32(head + BODY_LENGTH_OFFSET)
                    .load(Ordering::Acquire)
            } as usize;
            if observed == SlotState::Aborted as i32 {
                // The publisher gave up on this slot; discard its garbage.
                self.reap(head, body_length);
                continue;
            }
            return Ok(Attempt::Done(LockedSlot { head, body_length }));
        }
    }

    fn take_vec(&self, slot: &LockedSlot) -> Result<Vec<u8>, QueueError> {
        let span = self
            .body
            .wrapped_span(slot.head + MESSAGE_HEADER_SIZE as i64, slot.body_length)?;
        let message = span.to_vec();
        self.reap(slot.head, slot.body_length);
        Ok(message)
    }

    fn take_into(&self, slot: &LockedSlot, dest: &mut [u8]) -> usize {
        let copied = self.body.read_into(
            slot.head + MESSAGE_HEADER_SIZE as i64,
            slot.body_length,
            dest,
        );
        self.reap(slot.head, slot.body_length);
        copied
    }

    fn take_inplace<F>(&self, slot: &LockedSlot, reader: F) -> Result<bool, QueueError>
    where
        F: FnOnce(&WrappedByteSpan<'_>) -> bool,
    {
        let span = self
            .body
            .wrapped_span(slot.head + MESSAGE_HEADER_SIZE as i64, slot.body_length)?;
        if reader(&span) {
            self.reap(slot.head, slot.body_length);
            Ok(true)
        } else {
            // Roll back: release the lock so the message is consumable again.
            unsafe {
                self.body
                    .atomic_i32(slot.head + STATE_OFFSET)
                    .store(SlotState::ReadyToBeConsumed as i32, Ordering::Release);
            }
            Ok(false)
        }
    }

    /// Zeroes the locked slot and advances the head past it.
    ///
    /// The head CAS cannot legally fail while we hold the slot lock; if it
    /// does, another subscriber advanced the head over a locked slot and the
    /// shared state can no longer be trusted.
    fn reap(&self, head: i64, body_length: usize) {
        let slot = slot_size(body_length);
        self.body.clear(
            head + MESSAGE_HEADER_SIZE as i64,
            slot - MESSAGE_HEADER_SIZE,
        );
        unsafe {
            self.body
                .atomic_i64(head + BODY_LENGTH_OFFSET)
                .store(0, Ordering::Relaxed);
            self.body
                .atomic_i64(head + STATE_OFFSET)
                .store(0, Ordering::Release);
        }
        let header = self.region.header();
        if header
            .head_offset
            .compare_exchange(
                head,
                head + slot as i64,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::error!(
                "head advance failed for a slot we hold locked; shared queue state is corrupt; aborting"
            );
            std::process::abort();
        }
    }

    /// Drives a non-blocking attempt until it produces a result.
    ///
    /// Contention retries immediately; emptiness backs off through a few
    /// cooperative yields and then timed semaphore waits on the growing
    /// ladder. Both cancellation flags are polled every iteration and right
    /// before each wait.
    fn block_on<R, F>(&mut self, cancel: &CancelToken, mut attempt: F) -> Result<R, QueueError>
    where
        F: FnMut(&mut Self) -> Result<Attempt<R>, QueueError>,
    {
        let mut yields = 0u32;
        let mut wait_ms: i64 = 1;
        loop {
            self.check_cancelled(cancel)?;
            match attempt(self)? {
                Attempt::Done(result) => return Ok(result),
                Attempt::Busy => thread::yield_now(),
                Attempt::Empty => {
                    if yields < SPIN_YIELDS {
                        yields += 1;
                        thread::yield_now();
                        continue;
                    }
                    self.check_cancelled(cancel)?;
                    match self.signal.wait(wait_ms) {
                        Ok(_) => {}
                        Err(QueueError::Signal(SignalError::Interrupted)) => {
                            return Err(QueueError::Cancelled)
                        }
                        Err(e) => return Err(e),
                    }
                    wait_ms = (wait_ms * 2).min(MAX_WAIT_MS);
                }
            }
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.local_cancel.cancel();
    }
}
