use super::test_config;
use crate::cancel::CancelToken;
use crate::core::{QueueRegion, MIN_BYTES_CAPACITY};
use crate::errors::QueueError;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;

use std::sync::atomic::Ordering;

#[test]
fn small_queue_roundtrips_and_truncates() -> Result<(), QueueError> {
    let (cfg, _dir) = test_config("scenario-small", 40);
    let mut publisher = Publisher::new(&cfg)?;
    let mut subscriber = Subscriber::new(&cfg)?;

    for _ in 0..3 {
        assert!(publisher.try_enqueue(&[100, 110, 120])?);
        assert_eq!(
            subscriber.dequeue(&CancelToken::none())?,
            vec![100, 110, 120]
        );
    }

    // A destination smaller than the message truncates it; the slot is
    // consumed in full regardless.
    assert!(publisher.try_enqueue(&[100, 110, 120])?);
    let mut dest = [0u8; 2];
    let copied = subscriber.dequeue_into(&mut dest, &CancelToken::none())?;
    assert_eq!(copied, 2);
    assert_eq!(dest, [100, 110]);
    assert_eq!(subscriber.try_dequeue(&CancelToken::none())?, None);
    Ok(())
}

#[test]
fn exactly_full_queue_rejects_any_further_message() -> Result<(), QueueError> {
    let (cfg, _dir) = test_config("scenario-full", 40);
    let mut publisher = Publisher::new(&cfg)?;
    // One 3-byte message occupies all 24 body bytes.
    assert!(publisher.try_enqueue(&[100, 110, 120])?);
    assert!(!publisher.try_enqueue(&[100])?);
    assert!(!publisher.try_enqueue(&[])?);
    Ok(())
}

#[test]
fn messages_survive_the_wrap_boundary() -> Result<(), QueueError> {
    let (cfg, _dir) = test_config("scenario-wrap", 128);
    let mut publisher = Publisher::new(&cfg)?;
    let mut subscriber = Subscriber::new(&cfg)?;

    // 50-byte bodies in a 112-byte ring: the second and third slots cross
    // the wrap point.
    let message: Vec<u8> = (0..50u8).map(|b| b.wrapping_mul(3)).collect();
    for _ in 0..3 {
        assert!(publisher.try_enqueue(&message)?);
        assert_eq!(subscriber.dequeue(&CancelToken::none())?, message);
    }
    Ok(())
}

#[test]
fn wrap_roundtrip_is_bit_exact_over_many_iterations() -> Result<(), QueueError> {
    let (cfg, _dir) = test_config("scenario-churn", 1024);
    let mut publisher = Publisher::new(&cfg)?;
    let mut subscriber = Subscriber::new(&cfg)?;

    // 66-byte bodies make an 88-byte slot, which does not divide the
    // 1008-byte ring; the wrap split lands somewhere new on every lap.
    let mut message = [0u8; 66];
    for iteration in 0..20_000u32 {
        for (i, byte) in message.iter_mut().enumerate() {
            *byte = (iteration as usize + i) as u8;
        }
        assert!(publisher.try_enqueue(&message)?);
        let received = subscriber.dequeue(&CancelToken::none())?;
        assert_eq!(received, message, "iteration {}", iteration);
    }
    Ok(())
}

#[test]
fn reserve_rejected_on_capacity_without_calling_writer() -> Result<(), QueueError> {
    let (cfg, _dir) = test_config("scenario-reserve", 40);
    let mut publisher = Publisher::new(&cfg)?;
    assert!(publisher.try_enqueue_reserve(
        3,
        |span, _cancel| {
            assert!(span.try_write(&[100, 110, 120]));
            3
        },
        &CancelToken::none()
    )?);
    let committed = publisher.try_enqueue_reserve(
        1,
        |_span, _cancel| panic!("no room was reserved, the writer must not run"),
        &CancelToken::none(),
    )?;
    assert!(!committed);
    Ok(())
}

#[test]
fn messages_outlive_their_publisher() -> Result<(), QueueError> {
    let (cfg, _dir) = test_config("scenario-dispose", 1024);
    {
        let mut publisher = Publisher::new(&cfg)?;
        assert!(publisher.try_enqueue(&[9, 9, 9])?);
    }

    let mut subscriber = Subscriber::new(&cfg)?;
    assert_eq!(
        subscriber.try_dequeue(&CancelToken::none())?,
        Some(vec![9, 9, 9])
    );
    drop(subscriber);

    // A fresh subscriber on the same region sees no ghost messages.
    let mut late = Subscriber::new(&cfg)?;
    assert_eq!(late.try_dequeue(&CancelToken::none())?, None);
    Ok(())
}

#[test]
fn smallest_legal_region_accepts_no_message() -> Result<(), QueueError> {
    let (cfg, _dir) = test_config("scenario-tiny", MIN_BYTES_CAPACITY);
    let mut publisher = Publisher::new(&cfg)?;
    assert!(!publisher.try_enqueue(&[1])?);
    assert!(!publisher.try_enqueue(&[1, 2, 3, 4, 5, 6, 7, 8])?);
    Ok(())
}

#[test]
fn interleaved_fill_drain_keeps_offsets_consistent() -> Result<(), QueueError> {
    let (cfg, _dir) = test_config("scenario-offsets", 64);
    let mut publisher = Publisher::new(&cfg)?;
    let mut subscriber = Subscriber::new(&cfg)?;

    // 48 body bytes fit exactly two 3-byte slots.
    assert!(publisher.try_enqueue(&[1, 2, 3])?);
    assert!(publisher.try_enqueue(&[4, 5, 6])?);
    assert!(!publisher.try_enqueue(&[7])?);

    assert_eq!(subscriber.try_dequeue(&CancelToken::none())?, Some(vec![1, 2, 3]));
    assert!(publisher.try_enqueue(&[7, 8])?);
    assert_eq!(subscriber.try_dequeue(&CancelToken::none())?, Some(vec![4, 5, 6]));
    assert_eq!(subscriber.try_dequeue(&CancelToken::none())?, Some(vec![7, 8]));
    assert_eq!(subscriber.try_dequeue(&CancelToken::none())?, None);

    let region = QueueRegion::new(&cfg)?;
    let head = region.header().head_offset.load(Ordering::Acquire);
    let tail = region.header().tail_offset.load(Ordering::Acquire);
    assert_eq!(head, tail);
    // Offsets are absolute counters; three 24-byte slots went through.
    assert_eq!(tail, 72);
    Ok(())
}
