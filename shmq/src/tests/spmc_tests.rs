use super::test_config;
use crate::cancel::CancelSource;
use crate::core::{QueueRegion, QUEUE_HEADER_SIZE};
use crate::errors::QueueError;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

const MESSAGE_COUNT: usize = 2_000;
const SUBSCRIBER_COUNT: usize = 3;

// Variable-size message carrying its own id: 4 id bytes followed by
// id-derived filler, so any torn or duplicated delivery is detectable.
fn encode(id: u32) -> Vec<u8> {
    let filler_len = (id % 60) as usize;
    let mut bytes = Vec::with_capacity(4 + filler_len);
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes.extend(std::iter::repeat((id % 251) as u8).take(filler_len));
    bytes
}

fn decode(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 4 {
        return None;
    }
    let id = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
    if bytes.len() != 4 + (id % 60) as usize {
        return None;
    }
    let expected = (id % 251) as u8;
    if bytes[4..].iter().all(|&b| b == expected) {
        Some(id)
    } else {
        None
    }
}

#[test]
fn every_message_is_delivered_exactly_once() -> Result<(), QueueError> {
    let (cfg, _dir) = test_config("spmc-once", 4096);
    let mut publisher = Publisher::new(&cfg)?;

    let consumed = Arc::new(AtomicUsize::new(0));
    let cancel_source = Arc::new(CancelSource::new());
    let (tx, rx) = mpsc::channel::<Vec<u8>>();

    let mut consumers = Vec::new();
    for _ in 0..SUBSCRIBER_COUNT {
        let mut subscriber = Subscriber::new(&cfg)?;
        let token = cancel_source.token();
        let cancel_source = Arc::clone(&cancel_source);
        let consumed = Arc::clone(&consumed);
        let tx = tx.clone();
        consumers.push(thread::spawn(move || loop {
            match subscriber.dequeue(&token) {
                Ok(message) => {
                    tx.send(message).expect("result channel closed");
                    if consumed.fetch_add(1, Ordering::SeqCst) + 1 == MESSAGE_COUNT {
                        cancel_source.cancel();
                    }
                }
                Err(QueueError::Cancelled) => break,
                Err(e) => panic!("subscriber failed: {}", e),
            }
        }));
    }
    drop(tx);

    let producer = thread::spawn(move || -> Result<(), QueueError> {
        for id in 0..MESSAGE_COUNT as u32 {
            let message = encode(id);
            while !publisher.try_enqueue(&message)? {
                thread::yield_now();
            }
        }
        Ok(())
    });

    let mut seen: HashMap<u32, usize> = HashMap::new();
    for message in rx {
        let id = decode(&message).unwrap_or_else(|| panic!("corrupt message: {:?}", message));
        *seen.entry(id).or_insert(0) += 1;
    }

    producer.join().expect("producer panicked")?;
    for consumer in consumers {
        consumer.join().expect("consumer panicked");
    }

    assert_eq!(seen.len(), MESSAGE_COUNT);
    for id in 0..MESSAGE_COUNT as u32 {
        assert_eq!(seen.get(&id), Some(&1), "message {} delivery count", id);
    }
    Ok(())
}

#[test]
fn offsets_never_violate_queue_invariants() -> Result<(), QueueError> {
    let (cfg, _dir) = test_config("spmc-invariants", 1024);
    let body_capacity = (cfg.bytes_capacity - QUEUE_HEADER_SIZE) as i64;
    let mut publisher = Publisher::new(&cfg)?;
    let mut subscriber = Subscriber::new(&cfg)?;

    let stop = Arc::new(AtomicBool::new(false));
    let observer_stop = Arc::clone(&stop);
    let observer_region = QueueRegion::new(&cfg)?;
    let observer = thread::spawn(move || {
        let header = observer_region.header();
        let mut samples = 0usize;
        while !observer_stop.load(Ordering::Relaxed) {
            let head = header.head_offset.load(Ordering::Acquire);
            let tail = header.tail_offset.load(Ordering::Acquire);
            assert!(head <= tail, "head {} ran past tail {}", head, tail);
            assert!(
                tail - head <= body_capacity,
                "window {} exceeds body capacity {}",
                tail - head,
                body_capacity
            );
            samples += 1;
        }
        samples
    });

    let cancel_source = CancelSource::new();
    let token = cancel_source.token();
    let consumer = thread::spawn(move || -> Result<usize, QueueError> {
        let mut received = 0usize;
        loop {
            match subscriber.dequeue(&token) {
                Ok(message) => {
                    assert!(decode(&message).is_some());
                    received += 1;
                }
                Err(QueueError::Cancelled) => return Ok(received),
                Err(e) => return Err(e),
            }
        }
    });

    for id in 0..MESSAGE_COUNT as u32 {
        let message = encode(id);
        while !publisher.try_enqueue(&message)? {
            thread::yield_now();
        }
    }
    // Let the consumer drain before tearing everything down.
    let drain_region = QueueRegion::new(&cfg)?;
    loop {
        let head = drain_region.header().head_offset.load(Ordering::Acquire);
        let tail = drain_region.header().tail_offset.load(Ordering::Acquire);
        if head == tail {
            break;
        }
        thread::yield_now();
    }
    cancel_source.cancel();
    let received = consumer.join().expect("consumer panicked")?;
    assert_eq!(received, MESSAGE_COUNT);

    stop.store(true, Ordering::Relaxed);
    let samples = observer.join().expect("observer panicked");
    assert!(samples > 0);
    Ok(())
}
