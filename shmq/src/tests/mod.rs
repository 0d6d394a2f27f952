//! Cross-module queue tests: end-to-end scenarios and concurrency properties
//! that exercise publisher, subscriber and region together.

mod scenario_tests;
mod spmc_tests;

use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::{tempdir, TempDir};

use crate::core::QueueConfig;

static TEST_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn test_config(prefix: &str, bytes_capacity: usize) -> (QueueConfig, TempDir) {
    let temp_dir = tempdir().expect("tempdir");
    let cfg = QueueConfig::builder()
        .queue_name(format!(
            "{}-{}-{}",
            prefix,
            std::process::id(),
            TEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
        ))
        .data_dir(temp_dir.path().to_str().expect("utf-8 path"))
        .bytes_capacity(bytes_capacity)
        .build()
        .expect("config");
    (cfg, temp_dir)
}
