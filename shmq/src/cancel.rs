use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owner side of a cancellation flag.
///
/// Blocking queue operations poll the derived tokens once per outer loop
/// iteration and immediately before every timed wait, so cancellation is
/// observed within the wait granularity.
#[derive(Debug, Default)]
pub struct CancelSource {
    flag: Arc<AtomicBool>,
}

impl CancelSource {
    pub fn new() -> CancelSource {
        CancelSource::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            flag: Some(Arc::clone(&self.flag)),
        }
    }
}

/// Clonable observer handle derived from a [`CancelSource`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    /// A token that can never be cancelled.
    pub fn none() -> CancelToken {
        CancelToken { flag: None }
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.flag {
            Some(flag) => flag.load(Ordering::Acquire),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_observes_source() {
        let source = CancelSource::new();
        let token = source.token();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        source.cancel();
        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn none_token_never_cancels() {
        assert!(!CancelToken::none().is_cancelled());
    }
}
