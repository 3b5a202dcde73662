use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative stop flag shared between the signal handler and the workers.
///
/// Clones share the same flag; workers poll [`cancelled`](Self::cancelled)
/// between frames and wind down cleanly.
#[derive(Debug, Clone, Default)]
pub struct SignalOfStop {
    closing: Arc<AtomicBool>,
}

impl SignalOfStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.closing.store(true, Ordering::Relaxed);
    }

    pub fn cancelled(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let sos = SignalOfStop::new();
        let worker = sos.clone();
        assert!(!worker.cancelled());

        let handle = std::thread::spawn(move || sos.cancel());
        handle.join().unwrap();
        assert!(worker.cancelled());
    }
}
