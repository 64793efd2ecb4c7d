use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot stop flag raised by the scheduler once the shape has finished.
///
/// Advisory only: it tells the harness to stop starting work, it does not cancel anything.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
