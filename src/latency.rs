// Request latency tracking
//
// Numan Thabit 2025 Nov

use std::time::Instant;

/// Monotonic start point of a request.
#[derive(Debug)]
pub struct LatencyTimer {
    started: Instant,
}

impl LatencyTimer {
    pub fn begin() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Elapsed seconds since `begin`. Consumes the timer.
    pub fn end(self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}
