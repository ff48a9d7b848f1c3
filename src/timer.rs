use std::time::{Duration, Instant};

/// Accumulating stopwatch.
#[derive(Debug, Default, Clone)]
pub struct Timer {
    started: Option<Instant>,
    elapsed: Duration,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        assert!(self.started.is_none(), "Timer is already running");
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        let Some(started) = self.started.take() else {
            panic!("Timer is not running");
        };
        self.elapsed += started.elapsed();
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Total measured time in seconds, including a running lap.
    pub fn time(&self) -> f64 {
        let running = self.started.map_or(Duration::ZERO, |s| s.elapsed());
        (self.elapsed + running).as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates() {
        let mut timer = Timer::new();
        assert_eq!(timer.time(), 0.0);
        timer.start();
        assert!(timer.is_running());
        timer.stop();
        let first = timer.time();
        timer.start();
        timer.stop();
        assert!(timer.time() >= first);
    }

    #[test]
    #[should_panic(expected = "not running")]
    fn test_stop_idle() {
        Timer::new().stop();
    }
}
