//! Stage timing

use std::time::{Duration, Instant};
use tracing::info;

/// Wall-clock timer that logs when stopped
#[derive(Debug)]
pub struct Timer {
    name: String,
    start: Instant,
    checkpoints: Vec<(String, Duration)>,
}

impl Timer {
    /// Create and start a new timer
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
            checkpoints: Vec::new(),
        }
    }

    /// Record elapsed time under `name`
    pub fn checkpoint(&mut self, name: impl Into<String>) {
        self.checkpoints.push((name.into(), self.start.elapsed()));
    }

    /// Seconds spent between consecutive checkpoints, by checkpoint name
    pub fn phase_secs(&self) -> Vec<(String, f64)> {
        let mut prev = Duration::ZERO;
        self.checkpoints
            .iter()
            .map(|(name, at)| {
                let delta = (*at - prev).as_secs_f64();
                prev = *at;
                (name.clone(), delta)
            })
            .collect()
    }

    /// Stop and log the timer
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        info!(stage = %self.name, secs = elapsed.as_secs_f64(), "stage completed");
        elapsed
    }

    /// Stop and log every checkpoint with its delta
    pub fn stop_with_report(self) -> Duration {
        let elapsed = self.start.elapsed();

        let mut prev = Duration::ZERO;
        for (name, at) in &self.checkpoints {
            info!(
                stage = %self.name,
                checkpoint = %name,
                at_secs = at.as_secs_f64(),
                delta_secs = (*at - prev).as_secs_f64(),
                "checkpoint"
            );
            prev = *at;
        }
        info!(stage = %self.name, secs = elapsed.as_secs_f64(), "stage completed");

        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoints_are_monotonic() {
        let mut timer = Timer::start("split");
        timer.checkpoint("a");
        timer.checkpoint("b");
        let cps = timer.checkpoints.clone();
        assert_eq!(cps.len(), 2);
        assert!(cps[0].1 <= cps[1].1);
        let phases = timer.phase_secs();
        assert_eq!(phases[0].0, "a");
        assert!((phases[0].1 + phases[1].1 - cps[1].1.as_secs_f64()).abs() < 1e-9);
        assert!(timer.stop_with_report() >= cps[1].1);
    }
}
