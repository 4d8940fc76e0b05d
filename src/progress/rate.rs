//! Rolling-window throughput estimate

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Throughput over the most recent `window` of cumulative byte counts
#[derive(Debug, Clone)]
pub struct RateWindow {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl RateWindow {
    /// Empty window spanning `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record the cumulative byte count observed at `at`
    pub fn record(&mut self, at: Instant, cumulative_bytes: u64) {
        self.samples.push_back((at, cumulative_bytes));
        // Keep two points at minimum so a rate can always be derived
        while self.samples.len() > 2 {
            match self.samples.front() {
                Some((oldest, _)) if at.duration_since(*oldest) > self.window => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }
    }

    /// Average bytes per second across the window
    pub fn rate_bps(&self) -> u64 {
        let (Some((first_at, first_bytes)), Some((last_at, last_bytes))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0;
        };
        let elapsed = last_at.duration_since(*first_at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0;
        }
        (last_bytes.saturating_sub(*first_bytes) as f64 / elapsed) as u64
    }

    /// Seconds to move `remaining` bytes at the current rate
    pub fn eta_secs(&self, remaining: u64) -> Option<u64> {
        super::eta_secs(remaining, self.rate_bps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_needs_two_points() {
        let mut window = RateWindow::new(Duration::from_secs(10));
        assert_eq!(window.rate_bps(), 0);
        window.record(Instant::now(), 100);
        assert_eq!(window.rate_bps(), 0);
        assert_eq!(window.eta_secs(100), None);
    }

    #[test]
    fn rate_averages_over_window() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(10));
        window.record(start, 0);
        window.record(start + Duration::from_secs(1), 1000);
        window.record(start + Duration::from_secs(2), 2000);
        assert_eq!(window.rate_bps(), 1000);
        assert_eq!(window.eta_secs(5000), Some(5));
    }

    #[test]
    fn old_samples_fall_out_of_window() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(2));
        window.record(start, 0);
        // A slow start followed by a fast stretch
        window.record(start + Duration::from_secs(10), 100);
        window.record(start + Duration::from_secs(11), 10_100);
        window.record(start + Duration::from_secs(12), 20_100);
        assert_eq!(window.rate_bps(), 10_000);
    }
}
