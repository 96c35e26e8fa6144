//! Frame pacing: a delta timer and a rolling frame-time summary.

use std::mem;
use std::time::{Duration, Instant};

/// Measures the time between successive [`tick`](Self::tick)s.
#[derive(Debug)]
pub struct Timer {
    origin: Instant,
    previous: Instant,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            origin: now,
            previous: now,
        }
    }

    /// Time since construction or the last [`reset`](Self::reset).
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Time since the previous tick.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        now.duration_since(mem::replace(&mut self.previous, now))
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling frame-time statistics, reported once per window.
///
/// Frame times are accumulated with [`record`](Self::record); once the
/// accumulated time reaches the reporting window, `record` returns a
/// summary and starts a new window.
#[derive(Debug)]
pub struct FrameStats {
    window: Duration,
    accumulated: Duration,
    frames: u32,
    worst: Duration,
}

/// Summary of one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Frames recorded in the window.
    pub frames: u32,
    /// Mean frame time in milliseconds.
    pub average_ms: f64,
    /// Longest frame in milliseconds.
    pub worst_ms: f64,
}

impl FrameReport {
    /// Frames per second implied by the mean frame time.
    pub fn fps(&self) -> f64 {
        if self.average_ms > 0.0 {
            1000.0 / self.average_ms
        } else {
            0.0
        }
    }
}

impl FrameStats {
    /// Creates statistics that report every `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accumulated: Duration::ZERO,
            frames: 0,
            worst: Duration::ZERO,
        }
    }

    /// Records one frame time; returns a report when the window is full.
    pub fn record(&mut self, frame_time: Duration) -> Option<FrameReport> {
        self.accumulated += frame_time;
        self.frames += 1;
        self.worst = self.worst.max(frame_time);

        if self.accumulated < self.window {
            return None;
        }

        let report = FrameReport {
            frames: self.frames,
            average_ms: self.accumulated.as_secs_f64() * 1000.0 / f64::from(self.frames),
            worst_ms: self.worst.as_secs_f64() * 1000.0,
        };

        self.accumulated = Duration::ZERO;
        self.frames = 0;
        self.worst = Duration::ZERO;

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_arrives_once_window_is_filled() {
        let mut stats = FrameStats::new(Duration::from_millis(100));

        assert!(stats.record(Duration::from_millis(40)).is_none());
        assert!(stats.record(Duration::from_millis(40)).is_none());

        let report = stats
            .record(Duration::from_millis(40))
            .expect("window should be full");
        assert_eq!(report.frames, 3);
        assert!((report.average_ms - 40.0).abs() < 1e-6);
        assert!((report.worst_ms - 40.0).abs() < 1e-6);
        assert!((report.fps() - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_each_window_starts_from_zero() {
        let mut stats = FrameStats::new(Duration::from_millis(10));

        let first = stats.record(Duration::from_millis(20)).expect("report");
        assert_eq!(first.frames, 1);

        assert!(stats.record(Duration::from_millis(5)).is_none());
        let second = stats.record(Duration::from_millis(5)).expect("report");
        assert_eq!(second.frames, 2);
        assert!((second.worst_ms - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_ticks_never_exceed_total_elapsed() {
        let mut timer = Timer::new();
        let first = timer.tick();
        let second = timer.tick();
        assert!(first >= Duration::ZERO);
        assert!(second >= Duration::ZERO);
        assert!(timer.elapsed() >= first);
    }
}
