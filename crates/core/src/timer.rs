//! Frame timing and periodic frame-rate reporting.

use std::time::{Duration, Instant};

/// Frame statistics over one reporting interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Frames completed in the interval.
    pub frames: u64,
    /// Average frames per second over the interval.
    pub fps: f64,
    /// Mean time per frame in milliseconds.
    pub mean_frame_ms: f64,
}

/// Counts frames and produces [`FrameStats`] once per interval.
#[derive(Debug)]
pub struct FrameTimer {
    interval: Duration,
    last_frame: Instant,
    window_start: Instant,
    window_frames: u64,
    total_frames: u64,
}

impl FrameTimer {
    /// Create a timer that reports every `interval`, starting from now.
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_frame: now,
            window_start: now,
            window_frames: 0,
            total_frames: 0,
        }
    }

    /// Records one finished frame.
    ///
    /// Returns the statistics for the interval when it has elapsed, and starts
    /// a new one.
    pub fn frame(&mut self) -> Option<FrameStats> {
        self.frame_at(Instant::now())
    }

    fn frame_at(&mut self, now: Instant) -> Option<FrameStats> {
        self.window_frames += 1;
        self.total_frames += 1;
        self.last_frame = now;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        let stats = FrameStats {
            frames: self.window_frames,
            fps: self.window_frames as f64 / secs,
            mean_frame_ms: secs * 1000.0 / self.window_frames as f64,
        };
        self.window_start = now;
        self.window_frames = 0;
        Some(stats)
    }

    /// Time since the previous frame was recorded, or since creation.
    ///
    /// This is the step used to advance animation before drawing.
    pub fn since_last_frame(&self) -> Duration {
        self.since_last_frame_at(Instant::now())
    }

    fn since_last_frame_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_frame)
    }

    /// Get the number of frames recorded since the timer was created.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_report_before_interval() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(Duration::from_secs(1), start);
        for i in 1..10 {
            assert!(timer
                .frame_at(start + Duration::from_millis(i * 10))
                .is_none());
        }
        assert_eq!(timer.total_frames(), 9);
    }

    #[test]
    fn test_report_after_interval() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(Duration::from_secs(1), start);
        for i in 1..60 {
            assert!(timer
                .frame_at(start + Duration::from_millis(i * 10))
                .is_none());
        }

        let stats = timer.frame_at(start + Duration::from_secs(2)).unwrap();
        assert_eq!(stats.frames, 60);
        assert!((stats.fps - 30.0).abs() < 1e-9);
        assert!((stats.mean_frame_ms - 2000.0 / 60.0).abs() < 1e-9);

        // A new interval starts at the report
        assert!(timer
            .frame_at(start + Duration::from_millis(2500))
            .is_none());
        assert_eq!(timer.total_frames(), 61);
    }

    #[test]
    fn test_since_last_frame_tracks_the_previous_frame() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(Duration::from_secs(1), start);
        assert_eq!(
            timer.since_last_frame_at(start + Duration::from_millis(16)),
            Duration::from_millis(16)
        );

        timer.frame_at(start + Duration::from_millis(20));
        assert_eq!(
            timer.since_last_frame_at(start + Duration::from_millis(50)),
            Duration::from_millis(30)
        );
        // A clock reading before the last frame yields zero
        assert_eq!(timer.since_last_frame_at(start), Duration::ZERO);
    }
}
