//! Time management utilities

use std::time::Instant;

/// Frame timer driving animation time and frame statistics
///
/// `elapsed` is the animation clock fed to orbital motion, `delta_time` the
/// step fed to incremental self-spin integration.
pub struct FrameTimer {
    start: Instant,
    last_frame: Instant,
    delta_time: f32,
    frame_count: u64,

    window_start: Instant,
    window_frames: u32,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimer {
    /// Create a new timer starting now
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            delta_time: 0.0,
            frame_count: 0,
            window_start: now,
            window_frames: 0,
        }
    }

    /// Update the timer (should be called once per frame, after the frame's work)
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;
        self.window_frames += 1;
    }

    /// Time between the last two ticks in seconds
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Seconds since the timer was created
    pub fn elapsed(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Number of ticks so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Average frame time in milliseconds over the last reporting window,
    /// returned once at least `period_secs` have passed. Starts a new window.
    pub fn take_report(&mut self, period_secs: f32) -> Option<f32> {
        let window = self.window_start.elapsed().as_secs_f32();
        if window < period_secs || self.window_frames == 0 {
            return None;
        }
        let average_ms = window * 1.0e3 / self.window_frames as f32;
        self.window_start = Instant::now();
        self.window_frames = 0;
        Some(average_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_frames() {
        let mut timer = FrameTimer::new();
        timer.tick();
        timer.tick();
        assert_eq!(timer.frame_count(), 2);
        assert!(timer.delta_time() >= 0.0);
    }

    #[test]
    fn test_report_waits_for_period() {
        let mut timer = FrameTimer::new();
        timer.tick();
        assert!(timer.take_report(3600.0).is_none());
        assert!(timer.take_report(0.0).is_some());
        // Window was reset by the successful report
        assert!(timer.take_report(0.0).is_none());
    }
}
