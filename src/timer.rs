//! Frame rate and throughput accounting.

use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Counts frames and produces a [`FrameReport`] about once per second.
#[derive(Debug)]
pub struct FrameTimer {
    last: Instant,
    frames: u32,
    total_samples: u64,
}

impl FrameTimer {
    /// `total_samples` is the per-frame sample count used for the throughput figure.
    pub fn new(now: Instant, total_samples: u64) -> Self {
        Self {
            last: now,
            frames: 0,
            total_samples,
        }
    }

    /// Counts one frame. Returns a report and starts a new interval once at least a second has
    /// passed since the last one.
    pub fn tick(&mut self, now: Instant) -> Option<FrameReport> {
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.last);
        if elapsed < REPORT_INTERVAL {
            return None;
        }

        let frames = self.frames;
        let report = FrameReport {
            frames,
            avg_ms: elapsed.as_secs_f64() * 1000.0 / f64::from(frames),
            mps: f64::from(frames) * self.total_samples as f64 / 1e6,
        };
        self.last = now;
        self.frames = 0;
        Some(report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Frames completed in the interval.
    pub frames: u32,
    /// Average frame time in milliseconds.
    pub avg_ms: f64,
    /// Million samples processed in the interval.
    pub mps: f64,
}

impl FrameReport {
    /// Formats the window title for this report.
    pub fn title(&self, name: &str, gpu_enabled: bool) -> String {
        let mut title = format!("{name} - {:4} FPS ({:.3} ms)", self.frames, self.avg_ms);
        if gpu_enabled {
            title += &format!(" {:.3} MBps", self.mps);
        }
        title
    }
}
