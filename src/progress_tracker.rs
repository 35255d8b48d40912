use chrono::{DateTime, Local};
use std::time::{Duration, SystemTime};

// --- Timer ---
#[derive(Debug, Default)]
pub struct Timer {
    pub started_at: Option<SystemTime>,
    pub stopped_at: Option<SystemTime>,
}

impl Timer {
    pub fn new() -> Self {
        Timer {
            started_at: None,
            stopped_at: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(SystemTime::now());
        self.stopped_at = None;
    }

    pub fn stop(&mut self) {
        if self.started() {
            self.stopped_at = Some(SystemTime::now());
        }
    }

    pub fn started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn stopped(&self) -> bool {
        self.stopped_at.is_some()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        match self.started_at {
            Some(started) => {
                let end = self.stopped_at.unwrap_or_else(SystemTime::now);
                end.duration_since(started)
                    .map(|duration| duration.as_secs_f64())
                    .unwrap_or(0.0)
            }
            None => 0.0,
        }
    }

    pub fn divide_seconds(seconds: u64) -> (u64, u64, u64) {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        let secs = seconds % 60;
        (hours, minutes, secs)
    }
}

// --- SmoothedAverage ---
/// Exponentially smoothed rate of progress, so one slow read near the start
/// of a title does not make the ETA jump around.
#[derive(Debug)]
pub struct SmoothedAverage {
    samples: [f64; 2],
    projection: f64,
    strength: f64,
}

impl SmoothedAverage {
    pub const DEFAULT_STRENGTH: f64 = 0.1;

    pub fn new(strength: Option<f64>, at: Option<f64>) -> Self {
        let mut projector = SmoothedAverage {
            samples: [0.0, 0.0],
            projection: 0.0,
            strength: strength.unwrap_or(Self::DEFAULT_STRENGTH),
        };
        projector.start(at);
        projector
    }

    pub fn start(&mut self, at: Option<f64>) {
        self.projection = 0.0;
        let initial = at.unwrap_or(self.samples[1]);
        self.samples = [initial, initial];
    }

    pub fn set_progress(&mut self, new_progress: f64) {
        self.samples[1] = new_progress;
        let absolute = self.samples[1] - self.samples[0];
        self.projection = absolute * (1.0 - self.strength) + self.projection * self.strength;
    }

    pub fn projection(&self) -> f64 {
        self.projection
    }

    pub fn none(&self) -> bool {
        self.projection == 0.0
    }
}

// --- ProgressTracker ---
/// Tracks one job's completion fraction and projects the time remaining.
#[derive(Debug)]
pub struct ProgressTracker {
    pub timer: Timer,
    projector: SmoothedAverage,
    fraction: f64,
    finished: bool,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub const NO_TIME_ELAPSED_TEXT: &'static str = "--:--:--";
    const OOB_LIMIT_IN_HOURS: u64 = 99;
    const OOB_UNKNOWN_TIME_TEXT: &'static str = "??:??:??";
    const WALL_CLOCK_FORMAT: &'static str = "%H:%M:%S";

    pub fn new() -> Self {
        let mut timer = Timer::new();
        timer.start();
        ProgressTracker {
            timer,
            projector: SmoothedAverage::new(None, Some(0.0)),
            fraction: 0.0,
            finished: false,
        }
    }

    pub fn set_fraction(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.fraction = fraction;
        self.projector.set_progress(fraction);
        if fraction >= 1.0 {
            self.finish();
        }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn percentage(&self) -> u32 {
        (self.fraction * 100.0).floor() as u32
    }

    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.fraction = 1.0;
        self.timer.stop();
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn estimated_seconds_remaining(&self) -> Option<u64> {
        if self.finished || self.projector.none() || self.fraction <= 0.0 || !self.timer.started() {
            return None;
        }
        let elapsed = self.timer.elapsed_seconds();
        if elapsed <= 0.0 {
            return None;
        }
        let remaining = elapsed * ((1.0 / self.fraction) - 1.0);
        Some(remaining.round() as u64)
    }

    /// `HH:MM:SS` until done, `--:--:--` while there is nothing to project from.
    pub fn estimated(&self) -> String {
        match self.estimated_seconds_remaining() {
            Some(secs) => {
                let (hours, minutes, seconds) = Timer::divide_seconds(secs);
                if hours > Self::OOB_LIMIT_IN_HOURS {
                    Self::OOB_UNKNOWN_TIME_TEXT.to_string()
                } else {
                    format!("{hours:02}:{minutes:02}:{seconds:02}")
                }
            }
            None => Self::NO_TIME_ELAPSED_TEXT.to_string(),
        }
    }

    pub fn elapsed(&self) -> String {
        if !self.timer.started() {
            return Self::NO_TIME_ELAPSED_TEXT.to_string();
        }
        let (hours, minutes, seconds) =
            Timer::divide_seconds(self.timer.elapsed_seconds().floor() as u64);
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }

    /// Local time the job is expected to finish, or did finish.
    pub fn estimated_wall_clock(&self) -> String {
        if self.finished {
            if let Some(stopped) = self.timer.stopped_at {
                let datetime: DateTime<Local> = stopped.into();
                return datetime.format(Self::WALL_CLOCK_FORMAT).to_string();
            }
        }
        match self.estimated_seconds_remaining() {
            Some(secs) => {
                let datetime: DateTime<Local> = (SystemTime::now() + Duration::from_secs(secs)).into();
                datetime.format(Self::WALL_CLOCK_FORMAT).to_string()
            }
            None => Self::NO_TIME_ELAPSED_TEXT.to_string(),
        }
    }

    /// `"{prefix}: 42% (ETA 00:03:10)"`, then
    /// `"{prefix}: 100% (Time 00:05:00, finished at 21:14:03)"` once done.
    pub fn label(&self, prefix: &str) -> String {
        if self.finished {
            return format!(
                "{prefix}: 100% (Time {}, finished at {})",
                self.elapsed(),
                self.estimated_wall_clock()
            );
        }
        format!("{prefix}: {}% (ETA {})", self.percentage(), self.estimated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backdated(seconds: u64) -> ProgressTracker {
        let mut tracker = ProgressTracker::new();
        tracker.timer.started_at = Some(SystemTime::now() - Duration::from_secs(seconds));
        tracker
    }

    #[test]
    fn test_no_estimate_before_progress() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.estimated(), ProgressTracker::NO_TIME_ELAPSED_TEXT);
        assert_eq!(tracker.label("Title 1"), "Title 1: 0% (ETA --:--:--)");
    }

    #[test]
    fn test_half_way_projects_elapsed_time_again() {
        let mut tracker = backdated(100);
        tracker.set_fraction(0.5);
        let remaining = tracker.estimated_seconds_remaining().unwrap();
        assert!((99..=101).contains(&remaining), "{remaining}");
        assert_eq!(tracker.percentage(), 50);
        assert!(tracker.label("Title 2 - Angle 1/2").starts_with("Title 2 - Angle 1/2: 50% (ETA 00:01:"));
    }

    #[test]
    fn test_fraction_is_clamped_and_finishes() {
        let mut tracker = ProgressTracker::new();
        tracker.set_fraction(-1.0);
        assert_eq!(tracker.fraction(), 0.0);
        tracker.set_fraction(3.0);
        assert!(tracker.finished());
        assert_eq!(tracker.fraction(), 1.0);
        assert!(tracker.timer.stopped());
        assert!(tracker.label("Title 1").starts_with("Title 1: 100% (Time "));
    }

    #[test]
    fn test_finished_label_shows_wall_clock_time() {
        let mut tracker = backdated(5);
        tracker.finish();
        let wall_clock = tracker.estimated_wall_clock();
        assert_eq!(wall_clock.len(), 8);
        assert_ne!(wall_clock, ProgressTracker::NO_TIME_ELAPSED_TEXT);
        assert_eq!(
            tracker.label("Title 1"),
            format!("Title 1: 100% (Time 00:00:05, finished at {wall_clock})")
        );
    }

    #[test]
    fn test_divide_seconds() {
        assert_eq!(Timer::divide_seconds(3725), (1, 2, 5));
    }

    #[test]
    fn test_smoothed_average_tracks_movement() {
        let mut projector = SmoothedAverage::new(None, Some(0.0));
        assert!(projector.none());
        projector.set_progress(0.5);
        assert!((projector.projection() - 0.45).abs() < 1e-9);
    }
}
