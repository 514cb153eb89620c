//! Time utilities for the match tick cadence

use std::time::Duration;

/// Host game loop rate
pub const SERVER_TPS: u32 = 20;

/// Length of a single host tick
pub const TICK_DURATION: Duration = Duration::from_millis(1000 / SERVER_TPS as u64);

/// How often a scheduled transition refreshes its progress bar
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Convert a tick count into wall-clock time
pub fn ticks(count: u32) -> Duration {
    TICK_DURATION * count
}

/// Fraction of a countdown that has elapsed, clamped to `0.0..=1.0`
pub fn progress(elapsed: Duration, total: Duration) -> f32 {
    if total.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f32() / total.as_secs_f32()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_fifty_millis() {
        assert_eq!(TICK_DURATION, Duration::from_millis(50));
        assert_eq!(ticks(20), Duration::from_secs(1));
    }

    #[test]
    fn progress_clamps() {
        let total = Duration::from_secs(10);
        assert_eq!(progress(Duration::ZERO, total), 0.0);
        assert!((progress(Duration::from_secs(5), total) - 0.5).abs() < f32::EPSILON);
        assert_eq!(progress(Duration::from_secs(30), total), 1.0);
        assert_eq!(progress(Duration::from_secs(1), Duration::ZERO), 1.0);
    }
}
