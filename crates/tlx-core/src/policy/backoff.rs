//! Exponential backoff schedule.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_BASE: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX: Duration = Duration::from_secs(600);

/// `base * 2^(level-1)`, capped at `max`, optionally jittered by ±10%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSchedule {
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        BackoffSchedule {
            base: DEFAULT_BASE,
            max: DEFAULT_MAX,
            jitter: true,
        }
    }
}

impl BackoffSchedule {
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay for the given backoff level (1-based; 0 is treated as 1).
    pub fn delay(&self, level: u32) -> Duration {
        let exp = level.max(1).saturating_sub(1).min(31);
        let raw = self
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max);
        if !self.jitter {
            return raw;
        }
        let factor = rand::rng().random_range(0.9..=1.1);
        raw.mul_f64(factor).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let s = BackoffSchedule::default().without_jitter();
        assert_eq!(s.delay(0), Duration::from_secs(5));
        assert_eq!(s.delay(1), Duration::from_secs(5));
        assert_eq!(s.delay(2), Duration::from_secs(10));
        assert_eq!(s.delay(4), Duration::from_secs(40));
        assert_eq!(s.delay(8), Duration::from_secs(600));
        assert_eq!(s.delay(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let s = BackoffSchedule::default();
        for _ in 0..200 {
            let d = s.delay(3);
            assert!(d >= Duration::from_secs(18), "{d:?}");
            assert!(d <= Duration::from_secs(22), "{d:?}");
        }
    }
}
