// clock.rs — Fixed-step simulation clock
//
// Time is derived from an integer step counter (`t = step * dt`) so that it
// never accumulates rounding drift across long runs.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClockError {
    #[error("dt must be positive and finite, got {0}")]
    InvalidDt(f64),

    #[error("duration must be non-negative and finite, got {0}")]
    InvalidDuration(f64),
}

/// Relative slack when converting a duration to a step count, so that
/// `3 * dt` counts as three steps despite rounding in the product.
const STEP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct Clock {
    dt: f64,
    step: u64,
}

impl Clock {
    pub fn new(dt: f64) -> Result<Self, ClockError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(ClockError::InvalidDt(dt));
        }
        Ok(Clock { dt, step: 0 })
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Current simulated time in seconds.
    pub fn t(&self) -> f64 {
        self.step as f64 * self.dt
    }

    pub fn tick(&mut self) {
        self.step += 1;
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Number of ticks needed for elapsed time to reach `duration`.
    pub fn steps_for(&self, duration: f64) -> Result<u64, ClockError> {
        if !(duration.is_finite() && duration >= 0.0) {
            return Err(ClockError::InvalidDuration(duration));
        }
        let exact = duration / self.dt;
        let nearest = exact.round();
        let steps = if (exact - nearest).abs() <= STEP_EPSILON * nearest.max(1.0) {
            nearest
        } else {
            exact.ceil()
        };
        Ok(steps as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_dt() {
        assert_eq!(Clock::new(0.0), Err(ClockError::InvalidDt(0.0)));
        assert!(Clock::new(-1e-4).is_err());
        assert!(Clock::new(f64::NAN).is_err());
        assert!(Clock::new(f64::INFINITY).is_err());
    }

    #[test]
    fn time_advances_by_dt() {
        let mut clock = Clock::new(0.5).unwrap();
        assert_eq!(clock.t(), 0.0);
        clock.tick();
        clock.tick();
        assert_eq!(clock.t(), 1.0);
        assert_eq!(clock.step(), 2);
        clock.reset();
        assert_eq!(clock.t(), 0.0);
    }

    #[test]
    fn step_counts() {
        let clock = Clock::new(1e-4).unwrap();
        assert_eq!(clock.steps_for(0.0).unwrap(), 0);
        assert_eq!(clock.steps_for(1e-4).unwrap(), 1);
        assert_eq!(clock.steps_for(3e-4).unwrap(), 3);
        assert_eq!(clock.steps_for(1e-3).unwrap(), 10);
        assert_eq!(clock.steps_for(1.5e-4).unwrap(), 2);
    }

    #[test]
    fn rejects_bad_duration() {
        let clock = Clock::new(1e-4).unwrap();
        assert!(matches!(
            clock.steps_for(-1.0),
            Err(ClockError::InvalidDuration(_))
        ));
        assert!(clock.steps_for(f64::NAN).is_err());
    }

    #[test]
    fn many_ticks_do_not_drift() {
        let mut clock = Clock::new(0.1).unwrap();
        for _ in 0..1000 {
            clock.tick();
        }
        assert_eq!(clock.t(), 1000.0 * 0.1);
    }
}
