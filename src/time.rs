//! Simulated time.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// Simulated time in picoseconds (64-bit).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(pub u64);

impl SimTime {
    /// Time zero.
    pub const ZERO: SimTime = SimTime(0);

    /// Construct from milliseconds.
    pub const fn from_ms(ms: u64) -> Self {
        SimTime(ms * 1_000_000_000)
    }

    /// Construct from a task-graph runtime in fractional seconds.
    ///
    /// Runtimes are scaled by 1e9 once at load time and stored as-is.
    pub fn from_runtime_secs(secs: f64) -> Self {
        SimTime((secs * 1e9) as u64)
    }

    /// Raw picosecond count.
    pub const fn as_picos(self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        self.0 += rhs.0;
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 - rhs.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ms() {
        assert_eq!(SimTime::from_ms(10), SimTime(10_000_000_000));
        assert_eq!(SimTime::from_ms(0), SimTime::ZERO);
    }

    #[test]
    fn test_runtime_scaling() {
        assert_eq!(SimTime::from_runtime_secs(1e-9), SimTime(1));
        assert_eq!(SimTime::from_runtime_secs(2.5e-8), SimTime(25));
    }

    #[test]
    fn test_arithmetic() {
        let a = SimTime(30);
        let b = SimTime(12);
        assert_eq!(a + b, SimTime(42));
        assert_eq!(a - b, SimTime(18));
        assert_eq!(b.saturating_sub(a), SimTime::ZERO);
    }
}
