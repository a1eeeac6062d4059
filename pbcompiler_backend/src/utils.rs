//! Duration units, the single nanosecond conversion used by every other module, and the
//! [`BoardSpec`] describing the hardware limits a program is checked against.
//!
//! All durations in this crate are entered by the user as a `(value, unit)` pair and resolved
//! to nanoseconds through [`resolve_ns`]. The reverse direction, used when a scan writes a
//! swept duration back into an instruction, goes through [`ns_to_value`]. Keeping both in one
//! place avoids drift between the compiler, the scan generator and the scan driver.

use std::fmt;
use std::str::FromStr;

use crate::error::PersistenceError;

/// Units a duration can be entered in. The discriminant is the unit index used by the
/// conversion factor `1000^(2 - unit_index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DurationUnit {
    Ms = 0,
    Us = 1,
    Ns = 2,
}

impl DurationUnit {
    pub const ALL: [DurationUnit; 3] = [DurationUnit::Ms, DurationUnit::Us, DurationUnit::Ns];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Nanoseconds per unit: `1000^(2 - unit_index)`.
    pub fn ns_factor(self) -> f64 {
        match self {
            DurationUnit::Ms => 1e6,
            DurationUnit::Us => 1e3,
            DurationUnit::Ns => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DurationUnit::Ms => "ms",
            DurationUnit::Us => "us",
            DurationUnit::Ns => "ns",
        }
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DurationUnit {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ms" => Ok(DurationUnit::Ms),
            "us" => Ok(DurationUnit::Us),
            "ns" => Ok(DurationUnit::Ns),
            other => Err(PersistenceError::InvalidValue {
                section: String::new(),
                key: "duration unit".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Resolves `value` in `unit` to nanoseconds.
///
/// ```
/// use pbcompiler_backend::utils::*;
/// assert_eq!(resolve_ns(1.5, DurationUnit::Us), 1500.0);
/// assert_eq!(resolve_ns(10.0, DurationUnit::Ms), 1e7);
/// ```
pub fn resolve_ns(value: f64, unit: DurationUnit) -> f64 {
    value * unit.ns_factor()
}

/// Inverse of [`resolve_ns`]: expresses `ns` in `unit`.
pub fn ns_to_value(ns: f64, unit: DurationUnit) -> f64 {
    ns / unit.ns_factor()
}

/// A duration as entered by the user.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Duration {
    pub value: f64,
    pub unit: DurationUnit,
}

impl Duration {
    pub fn new(value: f64, unit: DurationUnit) -> Self {
        Self { value, unit }
    }

    pub fn ms(value: f64) -> Self {
        Self::new(value, DurationUnit::Ms)
    }

    pub fn us(value: f64) -> Self {
        Self::new(value, DurationUnit::Us)
    }

    pub fn ns(value: f64) -> Self {
        Self::new(value, DurationUnit::Ns)
    }

    pub fn as_ns(&self) -> f64 {
        resolve_ns(self.value, self.unit)
    }

    /// Checks this duration against the pulse-width floor and, for ns-unit values, the
    /// hardware time resolution.
    pub fn check(&self, spec: &BoardSpec) -> Result<(), DurationViolation> {
        if self.unit == DurationUnit::Ns && self.value % spec.resolution_ns != 0.0 {
            return Err(DurationViolation::Resolution);
        }
        if self.as_ns() + NS_TOLERANCE < spec.min_pulse_ns {
            return Err(DurationViolation::TooShort);
        }
        Ok(())
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Which duration rule a value broke, see [`Duration::check`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DurationViolation {
    TooShort,
    Resolution,
}

// Absorbs the last-bit error of e.g. `0.05 us` against the 50 ns floor.
pub(crate) const NS_TOLERANCE: f64 = 1e-6;

/// Hardware limits and constants of one board model, injected into [`crate::Program`] and
/// the scan driver instead of living in process-wide constants.
///
/// The defaults describe a SpinCore PulseBlasterUSB.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardSpec {
    pub channels_per_board: usize,
    pub min_pulse_ns: f64,
    pub resolution_ns: f64,
    pub max_op_data: u32,
    pub core_clock_mhz: f64,
}

impl BoardSpec {
    /// Largest channel mask representable on one board.
    pub fn full_mask(&self) -> u32 {
        if self.channels_per_board >= 32 {
            u32::MAX
        } else {
            (1u32 << self.channels_per_board) - 1
        }
    }
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self {
            channels_per_board: 24,
            min_pulse_ns: 50.0,
            resolution_ns: 10.0,
            max_op_data: 1000,
            core_clock_mhz: 100.0,
        }
    }
}
