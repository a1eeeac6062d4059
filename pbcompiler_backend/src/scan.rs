//! Scan slots and the generation of the duration sequences swept during a scan.
//!
//! A [`ScanSlot`] points at one instruction of the program and gives the start and end of the
//! duration range to sweep. [`generate`] turns a list of slots into a [`ScanTable`]: one row per
//! slot, one column per scan step, values in nanoseconds.
//!
//! Every row is built the same way:
//! 1. `sample_count` values evenly spaced from start to end, both inclusive;
//! 2. that block tiled `repeat_count` times (`[1, 2, 3, 1, 2, 3]`, not `[1, 1, 2, 2, 3, 3]`);
//! 3. optionally, the columns shuffled by one random permutation shared by all rows, so that
//!    at step `k` every slot still holds the values of the same trial.

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{ScanBound, ValidationError};
use crate::utils::*;

/// One swept instruction duration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanSlot {
    pub instr_index: usize,
    pub start: Duration,
    pub end: Duration,
}

impl ScanSlot {
    pub fn new(instr_index: usize, start: Duration, end: Duration) -> Self {
        Self {
            instr_index,
            start,
            end,
        }
    }
}

/// Everything the scanner needs besides the program itself.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanConfig {
    pub sample_count: usize,
    pub repeat_count: usize,
    pub randomize: bool,
    pub trigger_channel: String,
    pub slots: Vec<ScanSlot>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sample_count: 10,
            repeat_count: 10,
            randomize: true,
            trigger_channel: "Dev_/port_/line_".to_string(),
            slots: Vec::new(),
        }
    }
}

impl ScanConfig {
    /// Number of scan steps, `sample_count * repeat_count`.
    pub fn total_len(&self) -> usize {
        self.sample_count * self.repeat_count
    }
}

/// Checks every slot against the program size and the duration rules of `spec`.
///
/// Per slot the order is: instruction index, start floor, start resolution, end floor, end
/// resolution. Start and end are checked independently.
pub fn validate_slots(
    slots: &[ScanSlot],
    instruction_count: usize,
    spec: &BoardSpec,
) -> Result<(), ValidationError> {
    for (slot, s) in slots.iter().enumerate() {
        if s.instr_index >= instruction_count {
            return Err(ValidationError::ScanSlotOutOfRange {
                slot,
                instr_index: s.instr_index,
                instruction_count,
            });
        }
        for (bound, duration) in [(ScanBound::Start, s.start), (ScanBound::End, s.end)] {
            if duration.as_ns() + NS_TOLERANCE < spec.min_pulse_ns {
                return Err(ValidationError::ScanPulseTooShort {
                    slot,
                    bound,
                    duration_ns: duration.as_ns(),
                    min_ns: spec.min_pulse_ns,
                });
            }
            if duration.check(spec) == Err(DurationViolation::Resolution) {
                return Err(ValidationError::ScanResolutionViolation {
                    slot,
                    bound,
                    value: duration.value,
                    resolution_ns: spec.resolution_ns,
                });
            }
        }
    }
    Ok(())
}

/// The realized duration sequences of one scan, in nanoseconds.
///
/// Row `s` is the sequence of slot `s`, column `k` is scan step `k`.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanTable {
    instr_indices: Vec<usize>,
    sample_count: usize,
    repeat_count: usize,
    values: Array2<f64>,
}

impl ScanTable {
    pub fn instr_indices(&self) -> &[usize] {
        &self.instr_indices
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn repeat_count(&self) -> usize {
        self.repeat_count
    }

    pub fn slot_count(&self) -> usize {
        self.values.nrows()
    }

    /// Number of scan steps.
    pub fn len(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// The whole sequence of slot `slot`.
    pub fn sequence(&self, slot: usize) -> Option<ScanSequence<'_>> {
        (slot < self.slot_count()).then(|| ScanSequence {
            instr_index: self.instr_indices[slot],
            sequence: self.values.row(slot),
        })
    }

    pub fn sequences(&self) -> impl Iterator<Item = ScanSequence<'_>> + '_ {
        (0..self.slot_count()).filter_map(move |slot| self.sequence(slot))
    }

    /// `(instr_index, duration_ns)` of every slot at scan step `step`.
    pub fn step(&self, step: usize) -> Vec<(usize, f64)> {
        if step >= self.len() {
            return Vec::new();
        }
        self.instr_indices
            .iter()
            .zip(self.values.column(step).iter())
            .map(|(&instr, &ns)| (instr, ns))
            .collect()
    }
}

/// Read-only view of one slot's sequence inside a [`ScanTable`].
#[derive(Clone, Debug)]
pub struct ScanSequence<'a> {
    pub instr_index: usize,
    pub sequence: ArrayView1<'a, f64>,
}

/// `n` values from `start` to `end`, both inclusive.
fn linspace_inclusive(start: f64, end: f64, n: usize) -> Array1<f64> {
    let mut samples = Array1::linspace(start, end, n);
    if let Some(last) = samples.iter_mut().last() {
        *last = end;
    }
    samples
}

/// Generates the scan sequences of `slots`.
///
/// With `randomize`, one permutation of the `sample_count * repeat_count` steps is drawn (from
/// `rng_seed` if given, from entropy otherwise) and applied to every slot.
///
/// # Example
/// ```
/// use pbcompiler_backend::*;
///
/// let slot = ScanSlot::new(0, Duration::ns(0.0), Duration::ns(40.0));
/// let table = generate(&[slot], 5, 3, false, None).unwrap();
/// assert_eq!(
///     table.sequence(0).unwrap().sequence.to_vec(),
///     vec![0., 10., 20., 30., 40., 0., 10., 20., 30., 40., 0., 10., 20., 30., 40.]
/// );
/// ```
pub fn generate(
    slots: &[ScanSlot],
    sample_count: usize,
    repeat_count: usize,
    randomize: bool,
    rng_seed: Option<u64>,
) -> Result<ScanTable, ValidationError> {
    if slots.is_empty() {
        return Err(ValidationError::NoScanSlots);
    }
    if sample_count < 2 {
        return Err(ValidationError::SampleCountTooSmall(sample_count));
    }
    if repeat_count < 1 {
        return Err(ValidationError::RepeatCountTooSmall(repeat_count));
    }

    let blocks: Vec<Array1<f64>> = slots
        .iter()
        .map(|s| linspace_inclusive(s.start.as_ns(), s.end.as_ns(), sample_count))
        .collect();
    let total_len = sample_count * repeat_count;
    let mut values = Array2::from_shape_fn((slots.len(), total_len), |(slot, step)| {
        blocks[slot][step % sample_count]
    });

    if randomize {
        let mut rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut permutation: Vec<usize> = (0..total_len).collect();
        permutation.shuffle(&mut rng);
        values = values.select(Axis(1), &permutation);
    }
    debug!(
        "Generated {} scan sequences of {} steps (randomized: {})",
        slots.len(),
        total_len,
        randomize
    );

    Ok(ScanTable {
        instr_indices: slots.iter().map(|s| s.instr_index).collect(),
        sample_count,
        repeat_count,
        values,
    })
}
