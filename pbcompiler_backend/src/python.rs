//! Python bindings, built with the `python` feature.
//!
//! [`PyProgram`] bundles a [`Program`], its channel labels and the scanner setup behind one
//! Python class. Errors surface as `ValueError` (bad program or scan setup) or `IOError`
//! (config files).

use std::path::Path;

use numpy::{IntoPyArray, PyArray2};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;

use crate::compiler::*;
use crate::error::{PersistenceError, ValidationError};
use crate::instruction::OpCode;
use crate::persist::*;
use crate::program::{ChannelLabels, Program};
use crate::scan::*;
use crate::utils::*;

impl From<ValidationError> for PyErr {
    fn from(err: ValidationError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

impl From<PersistenceError> for PyErr {
    fn from(err: PersistenceError) -> PyErr {
        match err {
            PersistenceError::Io { .. } | PersistenceError::AlreadyExists(_) => {
                PyIOError::new_err(err.to_string())
            }
            other => PyValueError::new_err(other.to_string()),
        }
    }
}

fn duration(value: f64, unit: &str) -> PyResult<Duration> {
    Ok(Duration::new(value, unit.parse::<DurationUnit>()?))
}

#[pyclass(name = "Program")]
pub struct PyProgram {
    config: SequencerConfig,
}

#[pymethods]
impl PyProgram {
    #[new]
    #[pyo3(signature = (board_count, channels_per_board=24))]
    fn new(board_count: usize, channels_per_board: usize) -> Self {
        let spec = BoardSpec {
            channels_per_board,
            ..BoardSpec::default()
        };
        Self {
            config: SequencerConfig {
                program: Program::with_default_instructions(board_count, spec, 5),
                labels: ChannelLabels::new(board_count, &spec),
                scan: ScanConfig::default(),
            },
        }
    }

    #[staticmethod]
    fn load(path: &str, board_count: usize) -> PyResult<Self> {
        let config = load_config(Path::new(path), board_count, &BoardSpec::default())?;
        Ok(Self { config })
    }

    fn save(&self, path: &str) -> PyResult<()> {
        Ok(save_config(Path::new(path), &self.config)?)
    }

    fn __len__(&self) -> usize {
        self.config.program.len()
    }

    fn add_instr(&mut self) -> usize {
        self.config.program.add_instr()
    }

    /// Returns `False` when only one instruction is left.
    fn pop_instr(&mut self) -> bool {
        self.config.program.pop_instr().is_some()
    }

    fn set_note(&mut self, index: usize, note: &str) -> PyResult<()> {
        Ok(self.config.program.set_note(index, note)?)
    }

    fn set_op_code(&mut self, index: usize, op_code: &str) -> PyResult<()> {
        let op_code: OpCode = op_code.parse()?;
        Ok(self.config.program.set_op_code(index, op_code)?)
    }

    fn set_op_data(&mut self, index: usize, op_data: u32) -> PyResult<()> {
        Ok(self.config.program.set_op_data(index, op_data)?)
    }

    fn set_duration(&mut self, index: usize, value: f64, unit: &str) -> PyResult<()> {
        Ok(self.config.program.set_duration(index, duration(value, unit)?)?)
    }

    fn set_channel(&mut self, index: usize, board: usize, channel: usize, on: bool) -> PyResult<()> {
        Ok(self.config.program.set_channel(index, board, channel, on)?)
    }

    fn set_channel_mask(&mut self, index: usize, board: usize, mask: u32) -> PyResult<()> {
        Ok(self.config.program.set_channel_mask(index, board, mask)?)
    }

    fn clear_channels(&mut self) {
        self.config.program.clear_channels();
    }

    fn set_label(&mut self, board: usize, channel: usize, label: &str) -> PyResult<()> {
        Ok(self.config.labels.set(board, channel, label)?)
    }

    #[pyo3(signature = (check_opcodes=true, check_pulse_widths=true))]
    fn validate(&self, check_opcodes: bool, check_pulse_widths: bool) -> PyResult<()> {
        Ok(validate(&self.config.program, check_opcodes, check_pulse_widths)?)
    }

    /// Per board, `(channel_mask, op_code, op_data, duration_ns)` tuples.
    fn compile(&self) -> Vec<Vec<(u32, i32, u32, f64)>> {
        compile(&self.config.program)
            .into_iter()
            .map(|board| {
                board
                    .into_iter()
                    .map(|i| (i.channel_mask, i.op_code.code(), i.op_data, i.duration_ns))
                    .collect()
            })
            .collect()
    }

    fn configure_scan(
        &mut self,
        sample_count: usize,
        repeat_count: usize,
        randomize: bool,
        trigger_channel: &str,
    ) {
        let scan = &mut self.config.scan;
        scan.sample_count = sample_count;
        scan.repeat_count = repeat_count;
        scan.randomize = randomize;
        scan.trigger_channel = trigger_channel.to_string();
    }

    fn add_scan_slot(
        &mut self,
        instr_index: usize,
        start: f64,
        start_unit: &str,
        end: f64,
        end_unit: &str,
    ) -> PyResult<usize> {
        let slot = ScanSlot::new(instr_index, duration(start, start_unit)?, duration(end, end_unit)?);
        self.config.scan.slots.push(slot);
        Ok(self.config.scan.slots.len() - 1)
    }

    fn clear_scan_slots(&mut self) {
        self.config.scan.slots.clear();
    }

    fn validate_scan(&self) -> PyResult<()> {
        let program = &self.config.program;
        Ok(validate_slots(&self.config.scan.slots, program.len(), program.spec())?)
    }

    /// Slot-by-step matrix of the scan durations in ns.
    #[pyo3(signature = (seed=None))]
    fn scan_table<'py>(&self, py: Python<'py>, seed: Option<u64>) -> PyResult<&'py PyArray2<f64>> {
        let scan = &self.config.scan;
        let table = generate(
            &scan.slots,
            scan.sample_count,
            scan.repeat_count,
            scan.randomize,
            seed,
        )?;
        Ok(table.values().clone().into_pyarray(py))
    }
}

#[pymodule]
fn pbcompiler_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    pyo3_log::init();
    m.add_class::<PyProgram>()?;
    Ok(())
}
