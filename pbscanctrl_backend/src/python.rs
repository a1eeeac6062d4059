//! Python bindings, built with the `python` feature.
//!
//! [`PyPulseBlaster`] owns the boards, the DAQ trigger line and the program, and exposes the
//! scan lifecycle to Python. Every call that takes the driver lock releases the GIL first: the
//! trigger thread logs through Python while it holds that lock.

use std::path::Path;
use std::time::Duration as StdDuration;

use crossbeam::channel::Receiver;
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use pbcompiler_backend::*;

use crate::error::*;
use crate::nidaqmx::DaqTrigger;
use crate::scan_driver::*;
use crate::scan_events::ScanEvent;
use crate::spinapi::SpinCore;
use crate::utils::SequenceOutput;

impl From<ScanError> for PyErr {
    fn from(err: ScanError) -> PyErr {
        match err {
            ScanError::Validation(_) | ScanError::Channel(_) => PyValueError::new_err(err.to_string()),
            ScanError::Persistence(PersistenceError::Io { .. })
            | ScanError::Persistence(PersistenceError::AlreadyExists(_)) => {
                PyIOError::new_err(err.to_string())
            }
            ScanError::Persistence(_) => PyValueError::new_err(err.to_string()),
            ScanError::Hardware(_) | ScanError::Busy => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

impl From<HardwareError> for PyErr {
    fn from(err: HardwareError) -> PyErr {
        ScanError::from(err).into()
    }
}

fn duration(value: f64, unit: &str) -> Result<Duration, ScanError> {
    Ok(Duration::new(value, unit.parse::<DurationUnit>()?))
}

fn event_tuple(event: ScanEvent) -> (&'static str, usize, usize, String) {
    match event {
        ScanEvent::Armed => ("armed", 0, 0, String::new()),
        ScanEvent::Progress { step, total_len } => ("progress", step, total_len, String::new()),
        ScanEvent::Completed => ("completed", 0, 0, String::new()),
        ScanEvent::Cancelled => ("cancelled", 0, 0, String::new()),
        ScanEvent::Failed(msg) => ("failed", 0, 0, msg),
    }
}

#[pyclass(name = "PulseBlaster")]
pub struct PyPulseBlaster {
    driver: ScanDriver<SpinCore, DaqTrigger>,
    labels: ChannelLabels,
    scan: ScanConfig,
    events: Receiver<ScanEvent>,
}

impl PyPulseBlaster {
    fn edit<R: Send>(
        &self,
        py: Python,
        f: impl FnOnce(&mut Program) -> Result<R, ValidationError> + Send,
    ) -> PyResult<R> {
        let driver = &self.driver;
        let result = py.allow_threads(|| driver.edit_program(f))?;
        Ok(result.map_err(ScanError::from)?)
    }
}

#[pymethods]
impl PyPulseBlaster {
    /// Initialises every board found. Sequence files go to `sequence_dir`.
    #[new]
    #[pyo3(signature = (settle_delay_ms=20, sequence_dir="saved_sequences", overwrite_sequence=false))]
    fn new(settle_delay_ms: u64, sequence_dir: &str, overwrite_sequence: bool) -> PyResult<Self> {
        let options = DriverOptions {
            settle_delay: StdDuration::from_millis(settle_delay_ms),
            sequence_output: Some(SequenceOutput {
                dir: sequence_dir.into(),
                overwrite: overwrite_sequence,
                ..SequenceOutput::default()
            }),
            rng_seed: None,
        };
        let spec = BoardSpec::default();
        let driver = ScanDriver::init(SpinCore::new(), DaqTrigger::new(), spec, options)?;
        let labels = ChannelLabels::new(driver.board_count(), &spec);
        let events = driver.subscribe();
        Ok(Self {
            driver,
            labels,
            scan: ScanConfig::default(),
            events,
        })
    }

    fn board_count(&self) -> usize {
        self.driver.board_count()
    }

    fn load_config(&mut self, py: Python, path: &str) -> PyResult<()> {
        let board_count = self.driver.board_count();
        let config = load_config(Path::new(path), board_count, &BoardSpec::default())
            .map_err(ScanError::from)?;
        let program = config.program;
        let driver = &self.driver;
        py.allow_threads(|| driver.edit_program(|p| *p = program))?;
        self.labels = config.labels;
        self.scan = config.scan;
        Ok(())
    }

    fn save_config(&self, py: Python, path: &str) -> PyResult<()> {
        let driver = &self.driver;
        let config = SequencerConfig {
            program: py.allow_threads(|| driver.program()),
            labels: self.labels.clone(),
            scan: self.scan.clone(),
        };
        Ok(save_config(Path::new(path), &config).map_err(ScanError::from)?)
    }

    fn add_instr(&self, py: Python) -> PyResult<usize> {
        self.edit(py, |p| Ok(p.add_instr()))
    }

    fn pop_instr(&self, py: Python) -> PyResult<bool> {
        self.edit(py, |p| Ok(p.pop_instr().is_some()))
    }

    fn set_note(&self, py: Python, index: usize, note: &str) -> PyResult<()> {
        let note = note.to_string();
        self.edit(py, move |p| p.set_note(index, &note))
    }

    fn set_op_code(&self, py: Python, index: usize, op_code: &str) -> PyResult<()> {
        let op_code: OpCode = op_code.parse().map_err(ScanError::from)?;
        self.edit(py, |p| p.set_op_code(index, op_code))
    }

    fn set_op_data(&self, py: Python, index: usize, op_data: u32) -> PyResult<()> {
        self.edit(py, |p| p.set_op_data(index, op_data))
    }

    fn set_duration(&self, py: Python, index: usize, value: f64, unit: &str) -> PyResult<()> {
        let duration = duration(value, unit)?;
        self.edit(py, |p| p.set_duration(index, duration))
    }

    fn set_channel(&self, py: Python, index: usize, board: usize, channel: usize, on: bool) -> PyResult<()> {
        self.edit(py, |p| p.set_channel(index, board, channel, on))
    }

    fn clear_channels(&self, py: Python) -> PyResult<()> {
        self.edit(py, |p| {
            p.clear_channels();
            Ok(())
        })
    }

    fn set_label(&mut self, board: usize, channel: usize, label: &str) -> PyResult<()> {
        Ok(self.labels.set(board, channel, label).map_err(ScanError::from)?)
    }

    fn configure_scan(
        &mut self,
        sample_count: usize,
        repeat_count: usize,
        randomize: bool,
        trigger_channel: &str,
    ) {
        self.scan.sample_count = sample_count;
        self.scan.repeat_count = repeat_count;
        self.scan.randomize = randomize;
        self.scan.trigger_channel = trigger_channel.to_string();
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
        self.scan.slots.push(slot);
        Ok(self.scan.slots.len() - 1)
    }

    fn clear_scan_slots(&mut self) {
        self.scan.slots.clear();
    }

    #[pyo3(signature = (check=true))]
    fn load_boards(&self, py: Python, check: bool) -> PyResult<()> {
        let driver = &self.driver;
        Ok(py.allow_threads(|| driver.load_boards(check))?)
    }

    fn software_trigger(&self, py: Python) -> PyResult<()> {
        let driver = &self.driver;
        Ok(py.allow_threads(|| driver.software_trigger())?)
    }

    fn start_scan(&self, py: Python) -> PyResult<()> {
        let driver = &self.driver;
        let scan = &self.scan;
        Ok(py.allow_threads(|| driver.start(scan))?)
    }

    fn stop_scan(&self, py: Python) -> bool {
        let driver = &self.driver;
        py.allow_threads(|| driver.cancel())
    }

    /// `(done, total_len)` of the running or last scan.
    fn progress(&self, py: Python) -> (usize, usize) {
        let driver = &self.driver;
        let progress = py.allow_threads(|| driver.progress());
        (progress.done, progress.total_len)
    }

    fn is_scanning(&self, py: Python) -> bool {
        let driver = &self.driver;
        py.allow_threads(|| driver.state()) != DriverState::Idle
    }

    /// Scan events since the last call, as `(kind, step, total_len, message)` tuples.
    fn poll_events(&self) -> Vec<(&'static str, usize, usize, String)> {
        self.events.try_iter().map(event_tuple).collect()
    }

    fn close(&self, py: Python) -> PyResult<()> {
        let driver = &self.driver;
        Ok(py.allow_threads(|| driver.close())?)
    }
}

#[pymodule]
fn pbscanctrl_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    pyo3_log::init();
    m.add_class::<PyPulseBlaster>()?;
    Ok(())
}
