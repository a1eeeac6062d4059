//! # Trigger-synchronized duration scans
//!
//! [`ScanDriver`] owns the boards, the trigger source and the program, and runs scans over
//! them. A scan moves through
//!
//! `Idle → Armed → Running → (Completing | Cancelling) → Idle`
//!
//! - [`ScanDriver::start`] validates the scan slots, the program and the trigger channel, in
//!   that order, before anything touches hardware. It then generates the scan table, writes
//!   the sequence file, arms every board (stop, reset, start), loads scan step 0 and registers
//!   for trigger edges.
//! - Every trigger edge ([`ScanDriver::on_trigger_edge`]) waits the settle delay, writes the
//!   next scan step into the program, recompiles and reloads all boards. The edge after the
//!   last step completes the scan: a scan of `N` steps takes exactly `N` edges after `start`.
//! - [`ScanDriver::cancel`] stops a scan at any point and resets the progress to 0.
//!
//! ## Concurrency
//!
//! Edges arrive on the trigger source's thread. The program, the boards and the run state sit
//! behind one mutex. A separate single-slot load guard is held for the whole of an edge: an
//! edge that arrives while the previous edge is still loading is dropped rather than queued
//! ([`EdgeOutcome::Dropped`]), so two loads never interleave. Readers such as
//! [`ScanDriver::progress`] only contend for the state mutex, which an edge waits for, so
//! polling never costs an edge. `cancel` waits for an in-flight load to finish. The lock order
//! is load guard, driver state, trigger source.
//!
//! ## Failures
//!
//! A board error during a scan tears the scan down and publishes [`ScanEvent::Failed`]. Boards
//! keep the last program that loaded successfully; nothing is retried.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::Receiver;
use log::{error, info, warn};
use parking_lot::Mutex;

use pbcompiler_backend::{
    compile_for, generate, save_scan_table, validate, validate_slots, BoardSpec, Program,
    ScanConfig, ScanTable,
};

use crate::board::PulseBoard;
use crate::error::*;
use crate::scan_events::*;
use crate::trigger::*;
use crate::utils::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Armed,
    Running,
    Completing,
    Cancelling,
}

/// What a single trigger edge did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// Scan step `step` was loaded to the boards.
    Loaded { step: usize, total_len: usize },
    /// The edge after the last step: the scan is over.
    Completed,
    /// The previous edge was still loading.
    Dropped,
    /// No scan is running.
    Ignored,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total_len: usize,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total_len == 0 {
            0.0
        } else {
            self.done as f64 / self.total_len as f64
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DriverOptions {
    /// Fixed wait before each trigger-driven load, for trigger lines that ring.
    pub settle_delay: Duration,
    /// `None` skips writing the sequence file.
    pub sequence_output: Option<SequenceOutput>,
    /// Seeds the shuffle of randomized scans.
    pub rng_seed: Option<u64>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(20),
            sequence_output: Some(SequenceOutput::default()),
            rng_seed: None,
        }
    }
}

struct ScanRun {
    table: ScanTable,
    cursor: usize,
    handle: Option<TriggerHandle>,
}

struct DriverCore<B> {
    board: B,
    board_count: usize,
    program: Program,
    state: DriverState,
    run: Option<ScanRun>,
    progress: Progress,
}

struct Shared<B, T> {
    // Held by the edge being handled
    loading: Mutex<()>,
    core: Mutex<DriverCore<B>>,
    trigger: Mutex<T>,
    events: EventBus,
    options: DriverOptions,
}

impl<B, T> Shared<B, T>
where
    B: PulseBoard + Send + 'static,
    T: TriggerSource + Send + 'static,
{
    /// Writes scan step `cursor` into the program, loads it to every board and advances the
    /// cursor. Returns `(step, total_len)`.
    fn load_next_step(&self, core: &mut DriverCore<B>) -> Result<Option<(usize, usize)>, ScanError> {
        let mut timer = TickTimer::new();
        let DriverCore {
            board,
            board_count,
            program,
            run,
            progress,
            ..
        } = core;
        let run = match run.as_mut() {
            Some(run) => run,
            None => return Ok(None),
        };
        let step = run.cursor;
        let total_len = run.table.len();
        for (instr, ns) in run.table.step(step) {
            program.set_duration_ns(instr, ns)?;
        }
        board.load_program(&compile_for(program, *board_count))?;
        run.cursor += 1;
        *progress = Progress {
            done: step,
            total_len,
        };
        timer.tick_log(&format!("Scan step {}/{} load", step, total_len));
        Ok(Some((step, total_len)))
    }

    /// Drops the run and unregisters from the trigger source. Teardown errors are logged.
    fn teardown(&self, core: &mut DriverCore<B>) -> bool {
        let run = match core.run.take() {
            Some(run) => run,
            None => return false,
        };
        if let Some(handle) = run.handle {
            if let Err(err) = self.trigger.lock().unregister(handle) {
                warn!("Failed to stop the trigger task: {}", err);
            }
        }
        true
    }

    fn fail(&self, core: &mut DriverCore<B>, err: &ScanError) {
        error!("Scan aborted: {}", err);
        core.state = DriverState::Cancelling;
        self.teardown(core);
        core.progress = Progress::default();
        core.state = DriverState::Idle;
        self.events.publish(ScanEvent::Failed(err.to_string()));
    }

    fn start(self: &Arc<Self>, config: &ScanConfig) -> Result<(), ScanError> {
        let mut timer = TickTimer::new();
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if core.state != DriverState::Idle {
            return Err(ScanError::Busy);
        }

        validate_slots(&config.slots, core.program.len(), core.program.spec())?;
        validate(&core.program, true, true)?;
        let channel = check_channel(&*self.trigger.lock(), &config.trigger_channel)?;
        let table = generate(
            &config.slots,
            config.sample_count,
            config.repeat_count,
            config.randomize,
            self.options.rng_seed,
        )?;
        if let Some(output) = &self.options.sequence_output {
            save_scan_table(&output.path(), &table, output.overwrite)?;
        }
        timer.tick_log("Scan validation and sequence generation");

        core.board.arm_boards(core.board_count)?;
        core.state = DriverState::Armed;
        core.run = Some(ScanRun {
            table,
            cursor: 0,
            handle: None,
        });
        let (step, total_len) = match self.load_next_step(core) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => (0, 0),
            Err(err) => {
                self.fail(core, &err);
                return Err(err);
            }
        };
        self.events.publish(ScanEvent::Armed);
        self.events.publish(ScanEvent::Progress { step, total_len });

        let shared = Arc::downgrade(self);
        let callback: EdgeCallback = Arc::new(move || {
            if let Some(shared) = shared.upgrade() {
                if let Err(err) = shared.on_trigger_edge() {
                    error!("Trigger edge failed: {}", err);
                }
            }
        });
        let registered = self
            .trigger
            .lock()
            .register_edge_callback(&channel, callback);
        match registered {
            Ok(handle) => {
                if let Some(run) = core.run.as_mut() {
                    run.handle = Some(handle);
                }
                core.state = DriverState::Running;
                info!(
                    "Scan started: {} steps over {} slot(s), trigger on {}",
                    total_len,
                    config.slots.len(),
                    channel
                );
                Ok(())
            }
            Err(err) => {
                let err = ScanError::from(err);
                self.fail(core, &err);
                Err(err)
            }
        }
    }

    fn on_trigger_edge(&self) -> Result<EdgeOutcome, ScanError> {
        thread::sleep(self.options.settle_delay);
        let _loading = match self.loading.try_lock() {
            Some(guard) => guard,
            None => {
                warn!("Trigger edge dropped, a load is still in progress");
                return Ok(EdgeOutcome::Dropped);
            }
        };
        let mut guard = self.core.lock();
        let core = &mut *guard;
        let (cursor, total_len) = match &core.run {
            Some(run) => (run.cursor, run.table.len()),
            None => return Ok(EdgeOutcome::Ignored),
        };

        if cursor < total_len {
            match self.load_next_step(core) {
                Ok(Some((step, total_len))) => {
                    self.events.publish(ScanEvent::Progress { step, total_len });
                    Ok(EdgeOutcome::Loaded { step, total_len })
                }
                Ok(None) => Ok(EdgeOutcome::Ignored),
                Err(err) => {
                    self.fail(core, &err);
                    Err(err)
                }
            }
        } else {
            core.state = DriverState::Completing;
            self.teardown(core);
            core.progress = Progress {
                done: total_len,
                total_len,
            };
            core.state = DriverState::Idle;
            info!("Scan completed after {} steps", total_len);
            self.events.publish(ScanEvent::Completed);
            Ok(EdgeOutcome::Completed)
        }
    }

    fn cancel(&self) -> bool {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if core.run.is_none() {
            return false;
        }
        core.state = DriverState::Cancelling;
        self.teardown(core);
        core.progress = Progress::default();
        core.state = DriverState::Idle;
        info!("Scan cancelled");
        self.events.publish(ScanEvent::Cancelled);
        true
    }
}

/// Runs scans on boards `B` triggered by `T`.
///
/// # Example
/// ```
/// use pbcompiler_backend::*;
/// use pbscanctrl_backend::*;
///
/// let board = MockBoard::new(1);
/// let trigger = MockTrigger::new(&["Dev1/port0/line0"]);
/// let mut options = DriverOptions::default();
/// options.settle_delay = std::time::Duration::ZERO;
/// options.sequence_output = None;
/// let driver = ScanDriver::init(board, trigger.clone(), BoardSpec::default(), options).unwrap();
/// driver.edit_program(|p| p.set_op_code(4, OpCode::BRANCH)).unwrap().unwrap();
///
/// let config = ScanConfig {
///     sample_count: 2,
///     repeat_count: 1,
///     slots: vec![ScanSlot::new(0, Duration::ms(1.0), Duration::ms(2.0))],
///     trigger_channel: "Dev1/port0/line0".to_string(),
///     ..ScanConfig::default()
/// };
/// driver.start(&config).unwrap();
/// trigger.fire();
/// trigger.fire();
/// assert_eq!(driver.state(), DriverState::Idle);
/// assert_eq!(driver.progress().fraction(), 1.0);
/// ```
pub struct ScanDriver<B, T>
where
    B: PulseBoard + Send + 'static,
    T: TriggerSource + Send + 'static,
{
    shared: Arc<Shared<B, T>>,
}

impl<B, T> ScanDriver<B, T>
where
    B: PulseBoard + Send + 'static,
    T: TriggerSource + Send + 'static,
{
    pub fn new(
        board: B,
        board_count: usize,
        trigger: T,
        program: Program,
        options: DriverOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                loading: Mutex::new(()),
                core: Mutex::new(DriverCore {
                    board,
                    board_count,
                    program,
                    state: DriverState::Idle,
                    run: None,
                    progress: Progress::default(),
                }),
                trigger: Mutex::new(trigger),
                events: EventBus::new(),
                options,
            }),
        }
    }

    /// Initialises every board found and starts from a program of five default instructions.
    pub fn init(
        mut board: B,
        trigger: T,
        spec: BoardSpec,
        options: DriverOptions,
    ) -> Result<Self, HardwareError> {
        let board_count = board.init_boards(spec.core_clock_mhz)?;
        let program = Program::with_default_instructions(board_count, spec, 5);
        Ok(Self::new(board, board_count, trigger, program, options))
    }

    pub fn subscribe(&self) -> Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> DriverState {
        self.shared.core.lock().state
    }

    pub fn progress(&self) -> Progress {
        self.shared.core.lock().progress
    }

    pub fn board_count(&self) -> usize {
        self.shared.core.lock().board_count
    }

    /// A snapshot of the program, including any scan step written into it.
    pub fn program(&self) -> Program {
        self.shared.core.lock().program.clone()
    }

    /// Runs `f` on the program. Refused while a scan is active.
    pub fn edit_program<R>(&self, f: impl FnOnce(&mut Program) -> R) -> Result<R, ScanError> {
        let mut core = self.shared.core.lock();
        if core.state != DriverState::Idle {
            return Err(ScanError::Busy);
        }
        Ok(f(&mut core.program))
    }

    /// Compiles the program and loads it to every board, after an optional sanity check.
    pub fn load_boards(&self, check: bool) -> Result<(), ScanError> {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        if core.state != DriverState::Idle {
            return Err(ScanError::Busy);
        }
        if check {
            validate(&core.program, true, true)?;
        }
        core.board
            .load_program(&compile_for(&core.program, core.board_count))?;
        info!("Loaded boards");
        Ok(())
    }

    /// Starts every board once, one after the other.
    pub fn software_trigger(&self) -> Result<(), ScanError> {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        if core.state != DriverState::Idle {
            return Err(ScanError::Busy);
        }
        core.board.start_boards(core.board_count)?;
        Ok(())
    }

    pub fn start(&self, config: &ScanConfig) -> Result<(), ScanError> {
        self.shared.start(config)
    }

    /// Handles one trigger edge. Registered with the trigger source by [`ScanDriver::start`];
    /// public so that edges can also be delivered by hand.
    pub fn on_trigger_edge(&self) -> Result<EdgeOutcome, ScanError> {
        self.shared.on_trigger_edge()
    }

    /// Stops the running scan, if any. Returns whether a scan was stopped.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Cancels any scan and releases the boards.
    pub fn close(&self) -> Result<(), ScanError> {
        self.cancel();
        self.shared.core.lock().board.close()?;
        info!("Boards closed");
        Ok(())
    }
}

impl<B, T> Drop for ScanDriver<B, T>
where
    B: PulseBoard + Send + 'static,
    T: TriggerSource + Send + 'static,
{
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::*;
    use pbcompiler_backend::{Duration as PbDuration, DurationUnit, OpCode, ScanSlot};

    const CHANNEL: &str = "Dev1/port0/line0";

    fn quiet_options() -> DriverOptions {
        DriverOptions {
            settle_delay: Duration::ZERO,
            sequence_output: None,
            rng_seed: Some(1),
        }
    }

    fn program() -> Program {
        let mut prog = Program::with_default_instructions(1, BoardSpec::default(), 3);
        prog.set_duration(1, PbDuration::us(1.0)).unwrap();
        prog.set_op_code(2, OpCode::BRANCH).unwrap();
        prog
    }

    fn config(sample_count: usize, repeat_count: usize) -> ScanConfig {
        ScanConfig {
            sample_count,
            repeat_count,
            randomize: false,
            trigger_channel: CHANNEL.to_string(),
            slots: vec![ScanSlot::new(1, PbDuration::us(1.0), PbDuration::us(3.0))],
        }
    }

    fn driver() -> (ScanDriver<MockBoard, MockTrigger>, MockBoard, MockTrigger) {
        let board = MockBoard::new(1);
        let trigger = MockTrigger::new(&[CHANNEL]);
        let driver = ScanDriver::new(board.clone(), 1, trigger.clone(), program(), quiet_options());
        (driver, board, trigger)
    }

    mod lifecycle {
        use super::*;

        #[test]
        /// `start` loads step 0, each following edge loads the next step, and edge N completes.
        fn n_edges_complete_a_scan() {
            let (driver, board, trigger) = driver();
            driver.start(&config(3, 2)).unwrap();
            assert_eq!(driver.state(), DriverState::Running);
            assert_eq!(driver.progress(), Progress { done: 0, total_len: 6 });
            assert_eq!(trigger.registered(), 1);
            assert_eq!(board.loaded(0)[1].duration_ns, 1000.0);

            for step in 1..6 {
                assert_eq!(
                    driver.on_trigger_edge().unwrap(),
                    EdgeOutcome::Loaded { step, total_len: 6 }
                );
                assert_eq!(driver.progress().done, step);
            }
            assert_eq!(driver.state(), DriverState::Running);
            assert_eq!(driver.on_trigger_edge().unwrap(), EdgeOutcome::Completed);
            assert_eq!(driver.state(), DriverState::Idle);
            assert_eq!(driver.progress().fraction(), 1.0);
            assert_eq!(trigger.registered(), 0);
            assert_eq!(driver.on_trigger_edge().unwrap(), EdgeOutcome::Ignored);
        }

        #[test]
        /// Scan values land in the program in the instruction's own unit.
        fn steps_written_in_native_unit() {
            let (driver, board, _) = driver();
            driver.start(&config(3, 1)).unwrap();
            driver.on_trigger_edge().unwrap();
            let instr = driver.program().instr(1).unwrap().clone();
            assert_eq!(instr.duration.unit, DurationUnit::Us);
            assert_eq!(instr.duration.value, 2.0);
            assert_eq!(board.loaded(0)[1].duration_ns, 2000.0);
        }

        #[test]
        fn boards_armed_before_first_load() {
            let (driver, board, _) = driver();
            driver.start(&config(2, 1)).unwrap();
            assert_eq!(
                &board.calls()[..4],
                &[BoardCall::Select(0), BoardCall::Stop, BoardCall::Reset, BoardCall::Start]
            );
            assert_eq!(board.count(BoardCall::EndProgram), 1);
        }

        #[test]
        fn events_in_order() {
            let (driver, _, _) = driver();
            let events = driver.subscribe();
            driver.start(&config(2, 1)).unwrap();
            driver.on_trigger_edge().unwrap();
            driver.on_trigger_edge().unwrap();
            assert_eq!(
                events.try_iter().collect::<Vec<_>>(),
                vec![
                    ScanEvent::Armed,
                    ScanEvent::Progress { step: 0, total_len: 2 },
                    ScanEvent::Progress { step: 1, total_len: 2 },
                    ScanEvent::Completed,
                ]
            );
        }
    }

    mod cancellation {
        use super::*;

        #[test]
        fn cancel_mid_run_resets() {
            let (driver, _, trigger) = driver();
            let events = driver.subscribe();
            driver.start(&config(5, 2)).unwrap();
            driver.on_trigger_edge().unwrap();
            driver.on_trigger_edge().unwrap();
            assert!(driver.cancel());
            assert_eq!(driver.state(), DriverState::Idle);
            assert_eq!(driver.progress(), Progress::default());
            assert_eq!(trigger.registered(), 0);
            assert_eq!(driver.on_trigger_edge().unwrap(), EdgeOutcome::Ignored);
            assert_eq!(events.try_iter().last(), Some(ScanEvent::Cancelled));
            // Nothing left to cancel
            assert!(!driver.cancel());
        }

        #[test]
        /// Teardown errors are logged, the scan still stops.
        fn cancel_survives_trigger_errors() {
            let (driver, _, trigger) = driver();
            driver.start(&config(2, 1)).unwrap();
            trigger.fail_unregister(true);
            assert!(driver.cancel());
            assert_eq!(driver.state(), DriverState::Idle);
        }

        #[test]
        /// A board error mid-scan tears the scan down instead of retrying.
        fn board_failure_aborts_scan() {
            let (driver, board, trigger) = driver();
            let events = driver.subscribe();
            driver.start(&config(4, 1)).unwrap();
            board.fail_on(BoardCall::EndProgram, 3);
            driver.on_trigger_edge().unwrap();
            assert!(matches!(
                driver.on_trigger_edge(),
                Err(ScanError::Hardware(HardwareError { call: "end_program", .. }))
            ));
            assert_eq!(driver.state(), DriverState::Idle);
            assert_eq!(driver.progress(), Progress::default());
            assert_eq!(trigger.registered(), 0);
            assert!(matches!(events.try_iter().last(), Some(ScanEvent::Failed(_))));
        }
    }

    mod start_checks {
        use super::*;

        #[test]
        /// Nothing reaches the boards when validation fails.
        fn invalid_program_touches_nothing() {
            let (driver, board, trigger) = driver();
            driver
                .edit_program(|p| p.set_op_code(2, OpCode::CONTINUE))
                .unwrap()
                .unwrap();
            assert!(matches!(
                driver.start(&config(2, 1)),
                Err(ScanError::Validation(_))
            ));
            assert!(board.calls().is_empty());
            assert_eq!(trigger.registered(), 0);
            assert_eq!(driver.state(), DriverState::Idle);
        }

        #[test]
        fn slot_checked_before_program() {
            let (driver, board, _) = driver();
            driver
                .edit_program(|p| p.set_op_code(2, OpCode::CONTINUE))
                .unwrap()
                .unwrap();
            let mut config = config(2, 1);
            config.slots[0].instr_index = 7;
            assert!(matches!(
                driver.start(&config),
                Err(ScanError::Validation(
                    pbcompiler_backend::ValidationError::ScanSlotOutOfRange { .. }
                ))
            ));
            assert!(board.calls().is_empty());
        }

        #[test]
        fn bad_trigger_channel() {
            let (driver, board, _) = driver();
            let mut cfg = config(2, 1);
            cfg.trigger_channel = "Dev_/port_/line_".to_string();
            assert!(matches!(
                driver.start(&cfg),
                Err(ScanError::Channel(ChannelError::Malformed(_)))
            ));
            cfg.trigger_channel = "Dev3/port0/line0".to_string();
            assert!(matches!(
                driver.start(&cfg),
                Err(ScanError::Channel(ChannelError::NotFound(_)))
            ));
            assert!(board.calls().is_empty());
        }

        #[test]
        fn busy_while_scanning() {
            let (driver, _, _) = driver();
            driver.start(&config(2, 1)).unwrap();
            assert!(matches!(driver.start(&config(2, 1)), Err(ScanError::Busy)));
            assert!(matches!(driver.edit_program(|_| ()), Err(ScanError::Busy)));
            assert!(matches!(driver.load_boards(true), Err(ScanError::Busy)));
            assert!(matches!(driver.software_trigger(), Err(ScanError::Busy)));
            driver.cancel();
            assert!(driver.edit_program(|_| ()).is_ok());
        }

        #[test]
        fn sequence_file_never_overwritten() {
            let dir = tempfile::tempdir().unwrap();
            let board = MockBoard::new(1);
            let trigger = MockTrigger::new(&[CHANNEL]);
            let options = DriverOptions {
                sequence_output: Some(SequenceOutput {
                    dir: dir.path().to_path_buf(),
                    name: "seq".to_string(),
                    auto_append_timestamp: false,
                    overwrite: false,
                }),
                ..quiet_options()
            };
            let driver = ScanDriver::new(board.clone(), 1, trigger, program(), options);
            driver.start(&config(2, 1)).unwrap();
            assert!(dir.path().join("seq.ini").exists());
            driver.cancel();

            board.clear_calls();
            assert!(matches!(
                driver.start(&config(2, 1)),
                Err(ScanError::Persistence(
                    pbcompiler_backend::PersistenceError::AlreadyExists(_)
                ))
            ));
            assert!(board.calls().is_empty());
        }
    }

    mod manual_operations {
        use super::*;

        #[test]
        fn load_boards_with_and_without_check() {
            let (driver, board, _) = driver();
            driver.load_boards(true).unwrap();
            assert_eq!(board.loaded(0).len(), 3);

            driver
                .edit_program(|p| p.set_duration(0, PbDuration::ns(20.0)))
                .unwrap()
                .unwrap();
            assert!(matches!(
                driver.load_boards(true),
                Err(ScanError::Validation(_))
            ));
            driver.load_boards(false).unwrap();
            assert_eq!(board.loaded(0)[0].duration_ns, 20.0);
        }

        #[test]
        fn software_trigger_starts_each_board() {
            let board = MockBoard::new(2);
            let driver = ScanDriver::new(
                board.clone(),
                2,
                MockTrigger::new(&[CHANNEL]),
                program(),
                quiet_options(),
            );
            driver.software_trigger().unwrap();
            assert_eq!(
                board.calls(),
                vec![
                    BoardCall::Select(0),
                    BoardCall::Start,
                    BoardCall::Select(1),
                    BoardCall::Start
                ]
            );
        }

        #[test]
        fn close_cancels_and_releases() {
            let (driver, board, trigger) = driver();
            driver.start(&config(2, 1)).unwrap();
            driver.close().unwrap();
            assert_eq!(trigger.registered(), 0);
            assert_eq!(board.count(BoardCall::Close), 1);
        }

        #[test]
        fn init_counts_boards() {
            let board = MockBoard::new(2);
            let driver = ScanDriver::init(
                board.clone(),
                MockTrigger::new(&[]),
                BoardSpec::default(),
                quiet_options(),
            )
            .unwrap();
            assert_eq!(driver.board_count(), 2);
            assert_eq!(driver.program().len(), 5);
            assert_eq!(board.count(BoardCall::Init), 2);
        }
    }

    mod concurrency {
        use super::*;
        use std::sync::atomic::{AtomicBool, Ordering};

        #[test]
        /// A thread polling state and progress never makes an edge drop.
        fn readers_do_not_drop_edges() {
            let (driver, _, _) = driver();
            let driver = Arc::new(driver);
            driver.start(&config(100, 3)).unwrap();

            let polling = Arc::new(AtomicBool::new(true));
            let reader = {
                let driver = driver.clone();
                let polling = polling.clone();
                thread::spawn(move || {
                    let mut reads = 0usize;
                    loop {
                        let progress = driver.progress();
                        assert!(progress.done <= progress.total_len);
                        driver.state();
                        driver.board_count();
                        reads += 1;
                        if !polling.load(Ordering::Relaxed) {
                            return reads;
                        }
                    }
                })
            };

            for step in 1..300 {
                assert_eq!(
                    driver.on_trigger_edge().unwrap(),
                    EdgeOutcome::Loaded { step, total_len: 300 }
                );
            }
            assert_eq!(driver.on_trigger_edge().unwrap(), EdgeOutcome::Completed);
            polling.store(false, Ordering::Relaxed);
            assert!(reader.join().unwrap() > 0);
            assert_eq!(driver.state(), DriverState::Idle);
            assert_eq!(driver.progress(), Progress { done: 300, total_len: 300 });
        }
    }
}
