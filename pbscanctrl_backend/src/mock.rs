//! In-memory stand-ins for the boards and the DAQ trigger line.
//!
//! Both are cheap handles around shared state: clone one, hand the clone to the driver, and
//! keep your own handle to inspect recorded calls or to fire trigger edges.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use pbcompiler_backend::{BoardInstruction, OpCode};

use crate::board::PulseBoard;
use crate::error::{ChannelError, HardwareError};
use crate::trigger::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardCall {
    CountBoards,
    Select(usize),
    Init,
    SetCoreClock,
    BeginProgram,
    AddInstruction,
    EndProgram,
    Start,
    Stop,
    Reset,
    Close,
}

impl BoardCall {
    fn name(self) -> &'static str {
        match self {
            BoardCall::CountBoards => "count_boards",
            BoardCall::Select(_) => "select",
            BoardCall::Init => "init",
            BoardCall::SetCoreClock => "set_core_clock",
            BoardCall::BeginProgram => "begin_program",
            BoardCall::AddInstruction => "add_instruction",
            BoardCall::EndProgram => "end_program",
            BoardCall::Start => "start",
            BoardCall::Stop => "stop",
            BoardCall::Reset => "reset",
            BoardCall::Close => "close",
        }
    }
}

#[derive(Default)]
struct MockBoardState {
    board_count: usize,
    selected: Option<usize>,
    calls: Vec<BoardCall>,
    pending: Vec<BoardInstruction>,
    loaded: Vec<Vec<BoardInstruction>>,
    // (call, n): the n-th occurrence of `call` fails
    failure: Option<(BoardCall, usize)>,
}

impl MockBoardState {
    fn record(&mut self, call: BoardCall) -> Result<(), HardwareError> {
        self.calls.push(call);
        let occurrences = self.calls.iter().filter(|c| **c == call).count();
        match self.failure {
            Some((failing, n)) if failing == call && n == occurrences => Err(HardwareError {
                call: call.name(),
                board: self.selected,
                code: -1,
                message: "mock failure".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Records every call and keeps the last program loaded to each board.
#[derive(Clone)]
pub struct MockBoard {
    state: Arc<Mutex<MockBoardState>>,
}

impl MockBoard {
    pub fn new(board_count: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockBoardState {
                board_count,
                loaded: vec![Vec::new(); board_count],
                ..MockBoardState::default()
            })),
        }
    }

    /// Makes the `nth` (1-based) occurrence of `call` fail.
    pub fn fail_on(&self, call: BoardCall, nth: usize) {
        self.state.lock().failure = Some((call, nth));
    }

    pub fn calls(&self) -> Vec<BoardCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: BoardCall) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn loaded(&self, board: usize) -> Vec<BoardInstruction> {
        self.state
            .lock()
            .loaded
            .get(board)
            .cloned()
            .unwrap_or_default()
    }
}

impl PulseBoard for MockBoard {
    fn count_boards(&mut self) -> Result<usize, HardwareError> {
        let mut state = self.state.lock();
        state.record(BoardCall::CountBoards)?;
        Ok(state.board_count)
    }

    fn select(&mut self, board: usize) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        state.record(BoardCall::Select(board))?;
        if board >= state.board_count {
            return Err(HardwareError {
                call: "select",
                board: Some(board),
                code: -1,
                message: "Board number out of range".to_string(),
            });
        }
        state.selected = Some(board);
        Ok(())
    }

    fn init(&mut self) -> Result<(), HardwareError> {
        self.state.lock().record(BoardCall::Init)
    }

    fn set_core_clock(&mut self, _mhz: f64) -> Result<(), HardwareError> {
        self.state.lock().record(BoardCall::SetCoreClock)
    }

    fn begin_program(&mut self) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        state.record(BoardCall::BeginProgram)?;
        state.pending.clear();
        Ok(())
    }

    fn add_instruction(
        &mut self,
        channel_mask: u32,
        op_code: OpCode,
        op_data: u32,
        duration_ns: f64,
    ) -> Result<i32, HardwareError> {
        let mut state = self.state.lock();
        state.record(BoardCall::AddInstruction)?;
        state.pending.push(BoardInstruction {
            channel_mask,
            op_code,
            op_data,
            duration_ns,
        });
        Ok(state.pending.len() as i32 - 1)
    }

    fn end_program(&mut self) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        state.record(BoardCall::EndProgram)?;
        let program = std::mem::take(&mut state.pending);
        if let Some(board) = state.selected {
            state.loaded[board] = program;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), HardwareError> {
        self.state.lock().record(BoardCall::Start)
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.state.lock().record(BoardCall::Stop)
    }

    fn reset(&mut self) -> Result<(), HardwareError> {
        self.state.lock().record(BoardCall::Reset)
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.state.lock().record(BoardCall::Close)
    }

    fn version(&self) -> String {
        "mock".to_string()
    }
}

#[derive(Default)]
struct MockTriggerState {
    channels: Vec<String>,
    registrations: Vec<(TriggerHandle, String, EdgeCallback)>,
    next_id: u64,
    fail_unregister: bool,
}

/// A trigger line fired by hand through [`MockTrigger::fire`].
#[derive(Clone)]
pub struct MockTrigger {
    state: Arc<Mutex<MockTriggerState>>,
}

impl MockTrigger {
    /// A machine on which `channels` exist.
    pub fn new(channels: &[&str]) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockTriggerState {
                channels: channels.iter().map(|c| c.to_string()).collect(),
                ..MockTriggerState::default()
            })),
        }
    }

    pub fn registered(&self) -> usize {
        self.state.lock().registrations.len()
    }

    pub fn fail_unregister(&self, fail: bool) {
        self.state.lock().fail_unregister = fail;
    }

    /// Delivers one edge to every registered callback and returns how many were called.
    ///
    /// Callbacks run after the internal lock is released, so a callback may unregister itself.
    pub fn fire(&self) -> usize {
        let callbacks: Vec<EdgeCallback> = self
            .state
            .lock()
            .registrations
            .iter()
            .map(|(_, _, cb)| cb.clone())
            .collect();
        callbacks.iter().for_each(|cb| cb());
        callbacks.len()
    }
}

impl TriggerSource for MockTrigger {
    fn has_channel(&self, channel: &str) -> Result<bool, ChannelError> {
        Ok(self.state.lock().channels.iter().any(|c| c == channel))
    }

    fn register_edge_callback(
        &mut self,
        channel: &str,
        callback: EdgeCallback,
    ) -> Result<TriggerHandle, ChannelError> {
        let mut state = self.state.lock();
        if !state.channels.iter().any(|c| c == channel) {
            return Err(ChannelError::NotFound(channel.to_string()));
        }
        let handle = TriggerHandle(state.next_id);
        state.next_id += 1;
        state
            .registrations
            .push((handle, channel.to_string(), callback));
        debug!("Registered edge callback {:?} on {}", handle, channel);
        Ok(handle)
    }

    fn unregister(&mut self, handle: TriggerHandle) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        let before = state.registrations.len();
        state.registrations.retain(|(h, _, _)| *h != handle);
        if state.registrations.len() == before {
            return Err(ChannelError::UnknownHandle(handle.0));
        }
        if state.fail_unregister {
            return Err(ChannelError::Driver {
                channel: String::new(),
                code: -1,
                message: "mock failure".to_string(),
            });
        }
        Ok(())
    }
}
