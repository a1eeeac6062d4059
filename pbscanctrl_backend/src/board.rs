//! The board interface consumed by the scan driver.
//!
//! [`PulseBoard`] mirrors the SpinAPI calls one to one: a board is selected, then programmed,
//! started, stopped or reset. Every call returns the vendor's error text verbatim inside a
//! [`HardwareError`].
//!
//! The composite operations the driver needs (initialise every board, load a compiled program,
//! arm for an external trigger) are default methods, so an implementation only has to provide
//! the primitive calls.

use log::{debug, info};

use pbcompiler_backend::{BoardInstruction, OpCode};

use crate::error::HardwareError;

pub trait PulseBoard {
    fn count_boards(&mut self) -> Result<usize, HardwareError>;
    fn select(&mut self, board: usize) -> Result<(), HardwareError>;
    fn init(&mut self) -> Result<(), HardwareError>;
    fn set_core_clock(&mut self, mhz: f64) -> Result<(), HardwareError>;
    fn begin_program(&mut self) -> Result<(), HardwareError>;
    /// Returns the address of the new instruction.
    fn add_instruction(
        &mut self,
        channel_mask: u32,
        op_code: OpCode,
        op_data: u32,
        duration_ns: f64,
    ) -> Result<i32, HardwareError>;
    fn end_program(&mut self) -> Result<(), HardwareError>;
    fn start(&mut self) -> Result<(), HardwareError>;
    fn stop(&mut self) -> Result<(), HardwareError>;
    fn reset(&mut self) -> Result<(), HardwareError>;

    /// Releases the boards. Must be the last call.
    fn close(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn version(&self) -> String {
        String::new()
    }

    /// Counts, selects and initialises every board, and sets its core clock. Returns the number
    /// of boards found.
    fn init_boards(&mut self, core_clock_mhz: f64) -> Result<usize, HardwareError> {
        let board_count = self.count_boards()?;
        info!(
            "Found {} board(s), library version {}",
            board_count,
            self.version()
        );
        for board in 0..board_count {
            self.select(board)?;
            self.init()?;
            self.set_core_clock(core_clock_mhz)?;
        }
        Ok(board_count)
    }

    /// Writes `compiled[b]` to board `b` for every board.
    fn load_program(&mut self, compiled: &[Vec<BoardInstruction>]) -> Result<(), HardwareError> {
        for (board, instructions) in compiled.iter().enumerate() {
            self.select(board)?;
            self.begin_program()?;
            for instr in instructions {
                self.add_instruction(
                    instr.channel_mask,
                    instr.op_code,
                    instr.op_data,
                    instr.duration_ns,
                )?;
            }
            self.end_program()?;
        }
        debug!("Loaded program to {} board(s)", compiled.len());
        Ok(())
    }

    /// Stops, resets and restarts every board so that it waits for an external trigger.
    fn arm_boards(&mut self, board_count: usize) -> Result<(), HardwareError> {
        for board in 0..board_count {
            self.select(board)?;
            self.stop()?;
            self.reset()?;
            self.start()?;
        }
        Ok(())
    }

    /// Starts every board in turn; the boards are not started simultaneously.
    fn start_boards(&mut self, board_count: usize) -> Result<(), HardwareError> {
        for board in 0..board_count {
            self.select(board)?;
            self.start()?;
        }
        Ok(())
    }
}
