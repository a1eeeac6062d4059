//! SpinCore PulseBlasterUSB boards through the SpinAPI C library.
//!
//! [`SpinCore`] implements [`PulseBoard`] one call per SpinAPI function. SpinAPI signals a
//! failure with a negative status code and leaves the reason in `pb_get_error`; [`pb_call`]
//! reads it back into a [`HardwareError`]. Instruction lengths are given to the library in
//! nanoseconds.
//!
//! SpinAPI keeps a single "current board" per process, so at most one [`SpinCore`] should
//! exist at a time.

use std::ffi::CStr;

use libc;
use log::{debug, warn};

use pbcompiler_backend::OpCode;

use crate::board::PulseBoard;
use crate::error::HardwareError;

type CConstStr = *const libc::c_char;
type CDouble = libc::c_double;
type CInt = libc::c_int;
type CUint = libc::c_uint;

const PULSE_PROGRAM: CInt = 0;

#[link(name = "spinapi64")]
extern "C" {
    fn pb_count_boards() -> CInt;
    fn pb_select_board(board_num: CInt) -> CInt;
    fn pb_init() -> CInt;
    fn pb_core_clock(clock_freq: CDouble);
    fn pb_start_programming(device: CInt) -> CInt;
    fn pb_inst_pbonly(flags: CUint, inst: CInt, inst_data: CInt, length: CDouble) -> CInt;
    fn pb_stop_programming() -> CInt;
    fn pb_start() -> CInt;
    fn pb_stop() -> CInt;
    fn pb_reset() -> CInt;
    fn pb_close() -> CInt;
    fn pb_get_error() -> CConstStr;
    fn pb_get_version() -> CConstStr;
}

fn c_str_lossy(ptr: CConstStr) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Calls a SpinAPI function and converts a negative status code into a [`HardwareError`]
/// carrying `pb_get_error`. Non-negative codes are returned.
pub fn pb_call<F: FnOnce() -> CInt>(
    call: &'static str,
    board: Option<usize>,
    func: F,
) -> Result<CInt, HardwareError> {
    let code = func();
    if code >= 0 {
        return Ok(code);
    }
    Err(HardwareError {
        call,
        board,
        code,
        message: c_str_lossy(unsafe { pb_get_error() }),
    })
}

/// The PulseBlasterUSB boards attached to this machine.
pub struct SpinCore {
    selected: Option<usize>,
    closed: bool,
}

// SpinAPI holds no thread-affine state; calls are serialized by the owner.
unsafe impl Send for SpinCore {}

impl SpinCore {
    pub fn new() -> Self {
        Self {
            selected: None,
            // Nothing to close until a board is initialised
            closed: true,
        }
    }
}

impl Default for SpinCore {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseBoard for SpinCore {
    fn count_boards(&mut self) -> Result<usize, HardwareError> {
        pb_call("pb_count_boards", None, || unsafe { pb_count_boards() }).map(|n| n as usize)
    }

    fn select(&mut self, board: usize) -> Result<(), HardwareError> {
        pb_call("pb_select_board", Some(board), || unsafe {
            pb_select_board(board as CInt)
        })?;
        self.selected = Some(board);
        Ok(())
    }

    fn init(&mut self) -> Result<(), HardwareError> {
        // pb_init reports failure with any non-zero code
        let code = unsafe { pb_init() };
        if code != 0 {
            return Err(HardwareError {
                call: "pb_init",
                board: self.selected,
                code,
                message: c_str_lossy(unsafe { pb_get_error() }),
            });
        }
        self.closed = false;
        Ok(())
    }

    fn set_core_clock(&mut self, mhz: f64) -> Result<(), HardwareError> {
        unsafe { pb_core_clock(mhz as CDouble) };
        Ok(())
    }

    fn begin_program(&mut self) -> Result<(), HardwareError> {
        pb_call("pb_start_programming", self.selected, || unsafe {
            pb_start_programming(PULSE_PROGRAM)
        })
        .map(|_| ())
    }

    fn add_instruction(
        &mut self,
        channel_mask: u32,
        op_code: OpCode,
        op_data: u32,
        duration_ns: f64,
    ) -> Result<i32, HardwareError> {
        pb_call("pb_inst_pbonly", self.selected, || unsafe {
            pb_inst_pbonly(
                channel_mask as CUint,
                op_code.code() as CInt,
                op_data as CInt,
                duration_ns as CDouble,
            )
        })
    }

    fn end_program(&mut self) -> Result<(), HardwareError> {
        pb_call("pb_stop_programming", self.selected, || unsafe {
            pb_stop_programming()
        })
        .map(|_| ())
    }

    fn start(&mut self) -> Result<(), HardwareError> {
        pb_call("pb_start", self.selected, || unsafe { pb_start() }).map(|_| ())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        pb_call("pb_stop", self.selected, || unsafe { pb_stop() }).map(|_| ())
    }

    fn reset(&mut self) -> Result<(), HardwareError> {
        pb_call("pb_reset", self.selected, || unsafe { pb_reset() }).map(|_| ())
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        if self.closed {
            return Ok(());
        }
        pb_call("pb_close", None, || unsafe { pb_close() })?;
        self.closed = true;
        debug!("SpinAPI closed");
        Ok(())
    }

    fn version(&self) -> String {
        c_str_lossy(unsafe { pb_get_version() })
    }
}

impl Drop for SpinCore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("{}", err);
        }
    }
}
