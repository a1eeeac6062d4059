//! A minimal wrapper around the parts of the NI-DAQmx C library the trigger line needs.
//!
//! ## Overview
//!
//! [`DaqTrigger`] implements [`TriggerSource`] with one DAQmx task per registration: a digital
//! input channel on the trigger line, change-detection timing on its rising edge, and a
//! change-detection signal event that calls the registered [`EdgeCallback`]. The callback runs
//! on a thread owned by the DAQmx driver.
//!
//! Every DAQmx call goes through [`daqmx_call`], which turns a negative status code into a
//! [`ChannelError::Driver`] carrying the extended error text of the driver.
//!
//! ## Cleanup
//!
//! Dropping a task stops and clears it before its callback is released, so the driver never
//! calls into freed memory.
//!
//! ## Further Reading
//!
//! [NI-DAQmx C Reference](https://www.ni.com/docs/en-US/bundle/ni-daqmx-c-api-ref/page/cdaqmx/help_file_title.html).

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};

use libc;
use log::{debug, error, warn};

use crate::error::ChannelError;
use crate::trigger::*;

type CConstStr = *const libc::c_char;
type CCharBuf = *mut libc::c_char;
type CUint32 = libc::c_uint;
type CUint64 = libc::c_ulonglong;
type CInt32 = libc::c_int;
pub type TaskHandle = *mut libc::c_void;
type SignalEventCallback =
    Option<unsafe extern "C" fn(TaskHandle, CInt32, *mut libc::c_void) -> CInt32>;

pub const DAQMX_VAL_CHANPERLINE: CInt32 = 0;
pub const DAQMX_VAL_CONTSAMPS: CInt32 = 10123;
pub const DAQMX_VAL_CHANGEDETECTIONEVENT: CInt32 = 12511;
const ERROR_BUFFER_SIZE: usize = 2048;
const NAME_BUFFER_SIZE: usize = 8192;
// Samples per channel for the change-detection buffer
const CHANGE_DETECTION_BUFFER: CUint64 = 1000;

#[link(name = "NIDAQmx")]
extern "C" {
    fn DAQmxGetExtendedErrorInfo(errorString: CCharBuf, bufferSize: CUint32) -> CInt32;

    fn DAQmxCreateTask(taskName: CConstStr, taskHandle_ptr: &mut TaskHandle) -> CInt32;
    fn DAQmxStartTask(handle: TaskHandle) -> CInt32;
    fn DAQmxStopTask(handle: TaskHandle) -> CInt32;
    fn DAQmxClearTask(handle: TaskHandle) -> CInt32;

    fn DAQmxCreateDIChan(
        handle: TaskHandle,
        lines: CConstStr,
        name: CConstStr,
        lineGrouping: CInt32,
    ) -> CInt32;
    fn DAQmxCfgChangeDetectionTiming(
        handle: TaskHandle,
        risingEdgeChan: CConstStr,
        fallingEdgeChan: CConstStr,
        sampleMode: CInt32,
        sampsPerChan: CUint64,
    ) -> CInt32;
    fn DAQmxRegisterSignalEvent(
        handle: TaskHandle,
        signalID: CInt32,
        options: CUint32,
        callbackFunction: SignalEventCallback,
        callbackData: *mut libc::c_void,
    ) -> CInt32;

    fn DAQmxGetSysDevNames(data: CCharBuf, bufferSize: CUint32) -> CInt32;
    fn DAQmxGetDevDILines(device: CConstStr, data: CCharBuf, bufferSize: CUint32) -> CInt32;
}

/// Calls a DAQmx C-function and converts a negative status code into a
/// [`ChannelError::Driver`] with the driver's extended error text.
///
/// ```ignore
/// daqmx_call("Dev1/port0/line0", || unsafe { DAQmxStartTask(handle) })?;
/// ```
pub fn daqmx_call<F: FnOnce() -> CInt32>(channel: &str, func: F) -> Result<(), ChannelError> {
    let code = func();
    if code >= 0 {
        return Ok(());
    }
    let mut err_buff = [0 as libc::c_char; ERROR_BUFFER_SIZE];
    unsafe {
        DAQmxGetExtendedErrorInfo(err_buff.as_mut_ptr(), ERROR_BUFFER_SIZE as CUint32);
    }
    let message = unsafe { CStr::from_ptr(err_buff.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    error!("DAQmx Error: {}", message);
    Err(ChannelError::Driver {
        channel: channel.to_string(),
        code,
        message,
    })
}

fn c_string(channel: &str) -> Result<CString, ChannelError> {
    CString::new(channel).map_err(|_| ChannelError::Malformed(channel.to_string()))
}

/// Reads a comma-separated name list from a DAQmx property getter.
fn read_name_list<F: FnOnce(CCharBuf, CUint32) -> CInt32>(
    context: &str,
    getter: F,
) -> Result<Vec<String>, ChannelError> {
    let mut buff = [0 as libc::c_char; NAME_BUFFER_SIZE];
    daqmx_call(context, || getter(buff.as_mut_ptr(), NAME_BUFFER_SIZE as CUint32))?;
    let names = unsafe { CStr::from_ptr(buff.as_ptr()) }.to_string_lossy();
    Ok(names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

unsafe extern "C" fn on_change_detection(
    _handle: TaskHandle,
    _signal_id: CInt32,
    callback_data: *mut libc::c_void,
) -> CInt32 {
    // The callback may unregister its own task, which frees `callback_data`
    let callback = EdgeCallback::clone(&*(callback_data as *const EdgeCallback));
    if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
        error!("Trigger edge callback panicked");
    }
    0
}

/// A started change-detection task on one trigger line.
struct EdgeTask {
    handle: TaskHandle,
    channel: String,
    // Referenced by the driver through the event's callback data
    callback: Box<EdgeCallback>,
}

impl EdgeTask {
    fn start(channel: &str, callback: EdgeCallback) -> Result<Self, ChannelError> {
        let channel_cstr = c_string(channel)?;
        let empty_cstr = c_string("")?;
        let mut handle: TaskHandle = std::ptr::null_mut();
        daqmx_call(channel, || unsafe {
            DAQmxCreateTask(empty_cstr.as_ptr(), &mut handle)
        })?;
        // From here on, dropping `task` clears the DAQmx task
        let task = Self {
            handle,
            channel: channel.to_string(),
            callback: Box::new(callback),
        };
        daqmx_call(channel, || unsafe {
            DAQmxCreateDIChan(
                task.handle,
                channel_cstr.as_ptr(),
                empty_cstr.as_ptr(),
                DAQMX_VAL_CHANPERLINE,
            )
        })?;
        daqmx_call(channel, || unsafe {
            DAQmxCfgChangeDetectionTiming(
                task.handle,
                channel_cstr.as_ptr(),
                std::ptr::null(),
                DAQMX_VAL_CONTSAMPS,
                CHANGE_DETECTION_BUFFER,
            )
        })?;
        let callback_data = &*task.callback as *const EdgeCallback as *mut libc::c_void;
        daqmx_call(channel, || unsafe {
            DAQmxRegisterSignalEvent(
                task.handle,
                DAQMX_VAL_CHANGEDETECTIONEVENT,
                0,
                Some(on_change_detection),
                callback_data,
            )
        })?;
        daqmx_call(channel, || unsafe { DAQmxStartTask(task.handle) })?;
        Ok(task)
    }

    fn stop(&self) -> Result<(), ChannelError> {
        daqmx_call(&self.channel, || unsafe { DAQmxStopTask(self.handle) })
    }
}

impl Drop for EdgeTask {
    fn drop(&mut self) {
        if let Err(err) = daqmx_call(&self.channel, || unsafe { DAQmxClearTask(self.handle) }) {
            warn!("Failed to clear the trigger task: {}", err);
        }
    }
}

/// Rising-edge notifications from NI-DAQmx digital input lines.
#[derive(Default)]
pub struct DaqTrigger {
    tasks: HashMap<u64, EdgeTask>,
    next_id: u64,
}

// DAQmx task handles may be used from any thread.
unsafe impl Send for DaqTrigger {}

impl DaqTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every digital input line of every device on this machine.
    pub fn di_lines(&self) -> Result<Vec<String>, ChannelError> {
        let devices = read_name_list("", |buff, size| unsafe { DAQmxGetSysDevNames(buff, size) })?;
        let mut lines = Vec::new();
        for device in devices {
            let device_cstr = c_string(&device)?;
            lines.extend(read_name_list(&device, |buff, size| unsafe {
                DAQmxGetDevDILines(device_cstr.as_ptr(), buff, size)
            })?);
        }
        Ok(lines)
    }
}

impl TriggerSource for DaqTrigger {
    fn has_channel(&self, channel: &str) -> Result<bool, ChannelError> {
        Ok(self.di_lines()?.iter().any(|line| line == channel))
    }

    fn register_edge_callback(
        &mut self,
        channel: &str,
        callback: EdgeCallback,
    ) -> Result<TriggerHandle, ChannelError> {
        let task = EdgeTask::start(channel, callback)?;
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.insert(id, task);
        debug!("Started trigger task {} on {}", id, channel);
        Ok(TriggerHandle(id))
    }

    fn unregister(&mut self, handle: TriggerHandle) -> Result<(), ChannelError> {
        let task = self
            .tasks
            .remove(&handle.0)
            .ok_or(ChannelError::UnknownHandle(handle.0))?;
        debug!("Stopping trigger task {} on {}", handle.0, task.channel);
        task.stop()
    }
}
