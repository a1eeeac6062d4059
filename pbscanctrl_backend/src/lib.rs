//! # PulseBlaster scan control
//!
//! The hardware half of the PulseBlasterUSB control stack, built on the pure compiler in
//! [`pbcompiler_backend`].
//!
//! - [`board`]: the [`PulseBoard`] interface to a set of boards.
//! - [`trigger`]: the [`TriggerSource`] interface to a digital trigger line.
//! - [`scan_driver`]: [`ScanDriver`], which runs trigger-synchronized duration scans.
//! - [`mock`]: in-memory boards and trigger line.
//!
//! With the `hardware` feature, [`spinapi`] and [`nidaqmx`] provide the SpinAPI and NI-DAQmx
//! implementations. The `python` feature adds the Python module on top of them.

pub mod board;
pub mod error;
pub mod mock;
pub mod scan_driver;
pub mod scan_events;
pub mod trigger;
pub mod utils;

#[cfg(feature = "hardware")]
pub mod nidaqmx;
#[cfg(feature = "hardware")]
pub mod spinapi;

#[cfg(feature = "python")]
pub mod python;

pub use board::*;
pub use error::*;
pub use mock::*;
pub use scan_driver::*;
pub use scan_events::*;
pub use trigger::*;
pub use utils::*;

#[cfg(feature = "hardware")]
pub use nidaqmx::DaqTrigger;
#[cfg(feature = "hardware")]
pub use spinapi::SpinCore;
