//! # PulseBlaster sequence compiler
//!
//! The pure half of the PulseBlasterUSB control stack: everything that can be done without
//! touching hardware.
//!
//! - [`program`]: the program table, one [`Instruction`] per step with a channel mask per board.
//! - [`compiler`]: sanity checks ([`validate`]) and the per-board instruction lists ([`compile`]).
//! - [`scan`]: scan slots and the generated duration sequences ([`generate`]).
//! - [`persist`]: config and scan-sequence files.
//!
//! Hardware limits are not constants but a [`BoardSpec`] value handed to every [`Program`].
//!
//! ```
//! use pbcompiler_backend::*;
//!
//! let mut prog = Program::with_default_instructions(1, BoardSpec::default(), 3);
//! prog.set_channel(0, 0, 5, true).unwrap();
//! prog.set_op_code(2, OpCode::BRANCH).unwrap();
//! validate(&prog, true, true).unwrap();
//!
//! let slots = [ScanSlot::new(1, Duration::us(1.0), Duration::us(5.0))];
//! validate_slots(&slots, prog.len(), prog.spec()).unwrap();
//! let table = generate(&slots, 5, 2, true, Some(0)).unwrap();
//! for (instr, ns) in table.step(0) {
//!     prog.set_duration_ns(instr, ns).unwrap();
//! }
//! assert_eq!(compile(&prog)[0].len(), 3);
//! ```

pub mod compiler;
pub mod error;
pub mod instruction;
pub mod persist;
pub mod program;
pub mod scan;
pub mod utils;

#[cfg(feature = "python")]
pub mod python;

pub use compiler::*;
pub use error::*;
pub use instruction::*;
pub use persist::*;
pub use program::*;
pub use scan::*;
pub use utils::*;
