//! Validation and compilation of a [`Program`] into per-board instruction lists.
//!
//! [`validate`] is the sanity check run before a program is loaded. [`compile`] is a pure
//! function producing, for every board, the list of `(channel_mask, op_code, op_data,
//! duration_ns)` tuples that the board interface consumes one `add_instruction` call at a time.

use std::fmt;

use log::debug;

use crate::error::ValidationError;
use crate::instruction::OpCode;
use crate::program::Program;
use crate::utils::{DurationUnit, DurationViolation};

/// One hardware instruction for one board.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardInstruction {
    pub channel_mask: u32,
    pub op_code: OpCode,
    pub op_data: u32,
    pub duration_ns: f64,
}

impl fmt::Display for BoardInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({:#08x}, {}, {}, {} ns)",
            self.channel_mask, self.op_code, self.op_data, self.duration_ns
        )
    }
}

/// Sanity check of a program.
///
/// - `check_opcodes`: the first instruction must not be `WAIT`, and the last one must be able
///   to end a program (not `CONTINUE`, `LOOP`, `END_LOOP`, `LONG_DELAY` or `WAIT`).
/// - `check_pulse_widths`: every duration must reach the pulse-width floor, and durations
///   typed in ns must be a multiple of the time resolution.
///
/// The first failing rule is reported, op codes before pulse widths and instructions in
/// ascending order.
///
/// # Example
/// ```
/// use pbcompiler_backend::*;
///
/// let mut prog = Program::with_default_instructions(1, BoardSpec::default(), 2);
/// assert_eq!(
///     validate(&prog, true, false),
///     Err(ValidationError::IllegalLastOpCode { index: 1, op_code: OpCode::CONTINUE })
/// );
/// prog.set_op_code(1, OpCode::BRANCH).unwrap();
/// assert!(validate(&prog, true, true).is_ok());
/// ```
pub fn validate(
    program: &Program,
    check_opcodes: bool,
    check_pulse_widths: bool,
) -> Result<(), ValidationError> {
    if check_opcodes {
        check_op_codes(program)?;
    }
    if check_pulse_widths {
        check_pulse_widths_(program)?;
    }
    Ok(())
}

fn check_op_codes(program: &Program) -> Result<(), ValidationError> {
    let instrs = program.instructions();
    let (first, last) = match (instrs.first(), instrs.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(ValidationError::EmptyProgram),
    };
    if first.op_code == OpCode::WAIT {
        return Err(ValidationError::FirstInstructionWait);
    }
    if !last.op_code.can_end_program() {
        return Err(ValidationError::IllegalLastOpCode {
            index: instrs.len() - 1,
            op_code: last.op_code,
        });
    }
    Ok(())
}

fn check_pulse_widths_(program: &Program) -> Result<(), ValidationError> {
    let spec = program.spec();
    for (index, instr) in program.instructions().iter().enumerate() {
        match instr.duration.check(spec) {
            Ok(()) => {}
            Err(DurationViolation::Resolution) => {
                debug_assert_eq!(instr.duration.unit, DurationUnit::Ns);
                return Err(ValidationError::ResolutionViolation {
                    index,
                    value: instr.duration.value,
                    resolution_ns: spec.resolution_ns,
                });
            }
            Err(DurationViolation::TooShort) => {
                return Err(ValidationError::PulseTooShort {
                    index,
                    duration_ns: instr.duration_ns(),
                    min_ns: spec.min_pulse_ns,
                });
            }
        }
    }
    Ok(())
}

/// Compiles `program` for all of its boards. No validation is performed.
pub fn compile(program: &Program) -> Vec<Vec<BoardInstruction>> {
    compile_for(program, program.board_count())
}

/// Compiles `program` for `board_count` boards. Boards the program has no masks for get an
/// all-low pattern; extra masks are ignored.
///
/// # Example
/// ```
/// use pbcompiler_backend::*;
///
/// let mut prog = Program::with_default_instructions(2, BoardSpec::default(), 1);
/// prog.set_channel(0, 1, 0, true).unwrap();
/// prog.set_channel(0, 1, 2, true).unwrap();
/// let boards = compile(&prog);
/// assert_eq!(boards[0][0].channel_mask, 0);
/// assert_eq!(boards[1][0].channel_mask, 0b101);
/// assert_eq!(boards[1][0].duration_ns, 1e7);
/// ```
pub fn compile_for(program: &Program, board_count: usize) -> Vec<Vec<BoardInstruction>> {
    let compiled: Vec<Vec<BoardInstruction>> = (0..board_count)
        .map(|board| {
            program
                .instructions()
                .iter()
                .map(|instr| BoardInstruction {
                    channel_mask: instr.channel_mask.get(board).copied().unwrap_or(0),
                    op_code: instr.op_code,
                    op_data: instr.op_data,
                    duration_ns: instr.duration_ns(),
                })
                .collect()
        })
        .collect();
    debug!(
        "Compiled {} instructions for {} boards",
        program.len(),
        board_count
    );
    compiled
}

#[cfg(test)]
mod test {
    use crate::compiler::*;
    use crate::utils::*;

    fn prog(ops: &[OpCode]) -> Program {
        let mut prog = Program::with_default_instructions(1, BoardSpec::default(), ops.len());
        for (i, op) in ops.iter().enumerate() {
            prog.set_op_code(i, *op).unwrap();
        }
        prog
    }

    mod op_codes {
        use super::*;

        #[test]
        /// Op-code validation fails iff the first instruction is WAIT or the last one can't end
        /// a program. Every (first, last) pair of a two-instruction program is checked.
        fn first_and_last_rules() {
            for first in OpCode::ALL {
                for last in OpCode::ALL {
                    let result = validate(&prog(&[first, last]), true, false);
                    let expected_fail = first == OpCode::WAIT
                        || matches!(
                            last,
                            OpCode::CONTINUE
                                | OpCode::LOOP
                                | OpCode::END_LOOP
                                | OpCode::LONG_DELAY
                                | OpCode::WAIT
                        );
                    assert_eq!(result.is_err(), expected_fail, "{first} ... {last}");
                }
            }
        }

        #[test]
        fn first_rule_reported_before_last_rule() {
            assert_eq!(
                validate(&prog(&[OpCode::WAIT, OpCode::WAIT]), true, false),
                Err(ValidationError::FirstInstructionWait)
            );
        }

        #[test]
        /// A single WAIT instruction is both first and last.
        fn single_instruction() {
            assert_eq!(
                validate(&prog(&[OpCode::WAIT]), true, false),
                Err(ValidationError::FirstInstructionWait)
            );
            assert!(validate(&prog(&[OpCode::STOP]), true, false).is_ok());
        }

        #[test]
        fn empty_program() {
            let prog = Program::new(1, BoardSpec::default());
            assert_eq!(
                validate(&prog, true, true),
                Err(ValidationError::EmptyProgram)
            );
            // Nothing to check without op codes
            assert!(validate(&prog, false, true).is_ok());
        }

        #[test]
        fn skipped_when_not_requested() {
            assert!(validate(&prog(&[OpCode::WAIT, OpCode::CONTINUE]), false, true).is_ok());
        }
    }

    mod pulse_widths {
        use super::*;

        #[test]
        fn reports_failing_index() {
            let mut prog = prog(&[OpCode::CONTINUE, OpCode::CONTINUE, OpCode::STOP]);
            prog.set_duration(1, Duration::ns(40.0)).unwrap();
            prog.set_duration(2, Duration::ns(15.0)).unwrap();
            assert_eq!(
                validate(&prog, false, true),
                Err(ValidationError::PulseTooShort {
                    index: 1,
                    duration_ns: 40.0,
                    min_ns: 50.0
                })
            );
            prog.set_duration(1, Duration::us(0.05)).unwrap();
            assert_eq!(
                validate(&prog, false, true),
                Err(ValidationError::ResolutionViolation {
                    index: 2,
                    value: 15.0,
                    resolution_ns: 10.0
                })
            );
        }

        #[test]
        fn sub_floor_in_other_units() {
            let mut prog = prog(&[OpCode::STOP]);
            prog.set_duration(0, Duration::ms(0.00004)).unwrap();
            assert!(matches!(
                validate(&prog, true, true),
                Err(ValidationError::PulseTooShort { index: 0, .. })
            ));
            prog.set_duration(0, Duration::us(0.06)).unwrap();
            assert!(validate(&prog, true, true).is_ok());
        }

        #[test]
        fn op_codes_checked_first() {
            let mut prog = prog(&[OpCode::CONTINUE]);
            prog.set_duration(0, Duration::ns(10.0)).unwrap();
            assert!(matches!(
                validate(&prog, true, true),
                Err(ValidationError::IllegalLastOpCode { index: 0, .. })
            ));
        }
    }

    mod compilation {
        use super::*;

        #[test]
        fn per_board_masks_and_shared_fields() {
            let mut prog = Program::with_default_instructions(3, BoardSpec::default(), 2);
            prog.set_channel(0, 0, 0, true).unwrap();
            prog.set_channel(0, 2, 23, true).unwrap();
            prog.set_channel(1, 2, 1, true).unwrap();
            prog.set_op_code(1, OpCode::BRANCH).unwrap();
            prog.set_op_data(1, 0).unwrap();
            prog.set_duration(1, Duration::us(1.5)).unwrap();

            let boards = compile(&prog);
            assert_eq!(boards.len(), 3);
            assert!(boards.iter().all(|b| b.len() == 2));
            assert_eq!(boards[0][0].channel_mask, 1);
            assert_eq!(boards[1][0].channel_mask, 0);
            assert_eq!(boards[2][0].channel_mask, 1 << 23);
            assert_eq!(boards[2][1].channel_mask, 0b10);
            for board in &boards {
                assert_eq!(board[1].op_code, OpCode::BRANCH);
                assert_eq!(board[1].duration_ns, 1500.0);
                assert_eq!(board[0].duration_ns, 1e7);
            }
        }

        #[test]
        fn compile_for_pads_and_truncates() {
            let mut prog = Program::with_default_instructions(1, BoardSpec::default(), 1);
            prog.set_channel(0, 0, 4, true).unwrap();
            let padded = compile_for(&prog, 2);
            assert_eq!(padded[0][0].channel_mask, 16);
            assert_eq!(padded[1][0].channel_mask, 0);
            assert!(compile_for(&prog, 0).is_empty());
        }
    }
}
