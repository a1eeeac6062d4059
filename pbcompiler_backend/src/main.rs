use pbcompiler_backend::*;

fn main() -> Result<(), ValidationError> {
    let spec = BoardSpec::default();
    let mut prog = Program::with_default_instructions(1, spec, 3);
    prog.set_channel(0, 0, 0, true)?;
    prog.set_duration(1, Duration::us(1.0))?;
    prog.set_channel(1, 0, 4, true)?;
    prog.set_op_code(2, OpCode::BRANCH)?;

    validate(&prog, true, true)?;
    for instr in &compile(&prog)[0] {
        println!("{}", instr);
    }

    let slots = [ScanSlot::new(1, Duration::us(1.0), Duration::us(2.0))];
    validate_slots(&slots, prog.len(), prog.spec())?;
    let table = generate(&slots, 3, 2, true, Some(0))?;
    println!("{}", document_text(&encode_scan_table(&table)));
    Ok(())
}
