use pbcompiler_backend::*;
use proptest::prelude::*;

// A typical imaging sequence: load, release (swept), image, branch back to the start.
fn imaging_program() -> (Program, ChannelLabels) {
    let spec = BoardSpec::default();
    let mut prog = Program::with_default_instructions(2, spec, 4);
    let mut labels = ChannelLabels::new(2, &spec);
    labels.set(0, 0, "MOT AOM").unwrap();
    labels.set(0, 1, "repump").unwrap();
    labels.set(1, 5, "camera").unwrap();

    prog.set_note(0, "load").unwrap();
    prog.set_channel_mask(0, 0, 0b11).unwrap();
    prog.set_duration(0, Duration::ms(500.0)).unwrap();

    prog.set_note(1, "release").unwrap();
    prog.set_duration(1, Duration::us(100.0)).unwrap();

    prog.set_note(2, "image").unwrap();
    prog.set_channel(2, 1, 5, true).unwrap();
    prog.set_duration(2, Duration::ns(200.0)).unwrap();

    prog.set_note(3, "wait for next trigger").unwrap();
    prog.set_op_code(3, OpCode::BRANCH).unwrap();
    (prog, labels)
}

#[test]
fn full_scan_workflow() {
    let (mut prog, _) = imaging_program();
    validate(&prog, true, true).unwrap();

    let slots = [
        ScanSlot::new(1, Duration::us(100.0), Duration::ms(1.0)),
        ScanSlot::new(2, Duration::ns(200.0), Duration::ns(1000.0)),
    ];
    validate_slots(&slots, prog.len(), prog.spec()).unwrap();
    let table = generate(&slots, 10, 3, true, Some(2024)).unwrap();
    assert_eq!(table.len(), 30);

    for step in 0..table.len() {
        for (instr, ns) in table.step(step) {
            prog.set_duration_ns(instr, ns).unwrap();
        }
        let boards = compile(&prog);
        assert_eq!(boards.len(), 2);
        // Written back in the instruction's own unit, resolving to the same ns
        assert_eq!(prog.instr(1).unwrap().duration.unit, DurationUnit::Us);
        assert!((boards[0][1].duration_ns - table.values()[[0, step]]).abs() < 1e-6);
        assert!((boards[1][2].duration_ns - table.values()[[1, step]]).abs() < 1e-6);
        assert_eq!(boards[1][2].channel_mask, 1 << 5);
        assert_eq!(boards[0][0].channel_mask, 0b11);
    }
}

#[test]
fn scan_slot_must_reference_existing_instruction() {
    let (prog, _) = imaging_program();
    let slots = [ScanSlot::new(4, Duration::us(1.0), Duration::us(2.0))];
    assert_eq!(
        validate_slots(&slots, prog.len(), prog.spec()),
        Err(ValidationError::ScanSlotOutOfRange {
            slot: 0,
            instr_index: 4,
            instruction_count: 4
        })
    );
}

#[test]
fn config_file_round_trip() {
    let (mut program, labels) = imaging_program();
    program.set_note(3, "wait for next trigger\n; then branch to #0").unwrap();
    let config = SequencerConfig {
        program,
        labels,
        scan: ScanConfig {
            slots: vec![ScanSlot::new(1, Duration::us(100.0), Duration::ms(1.0))],
            trigger_channel: "Dev1/port0/line0".to_string(),
            ..ScanConfig::default()
        },
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saved_configs").join("imaging.ini");
    save_config(&path, &config).unwrap();
    assert_eq!(load_config(&path, 2, &BoardSpec::default()).unwrap(), config);
}

fn any_op_code() -> impl Strategy<Value = OpCode> {
    (0i32..9).prop_map(|code| OpCode::from_code(code).unwrap())
}

fn any_duration() -> impl Strategy<Value = Duration> {
    prop_oneof![
        (5u32..100_000).prop_map(|v| Duration::ns(v as f64 * 10.0)),
        (50u32..1_000_000).prop_map(|v| Duration::us(v as f64 / 1000.0)),
        (1u32..100_000).prop_map(|v| Duration::ms(v as f64 / 100.0)),
    ]
}

// Printable text, control characters and the INI comment, separator and escape characters
fn any_note() -> impl Strategy<Value = String> {
    prop_oneof![
        "\\PC{0,16}",
        "[ -~\t\n\r]{0,16}",
        "[;#=:\\\\\\[\\]\"' \n]{0,8}",
    ]
}

prop_compose! {
    fn any_program(board_count: usize)
        (instrs in prop::collection::vec(
            (any_op_code(), 0u32..=1000, any_duration(),
             prop::collection::vec(0u32..(1 << 24), board_count), any_note()),
            1..8))
        -> Program
    {
        let mut prog = Program::new(board_count, BoardSpec::default());
        for (op_code, op_data, duration, masks, note) in instrs {
            let mut instr = Instruction::new(board_count, duration, op_code, op_data)
                .with_note(&note);
            instr.channel_mask = masks;
            prog.add_instruction(instr);
        }
        prog
    }
}

proptest! {
    #[test]
    /// Any program survives encode and decode unchanged, whatever its notes and labels hold.
    fn program_round_trips(
        prog in any_program(2),
        names in prop::collection::vec("[^,\\pC]{0,10}", 4)
    ) {
        let mut labels = ChannelLabels::new(2, prog.spec());
        for (channel, name) in names.iter().enumerate() {
            labels.set(1, channel * 5, name).unwrap();
        }
        let config = SequencerConfig {
            labels,
            program: prog,
            scan: ScanConfig::default(),
        };
        let doc = parse_document(&document_text(&encode_config(&config))).unwrap();
        let decoded = decode_config(&doc, 2, &BoardSpec::default()).unwrap();
        prop_assert_eq!(decoded, config);
    }

    #[test]
    /// Op-code validation fails exactly on a leading WAIT or a non-terminating last op code.
    fn op_code_rule(prog in any_program(1)) {
        let first = prog.instructions()[0].op_code;
        let last = prog.instructions()[prog.len() - 1].op_code;
        let expect_ok = first != OpCode::WAIT && last.can_end_program();
        prop_assert_eq!(validate(&prog, true, false).is_ok(), expect_ok);
    }

    #[test]
    /// Generated durations stay within the slot range.
    fn generated_values_within_range(
        start in 5u32..10_000, end in 5u32..10_000,
        samples in 2usize..20, reps in 1usize..5, seed in any::<u64>()
    ) {
        let (lo, hi) = (start.min(end) as f64 * 10.0, start.max(end) as f64 * 10.0);
        let slot = ScanSlot::new(0, Duration::ns(start as f64 * 10.0), Duration::ns(end as f64 * 10.0));
        let table = generate(&[slot], samples, reps, true, Some(seed)).unwrap();
        prop_assert_eq!(table.len(), samples * reps);
        for v in table.values().iter() {
            prop_assert!(*v >= lo - 1e-6 && *v <= hi + 1e-6);
        }
    }
}
