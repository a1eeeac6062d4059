//! Config and scan-sequence files.
//!
//! A config file holds the board count, the channel labels, the whole program and the scanner
//! setup; [`encode_config`] and [`decode_config`] convert between a [`SequencerConfig`] and an
//! [`Ini`] document. The sequence file written at scan start records every generated scan step
//! for downstream acquisition software, see [`encode_scan_table`].
//!
//! Channel lists and TTL patterns are written highest channel first. Values are written with
//! backslash escapes for line breaks, backslashes and the INI comment and separator
//! characters, so any note reads back unchanged.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use ini::{EscapePolicy, ParseOption, Properties, WriteOption};
use log::{info, warn};

use crate::error::PersistenceError;
use crate::instruction::*;
use crate::program::{ChannelLabels, Program};
use crate::scan::{ScanConfig, ScanSlot, ScanTable};
use crate::utils::*;

pub use ini::Ini;

const GENERAL: &str = "General settings";
const SCANNER: &str = "Scanner settings";
const SEQ_SETTINGS: &str = "Settings";
const SCAN_DEVICE: &str = "PulseBlasterUSB";

/// Everything a config file describes.
#[derive(Clone, Debug, PartialEq)]
pub struct SequencerConfig {
    pub program: Program,
    pub labels: ChannelLabels,
    pub scan: ScanConfig,
}

fn instr_section(i: usize) -> String {
    format!("Instr {}", i)
}

fn scan_section(i: usize) -> String {
    format!("Scan Instr {}", i)
}

/// Shortest text that parses back to the same float.
fn float_str(v: f64) -> String {
    format!("{:?}", v)
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// Booleans the way config files spell them: `true`/`false`, `yes`/`no`, `on`/`off`, `1`/`0`,
/// in any case.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_options() -> ParseOption {
    ParseOption {
        // Quotes in notes are literal
        enabled_quote: false,
        enabled_escape: true,
        ..ParseOption::default()
    }
}

fn write_options() -> WriteOption {
    WriteOption {
        escape_policy: EscapePolicy::Reserved,
        kv_separator: " = ",
        ..WriteOption::default()
    }
}

/// Parses config or sequence file text. Lines starting with `#` or `;` are comments.
pub fn parse_document(text: &str) -> Result<Ini, PersistenceError> {
    Ini::load_from_str_opt(text, parse_options()).map_err(|err| PersistenceError::Syntax {
        line: err.line,
        text: err.msg.to_string(),
    })
}

/// The file text of `doc`, values escaped.
pub fn document_text(doc: &Ini) -> String {
    let mut buf = Vec::new();
    // Only the writer can fail, and a Vec never does
    let _ = doc.write_to_opt(&mut buf, write_options());
    String::from_utf8_lossy(&buf).into_owned()
}

fn properties<'a>(doc: &'a Ini, section: &str) -> Result<&'a Properties, PersistenceError> {
    doc.section(Some(section))
        .ok_or_else(|| PersistenceError::MissingSection(section.to_string()))
}

/// The value of `key` in `[section]`.
pub fn require<'a>(doc: &'a Ini, section_name: &str, key: &str) -> Result<&'a str, PersistenceError> {
    properties(doc, section_name)?
        .get(key)
        .ok_or_else(|| PersistenceError::MissingKey {
            section: section_name.to_string(),
            key: key.to_string(),
        })
}

fn parse_value<T: FromStr>(doc: &Ini, section: &str, key: &str) -> Result<T, PersistenceError> {
    let raw = require(doc, section, key)?;
    raw.trim().parse().map_err(|_| PersistenceError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: raw.to_string(),
    })
}

/// For parsers whose error is already a [`PersistenceError`] (units, op codes, TTL patterns).
fn parse_with<T>(
    doc: &Ini,
    section: &str,
    key: &str,
    parse: impl FnOnce(&str) -> Result<T, PersistenceError>,
) -> Result<T, PersistenceError> {
    let raw = require(doc, section, key)?;
    parse(raw).map_err(|e| match e {
        PersistenceError::InvalidValue { value, .. } => PersistenceError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value,
        },
        other => other,
    })
}

fn parse_duration(
    doc: &Ini,
    section: &str,
    value_key: &str,
    unit_key: &str,
) -> Result<Duration, PersistenceError> {
    let value: f64 = parse_value(doc, section, value_key)?;
    let unit = parse_with(doc, section, unit_key, DurationUnit::from_str)?;
    Ok(Duration::new(value, unit))
}

pub fn encode_config(config: &SequencerConfig) -> Ini {
    let program = &config.program;
    let spec = program.spec();
    let mut doc = Ini::new();

    let mut general = doc.with_section(Some(GENERAL));
    general
        .set("number of boards", program.board_count().to_string())
        .set("number of instructions", program.len().to_string());
    for board in 0..program.board_count() {
        let connections = config
            .labels
            .board(board)
            .map(|labels| labels.iter().rev().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        general.set(format!("board {} connections", board), connections);
    }

    for (i, instr) in program.instructions().iter().enumerate() {
        let mut section = doc.with_section(Some(instr_section(i)));
        section.set("instr note", instr.note.trim());
        for (board, mask) in instr.channel_mask.iter().enumerate() {
            section.set(
                format!("board {} ttl output pattern", board),
                ttl_pattern(*mask, spec),
            );
        }
        section
            .set("op code", instr.op_code.to_string())
            .set("op data", instr.op_data.to_string())
            .set("duration time", float_str(instr.duration.value))
            .set("duration unit", instr.duration.unit.to_string());
    }

    let scan = &config.scan;
    doc.with_section(Some(SCANNER))
        .set("sample number", scan.sample_count.to_string())
        .set("repetition number", scan.repeat_count.to_string())
        .set("number of scan instr", scan.slots.len().to_string())
        .set("randomize sequence", bool_str(scan.randomize))
        .set("DAQ DI channel", scan.trigger_channel.as_str());

    for (i, slot) in scan.slots.iter().enumerate() {
        doc.with_section(Some(scan_section(i)))
            .set("instr no.", slot.instr_index.to_string())
            .set("start duration time", float_str(slot.start.value))
            .set("start duration unit", slot.start.unit.to_string())
            .set("end duration time", float_str(slot.end.value))
            .set("end duration unit", slot.end.unit.to_string());
    }
    doc
}

/// Rebuilds a config for `board_count` boards.
///
/// Boards the file has no data for stay blank; boards in the file beyond `board_count` are
/// ignored. A file without a scanner section gets the default scanner setup.
pub fn decode_config(
    doc: &Ini,
    board_count: usize,
    spec: &BoardSpec,
) -> Result<SequencerConfig, PersistenceError> {
    let file_boards: usize = parse_value(doc, GENERAL, "number of boards")?;
    let boards = file_boards.min(board_count);
    let instr_count: usize = parse_value(doc, GENERAL, "number of instructions")?;

    let mut labels = ChannelLabels::new(board_count, spec);
    for board in 0..boards {
        let key = format!("board {} connections", board);
        let raw = require(doc, GENERAL, &key)?;
        let mut connections: Vec<&str> = raw.split(',').map(str::trim).collect();
        connections.reverse();
        for (channel, label) in connections.into_iter().take(spec.channels_per_board).enumerate() {
            labels.set(board, channel, label)?;
        }
    }

    let mut program = Program::new(board_count, *spec);
    for i in 0..instr_count {
        let section = instr_section(i);
        let note = require(doc, &section, "instr note")?.to_string();
        let duration = parse_duration(doc, &section, "duration time", "duration unit")?;
        let op_code = parse_with(doc, &section, "op code", OpCode::from_str)?;
        let op_data: u32 = parse_value(doc, &section, "op data")?;
        if op_data > spec.max_op_data {
            return Err(PersistenceError::InvalidValue {
                section,
                key: "op data".to_string(),
                value: op_data.to_string(),
            });
        }
        let mut instr = Instruction::new(board_count, duration, op_code, op_data).with_note(&note);
        for board in 0..boards {
            let key = format!("board {} ttl output pattern", board);
            instr.channel_mask[board] =
                parse_with(doc, &section, &key, |s| parse_ttl_pattern(s, spec))?;
        }
        program.add_instruction(instr);
    }

    let scan = if doc.section(Some(SCANNER)).is_some() {
        decode_scan_config(doc)?
    } else {
        warn!("No [{}] section, using default scanner settings", SCANNER);
        ScanConfig::default()
    };

    Ok(SequencerConfig {
        program,
        labels,
        scan,
    })
}

fn decode_scan_config(doc: &Ini) -> Result<ScanConfig, PersistenceError> {
    let slot_count: usize = parse_value(doc, SCANNER, "number of scan instr")?;
    let slots = (0..slot_count)
        .map(|i| {
            let section = scan_section(i);
            Ok(ScanSlot {
                instr_index: parse_value(doc, &section, "instr no.")?,
                start: parse_duration(doc, &section, "start duration time", "start duration unit")?,
                end: parse_duration(doc, &section, "end duration time", "end duration unit")?,
            })
        })
        .collect::<Result<Vec<_>, PersistenceError>>()?;

    Ok(ScanConfig {
        sample_count: parse_value(doc, SCANNER, "sample number")?,
        repeat_count: parse_value(doc, SCANNER, "repetition number")?,
        randomize: parse_with(doc, SCANNER, "randomize sequence", |s| {
            parse_bool(s).ok_or_else(|| PersistenceError::InvalidValue {
                section: String::new(),
                key: String::new(),
                value: s.to_string(),
            })
        })?,
        trigger_channel: require(doc, SCANNER, "DAQ DI channel")?.to_string(),
        slots,
    })
}

fn write_file(path: &Path, doc: &Ini, overwrite: bool) -> Result<(), PersistenceError> {
    let io = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    if !overwrite && path.exists() {
        return Err(PersistenceError::AlreadyExists(path.to_path_buf()));
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io)?;
    }
    doc.write_to_file_opt(path, write_options()).map_err(io)
}

pub fn save_config(path: &Path, config: &SequencerConfig) -> Result<(), PersistenceError> {
    write_file(path, &encode_config(config), true)?;
    info!("Saved config to {}", path.display());
    Ok(())
}

pub fn load_config(
    path: &Path,
    board_count: usize,
    spec: &BoardSpec,
) -> Result<SequencerConfig, PersistenceError> {
    let text = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = decode_config(&parse_document(&text)?, board_count, spec)?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// The per-step record of a realized scan, one `[Sequence element k]` section per step.
///
/// Two slots sweeping the same instruction share one key; the later slot wins.
pub fn encode_scan_table(table: &ScanTable) -> Ini {
    let mut doc = Ini::new();
    let mut settings = doc.with_section(Some(SEQ_SETTINGS));
    settings
        .set("sample number", table.sample_count().to_string())
        .set("repetition number", table.repeat_count().to_string())
        .set("element number", table.len().to_string())
        .set("scan device", SCAN_DEVICE);
    if let Some(first) = table.instr_indices().first() {
        settings.set("scan param", format!("instr no. {}", first));
    }
    for step in 0..table.len() {
        let mut section = doc.with_section(Some(format!("Sequence element {}", step)));
        for (instr, ns) in table.step(step) {
            section.set(
                format!("{} [instr no. {} (ns)]", SCAN_DEVICE, instr),
                float_str(ns),
            );
        }
    }
    doc
}

pub fn save_scan_table(path: &Path, table: &ScanTable, overwrite: bool) -> Result<(), PersistenceError> {
    write_file(path, &encode_scan_table(table), overwrite)?;
    info!("Saved scan sequence to {}", path.display());
    Ok(())
}
