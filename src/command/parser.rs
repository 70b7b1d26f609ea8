// src/command/parser.rs - Textual command parsing
//
// Forms: `x:<f>,y:<f>,z:<i>`, `base:<i>,elbow:<i>,claw:<i>,z:<i>`, and the
// bare tokens `calibrate`, `stop`, `resume`. Keys are located by substring
// search in the listed order and the last value runs to the end of the line.
use crate::arm::ArmError;
use crate::motion::MoveRequest;
use super::{DirectCommand, Intent};

const MOVE_KEYS: [&str; 3] = ["x:", "y:", "z:"];
const DIRECT_KEYS: [&str; 4] = ["base:", "elbow:", "claw:", "z:"];

/// Parse one command line. Any malformed field rejects the whole line.
pub fn parse_command(line: &str) -> Result<Intent, ArmError> {
    let input = line.trim();
    if input.is_empty() {
        return Err(ArmError::InvalidCommand("empty command".to_string()));
    }
    for (token, intent) in [
        ("calibrate", Intent::Calibrate),
        ("stop", Intent::Stop),
        ("resume", Intent::Resume),
    ] {
        if input.eq_ignore_ascii_case(token) {
            return Ok(intent);
        }
    }

    if input.contains(DIRECT_KEYS[0]) {
        let fields = split_fields(input, &DIRECT_KEYS)?;
        return Ok(Intent::DirectControl(DirectCommand {
            base: parse_int("base", fields[0])?,
            elbow: parse_int("elbow", fields[1])?,
            claw: parse_int("claw", fields[2])?,
            z: parse_int("z", fields[3])?,
        }));
    }

    let fields = split_fields(input, &MOVE_KEYS)?;
    Ok(Intent::MoveTo(MoveRequest {
        x: parse_float("x", fields[0])?,
        y: parse_float("y", fields[1])?,
        z: parse_int("z", fields[2])?,
    }))
}

/// Values following each key, with the separating comma stripped.
fn split_fields<'a>(input: &'a str, keys: &[&str]) -> Result<Vec<&'a str>, ArmError> {
    let mut spans = Vec::with_capacity(keys.len());
    let mut from = 0;
    for key in keys {
        let at = input[from..]
            .find(key)
            .map(|i| from + i)
            .ok_or_else(|| ArmError::InvalidCommand(format!("missing '{}' in '{}'", key, input)))?;
        spans.push((at, at + key.len()));
        from = at + key.len();
    }
    let fields = spans
        .iter()
        .enumerate()
        .map(|(i, &(_, start))| {
            let end = spans.get(i + 1).map_or(input.len(), |&(next, _)| next);
            input[start..end].trim().trim_end_matches(',').trim_end()
        })
        .collect();
    Ok(fields)
}

fn parse_float(name: &str, value: &str) -> Result<f64, ArmError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ArmError::InvalidCommand(format!("bad {} value '{}'", name, value))),
    }
}

fn parse_int(name: &str, value: &str) -> Result<i32, ArmError> {
    value
        .parse::<i32>()
        .map_err(|_| ArmError::InvalidCommand(format!("bad {} value '{}'", name, value)))
}
