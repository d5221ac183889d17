//! Structural script parsing.
//!
//! No script execution happens here: the engine only needs to know that a
//! signature script is push-only and that a pubkey script tokenizes without
//! running off the end. The processor maps flaws onto the offending
//! transaction.

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_1NEGATE: u8 = 0x4f;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;

/// Structural defect found while tokenizing a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlaw {
    /// A signature script carried an opcode that does more than push data.
    NonPushOpcode,
    /// A push opcode promised more bytes than the script contains.
    TruncatedPush,
}

/// Signature scripts may only push data: literal pushes, PUSHDATA1/2/4 and
/// the small-integer opcodes.
pub fn check_push_only(script: &[u8]) -> Result<(), ScriptFlaw> {
    let mut cursor = 0;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        if opcode == 0x00 || opcode == OP_1NEGATE || (OP_1..=OP_16).contains(&opcode) {
            continue;
        }
        match push_length(script, &mut cursor, opcode)? {
            Some(len) => advance(script, &mut cursor, len)?,
            None => return Err(ScriptFlaw::NonPushOpcode),
        }
    }
    Ok(())
}

/// A pubkey script may carry any opcode, but every push must fit within the
/// script bytes.
pub fn check_well_formed(script: &[u8]) -> Result<(), ScriptFlaw> {
    let mut cursor = 0;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        if let Some(len) = push_length(script, &mut cursor, opcode)? {
            advance(script, &mut cursor, len)?;
        }
    }
    Ok(())
}

/// Payload length for push opcodes, `None` for everything else. Advances
/// `cursor` past the length bytes of PUSHDATA forms.
fn push_length(
    script: &[u8],
    cursor: &mut usize,
    opcode: u8,
) -> Result<Option<usize>, ScriptFlaw> {
    match opcode {
        0x01..=0x4b => Ok(Some(opcode as usize)),
        OP_PUSHDATA1 => {
            let bytes = take(script, cursor, 1)?;
            Ok(Some(bytes[0] as usize))
        }
        OP_PUSHDATA2 => {
            let bytes = take(script, cursor, 2)?;
            Ok(Some(u16::from_le_bytes([bytes[0], bytes[1]]) as usize))
        }
        OP_PUSHDATA4 => {
            let bytes = take(script, cursor, 4)?;
            Ok(Some(
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize,
            ))
        }
        _ => Ok(None),
    }
}

fn take<'a>(script: &'a [u8], cursor: &mut usize, count: usize) -> Result<&'a [u8], ScriptFlaw> {
    let end = cursor.checked_add(count).ok_or(ScriptFlaw::TruncatedPush)?;
    if end > script.len() {
        return Err(ScriptFlaw::TruncatedPush);
    }
    let bytes = &script[*cursor..end];
    *cursor = end;
    Ok(bytes)
}

fn advance(script: &[u8], cursor: &mut usize, count: usize) -> Result<(), ScriptFlaw> {
    let end = cursor.checked_add(count).ok_or(ScriptFlaw::TruncatedPush)?;
    if end > script.len() {
        return Err(ScriptFlaw::TruncatedPush);
    }
    *cursor = end;
    Ok(())
}
