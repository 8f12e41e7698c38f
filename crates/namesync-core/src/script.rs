//! Name-script codec.
//!
//! Name operations are carried as a prefix on an ordinary output script:
//!
//! ```text
//! OP_1 <hash>                   OP_2DROP           <address script>   name_new
//! OP_2 <name> <rand> <value>    OP_2DROP OP_2DROP  <address script>   name_firstupdate
//! OP_3 <name> <value>           OP_2DROP OP_DROP   <address script>   name_update
//! ```
//!
//! The drop sequence must remove exactly the operation marker plus its
//! arguments, which leaves the address script to be evaluated normally.

use crate::types::{NameOpKind, NameOperation};

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_NOP: u8 = 0x61;
pub const OP_2DROP: u8 = 0x6d;
pub const OP_DROP: u8 = 0x75;

pub const OP_NAME_NEW: u8 = 0x51;
pub const OP_NAME_FIRSTUPDATE: u8 = 0x52;
pub const OP_NAME_UPDATE: u8 = 0x53;

/// A name-script prefix recognized on an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameScript {
    /// Pre-registration commitment. Carries no name, so it never produces an event.
    New { commitment: Vec<u8> },
    FirstUpdate { name: Vec<u8>, rand: Vec<u8>, value: Vec<u8> },
    Update { name: Vec<u8>, value: Vec<u8> },
}

impl NameScript {
    /// The registry effect of this script, if it has one.
    pub fn into_operation(self) -> Option<NameOperation> {
        match self {
            Self::New { .. } => None,
            Self::FirstUpdate { name, value, .. } => {
                Some(NameOperation::new(NameOpKind::FirstUpdate, name, value))
            }
            Self::Update { name, value } => Some(NameOperation::new(NameOpKind::Update, name, value)),
        }
    }
}

/// Decode the name prefix of `script`. Returns `None` for ordinary or malformed scripts.
pub fn parse_name_script(script: &[u8]) -> Option<NameScript> {
    let (&op, mut rest) = script.split_first()?;
    let arity = match op {
        OP_NAME_NEW => 1,
        OP_NAME_FIRSTUPDATE => 3,
        OP_NAME_UPDATE => 2,
        _ => return None,
    };

    let mut args: Vec<Vec<u8>> = Vec::with_capacity(arity);
    while let Some(&next) = rest.first() {
        if next > OP_PUSHDATA4 {
            break;
        }
        let (data, tail) = read_push(rest)?;
        args.push(data.to_vec());
        rest = tail;
    }
    if args.len() != arity {
        return None;
    }

    // Marker + arguments must be dropped before the address script starts.
    let mut dropped = 0usize;
    while let Some((&next, tail)) = rest.split_first() {
        match next {
            OP_2DROP => dropped += 2,
            OP_DROP => dropped += 1,
            OP_NOP => {}
            _ => break,
        }
        rest = tail;
    }
    if dropped != arity + 1 {
        return None;
    }

    let mut args = args.into_iter();
    let mut next_arg = || args.next().unwrap_or_default();
    Some(match op {
        OP_NAME_NEW => NameScript::New { commitment: next_arg() },
        OP_NAME_FIRSTUPDATE => NameScript::FirstUpdate {
            name: next_arg(),
            rand: next_arg(),
            value: next_arg(),
        },
        _ => NameScript::Update {
            name: next_arg(),
            value: next_arg(),
        },
    })
}

/// Decode a single output script straight into a registry operation.
pub fn decode_output(script: &[u8]) -> Option<NameOperation> {
    parse_name_script(script).and_then(NameScript::into_operation)
}

/// Read one push opcode from the front of `script`.
fn read_push(script: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&op, rest) = script.split_first()?;
    let (len, rest) = match op {
        OP_0 => (0usize, rest),
        1..=0x4b => (op as usize, rest),
        OP_PUSHDATA1 => {
            let (&n, rest) = rest.split_first()?;
            (n as usize, rest)
        }
        OP_PUSHDATA2 => {
            let bytes: [u8; 2] = rest.get(..2)?.try_into().ok()?;
            (u16::from_le_bytes(bytes) as usize, &rest[2..])
        }
        OP_PUSHDATA4 => {
            let bytes: [u8; 4] = rest.get(..4)?.try_into().ok()?;
            (u32::from_le_bytes(bytes) as usize, &rest[4..])
        }
        _ => return None,
    };
    if rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}

// ─── Encoding ─────────────────────────────────────────────────────────────────

/// Append the minimal push encoding of `data` to `out`.
pub fn push_data(out: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0 => out.push(OP_0),
        n @ 1..=0x4b => out.push(n as u8),
        n @ 0x4c..=0xff => {
            out.push(OP_PUSHDATA1);
            out.push(n as u8);
        }
        n @ 0x100..=0xffff => {
            out.push(OP_PUSHDATA2);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        n => {
            out.push(OP_PUSHDATA4);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
    }
    out.extend_from_slice(data);
}

pub fn encode_name_new(commitment: &[u8], address_script: &[u8]) -> Vec<u8> {
    let mut out = vec![OP_NAME_NEW];
    push_data(&mut out, commitment);
    out.push(OP_2DROP);
    out.extend_from_slice(address_script);
    out
}

pub fn encode_name_firstupdate(
    name: &[u8],
    rand: &[u8],
    value: &[u8],
    address_script: &[u8],
) -> Vec<u8> {
    let mut out = vec![OP_NAME_FIRSTUPDATE];
    push_data(&mut out, name);
    push_data(&mut out, rand);
    push_data(&mut out, value);
    out.extend_from_slice(&[OP_2DROP, OP_2DROP]);
    out.extend_from_slice(address_script);
    out
}

pub fn encode_name_update(name: &[u8], value: &[u8], address_script: &[u8]) -> Vec<u8> {
    let mut out = vec![OP_NAME_UPDATE];
    push_data(&mut out, name);
    push_data(&mut out, value);
    out.extend_from_slice(&[OP_2DROP, OP_DROP]);
    out.extend_from_slice(address_script);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
    fn p2pkh() -> Vec<u8> {
        let mut s = vec![0x76, 0xa9, 0x14];
        s.extend_from_slice(&[0xab; 20]);
        s.extend_from_slice(&[0x88, 0xac]);
        s
    }

    #[test]
    fn decodes_firstupdate() {
        let script = encode_name_firstupdate(b"d/example", b"salt", b"{}", &p2pkh());
        let op = decode_output(&script).unwrap();
        assert_eq!(op.kind, NameOpKind::FirstUpdate);
        assert_eq!(op.name, b"d/example");
        assert_eq!(op.value, b"{}");
    }

    #[test]
    fn decodes_update_with_empty_value() {
        let script = encode_name_update(b"id/alice", b"", &p2pkh());
        let op = decode_output(&script).unwrap();
        assert_eq!(op.kind, NameOpKind::Update);
        assert!(op.value.is_empty());
    }

    #[test]
    fn name_new_is_recognized_but_not_emitted() {
        let script = encode_name_new(&[7; 20], &p2pkh());
        assert!(matches!(parse_name_script(&script), Some(NameScript::New { .. })));
        assert!(decode_output(&script).is_none());
    }

    #[test]
    fn plain_output_is_ignored() {
        assert!(decode_output(&p2pkh()).is_none());
        assert!(decode_output(&[]).is_none());
    }

    #[test]
    fn large_value_uses_pushdata2() {
        let value = vec![b'x'; 600];
        let script = encode_name_update(b"d/big", &value, &p2pkh());
        assert_eq!(script[1 + 1 + 5], OP_PUSHDATA2);
        assert_eq!(decode_output(&script).unwrap().value.len(), 600);
    }

    #[test]
    fn rejects_wrong_drop_count() {
        let mut script = vec![OP_NAME_UPDATE];
        push_data(&mut script, b"d/x");
        push_data(&mut script, b"v");
        script.push(OP_2DROP); // one item short
        script.extend_from_slice(&p2pkh());
        assert!(decode_output(&script).is_none());
    }

    #[test]
    fn rejects_truncated_push() {
        let script = vec![OP_NAME_UPDATE, 0x05, b'd', b'/'];
        assert!(decode_output(&script).is_none());
    }

    #[test]
    fn rejects_wrong_arity() {
        let mut script = vec![OP_NAME_FIRSTUPDATE];
        push_data(&mut script, b"d/x");
        push_data(&mut script, b"v");
        script.extend_from_slice(&[OP_2DROP, OP_DROP]);
        assert!(decode_output(&script).is_none());
    }
}
