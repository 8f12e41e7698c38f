//! Tuple encoding of sync events as returned over RPC.
//!
//! ```text
//! ["firstupdate", name, value]
//! ["update",      name, value]
//! ["expire",      name]
//! ["atblock",     block_hash_hex, height]
//! ```
//!
//! Names and values that are valid UTF-8 travel as JSON strings. Any other
//! byte string travels as `{"hex": "<bytes>"}` so distinct names never collide.

use serde_json::{json, Value};

use crate::error::SyncError;
use crate::types::{BlockHash, BlockRef, EventBatch, NameOpKind, NameOperation, SyncEvent};

pub const TAG_ATBLOCK: &str = "atblock";

pub fn encode_event(event: &SyncEvent) -> Value {
    match event {
        SyncEvent::Name(op) => {
            let name = encode_bytes(&op.name);
            match op.kind {
                NameOpKind::Expire => json!([op.kind.as_str(), name]),
                _ => json!([op.kind.as_str(), name, encode_bytes(&op.value)]),
            }
        }
        SyncEvent::AtBlock(block) => json!([TAG_ATBLOCK, block.hash.to_hex(), block.height]),
    }
}

pub fn encode_batch(batch: &EventBatch) -> Value {
    Value::Array(batch.events.iter().map(encode_event).collect())
}

pub fn decode_event(value: &Value) -> Result<SyncEvent, SyncError> {
    let tuple = value
        .as_array()
        .ok_or_else(|| invalid(value, "event is not an array"))?;
    let tag = tuple
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(value, "missing event tag"))?;
    let text = |i: usize| text_field(tuple, value, i);
    let bytes = |i: usize| bytes_field(tuple, value, i);

    match tag {
        TAG_ATBLOCK => {
            let hash: BlockHash = text(1)?.parse()?;
            let height = tuple
                .get(2)
                .and_then(Value::as_u64)
                .ok_or_else(|| invalid(value, "bad checkpoint height"))?;
            expect_len(value, tuple.len(), 3)?;
            Ok(SyncEvent::AtBlock(BlockRef::new(hash, height)))
        }
        "firstupdate" | "update" => {
            let kind = if tag == "update" {
                NameOpKind::Update
            } else {
                NameOpKind::FirstUpdate
            };
            expect_len(value, tuple.len(), 3)?;
            Ok(SyncEvent::Name(NameOperation::new(kind, bytes(1)?, bytes(2)?)))
        }
        "expire" => {
            expect_len(value, tuple.len(), 2)?;
            Ok(SyncEvent::Name(NameOperation::new(
                NameOpKind::Expire,
                bytes(1)?,
                Vec::<u8>::new(),
            )))
        }
        other => Err(invalid(value, &format!("unknown event tag '{other}'"))),
    }
}

pub fn decode_batch(value: &Value) -> Result<EventBatch, SyncError> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid(value, "result is not an array"))?;
    let events = items.iter().map(decode_event).collect::<Result<_, _>>()?;
    Ok(EventBatch { events })
}

/// String when the bytes are UTF-8, `{"hex": ...}` otherwise.
pub fn encode_bytes(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_owned()),
        Err(_) => json!({ "hex": hex::encode(bytes) }),
    }
}

pub fn decode_bytes(field: &Value) -> Option<Vec<u8>> {
    match field {
        Value::String(text) => Some(text.as_bytes().to_vec()),
        Value::Object(map) if map.len() == 1 => {
            map.get("hex").and_then(Value::as_str).and_then(|h| hex::decode(h).ok())
        }
        _ => None,
    }
}

fn bytes_field(tuple: &[Value], value: &Value, i: usize) -> Result<Vec<u8>, SyncError> {
    tuple
        .get(i)
        .and_then(decode_bytes)
        .ok_or_else(|| invalid(value, "expected a name or value field"))
}

fn text_field<'a>(tuple: &'a [Value], value: &Value, i: usize) -> Result<&'a str, SyncError> {
    tuple
        .get(i)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(value, "expected a string field"))
}

fn expect_len(value: &Value, len: usize, want: usize) -> Result<(), SyncError> {
    if len != want {
        return Err(invalid(value, &format!("expected {want} fields, got {len}")));
    }
    Ok(())
}

fn invalid(value: &Value, reason: &str) -> SyncError {
    SyncError::InvalidResponse(format!("{reason}: {value}"))
}
