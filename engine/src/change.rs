//! The hashed, columnar-encoded wire form of a change (§6): a 4-byte magic, a chunk-type byte,
//! a big-endian length, and a payload whose hash (SHA-256) is the change's `ChangeHash`.
//! Grounded on automerge-rs's `change.rs` chunk framing, adapted to the simpler column set in
//! `columnar.rs` instead of its deflate-compressed generic column tables.

use std::convert::TryFrom;

use sha2::{Digest, Sha256};
use tracing::instrument;
use weft_protocol::{ActorId, Change as LogicalChange, ChangeHash, Op, OpType};

use crate::{
    columnar::{decode_ops, encode_ops, ActorTable},
    encoding::{Decoder, Encodable},
    error::EngineError,
};

/// Magic bytes identifying a weft chunk, analogous to automerge-rs's `MAGIC_BYTES`.
pub const MAGIC_BYTES: [u8; 4] = [0x85, 0x6f, 0x4a, 0x83];
const CHUNK_TYPE_CHANGE: u8 = 1;
const CHUNK_TYPE_DOCUMENT: u8 = 0;

/// A change as stored and transmitted: immutable once constructed, its `bytes` the exact
/// payload its `hash` was computed over, and its `ops` decoded eagerly so the engine never
/// needs to re-parse the column set on every read.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    bytes: Vec<u8>,
    hash: ChangeHash,
    pub actor: ActorId,
    pub seq: u64,
    pub start_op: u64,
    pub time: i64,
    pub message: Option<String>,
    pub deps: Vec<ChangeHash>,
    pub ops: Vec<Op>,
}

impl Change {
    pub fn hash(&self) -> ChangeHash {
        self.hash
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The highest counter this change claims, i.e. the last one `op_set_next_op` must not
    /// hand out again. A `MultiSet` op consumes one counter per value, not one per op.
    pub fn max_op(&self) -> u64 {
        let width: u64 = self
            .ops
            .iter()
            .map(|op| match &op.action {
                OpType::MultiSet(values) => values.len() as u64,
                _ => 1,
            })
            .sum();
        self.start_op + width.saturating_sub(1)
    }

    /// Encodes a logical change into its hashed wire form. Deps are sorted ascending before
    /// encoding, per the canonical-encoding rule that makes the hash independent of the order
    /// a recorder happened to collect them in.
    #[instrument(skip(logical), fields(actor = %logical.actor, seq = logical.seq))]
    pub fn encode(logical: LogicalChange) -> Change {
        let mut deps = logical.deps.clone();
        deps.sort();

        let mut actors = ActorTable::new(logical.actor.clone());
        let cols = encode_ops(&logical.ops, &mut actors);
        let actor_table = actors.into_vec();

        let mut payload = Vec::new();
        (actor_table.len() as u64).encode(&mut payload).ok();
        for a in &actor_table {
            a.to_bytes().encode(&mut payload).ok();
        }
        logical.seq.encode(&mut payload).ok();
        logical.start_op.encode(&mut payload).ok();
        logical.time.encode(&mut payload).ok();
        match &logical.message {
            Some(m) => m.as_str().encode(&mut payload).ok(),
            None => "".encode(&mut payload).ok(),
        };
        (deps.len() as u64).encode(&mut payload).ok();
        for d in &deps {
            payload.extend_from_slice(&d.0);
        }
        (logical.ops.len() as u64).encode(&mut payload).ok();
        write_column(&mut payload, &cols.obj_actor);
        write_column(&mut payload, &cols.obj_counter);
        write_column(&mut payload, &cols.key_actor);
        write_column(&mut payload, &cols.key_counter);
        write_column(&mut payload, &cols.key_str);
        write_column(&mut payload, &cols.insert);
        write_column(&mut payload, &cols.action);
        write_column(&mut payload, &cols.val_tag);
        write_column(&mut payload, &cols.val_raw);
        write_column(&mut payload, &cols.chld_actor);
        write_column(&mut payload, &cols.chld_counter);
        write_column(&mut payload, &cols.pred_num);
        write_column(&mut payload, &cols.pred_actor);
        write_column(&mut payload, &cols.pred_counter);

        let hash = hash_payload(&payload);
        let bytes = frame(CHUNK_TYPE_CHANGE, &payload);

        Change {
            bytes,
            hash,
            actor: logical.actor,
            seq: logical.seq,
            start_op: logical.start_op,
            time: logical.time,
            message: logical.message,
            deps,
            ops: logical.ops,
        }
    }

    /// Parses a framed chunk produced by [`Change::encode`]. The hash is recomputed from the
    /// payload rather than trusted from the wire, so `decode(encode(c)).hash() == hash(c)`
    /// holds by construction.
    pub fn decode(bytes: &[u8]) -> Result<Change, EngineError> {
        if bytes.len() < 9 || !bytes.starts_with(&MAGIC_BYTES) {
            return Err(EngineError::decode("bad magic bytes"));
        }
        let chunk_type = bytes[4];
        if chunk_type != CHUNK_TYPE_CHANGE {
            return Err(EngineError::decode("not a change chunk"));
        }
        let len = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
        let payload = bytes
            .get(9..9 + len)
            .ok_or_else(|| EngineError::decode("truncated chunk"))?;

        let mut dec = Decoder::new(payload);
        let actor_count: u64 = dec.read()?;
        let mut actor_table = Vec::with_capacity(actor_count as usize);
        for _ in 0..actor_count {
            let bytes: Vec<u8> = dec.read()?;
            actor_table.push(ActorId::from(bytes));
        }
        let actor = actor_table
            .get(0)
            .cloned()
            .ok_or_else(|| EngineError::decode("empty actor table"))?;
        let seq: u64 = dec.read()?;
        let start_op: u64 = dec.read()?;
        let time: i64 = dec.read()?;
        let message: String = dec.read()?;
        let message = if message.is_empty() { None } else { Some(message) };
        let dep_count: u64 = dec.read()?;
        let mut deps = Vec::with_capacity(dep_count as usize);
        for _ in 0..dep_count {
            let raw = dec.read_bytes(32)?;
            deps.push(ChangeHash::try_from(raw).map_err(|_| EngineError::decode("bad dep hash"))?);
        }
        let op_count: u64 = dec.read()?;

        let obj_actor = read_column(&mut dec)?;
        let obj_counter = read_column(&mut dec)?;
        let key_actor = read_column(&mut dec)?;
        let key_counter = read_column(&mut dec)?;
        let key_str = read_column(&mut dec)?;
        let insert = read_column(&mut dec)?;
        let action = read_column(&mut dec)?;
        let val_tag = read_column(&mut dec)?;
        let val_raw = read_column(&mut dec)?;
        let chld_actor = read_column(&mut dec)?;
        let chld_counter = read_column(&mut dec)?;
        let pred_num = read_column(&mut dec)?;
        let pred_actor = read_column(&mut dec)?;
        let pred_counter = read_column(&mut dec)?;

        let cols = crate::columnar::OpColumns {
            obj_actor,
            obj_counter,
            key_actor,
            key_counter,
            key_str,
            insert,
            action,
            val_tag,
            val_raw,
            chld_actor,
            chld_counter,
            pred_num,
            pred_actor,
            pred_counter,
        };
        let ops = decode_ops(op_count as usize, &cols, &actor_table)?;

        let hash = hash_payload(payload);

        Ok(Change {
            bytes: bytes[..9 + len].to_vec(),
            hash,
            actor,
            seq,
            start_op,
            time,
            message,
            deps,
            ops,
        })
    }
}

fn hash_payload(payload: &[u8]) -> ChangeHash {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let digest = hasher.finalize();
    ChangeHash::try_from(digest.as_slice()).expect("sha256 digest is always 32 bytes")
}

fn frame(chunk_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + payload.len());
    out.extend_from_slice(&MAGIC_BYTES);
    out.push(chunk_type);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn write_column(buf: &mut Vec<u8>, col: &[u8]) {
    (col.len() as u64).encode(buf).ok();
    buf.extend_from_slice(col);
}

fn read_column(dec: &mut Decoder<'_>) -> Result<Vec<u8>, EngineError> {
    let len: u64 = dec.read()?;
    Ok(dec.read_bytes(len as usize)?.to_vec())
}

/// The whole-document chunk: an ordered set of changes. Changes are written in canonical
/// topological order (ties broken by hash ascending) by the caller (`History::save`); this
/// function only frames/parses the concatenation, each change independently self-describing
/// (it carries its own actor table), which keeps document round-tripping simple at the cost
/// of repeating per-change actor tables instead of sharing one global table.
pub fn encode_document(changes: &[Change]) -> Vec<u8> {
    let mut payload = Vec::new();
    (changes.len() as u64).encode(&mut payload).ok();
    for change in changes {
        write_column(&mut payload, &change.bytes);
    }
    frame(CHUNK_TYPE_DOCUMENT, &payload)
}

pub fn decode_document(bytes: &[u8]) -> Result<Vec<Change>, EngineError> {
    if bytes.len() < 9 || !bytes.starts_with(&MAGIC_BYTES) {
        return Err(EngineError::decode("bad magic bytes"));
    }
    if bytes[4] != CHUNK_TYPE_DOCUMENT {
        return Err(EngineError::decode("not a document chunk"));
    }
    let len = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
    let payload = bytes
        .get(9..9 + len)
        .ok_or_else(|| EngineError::decode("truncated chunk"))?;
    let mut dec = Decoder::new(payload);
    let count: u64 = dec.read()?;
    let mut changes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = read_column(&mut dec)?;
        changes.push(Change::decode(&raw)?);
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_protocol::{Key, ObjId, ObjType, OpType};

    fn sample() -> LogicalChange {
        let actor = ActorId::random();
        LogicalChange {
            actor: actor.clone(),
            seq: 1,
            start_op: 1,
            time: 1_000,
            message: Some("init".into()),
            deps: vec![],
            ops: vec![Op {
                action: OpType::Make(ObjType::Map),
                obj: ObjId::Root,
                key: Key::from("todos"),
                insert: false,
                pred: vec![],
            }],
        }
    }

    #[test]
    fn round_trip_preserves_hash_and_fields() {
        let logical = sample();
        let encoded = Change::encode(logical.clone());
        let decoded = Change::decode(encoded.raw_bytes()).unwrap();
        assert_eq!(decoded.hash(), encoded.hash());
        assert_eq!(decoded.actor, logical.actor);
        assert_eq!(decoded.seq, logical.seq);
        assert_eq!(decoded.ops, logical.ops);
        assert_eq!(decoded.message, logical.message);
    }

    #[test]
    fn document_round_trip() {
        let a = Change::encode(sample());
        let mut b_logical = sample();
        b_logical.seq = 2;
        b_logical.start_op = 2;
        let b = Change::encode(b_logical);
        let doc = encode_document(&[a.clone(), b.clone()]);
        let changes = decode_document(&doc).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].hash(), a.hash());
        assert_eq!(changes[1].hash(), b.hash());
    }
}
