//! The per-column layout of a change's op block (§6): `objActor`/`objCounter`, `keyActor`/
//! `keyCounter`/`keyStr`, an `insert` bitmap, `action`, `valLen`+`valRaw` (tagged), `chld`, and
//! a `pred` group (`predNum`/`predActor`/`predCounter`). Each column is independently
//! LEB128+RLE encoded, grounded on automerge-rs's `columnar.rs` column-per-field layout.

use weft_protocol::{ActorId, ElemId, Key, ObjId, ObjType, Op, OpId, OpType, ScalarValue};

use crate::{
    encoding::{
        BooleanDecoder, BooleanEncoder, Decoder, DeltaDecoder, DeltaEncoder, Encodable,
        RleDecoder, RleEncoder,
    },
    error::EngineError,
};

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_F64: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_COUNTER: u8 = 6;
const TAG_TIMESTAMP: u8 = 7;

const ACTION_MAKE_MAP: u32 = 0;
const ACTION_MAKE_LIST: u32 = 1;
const ACTION_MAKE_TABLE: u32 = 2;
const ACTION_MAKE_TEXT: u32 = 3;
const ACTION_DEL: u32 = 4;
const ACTION_INC: u32 = 5;
const ACTION_SET: u32 = 6;
const ACTION_LINK: u32 = 7;
const ACTION_MULTI_SET: u32 = 8;

/// Maps actors to table indices, assigning fresh indices on first sight; index 0 is always
/// the authoring actor of the change being encoded.
pub(crate) struct ActorTable {
    actors: Vec<ActorId>,
}

impl ActorTable {
    pub fn new(author: ActorId) -> Self {
        ActorTable {
            actors: vec![author],
        }
    }

    pub fn index_of(&mut self, actor: &ActorId) -> u32 {
        if let Some(pos) = self.actors.iter().position(|a| a == actor) {
            return pos as u32;
        }
        self.actors.push(actor.clone());
        (self.actors.len() - 1) as u32
    }

    pub fn into_vec(self) -> Vec<ActorId> {
        self.actors
    }
}

fn encode_value(tag_col: &mut RleEncoder<u8>, raw: &mut Vec<u8>, value: &ScalarValue) {
    match value {
        ScalarValue::Null => tag_col.append_value(TAG_NULL),
        ScalarValue::Boolean(false) => tag_col.append_value(TAG_FALSE),
        ScalarValue::Boolean(true) => tag_col.append_value(TAG_TRUE),
        ScalarValue::Int(v) => {
            tag_col.append_value(TAG_INT);
            v.encode(raw).ok();
        }
        ScalarValue::F64(v) => {
            tag_col.append_value(TAG_F64);
            raw.extend_from_slice(&v.to_le_bytes());
        }
        ScalarValue::Str(s) => {
            tag_col.append_value(TAG_STR);
            s.as_str().encode(raw).ok();
        }
        ScalarValue::Counter(v) => {
            tag_col.append_value(TAG_COUNTER);
            v.encode(raw).ok();
        }
        ScalarValue::Timestamp(v) => {
            tag_col.append_value(TAG_TIMESTAMP);
            v.encode(raw).ok();
        }
    }
}

fn decode_value(tag: u8, raw: &mut Decoder<'_>) -> Result<ScalarValue, EngineError> {
    Ok(match tag {
        TAG_NULL => ScalarValue::Null,
        TAG_FALSE => ScalarValue::Boolean(false),
        TAG_TRUE => ScalarValue::Boolean(true),
        TAG_INT => ScalarValue::Int(raw.read()?),
        TAG_F64 => {
            let bytes = raw.read_bytes(8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            ScalarValue::F64(f64::from_le_bytes(arr))
        }
        TAG_STR => ScalarValue::Str(raw.read::<String>()?.into()),
        TAG_COUNTER => ScalarValue::Counter(raw.read()?),
        TAG_TIMESTAMP => ScalarValue::Timestamp(raw.read()?),
        other => return Err(EngineError::decode(format!("unknown value tag {}", other))),
    })
}

pub(crate) struct OpColumns {
    pub obj_actor: Vec<u8>,
    pub obj_counter: Vec<u8>,
    pub key_actor: Vec<u8>,
    pub key_counter: Vec<u8>,
    pub key_str: Vec<u8>,
    pub insert: Vec<u8>,
    pub action: Vec<u8>,
    pub val_tag: Vec<u8>,
    pub val_raw: Vec<u8>,
    pub chld_actor: Vec<u8>,
    pub chld_counter: Vec<u8>,
    pub pred_num: Vec<u8>,
    pub pred_actor: Vec<u8>,
    pub pred_counter: Vec<u8>,
}

/// Encodes `ops` against `actors` (which must already contain every actor referenced). Returns
/// the column byte arrays; the caller is responsible for length-prefixing each one and for
/// recording `ops.len()` as the row count.
pub(crate) fn encode_ops(ops: &[Op], actors: &mut ActorTable) -> OpColumns {
    let mut obj_actor = RleEncoder::<u32>::new();
    let mut obj_counter = RleEncoder::<u64>::new();
    let mut key_actor = RleEncoder::<u32>::new();
    let mut key_counter = RleEncoder::<u64>::new();
    let mut key_str = RleEncoder::<String>::new();
    let mut insert = BooleanEncoder::new();
    let mut action = RleEncoder::<u32>::new();
    let mut val_tag = RleEncoder::<u8>::new();
    let mut val_raw = Vec::new();
    let mut chld_actor = RleEncoder::<u32>::new();
    let mut chld_counter = RleEncoder::<u64>::new();
    let mut pred_num = RleEncoder::<u32>::new();
    let mut pred_actor = RleEncoder::<u32>::new();
    let mut pred_counter = DeltaEncoder::new();

    for op in ops {
        match &op.obj {
            ObjId::Root => {
                obj_actor.append_null();
                obj_counter.append_null();
            }
            ObjId::Id(id) => {
                obj_actor.append_value(actors.index_of(&id.actor));
                obj_counter.append_value(id.counter);
            }
        }

        match &op.key {
            Key::Map(s) => {
                key_str.append_value(s.to_string());
                key_actor.append_null();
                key_counter.append_null();
            }
            Key::Seq(ElemId::Head) => {
                key_str.append_null();
                key_actor.append_null();
                key_counter.append_null();
            }
            Key::Seq(ElemId::Id(id)) => {
                key_str.append_null();
                key_actor.append_value(actors.index_of(&id.actor));
                key_counter.append_value(id.counter);
            }
        }

        insert.append(op.insert);

        match &op.action {
            OpType::Make(ObjType::Map) => action.append_value(ACTION_MAKE_MAP),
            OpType::Make(ObjType::List) => action.append_value(ACTION_MAKE_LIST),
            OpType::Make(ObjType::Table) => action.append_value(ACTION_MAKE_TABLE),
            OpType::Make(ObjType::Text) => action.append_value(ACTION_MAKE_TEXT),
            OpType::Del => action.append_value(ACTION_DEL),
            OpType::Inc(delta) => {
                action.append_value(ACTION_INC);
                delta.encode(&mut val_raw).ok();
            }
            OpType::Set(v) => {
                action.append_value(ACTION_SET);
                encode_value(&mut val_tag, &mut val_raw, v);
            }
            OpType::Link(target) => {
                action.append_value(ACTION_LINK);
                match target {
                    ObjId::Root => {
                        chld_actor.append_null();
                        chld_counter.append_null();
                    }
                    ObjId::Id(id) => {
                        chld_actor.append_value(actors.index_of(&id.actor));
                        chld_counter.append_value(id.counter);
                    }
                }
            }
            OpType::MultiSet(values) => {
                action.append_value(ACTION_MULTI_SET);
                (values.len() as u64).encode(&mut val_raw).ok();
                for v in values {
                    encode_value(&mut val_tag, &mut val_raw, v);
                }
            }
        }
        if !matches!(op.action, OpType::Link(_)) {
            chld_actor.append_null();
            chld_counter.append_null();
        }

        pred_num.append_value(op.pred.len() as u32);
        for p in &op.pred {
            pred_actor.append_value(actors.index_of(&p.actor));
            pred_counter.append_value(p.counter);
        }
    }

    OpColumns {
        obj_actor: obj_actor.finish(),
        obj_counter: obj_counter.finish(),
        key_actor: key_actor.finish(),
        key_counter: key_counter.finish(),
        key_str: key_str.finish(),
        insert: insert.finish(),
        action: action.finish(),
        val_tag: val_tag.finish(),
        val_raw,
        chld_actor: chld_actor.finish(),
        chld_counter: chld_counter.finish(),
        pred_num: pred_num.finish(),
        pred_actor: pred_actor.finish(),
        pred_counter: pred_counter.finish(),
    }
}

pub(crate) fn decode_ops(
    op_count: usize,
    cols: &OpColumns,
    actors: &[ActorId],
) -> Result<Vec<Op>, EngineError> {
    let mut obj_actor = RleDecoder::<u32>::new(&cols.obj_actor);
    let mut obj_counter = RleDecoder::<u64>::new(&cols.obj_counter);
    let mut key_actor = RleDecoder::<u32>::new(&cols.key_actor);
    let mut key_counter = RleDecoder::<u64>::new(&cols.key_counter);
    let mut key_str = RleDecoder::<String>::new(&cols.key_str);
    let mut insert = BooleanDecoder::new(&cols.insert);
    let mut action = RleDecoder::<u32>::new(&cols.action);
    let mut val_tag = RleDecoder::<u8>::new(&cols.val_tag);
    let mut val_raw = Decoder::new(&cols.val_raw);
    let mut chld_actor = RleDecoder::<u32>::new(&cols.chld_actor);
    let mut chld_counter = RleDecoder::<u64>::new(&cols.chld_counter);
    let mut pred_num = RleDecoder::<u32>::new(&cols.pred_num);
    let mut pred_actor = RleDecoder::<u32>::new(&cols.pred_actor);
    let mut pred_counter = DeltaDecoder::new(&cols.pred_counter);

    let actor_at = |idx: u32, actors: &[ActorId]| -> Result<ActorId, EngineError> {
        actors
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| EngineError::decode("actor table index out of range"))
    };

    let mut ops = Vec::with_capacity(op_count);
    for _ in 0..op_count {
        let obj = match (obj_actor.next().flatten(), obj_counter.next().flatten()) {
            (Some(a), Some(c)) => ObjId::Id(OpId {
                counter: c,
                actor: actor_at(a, actors)?,
            }),
            _ => ObjId::Root,
        };

        let ks = key_str.next().flatten();
        let ka = key_actor.next().flatten();
        let kc = key_counter.next().flatten();
        let key = match (ks, ka, kc) {
            (Some(s), _, _) => Key::Map(s.into()),
            (None, Some(a), Some(c)) => Key::Seq(ElemId::Id(OpId {
                counter: c,
                actor: actor_at(a, actors)?,
            })),
            (None, None, None) => Key::Seq(ElemId::Head),
            _ => return Err(EngineError::decode("inconsistent key columns")),
        };

        let is_insert = insert
            .next()
            .ok_or_else(|| EngineError::decode("truncated insert bitmap"))?;

        let action_code = action
            .next()
            .flatten()
            .ok_or_else(|| EngineError::decode("truncated action column"))?;

        let action_value = match action_code {
            ACTION_MAKE_MAP => OpType::Make(ObjType::Map),
            ACTION_MAKE_LIST => OpType::Make(ObjType::List),
            ACTION_MAKE_TABLE => OpType::Make(ObjType::Table),
            ACTION_MAKE_TEXT => OpType::Make(ObjType::Text),
            ACTION_DEL => OpType::Del,
            ACTION_INC => OpType::Inc(val_raw.read()?),
            ACTION_SET => {
                let tag = val_tag
                    .next()
                    .flatten()
                    .ok_or_else(|| EngineError::decode("truncated value tag"))?;
                OpType::Set(decode_value(tag, &mut val_raw)?)
            }
            ACTION_LINK => {
                let target = match (chld_actor.next().flatten(), chld_counter.next().flatten()) {
                    (Some(a), Some(c)) => ObjId::Id(OpId {
                        counter: c,
                        actor: actor_at(a, actors)?,
                    }),
                    _ => ObjId::Root,
                };
                OpType::Link(target)
            }
            ACTION_MULTI_SET => {
                let count: u64 = val_raw.read()?;
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let tag = val_tag
                        .next()
                        .flatten()
                        .ok_or_else(|| EngineError::decode("truncated value tag"))?;
                    values.push(decode_value(tag, &mut val_raw)?);
                }
                OpType::MultiSet(values)
            }
            other => return Err(EngineError::decode(format!("unknown action code {}", other))),
        };
        if action_code != ACTION_LINK {
            chld_actor.next();
            chld_counter.next();
        }

        let pred_count = pred_num
            .next()
            .flatten()
            .ok_or_else(|| EngineError::decode("truncated predNum column"))?;
        let mut pred = Vec::with_capacity(pred_count as usize);
        for _ in 0..pred_count {
            let a = pred_actor
                .next()
                .flatten()
                .ok_or_else(|| EngineError::decode("truncated predActor column"))?;
            let c = pred_counter
                .next()
                .flatten()
                .ok_or_else(|| EngineError::decode("truncated predCounter column"))?;
            pred.push(OpId {
                counter: c,
                actor: actor_at(a, actors)?,
            });
        }

        ops.push(Op {
            action: action_value,
            obj,
            key,
            insert: is_insert,
            pred,
        });
    }

    Ok(ops)
}
