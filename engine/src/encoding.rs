//! Generic LEB128 + run-length-encoding primitives the columnar codec is built from.
//! Ported from automerge-rs's `encoding.rs`/`decoding.rs`: each column is a LEB128 byte stream,
//! optionally run-length-encoded (`Rle`), delta-encoded on top of that (`Delta`), or a packed
//! bitmap of booleans (`Boolean`).

use std::{
    io::{self, Read, Write},
    mem, str,
};

use crate::error::EngineError;

#[derive(Clone, Debug)]
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder { buf }
    }

    pub fn read<T: Decodable>(&mut self) -> Result<T, EngineError> {
        let mut new_buf = self.buf;
        let val = T::decode(&mut new_buf).ok_or_else(|| EngineError::decode("truncated column"))?;
        self.buf = new_buf;
        Ok(val)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], EngineError> {
        if self.buf.len() < len {
            return Err(EngineError::decode("truncated byte span"));
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    pub fn done(&self) -> bool {
        self.buf.is_empty()
    }
}

pub(crate) trait Decodable: Sized {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self>;
}

impl Decodable for u8 {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        let mut buf = [0; 1];
        bytes.read_exact(&mut buf).ok()?;
        Some(buf[0])
    }
}

impl Decodable for u32 {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        u64::decode(bytes).and_then(|v| u32::try_from(v).ok())
    }
}

impl Decodable for usize {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        u64::decode(bytes).and_then(|v| usize::try_from(v).ok())
    }
}

impl Decodable for i64 {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        leb128::read::signed(bytes).ok()
    }
}

impl Decodable for u64 {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        leb128::read::unsigned(bytes).ok()
    }
}

impl Decodable for bool {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        u8::decode(bytes).map(|v| v != 0)
    }
}

impl Decodable for Vec<u8> {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        let len = usize::decode(bytes)?;
        if len == 0 {
            return Some(Vec::new());
        }
        let mut buf = vec![0; len];
        bytes.read_exact(&mut buf).ok()?;
        Some(buf)
    }
}

impl Decodable for String {
    fn decode<R: Read>(bytes: &mut R) -> Option<Self> {
        let buf = Vec::decode(bytes)?;
        str::from_utf8(&buf).ok().map(Into::into)
    }
}

pub(crate) trait Encodable {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        buf.write_all(&[*self])?;
        Ok(1)
    }
}

impl Encodable for u64 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        leb128::write::unsigned(buf, *self)
    }
}

impl Encodable for i64 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        leb128::write::signed(buf, *self)
    }
}

impl Encodable for u32 {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        (*self as u64).encode(buf)
    }
}

impl Encodable for usize {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        (*self as u64).encode(buf)
    }
}

impl Encodable for bool {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        (*self as u8).encode(buf)
    }
}

impl Encodable for str {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        let bytes = self.as_bytes();
        let head = bytes.len().encode(buf)?;
        buf.write_all(bytes)?;
        Ok(head + bytes.len())
    }
}

impl Encodable for String {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        self.as_str().encode(buf)
    }
}

impl Encodable for [u8] {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        let head = self.len().encode(buf)?;
        buf.write_all(self)?;
        Ok(head + self.len())
    }
}

impl Encodable for Vec<u8> {
    fn encode<W: Write>(&self, buf: &mut W) -> io::Result<usize> {
        self.as_slice().encode(buf)
    }
}

/// Packs a bool stream as alternating run lengths, starting with a run of `false`.
pub(crate) struct BooleanEncoder {
    buf: Vec<u8>,
    last: bool,
    count: usize,
}

impl BooleanEncoder {
    pub fn new() -> Self {
        BooleanEncoder {
            buf: Vec::new(),
            last: false,
            count: 0,
        }
    }

    pub fn append(&mut self, value: bool) {
        if value == self.last {
            self.count += 1;
        } else {
            self.count.encode(&mut self.buf).ok();
            self.last = value;
            self.count = 1;
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.count > 0 {
            self.count.encode(&mut self.buf).ok();
        }
        self.buf
    }
}

pub(crate) struct BooleanDecoder<'a> {
    decoder: Decoder<'a>,
    last_value: bool,
    count: usize,
}

impl<'a> BooleanDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        BooleanDecoder {
            decoder: Decoder::new(bytes),
            last_value: true,
            count: 0,
        }
    }
}

impl<'a> Iterator for BooleanDecoder<'a> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        while self.count == 0 {
            if self.decoder.done() {
                return None;
            }
            self.count = self.decoder.read().unwrap_or_default();
            self.last_value = !self.last_value;
        }
        self.count -= 1;
        Some(self.last_value)
    }
}

enum RleState<T> {
    Empty,
    NullRun(usize),
    LoneVal(T),
    Run(T, usize),
    LiteralRun(T, Vec<T>),
}

/// Run-length encoder: runs of equal values are stored as `(len, value)`; runs of distinct
/// values as `(-len, v0, v1, ..)`; runs of "no value at this position" (used for absent
/// `objActor`/`keyStr`/etc columns) as `(0, len)`.
pub(crate) struct RleEncoder<T>
where
    T: Encodable + PartialEq + Clone,
{
    buf: Vec<u8>,
    state: RleState<T>,
}

impl<T> RleEncoder<T>
where
    T: Encodable + PartialEq + Clone,
{
    pub fn new() -> Self {
        RleEncoder {
            buf: Vec::new(),
            state: RleState::Empty,
        }
    }

    pub fn append_value(&mut self, value: T) {
        self.state = match self.take_state() {
            RleState::Empty => RleState::LoneVal(value),
            RleState::LoneVal(other) => {
                if other == value {
                    RleState::Run(value, 2)
                } else {
                    RleState::LiteralRun(value, vec![other])
                }
            }
            RleState::Run(other, len) => {
                if other == value {
                    RleState::Run(other, len + 1)
                } else {
                    self.flush_run(other, len);
                    RleState::LoneVal(value)
                }
            }
            RleState::LiteralRun(last, mut run) => {
                if last == value {
                    self.flush_lit_run(run);
                    RleState::Run(value, 2)
                } else {
                    run.push(last);
                    RleState::LiteralRun(value, run)
                }
            }
            RleState::NullRun(size) => {
                self.flush_null_run(size);
                RleState::LoneVal(value)
            }
        }
    }

    pub fn append_null(&mut self) {
        self.state = match self.take_state() {
            RleState::Empty => RleState::NullRun(1),
            RleState::NullRun(size) => RleState::NullRun(size + 1),
            RleState::LoneVal(other) => {
                self.flush_lit_run(vec![other]);
                RleState::NullRun(1)
            }
            RleState::Run(other, len) => {
                self.flush_run(other, len);
                RleState::NullRun(1)
            }
            RleState::LiteralRun(last, mut run) => {
                run.push(last);
                self.flush_lit_run(run);
                RleState::NullRun(1)
            }
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        match self.take_state() {
            RleState::NullRun(size) => self.flush_null_run(size),
            RleState::LoneVal(value) => self.flush_lit_run(vec![value]),
            RleState::Run(value, len) => self.flush_run(value, len),
            RleState::LiteralRun(last, mut run) => {
                run.push(last);
                self.flush_lit_run(run);
            }
            RleState::Empty => {}
        }
        self.buf
    }

    fn flush_run(&mut self, val: T, len: usize) {
        (len as i64).encode(&mut self.buf).ok();
        val.encode(&mut self.buf).ok();
    }

    fn flush_null_run(&mut self, len: usize) {
        0i64.encode(&mut self.buf).ok();
        len.encode(&mut self.buf).ok();
    }

    fn flush_lit_run(&mut self, run: Vec<T>) {
        (-(run.len() as i64)).encode(&mut self.buf).ok();
        for val in run {
            val.encode(&mut self.buf).ok();
        }
    }

    fn take_state(&mut self) -> RleState<T> {
        let mut state = RleState::Empty;
        mem::swap(&mut self.state, &mut state);
        state
    }
}

pub(crate) struct RleDecoder<'a, T> {
    decoder: Decoder<'a>,
    last_value: Option<T>,
    count: isize,
    literal: bool,
}

impl<'a, T> RleDecoder<'a, T> {
    pub fn new(bytes: &'a [u8]) -> Self {
        RleDecoder {
            decoder: Decoder::new(bytes),
            last_value: None,
            count: 0,
            literal: false,
        }
    }
}

/// Yields `None` for "no value at this row" and ends the iterator once the column is
/// exhausted (unlike automerge-rs's endlessly-nulling variant, which exists to support a
/// fixed external row count; the columnar layout here carries its own row counts instead).
impl<'a, T> Iterator for RleDecoder<'a, T>
where
    T: Clone + Decodable,
{
    type Item = Option<T>;

    fn next(&mut self) -> Option<Option<T>> {
        while self.count == 0 {
            if self.decoder.done() {
                return None;
            }
            match self.decoder.read::<i64>() {
                Ok(count) if count > 0 => {
                    self.count = count as isize;
                    self.last_value = self.decoder.read().ok();
                    self.literal = false;
                }
                Ok(count) if count < 0 => {
                    self.count = count.unsigned_abs() as isize;
                    self.literal = true;
                }
                Ok(_) => {
                    self.count = self.decoder.read::<usize>().unwrap_or_default() as isize;
                    self.last_value = None;
                    self.literal = false;
                }
                Err(_) => return None,
            }
        }
        self.count -= 1;
        if self.literal {
            Some(self.decoder.read().ok())
        } else {
            Some(self.last_value.clone())
        }
    }
}

/// Delta-encodes a column of `u64`s (e.g. per-op counters) as an RLE stream of signed deltas
/// from the previous absolute value.
pub(crate) struct DeltaEncoder {
    rle: RleEncoder<i64>,
    absolute: i64,
}

impl DeltaEncoder {
    pub fn new() -> Self {
        DeltaEncoder {
            rle: RleEncoder::new(),
            absolute: 0,
        }
    }

    pub fn append_value(&mut self, value: u64) {
        self.rle.append_value(value as i64 - self.absolute);
        self.absolute = value as i64;
    }

    pub fn finish(self) -> Vec<u8> {
        self.rle.finish()
    }
}

pub(crate) struct DeltaDecoder<'a> {
    rle: RleDecoder<'a, i64>,
    absolute: i64,
}

impl<'a> DeltaDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        DeltaDecoder {
            rle: RleDecoder::new(bytes),
            absolute: 0,
        }
    }
}

impl<'a> Iterator for DeltaDecoder<'a> {
    type Item = Option<u64>;

    fn next(&mut self) -> Option<Option<u64>> {
        let delta = self.rle.next()?;
        if let Some(delta) = delta {
            self.absolute += delta;
            Some(Some(self.absolute as u64))
        } else {
            Some(None)
        }
    }
}
