//! Test-only plan evaluator.
//!
//! Interprets emission plans over a dynamic `Value`, implementing the wire
//! contract the generated code must satisfy. Round-trip tests run encode and
//! decode through the same backend-independent steps a real backend renders,
//! so a protocol regression shows up here without running any generated
//! target-language code.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use wiregen::generate::plan_all;
use wiregen::plan::{ArrayTail, FieldOp, Step, StructPlan};
use wiregen::schema::{DimMode, Dimension, Member, Schema, StructDef, Typename};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Struct(String, BTreeMap<String, Value>),
}

impl Value {
    fn as_i64(&self) -> i64 {
        match self {
            Value::Byte(v) => i64::from(*v),
            Value::Bool(v) => i64::from(*v),
            Value::I8(v) => i64::from(*v),
            Value::I16(v) => i64::from(*v),
            Value::I32(v) => i64::from(*v),
            Value::I64(v) => *v,
            other => panic!("not an integer value: {other:?}"),
        }
    }

    fn as_len(&self) -> usize {
        usize::try_from(self.as_i64()).expect("negative length")
    }

    fn as_list(&self) -> &[Value] {
        match self {
            Value::List(items) => items,
            other => panic!("not a list value: {other:?}"),
        }
    }
}

/// Convenience constructor for struct values.
pub fn structv(ty: &str, fields: &[(&str, Value)]) -> Value {
    Value::Struct(
        ty.to_string(),
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

pub struct Codec<'a> {
    pub schema: &'a Schema,
    pub plans: BTreeMap<String, StructPlan>,
    pub little_endian: bool,
}

type Buf = Cursor<Vec<u8>>;

impl<'a> Codec<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            plans: plan_all(schema).expect("plan schema"),
            little_endian: false,
        }
    }

    pub fn little_endian(schema: &'a Schema) -> Self {
        Self {
            little_endian: true,
            ..Self::new(schema)
        }
    }

    pub fn fingerprint(&self, fullname: &str) -> [u8; 8] {
        self.plans[fullname].packed_fingerprint()
    }

    pub fn encode(&self, fullname: &str, value: &Value) -> Result<Vec<u8>, String> {
        let mut buf = Cursor::new(Vec::new());
        buf.write_all(&self.fingerprint(fullname)).unwrap();
        self.encode_body(fullname, value, &mut buf)?;
        Ok(buf.into_inner())
    }

    pub fn decode(&self, fullname: &str, bytes: &[u8]) -> Result<Value, String> {
        let mut buf = Cursor::new(bytes.to_vec());
        let mut prefix = [0u8; 8];
        buf.read_exact(&mut prefix)
            .map_err(|_| "message shorter than fingerprint".to_string())?;
        if prefix != self.fingerprint(fullname) {
            return Err(format!("fingerprint mismatch for {fullname}"));
        }
        self.decode_body(fullname, &mut buf)
    }

    fn encode_body(&self, fullname: &str, value: &Value, buf: &mut Buf) -> Result<(), String> {
        let st = self.schema.get(fullname).expect("struct");
        let plan = &self.plans[fullname];
        let fields = match value {
            Value::Struct(ty, fields) => {
                if ty != fullname {
                    return Err(format!(
                        "fingerprint assertion: member declared {fullname} got {ty}"
                    ));
                }
                fields
            }
            other => panic!("not a struct value: {other:?}"),
        };

        let mut offset_bit: usize = 0;
        for step in plan.encode_steps() {
            match step {
                Step::Packed(run) => {
                    for &i in &run.members {
                        let m = &st.members[i];
                        self.write_full(buf, &m.ty.fullname, &fields[&m.name]);
                    }
                }
                Step::OpenBits => offset_bit = 0,
                Step::PackedBits(run) => {
                    let total = offset_bit + run.total_bits as usize;
                    let mut bitbuf = vec![0u8; total.div_ceil(8)];
                    merge_shared_byte(buf, offset_bit, &mut bitbuf);
                    let mut pos = offset_bit;
                    for &i in &run.members {
                        let m = &st.members[i];
                        let nb = m.ty.numbits;
                        let raw = (fields[&m.name].as_i64() as u64) & mask(nb);
                        put_bits(&mut bitbuf, pos, nb, raw);
                        pos += nb as usize;
                    }
                    buf.write_all(&bitbuf).unwrap();
                    offset_bit = if run.carry { total % 8 } else { 0 };
                }
                Step::CloseBits => offset_bit = 0,
                Step::Single(field) => {
                    let m = &st.members[field.member];
                    self.encode_single(field.op, m, &fields[&m.name], buf)?;
                }
                Step::Array(arr) => {
                    let m = &st.members[arr.member];
                    self.encode_array(
                        m,
                        &arr.tail,
                        &m.dims,
                        &fields[&m.name],
                        fields,
                        buf,
                        &mut offset_bit,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn encode_single(
        &self,
        op: FieldOp,
        m: &Member,
        value: &Value,
        buf: &mut Buf,
    ) -> Result<(), String> {
        match op {
            FieldOp::String => {
                let s = match value {
                    Value::Str(s) => s,
                    other => panic!("not a string value: {other:?}"),
                };
                let encoded = s.as_bytes();
                buf.write_all(&(encoded.len() as u32 + 1).to_be_bytes())
                    .unwrap();
                buf.write_all(encoded).unwrap();
                buf.write_all(&[0]).unwrap();
                Ok(())
            }
            FieldOp::Boolean => {
                let b = matches!(value, Value::Bool(true));
                buf.write_all(&[b as u8]).unwrap();
                Ok(())
            }
            FieldOp::Struct => self.encode_body(&m.ty.fullname, value, buf),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_array(
        &self,
        m: &Member,
        tail: &ArrayTail,
        dims: &[Dimension],
        value: &Value,
        fields: &BTreeMap<String, Value>,
        buf: &mut Buf,
        offset_bit: &mut usize,
    ) -> Result<(), String> {
        if dims.len() > 1 {
            let len = self.dim_len(&dims[0], fields);
            let items = value.as_list();
            for item in items.iter().take(len) {
                self.encode_array(m, tail, &dims[1..], item, fields, buf, offset_bit)?;
            }
            return Ok(());
        }

        let len = self.dim_len(&dims[0], fields);
        match tail {
            ArrayTail::Bytes => {
                let bytes = match value {
                    Value::Bytes(b) => b,
                    other => panic!("not a bytes value: {other:?}"),
                };
                buf.write_all(&bytes[..len]).unwrap();
                Ok(())
            }
            ArrayTail::Packed(_) => {
                for item in value.as_list().iter().take(len) {
                    self.write_full(buf, &m.ty.fullname, item);
                }
                Ok(())
            }
            ArrayTail::Bits => {
                let nb = m.ty.numbits;
                let total = *offset_bit + len * nb as usize;
                let mut bitbuf = vec![0u8; total.div_ceil(8)];
                merge_shared_byte(buf, *offset_bit, &mut bitbuf);
                let mut pos = *offset_bit;
                for item in value.as_list().iter().take(len) {
                    put_bits(&mut bitbuf, pos, nb, (item.as_i64() as u64) & mask(nb));
                    pos += nb as usize;
                }
                buf.write_all(&bitbuf).unwrap();
                *offset_bit = total % 8;
                Ok(())
            }
            ArrayTail::Each(op) => {
                for item in value.as_list().iter().take(len) {
                    self.encode_single(*op, m, item, buf)?;
                }
                Ok(())
            }
        }
    }

    fn decode_body(&self, fullname: &str, buf: &mut Buf) -> Result<Value, String> {
        let st = self.schema.get(fullname).expect("struct");
        let plan = &self.plans[fullname];
        let mut fields: BTreeMap<String, Value> = BTreeMap::new();

        let mut offset_bit: usize = 0;
        for step in plan.decode_steps() {
            match step {
                Step::Packed(run) => {
                    for &i in &run.members {
                        let m = &st.members[i];
                        let v = self.read_full(buf, &m.ty.fullname)?;
                        fields.insert(m.name.clone(), v);
                    }
                }
                Step::OpenBits => offset_bit = 0,
                Step::PackedBits(run) => {
                    let total = offset_bit + run.total_bits as usize;
                    let bitbuf = read_vec(buf, total.div_ceil(8))?;
                    let mut pos = offset_bit;
                    for &i in &run.members {
                        let m = &st.members[i];
                        let nb = m.ty.numbits;
                        let raw = get_bits(&bitbuf, pos, nb);
                        pos += nb as usize;
                        fields.insert(m.name.clone(), bit_value(&m.ty, raw));
                    }
                    if run.carry {
                        offset_bit = total % 8;
                        if offset_bit != 0 {
                            buf.seek(SeekFrom::Current(-1)).unwrap();
                        }
                    } else {
                        offset_bit = 0;
                    }
                }
                Step::CloseBits => {
                    if offset_bit != 0 {
                        buf.seek(SeekFrom::Current(1)).unwrap();
                    }
                    offset_bit = 0;
                }
                Step::Single(field) => {
                    let m = &st.members[field.member];
                    let v = self.decode_single(field.op, m, buf)?;
                    fields.insert(m.name.clone(), v);
                }
                Step::Array(arr) => {
                    let m = &st.members[arr.member];
                    let v =
                        self.decode_array(m, &arr.tail, &m.dims, &fields, buf, &mut offset_bit)?;
                    fields.insert(m.name.clone(), v);
                }
            }
        }
        Ok(Value::Struct(fullname.to_string(), fields))
    }

    fn decode_single(&self, op: FieldOp, m: &Member, buf: &mut Buf) -> Result<Value, String> {
        match op {
            FieldOp::String => {
                let mut len = [0u8; 4];
                buf.read_exact(&mut len)
                    .map_err(|_| "truncated string length".to_string())?;
                let len = u32::from_be_bytes(len) as usize;
                if len == 0 {
                    return Err("string length must include the trailing NUL".to_string());
                }
                let bytes = read_vec(buf, len)?;
                Ok(Value::Str(
                    String::from_utf8_lossy(&bytes[..len - 1]).into_owned(),
                ))
            }
            FieldOp::Boolean => {
                let mut b = [0u8; 1];
                buf.read_exact(&mut b)
                    .map_err(|_| "truncated boolean".to_string())?;
                Ok(Value::Bool(b[0] != 0))
            }
            FieldOp::Struct => self.decode_body(&m.ty.fullname, buf),
        }
    }

    fn decode_array(
        &self,
        m: &Member,
        tail: &ArrayTail,
        dims: &[Dimension],
        fields: &BTreeMap<String, Value>,
        buf: &mut Buf,
        offset_bit: &mut usize,
    ) -> Result<Value, String> {
        if dims.len() > 1 {
            let len = self.dim_len(&dims[0], fields);
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(self.decode_array(m, tail, &dims[1..], fields, buf, offset_bit)?);
            }
            return Ok(Value::List(items));
        }

        let len = self.dim_len(&dims[0], fields);
        match tail {
            ArrayTail::Bytes => Ok(Value::Bytes(read_vec(buf, len)?)),
            ArrayTail::Packed(_) => {
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read_full(buf, &m.ty.fullname)?);
                }
                Ok(Value::List(items))
            }
            ArrayTail::Bits => {
                let nb = m.ty.numbits;
                let total = *offset_bit + len * nb as usize;
                let bitbuf = read_vec(buf, total.div_ceil(8))?;
                let mut pos = *offset_bit;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(bit_value(&m.ty, get_bits(&bitbuf, pos, nb)));
                    pos += nb as usize;
                }
                *offset_bit = total % 8;
                if *offset_bit != 0 {
                    buf.seek(SeekFrom::Current(-1)).unwrap();
                }
                Ok(Value::List(items))
            }
            ArrayTail::Each(op) => {
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.decode_single(*op, m, buf)?);
                }
                Ok(Value::List(items))
            }
        }
    }

    fn dim_len(&self, dim: &Dimension, fields: &BTreeMap<String, Value>) -> usize {
        match dim.mode {
            DimMode::Const => dim.size.parse().expect("const dim"),
            DimMode::Var => fields[&dim.size].as_len(),
        }
    }

    fn write_full(&self, buf: &mut Buf, fullname: &str, v: &Value) {
        let le = self.little_endian;
        let bytes: Vec<u8> = match fullname {
            "byte" => vec![match v {
                Value::Byte(b) => *b,
                other => panic!("not a byte value: {other:?}"),
            }],
            "boolean" => vec![matches!(v, Value::Bool(true)) as u8],
            "int8_t" => vec![v.as_i64() as u8],
            "int16_t" => order(le, (v.as_i64() as i16).to_be_bytes().to_vec()),
            "int32_t" => order(le, (v.as_i64() as i32).to_be_bytes().to_vec()),
            "int64_t" => order(le, v.as_i64().to_be_bytes().to_vec()),
            "float" => order(
                le,
                match v {
                    Value::F32(f) => f.to_be_bytes().to_vec(),
                    other => panic!("not a float value: {other:?}"),
                },
            ),
            "double" => order(
                le,
                match v {
                    Value::F64(f) => f.to_be_bytes().to_vec(),
                    other => panic!("not a double value: {other:?}"),
                },
            ),
            other => panic!("not a full-width primitive: {other}"),
        };
        buf.write_all(&bytes).unwrap();
    }

    fn read_full(&self, buf: &mut Buf, fullname: &str) -> Result<Value, String> {
        let le = self.little_endian;
        let size = wiregen::codec::primitive_size(fullname).expect("fixed-width primitive");
        let raw = order(le, read_vec(buf, size)?);
        let arr8 = |raw: &[u8]| -> [u8; 8] { raw.try_into().unwrap() };
        Ok(match fullname {
            "byte" => Value::Byte(raw[0]),
            "boolean" => Value::Bool(raw[0] != 0),
            "int8_t" => Value::I8(raw[0] as i8),
            "int16_t" => Value::I16(i16::from_be_bytes([raw[0], raw[1]])),
            "int32_t" => Value::I32(i32::from_be_bytes(raw[..4].try_into().unwrap())),
            "int64_t" => Value::I64(i64::from_be_bytes(arr8(&raw))),
            "float" => Value::F32(f32::from_be_bytes(raw[..4].try_into().unwrap())),
            "double" => Value::F64(f64::from_be_bytes(arr8(&raw))),
            other => panic!("not a full-width primitive: {other}"),
        })
    }
}

/// Reverse multi-byte payloads when little-endian mode is selected. The
/// big-endian byte strings are the canonical form everywhere else.
fn order(little_endian: bool, mut bytes: Vec<u8>) -> Vec<u8> {
    if little_endian && bytes.len() > 1 {
        bytes.reverse();
    }
    bytes
}

fn read_vec(buf: &mut Buf, n: usize) -> Result<Vec<u8>, String> {
    let mut out = vec![0u8; n];
    buf.read_exact(&mut out)
        .map_err(|_| format!("buffer exhausted reading {n} bytes"))?;
    Ok(out)
}

/// Re-read the partial byte shared with the previous bit run so its earlier
/// bits are preserved when this run's bytes are written back.
fn merge_shared_byte(buf: &mut Buf, offset_bit: usize, bitbuf: &mut [u8]) {
    if offset_bit == 0 {
        return;
    }
    buf.seek(SeekFrom::Current(-1)).unwrap();
    let mut b = [0u8; 1];
    buf.read_exact(&mut b).unwrap();
    bitbuf[0] = b[0];
    buf.seek(SeekFrom::Current(-1)).unwrap();
}

fn mask(numbits: u8) -> u64 {
    if numbits >= 64 {
        u64::MAX
    } else {
        (1u64 << numbits) - 1
    }
}

fn put_bits(buf: &mut [u8], mut pos: usize, numbits: u8, value: u64) {
    for k in (0..numbits).rev() {
        let bit = (value >> k) & 1;
        let idx = pos / 8;
        let sh = 7 - (pos % 8);
        if bit != 0 {
            buf[idx] |= 1 << sh;
        } else {
            buf[idx] &= !(1 << sh);
        }
        pos += 1;
    }
}

fn get_bits(buf: &[u8], mut pos: usize, numbits: u8) -> u64 {
    let mut out = 0u64;
    for _ in 0..numbits {
        let idx = pos / 8;
        let sh = 7 - (pos % 8);
        out = (out << 1) | u64::from((buf[idx] >> sh) & 1);
        pos += 1;
    }
    out
}

/// Decoded bitfield value in the member's integer type, sign-extended when
/// the member is marked signed.
fn bit_value(ty: &Typename, raw: u64) -> Value {
    let nb = ty.numbits;
    let v = if ty.sign_extend && nb < 64 && (raw >> (nb - 1)) & 1 == 1 {
        (raw | !mask(nb)) as i64
    } else {
        raw as i64
    };
    match ty.fullname.as_str() {
        "byte" => Value::Byte(v as u8),
        "int8_t" => Value::I8(v as i8),
        "int16_t" => Value::I16(v as i16),
        "int32_t" => Value::I32(v as i32),
        "int64_t" => Value::I64(v),
        other => panic!("bitfield on non-integer type {other}"),
    }
}

// Schema construction helpers shared by the integration tests.

pub fn scalar(name: &str, ty: &str) -> Member {
    Member {
        name: name.to_string(),
        ty: Typename::parse(ty),
        dims: Vec::new(),
    }
}

pub fn bitfield(name: &str, ty: &str, numbits: u8, sign_extend: bool) -> Member {
    let mut m = scalar(name, ty);
    m.ty.numbits = numbits;
    m.ty.sign_extend = sign_extend;
    m
}

pub fn fixed_array(name: &str, ty: &str, sizes: &[&str]) -> Member {
    let mut m = scalar(name, ty);
    m.dims = sizes
        .iter()
        .map(|s| Dimension {
            mode: DimMode::Const,
            size: s.to_string(),
        })
        .collect();
    m
}

pub fn var_array(name: &str, ty: &str, len_fields: &[&str]) -> Member {
    let mut m = scalar(name, ty);
    m.dims = len_fields
        .iter()
        .map(|s| Dimension {
            mode: DimMode::Var,
            size: s.to_string(),
        })
        .collect();
    m
}

pub fn def(name: &str, members: Vec<Member>) -> StructDef {
    StructDef {
        name: Typename::parse(name),
        members,
        constants: Vec::new(),
        source_file: None,
        base_hash: 0,
    }
}
