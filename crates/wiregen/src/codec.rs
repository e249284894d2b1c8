//! Primitive codec rules.
//!
//! The fixed mapping from each primitive type to its wire width, its
//! one-letter pack-format code (used when consecutive same-style members are
//! grouped into one bulk read/write), and its numeric encoding. Every
//! backend must honor this table identically or cross-language
//! interoperability breaks.

use crate::schema::Typename;

pub const PRIMITIVE_TYPES: &[&str] = &[
    "byte", "boolean", "int8_t", "int16_t", "int32_t", "int64_t", "float", "double", "string",
];

pub fn is_primitive(fullname: &str) -> bool {
    PRIMITIVE_TYPES.contains(&fullname)
}

pub fn is_integer_type(fullname: &str) -> bool {
    matches!(fullname, "byte" | "int8_t" | "int16_t" | "int32_t" | "int64_t")
}

/// Wire byte width of a full-width primitive. `string` has no fixed width.
pub fn primitive_size(fullname: &str) -> Option<usize> {
    match fullname {
        "byte" | "boolean" | "int8_t" => Some(1),
        "int16_t" => Some(2),
        "int32_t" => Some(4),
        "int64_t" => Some(8),
        "float" => Some(4),
        "double" => Some(8),
        _ => None,
    }
}

/// Symbolic pack-format code for one full-width primitive value.
///
/// Integers are two's-complement, fixed width, big-endian on the wire unless
/// the little-endian mode is selected; `boolean` is one signed byte decoded
/// as nonzero-is-true; `float`/`double` are IEEE-754.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackFmt {
    U8,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl PackFmt {
    pub fn code(self) -> char {
        match self {
            PackFmt::U8 => 'B',
            PackFmt::I8 => 'b',
            PackFmt::I16 => 'h',
            PackFmt::I32 => 'i',
            PackFmt::I64 => 'q',
            PackFmt::F32 => 'f',
            PackFmt::F64 => 'd',
        }
    }

    pub fn wire_size(self) -> usize {
        match self {
            PackFmt::U8 | PackFmt::I8 => 1,
            PackFmt::I16 => 2,
            PackFmt::I32 | PackFmt::F32 => 4,
            PackFmt::I64 | PackFmt::F64 => 8,
        }
    }
}

/// Pack format for a full-width primitive typename. `None` for strings,
/// compound types and bitfield-marked members (bitfields pack at the bit
/// level, see the emission planner).
pub fn pack_format(ty: &Typename) -> Option<PackFmt> {
    if ty.numbits != 0 {
        return None;
    }
    match ty.fullname.as_str() {
        "byte" => Some(PackFmt::U8),
        "boolean" | "int8_t" => Some(PackFmt::I8),
        "int16_t" => Some(PackFmt::I16),
        "int32_t" => Some(PackFmt::I32),
        "int64_t" => Some(PackFmt::I64),
        "float" => Some(PackFmt::F32),
        "double" => Some(PackFmt::F64),
        _ => None,
    }
}

/// Bit-level pack code for a bitfield member (`u5` / `s5` style): signed
/// bitfields sign-extend on decode, unsigned do not. Encoding always masks
/// to `numbits` and packs the bits unsigned.
pub fn bitfield_format(ty: &Typename) -> Option<String> {
    if ty.numbits == 0 {
        return None;
    }
    let sign = if ty.sign_extend { 's' } else { 'u' };
    Some(format!("{sign}{}", ty.numbits))
}
