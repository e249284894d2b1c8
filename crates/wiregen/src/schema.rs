//! In-memory schema model.
//!
//! The textual schema parser is an external collaborator; it hands the
//! compiler a JSON document matching these types. `Schema::from_json`
//! deserializes, validates, resolves named constant dimensions and computes
//! each struct's base hash. After that the model is immutable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::generate::{GenerateError, GenerateErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Typename {
    pub fullname: String,
    #[serde(default)]
    pub package: String,
    pub shortname: String,
    /// Bit width for sub-byte bitfield members; 0 for full-width types.
    #[serde(default)]
    pub numbits: u8,
    #[serde(default)]
    pub sign_extend: bool,
}

impl Typename {
    /// Build a typename from a dotted fullname (`pkg.sub.msg` or `msg`).
    pub fn parse(fullname: &str) -> Self {
        let (package, shortname) = match fullname.rfind('.') {
            Some(i) => (&fullname[..i], &fullname[i + 1..]),
            None => ("", fullname),
        };
        Typename {
            fullname: fullname.to_string(),
            package: package.to_string(),
            shortname: shortname.to_string(),
            numbits: 0,
            sign_extend: false,
        }
    }

    pub fn is_primitive(&self) -> bool {
        crate::codec::is_primitive(&self.fullname)
    }

    /// Fullname with dots replaced by underscores; used by backends for
    /// collision-free import aliases.
    pub fn name_underscored(&self) -> String {
        self.fullname.replace('.', "_")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimMode {
    /// Size fixed at compile time (integer literal or named constant).
    Const,
    /// Size read at run time from an earlier sibling integer member.
    Var,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub mode: DimMode,
    pub size: String,
}

impl Dimension {
    /// Numeric value of a const dimension. Only valid after `Schema::from_json`
    /// has resolved named constants to literals.
    pub fn const_len(&self) -> Option<u64> {
        match self.mode {
            DimMode::Const => self.size.parse().ok(),
            DimMode::Var => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Typename,
    #[serde(default)]
    pub dims: Vec<Dimension>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    /// The literal exactly as written in the schema source (`0x1f`, `-3`).
    pub value_str: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: Typename,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    /// Schema source file this struct came from; consulted by the
    /// incremental-regeneration gate.
    #[serde(default)]
    pub source_file: Option<String>,
    /// Syntactic hash over this struct's own shape, computed at load time.
    /// Does not incorporate other structs; the fingerprint engine does that.
    #[serde(skip)]
    pub base_hash: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaDoc {
    schema_version: String,
    structs: Vec<StructDef>,
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub structs: Vec<StructDef>,
    by_name: BTreeMap<String, usize>,
}

impl Schema {
    pub fn from_json(bytes: &[u8]) -> Result<Self, GenerateError> {
        let doc: SchemaDoc = serde_json::from_slice(bytes).map_err(|err| {
            GenerateError::new(
                GenerateErrorKind::InvalidSchema,
                format!("schema model is not valid JSON: {err}"),
            )
        })?;
        if doc.schema_version != wiregen_contracts::SCHEMA_MODEL_SCHEMA_VERSION {
            return Err(GenerateError::new(
                GenerateErrorKind::InvalidSchema,
                format!(
                    "unsupported schema_version {:?} (expected {:?})",
                    doc.schema_version,
                    wiregen_contracts::SCHEMA_MODEL_SCHEMA_VERSION
                ),
            ));
        }
        Schema::from_structs(doc.structs)
    }

    /// Build a schema directly from struct definitions (tests, embedding).
    pub fn from_structs(mut structs: Vec<StructDef>) -> Result<Self, GenerateError> {
        let mut by_name = BTreeMap::new();
        for (i, st) in structs.iter_mut().enumerate() {
            validate_struct(st)?;
            resolve_const_dims(st)?;
            st.base_hash = base_hash(st);
            if by_name.insert(st.name.fullname.clone(), i).is_some() {
                return Err(GenerateError::new(
                    GenerateErrorKind::InvalidSchema,
                    format!("duplicate struct definition: {}", st.name.fullname),
                ));
            }
        }
        Ok(Schema { structs, by_name })
    }

    pub fn get(&self, fullname: &str) -> Option<&StructDef> {
        self.by_name.get(fullname).map(|&i| &self.structs[i])
    }

    /// Structs grouped by package, in deterministic order.
    pub fn by_package(&self) -> BTreeMap<&str, Vec<&StructDef>> {
        let mut packages: BTreeMap<&str, Vec<&StructDef>> = BTreeMap::new();
        for st in &self.structs {
            packages
                .entry(st.name.package.as_str())
                .or_default()
                .push(st);
        }
        packages
    }
}

fn validate_struct(st: &StructDef) -> Result<(), GenerateError> {
    for m in &st.members {
        let ty = &m.ty;
        if ty.numbits != 0 {
            let width = crate::codec::primitive_size(&ty.fullname);
            let integral = crate::codec::is_integer_type(&ty.fullname);
            if !integral {
                return Err(GenerateError::new(
                    GenerateErrorKind::InvalidSchema,
                    format!(
                        "{}.{}: numbits is only valid on integer types, not {}",
                        st.name.fullname, m.name, ty.fullname
                    ),
                ));
            }
            let width_bits = width.unwrap_or(0) as u16 * 8;
            if u16::from(ty.numbits) > width_bits {
                return Err(GenerateError::new(
                    GenerateErrorKind::InvalidSchema,
                    format!(
                        "{}.{}: numbits {} exceeds the width of {}",
                        st.name.fullname, m.name, ty.numbits, ty.fullname
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Replace named-constant const dimensions with their numeric literal, per
/// the enclosing struct's constant table.
fn resolve_const_dims(st: &mut StructDef) -> Result<(), GenerateError> {
    let consts: BTreeMap<&str, i64> = st
        .constants
        .iter()
        .map(|c| (c.name.as_str(), c.value))
        .collect();
    for m in &mut st.members {
        for dim in &mut m.dims {
            if dim.mode != DimMode::Const || dim.size.parse::<u64>().is_ok() {
                continue;
            }
            match consts.get(dim.size.as_str()) {
                Some(&v) if v >= 0 => dim.size = v.to_string(),
                Some(&v) => {
                    return Err(GenerateError::new(
                        GenerateErrorKind::InvalidSchema,
                        format!(
                            "{}.{}: array dimension constant {} is negative ({v})",
                            st.name.fullname, m.name, dim.size
                        ),
                    ))
                }
                None => {
                    return Err(GenerateError::new(
                        GenerateErrorKind::InvalidSchema,
                        format!(
                            "{}.{}: unknown array dimension constant {:?}",
                            st.name.fullname, m.name, dim.size
                        ),
                    ))
                }
            }
        }
    }
    Ok(())
}

fn hash_update(h: u64, c: u8) -> u64 {
    ((h << 8) ^ (h >> 55)).wrapping_add(u64::from(c))
}

fn hash_str(mut h: u64, s: &str) -> u64 {
    h = hash_update(h, s.len() as u8);
    for &b in s.as_bytes() {
        h = hash_update(h, b);
    }
    h
}

/// Syntactic base hash of one struct: member names, primitive type names,
/// bitfield widths and dimensions, in declaration order. Compound member
/// type names are deliberately excluded so that renaming a nested type does
/// not change this value; the nested shape enters through the fingerprint
/// engine's recursive sum instead. Constants never contribute.
pub fn base_hash(st: &StructDef) -> u64 {
    let mut h: u64 = 0x12345678;
    for m in &st.members {
        h = hash_str(h, &m.name);
        if m.ty.is_primitive() {
            h = hash_str(h, &m.ty.fullname);
            if m.ty.numbits != 0 {
                h = hash_update(h, m.ty.numbits);
                h = hash_update(h, u8::from(m.ty.sign_extend));
            }
        }
        h = hash_update(h, m.dims.len() as u8);
        for dim in &m.dims {
            h = hash_update(h, dim.mode as u8);
            h = hash_str(h, &dim.size);
        }
    }
    h
}
