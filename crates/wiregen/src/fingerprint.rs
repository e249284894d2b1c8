//! Structural fingerprints.
//!
//! Every encoded message is prefixed with its top-level type's 64-bit
//! fingerprint, packed big-endian; decoders must reject a message whose
//! prefix differs from the expected type's value. The fingerprint covers the
//! struct's own base hash plus, recursively, the shape of every compound
//! type it references. Recursive and mutually-referential type graphs are
//! handled with an explicit visiting set carried down the recursion path: a
//! type already on the path contributes 0 and recursion stops there.

use std::collections::BTreeMap;

use crate::generate::{GenerateError, GenerateErrorKind};
use crate::schema::Schema;

/// Per-invocation fingerprint cache. Computation is pure and deterministic,
/// so memoizing the top-level value per struct is safe and required (the
/// recursion is re-run for every nested reference otherwise).
#[derive(Debug, Default)]
pub struct Fingerprints {
    cache: BTreeMap<String, u64>,
}

impl Fingerprints {
    pub fn of(&mut self, schema: &Schema, fullname: &str) -> Result<u64, GenerateError> {
        if let Some(&h) = self.cache.get(fullname) {
            return Ok(h);
        }
        let mut visiting = Vec::new();
        let h = hash_recursive(schema, fullname, &mut visiting)?;
        self.cache.insert(fullname.to_string(), h);
        Ok(h)
    }

    /// Wire form of the fingerprint: 8 big-endian bytes.
    pub fn packed(&mut self, schema: &Schema, fullname: &str) -> Result<[u8; 8], GenerateError> {
        Ok(self.of(schema, fullname)?.to_be_bytes())
    }
}

/// `hash(struct, visiting)`: 0 on a cycle, otherwise the struct's base hash
/// plus the recursive hash of every compound member type (same path-extended
/// visiting set), mod 2^64, rotated left by one bit.
///
/// Only top-level results are cached; inner results depend on the visiting
/// path and are not safe to memoize.
fn hash_recursive(
    schema: &Schema,
    fullname: &str,
    visiting: &mut Vec<String>,
) -> Result<u64, GenerateError> {
    if visiting.iter().any(|v| v == fullname) {
        return Ok(0);
    }
    let st = schema.get(fullname).ok_or_else(|| {
        GenerateError::new(
            GenerateErrorKind::UnknownType,
            format!("unknown compound type: {fullname}"),
        )
    })?;

    visiting.push(fullname.to_string());
    let mut h = st.base_hash;
    for m in &st.members {
        if !m.ty.is_primitive() {
            h = h.wrapping_add(hash_recursive(schema, &m.ty.fullname, visiting)?);
        }
    }
    visiting.pop();

    Ok(h.rotate_left(1))
}
