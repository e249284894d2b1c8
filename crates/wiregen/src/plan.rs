//! Field emission planner.
//!
//! Transforms a struct's ordered members into a backend-independent list of
//! typed steps. Backends render the same step list twice, once as the encode
//! procedure and once as the decode procedure; the grouping decisions are
//! identical on both sides, only the rendered text differs.
//!
//! Step semantics (the codec contract every backend must reproduce):
//!
//! - `Packed`: one bulk read/write covering the run's members back to back,
//!   each in its pack format, byte order per the run configuration.
//! - `OpenBits`: the bit cursor (`offset_bit`) resets to 0.
//! - `PackedBits`: one bit-level read/write of the run's members, MSB-first,
//!   starting at the current bit cursor. The operation covers
//!   `ceil((offset_bit + total_bits) / 8)` bytes. On decode, when the cursor
//!   is mid-byte the stream is already positioned on the shared partial byte
//!   (the previous bit step rewound onto it); on encode the shared byte is
//!   re-read and merged so its earlier bits are preserved. With `carry`,
//!   another bitfield step follows in the same region: the cursor advances to
//!   `(offset_bit + total_bits) % 8` and decode rewinds one byte when that is
//!   nonzero. Without `carry` the region ends here and the padded bytes are
//!   consumed whole.
//! - `CloseBits`: a bitfield region ended right after a bitfield array (no
//!   scalar run was pending). Decode skips the shared partial byte when the
//!   cursor is mid-byte; encode emits nothing (the padded byte was already
//!   written).
//! - `Single`: a member that is never grouped: strings and booleans (their
//!   representation is not expressible as a fixed-width tuple element) and
//!   nested-struct scalars (decode delegates to the nested type's decode;
//!   encode asserts the nested value's fingerprint matches the declared type
//!   before delegating).
//! - `Array`: one loop per dimension except the last; the last dimension is
//!   covered by the `ArrayTail` in a single operation where possible.
//!   Variable dimension lengths are read from an earlier sibling member;
//!   that ordering is guaranteed upstream by the schema parser.

use std::collections::BTreeSet;

use crate::codec::{self, PackFmt};
use crate::fingerprint::Fingerprints;
use crate::generate::{GenerateError, GenerateErrorKind};
use crate::schema::{Member, Schema, StructDef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Packed(ScalarRun),
    OpenBits,
    PackedBits(BitRun),
    CloseBits,
    Single(FieldStep),
    Array(ArrayStep),
}

/// A maximal run of consecutive scalar, fixed-width, non-bitfield,
/// non-string, non-boolean members, moved in one bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarRun {
    /// Indices into the struct's member list, declaration order.
    pub members: Vec<usize>,
    pub formats: Vec<PackFmt>,
    /// Total wire bytes, known at generation time.
    pub wire_bytes: usize,
}

/// A maximal run of consecutive scalar bitfield members, packed MSB-first
/// with no padding between fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitRun {
    pub members: Vec<usize>,
    pub total_bits: u64,
    /// True when a bitfield array follows within the same region, so the bit
    /// cursor stays live past this run.
    pub carry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldStep {
    pub member: usize,
    pub op: FieldOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    String,
    Boolean,
    Struct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayStep {
    pub member: usize,
    pub tail: ArrayTail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayTail {
    /// `byte` element type: the innermost dimension is one contiguous run of
    /// raw bytes, never an array of 1-byte tuples.
    Bytes,
    /// Non-string primitive element type: the innermost dimension is one
    /// bulk operation sized by the declared or runtime-resolved length.
    Packed(PackFmt),
    /// Bitfield element type: one bit-level run of `len * numbits` bits.
    /// Always carries the bit cursor (the following step is either another
    /// bitfield step or `CloseBits`).
    Bits,
    /// String or nested-struct element type: one isolated operation per
    /// element.
    Each(FieldOp),
}

#[derive(Debug, Clone)]
pub struct StructPlan {
    pub fullname: String,
    pub fingerprint: u64,
    steps: Vec<Step>,
    /// Compound types directly referenced by members (self excluded); the
    /// set a backend needs for import/include generation.
    pub depends_on: BTreeSet<String>,
}

impl StructPlan {
    /// Ordered steps of the encode procedure.
    pub fn encode_steps(&self) -> &[Step] {
        &self.steps
    }

    /// Ordered steps of the decode procedure. Grouping is identical to the
    /// encode side by construction.
    pub fn decode_steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn packed_fingerprint(&self) -> [u8; 8] {
        self.fingerprint.to_be_bytes()
    }
}

/// Members that can never join a bulk run.
fn single_op(m: &Member) -> Option<FieldOp> {
    if m.ty.fullname == "string" {
        Some(FieldOp::String)
    } else if m.ty.fullname == "boolean" {
        Some(FieldOp::Boolean)
    } else if !m.ty.is_primitive() {
        Some(FieldOp::Struct)
    } else {
        None
    }
}

fn array_tail(st: &StructDef, m: &Member) -> Result<ArrayTail, GenerateError> {
    if m.ty.numbits != 0 {
        return Ok(ArrayTail::Bits);
    }
    if m.ty.fullname == "byte" {
        return Ok(ArrayTail::Bytes);
    }
    if m.ty.fullname == "string" {
        return Ok(ArrayTail::Each(FieldOp::String));
    }
    if !m.ty.is_primitive() {
        return Ok(ArrayTail::Each(FieldOp::Struct));
    }
    match codec::pack_format(&m.ty) {
        Some(fmt) => Ok(ArrayTail::Packed(fmt)),
        None => Err(GenerateError::new(
            GenerateErrorKind::Internal,
            format!(
                "{}.{}: no pack format for array element type {}",
                st.name.fullname, m.name, m.ty.fullname
            ),
        )),
    }
}

struct Planner<'a> {
    st: &'a StructDef,
    steps: Vec<Step>,
    pending: Vec<(usize, PackFmt)>,
    pending_bits: Vec<usize>,
    in_bits: bool,
}

impl<'a> Planner<'a> {
    fn flush_scalars(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let (members, formats): (Vec<usize>, Vec<PackFmt>) =
            std::mem::take(&mut self.pending).into_iter().unzip();
        let wire_bytes = formats.iter().map(|f| f.wire_size()).sum();
        self.steps.push(Step::Packed(ScalarRun {
            members,
            formats,
            wire_bytes,
        }));
    }

    fn flush_bits(&mut self, carry: bool) {
        if self.pending_bits.is_empty() {
            return;
        }
        let members = std::mem::take(&mut self.pending_bits);
        let total_bits = members
            .iter()
            .map(|&i| u64::from(self.st.members[i].ty.numbits))
            .sum();
        self.steps.push(Step::PackedBits(BitRun {
            members,
            total_bits,
            carry,
        }));
    }

    /// Leaving a bitfield region: flush a pending scalar bit run (padded
    /// read, no cursor carry), or, when the region ended right after a
    /// bitfield array, emit the shared-byte skip.
    fn leave_bits(&mut self) {
        if !self.pending_bits.is_empty() {
            self.flush_bits(false);
        } else {
            self.steps.push(Step::CloseBits);
        }
        self.in_bits = false;
    }
}

pub fn plan_struct(
    schema: &Schema,
    st: &StructDef,
    fingerprints: &mut Fingerprints,
) -> Result<StructPlan, GenerateError> {
    let fingerprint = fingerprints.of(schema, &st.name.fullname)?;

    let mut p = Planner {
        st,
        steps: Vec::new(),
        pending: Vec::new(),
        pending_bits: Vec::new(),
        in_bits: false,
    };

    for (i, m) in st.members.iter().enumerate() {
        let is_bits = m.ty.numbits != 0;
        if !p.in_bits && is_bits {
            p.flush_scalars();
            p.steps.push(Step::OpenBits);
            p.in_bits = true;
        } else if p.in_bits && !is_bits {
            p.leave_bits();
        }

        if m.dims.is_empty() {
            if is_bits {
                p.pending_bits.push(i);
            } else if let Some(op) = single_op(m) {
                p.steps.push(Step::Single(FieldStep { member: i, op }));
            } else {
                match codec::pack_format(&m.ty) {
                    Some(fmt) => p.pending.push((i, fmt)),
                    None => {
                        return Err(GenerateError::new(
                            GenerateErrorKind::Internal,
                            format!(
                                "{}.{}: no pack format for scalar type {}",
                                st.name.fullname, m.name, m.ty.fullname
                            ),
                        ))
                    }
                }
            }
        } else {
            if p.in_bits {
                // A bitfield array keeps the region open, so the pending
                // scalar bitfields flush with the cursor carried.
                p.flush_bits(true);
            } else {
                p.flush_scalars();
            }
            p.steps.push(Step::Array(ArrayStep {
                member: i,
                tail: array_tail(st, m)?,
            }));
        }
    }

    if p.in_bits {
        // A region still open at end of struct closes like any other: the
        // stream must land on the byte after the padded run so this struct
        // stays composable as a nested member.
        p.leave_bits();
    } else {
        p.flush_scalars();
    }

    let mut depends_on = BTreeSet::new();
    for m in &st.members {
        if !m.ty.is_primitive() && m.ty.fullname != st.name.fullname {
            depends_on.insert(m.ty.fullname.clone());
        }
    }

    Ok(StructPlan {
        fullname: st.name.fullname.clone(),
        fingerprint,
        steps: p.steps,
        depends_on,
    })
}
