//! Contract between the core and per-language emitters.
//!
//! For each struct the core supplies the definition, its fingerprint and
//! emission plan, and the compound types it depends on; a backend renders
//! those into target-language syntax. The core makes no assumption about
//! that syntax.

use crate::generate::{GenerateError, GenerateOptions, GenerationGate};
use crate::plan::StructPlan;
use crate::schema::{Schema, StructDef};

pub struct StructArtifact<'a> {
    pub def: &'a StructDef,
    pub plan: &'a StructPlan,
}

/// Everything a backend needs to emit one output package. Packages are the
/// unit of failure isolation: an error returned from `emit_package` aborts
/// that package only.
pub struct PackageContext<'a> {
    pub schema: &'a Schema,
    pub options: &'a GenerateOptions,
    pub gate: &'a dyn GenerationGate,
    /// Package name, possibly empty (dotted, e.g. `nav.sensors`).
    pub package: &'a str,
    pub structs: Vec<StructArtifact<'a>>,
}

pub trait Backend {
    fn name(&self) -> &'static str;

    /// Whether this backend can emit code honoring little-endian integer
    /// and float payloads. A backend answering `false` causes the whole run
    /// to abort before any output when that mode is requested.
    fn supports_little_endian(&self) -> bool;

    fn emit_package(&self, ctx: &PackageContext<'_>) -> Result<(), GenerateError>;
}
