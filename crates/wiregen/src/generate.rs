//! Generation driver: options, error taxonomy, and the per-run pipeline
//! (fingerprints -> emission plans -> per-package backend emission).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backend::{Backend, PackageContext, StructArtifact};
use crate::fingerprint::Fingerprints;
use crate::plan::{self, StructPlan};
use crate::schema::Schema;

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub out_dir: PathBuf,
    /// Encode full-width integers and floats little-endian on the wire.
    /// Backends that cannot honor this reject the whole run up front.
    pub little_endian: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            little_endian: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateErrorKind {
    /// The schema model violates a structural invariant.
    InvalidSchema,
    /// A member references a compound type the schema does not define.
    UnknownType,
    /// A requested wire-format option a selected backend cannot honor.
    Unsupported,
    /// Could not create an output directory or write an output file.
    Io,
    Internal,
}

#[derive(Debug, Clone)]
pub struct GenerateError {
    pub kind: GenerateErrorKind,
    pub message: String,
}

impl GenerateError {
    pub fn new(kind: GenerateErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    pub fn io(message: String) -> Self {
        Self::new(GenerateErrorKind::Io, message)
    }
}

impl std::fmt::Display for GenerateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GenerateError {}

/// Incremental-regeneration seam: "does output for this struct need
/// (re)generating given its schema source file and existing output path".
/// The staleness policy itself lives with the caller.
pub trait GenerationGate {
    fn needs_generation(&self, source_file: Option<&str>, out_path: &Path) -> bool;
}

/// Default gate: always regenerate.
pub struct RegenerateAll;

impl GenerationGate for RegenerateAll {
    fn needs_generation(&self, _source_file: Option<&str>, _out_path: &Path) -> bool {
        true
    }
}

/// Outcome of one generation run. Package failures are isolated: a failed
/// package is reported here while the remaining packages still complete.
#[derive(Debug, Default)]
pub struct GenerateSummary {
    /// (backend name, package name) pairs that emitted successfully.
    pub emitted: Vec<(String, String)>,
    /// Per-package failures, each fatal to that package only.
    pub failures: Vec<PackageFailure>,
}

#[derive(Debug)]
pub struct PackageFailure {
    pub backend: String,
    pub package: String,
    pub error: GenerateError,
}

impl GenerateSummary {
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Plan every struct once; results are keyed by fullname and shared across
/// backends (planning is pure, so this is safe to fan out per struct).
pub fn plan_all(schema: &Schema) -> Result<BTreeMap<String, StructPlan>, GenerateError> {
    let mut fingerprints = Fingerprints::default();
    let mut plans = BTreeMap::new();
    for st in &schema.structs {
        let p = plan::plan_struct(schema, st, &mut fingerprints)?;
        plans.insert(st.name.fullname.clone(), p);
    }
    Ok(plans)
}

/// Run the whole generation pipeline for the given backends.
///
/// The requested byte order is validated against every selected backend
/// before any output is written; an unsupported combination aborts the run
/// with no partial output. After that, output I/O failures are isolated per
/// package and collected into the summary.
pub fn generate(
    schema: &Schema,
    options: &GenerateOptions,
    backends: &[&dyn Backend],
    gate: &dyn GenerationGate,
) -> Result<GenerateSummary, GenerateError> {
    for backend in backends {
        if options.little_endian && !backend.supports_little_endian() {
            return Err(GenerateError::new(
                GenerateErrorKind::Unsupported,
                format!(
                    "backend {:?} does not support little-endian encoding",
                    backend.name()
                ),
            ));
        }
    }

    let plans = plan_all(schema)?;

    let mut summary = GenerateSummary::default();
    for backend in backends {
        for (package, structs) in schema.by_package() {
            let artifacts: Vec<StructArtifact<'_>> = structs
                .iter()
                .map(|st| StructArtifact {
                    def: st,
                    plan: &plans[&st.name.fullname],
                })
                .collect();
            let ctx = PackageContext {
                schema,
                options,
                gate,
                package,
                structs: artifacts,
            };
            match backend.emit_package(&ctx) {
                Ok(()) => summary
                    .emitted
                    .push((backend.name().to_string(), package.to_string())),
                Err(error) => summary.failures.push(PackageFailure {
                    backend: backend.name().to_string(),
                    package: package.to_string(),
                    error,
                }),
            }
        }
    }
    Ok(summary)
}
