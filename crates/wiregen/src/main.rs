use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use wiregen::backend::Backend;
use wiregen::emit_python::PythonBackend;
use wiregen::fingerprint::Fingerprints;
use wiregen::generate::{self, GenerateOptions, GenerationGate, RegenerateAll};
use wiregen::schema::Schema;

#[derive(Parser)]
#[command(name = "wiregen")]
#[command(about = "Message-schema compiler (schema model -> codec source).", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendId {
    Python,
}

#[derive(Subcommand)]
enum Cmd {
    /// Generate codec source for every struct in the schema model.
    Generate {
        /// Schema-model JSON produced by the schema parser.
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum)]
        backend: Vec<BackendId>,
        /// Encode integers and floats little-endian on the wire. Backends
        /// that cannot honor this abort the run.
        #[arg(long)]
        little_endian_encoding: bool,
        /// Regenerate every output file, ignoring the staleness check.
        #[arg(long)]
        force: bool,
    },
    /// Print each struct's 64-bit structural fingerprint as JSON.
    Fingerprints {
        #[arg(long)]
        schema: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct FingerprintReport {
    schema_version: &'static str,
    fingerprints: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct GenerateReport {
    schema_version: &'static str,
    ok: bool,
    emitted: Vec<String>,
    failures: Vec<String>,
}

/// Regenerate a struct's output only when it is missing or older than its
/// schema source file.
struct MtimeGate;

impl GenerationGate for MtimeGate {
    fn needs_generation(&self, source_file: Option<&str>, out_path: &std::path::Path) -> bool {
        let Some(source) = source_file else {
            return true;
        };
        let (Ok(src_meta), Ok(out_meta)) =
            (std::fs::metadata(source), std::fs::metadata(out_path))
        else {
            return true;
        };
        match (src_meta.modified(), out_meta.modified()) {
            (Ok(src), Ok(out)) => src > out,
            _ => true,
        }
    }
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn load_schema(path: &PathBuf) -> Result<Schema> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read schema model: {}", path.display()))?;
    Schema::from_json(&bytes).with_context(|| format!("load schema model: {}", path.display()))
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Generate {
            schema,
            out,
            backend,
            little_endian_encoding,
            force,
        } => {
            let schema = load_schema(&schema)?;
            let options = GenerateOptions {
                out_dir: out,
                little_endian: little_endian_encoding,
            };
            let backends: Vec<Box<dyn Backend>> = backend
                .iter()
                .map(|id| match id {
                    BackendId::Python => Box::new(PythonBackend) as Box<dyn Backend>,
                })
                .collect();
            let backend_refs: Vec<&dyn Backend> = backends.iter().map(|b| b.as_ref()).collect();

            let summary = if force {
                generate::generate(&schema, &options, &backend_refs, &RegenerateAll)?
            } else {
                generate::generate(&schema, &options, &backend_refs, &MtimeGate)?
            };

            let report = GenerateReport {
                schema_version: wiregen_contracts::GENERATE_REPORT_SCHEMA_VERSION,
                ok: summary.ok(),
                emitted: summary
                    .emitted
                    .iter()
                    .map(|(b, p)| format!("{b}:{p}"))
                    .collect(),
                failures: summary
                    .failures
                    .iter()
                    .map(|f| format!("{}:{}: {}", f.backend, f.package, f.error))
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if summary.ok() {
                std::process::ExitCode::SUCCESS
            } else {
                std::process::ExitCode::from(1)
            })
        }
        Cmd::Fingerprints { schema } => {
            let schema = load_schema(&schema)?;
            let mut fps = Fingerprints::default();
            let mut report = FingerprintReport {
                schema_version: wiregen_contracts::FINGERPRINT_REPORT_SCHEMA_VERSION,
                fingerprints: BTreeMap::new(),
            };
            for st in &schema.structs {
                let h = fps.of(&schema, &st.name.fullname)?;
                report
                    .fingerprints
                    .insert(st.name.fullname.clone(), format!("{h:016x}"));
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(std::process::ExitCode::SUCCESS)
        }
    }
}
