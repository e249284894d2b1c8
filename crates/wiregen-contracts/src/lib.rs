//! Shared, version-pinned schema identifiers.
//!
//! These constants are the single source of truth for schema/version strings
//! that appear in machine-readable I/O.

/// Version of the JSON schema-model document the compiler accepts as input.
pub const SCHEMA_MODEL_SCHEMA_VERSION: &str = "wiregen.schema@0.1.0";

/// Version of the JSON report emitted by `wiregen fingerprints`.
pub const FINGERPRINT_REPORT_SCHEMA_VERSION: &str = "wiregen.fingerprints@0.1.0";

/// Version of the JSON report emitted by `wiregen generate`.
pub const GENERATE_REPORT_SCHEMA_VERSION: &str = "wiregen.generate.report@0.1.0";
