pub mod backend;
pub mod codec;
pub mod emit_python;
pub mod fingerprint;
pub mod generate;
pub mod plan;
pub mod schema;
