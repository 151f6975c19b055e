// Matching and scoring engine for civic issue reports.
// Everything here is a pure function of its inputs; persistence lives in
// `crate::database` and orchestration in `crate::services`.

pub mod duplicate;
pub mod fingerprint;
pub mod geo;
pub mod lifecycle;
pub mod prediction;
pub mod settings;
pub mod severity;
pub mod spam;
pub mod text;
