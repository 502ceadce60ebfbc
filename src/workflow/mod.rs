//! Command-level orchestration for CFDE submissions.
//!
//! `context` owns the pipeline; the command modules only resolve local
//! inputs (flags, saved state, prompts) and print results.
mod check;
mod context;
mod run;
mod status;

pub use check::run_check;
pub use run::run_run;
pub use status::run_status;
