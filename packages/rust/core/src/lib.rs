//! Record synthesis pipeline for rangemeld.
//!
//! Ties the sources to the per-record stages (coerce, assemble, optimize),
//! the cross-source merge engine and output emission.

pub mod assemble;
pub mod coerce;
pub mod emit;
pub mod merge;
pub mod optimize;
pub mod pipeline;
pub mod synth;

pub use assemble::{assemble, insert_path};
pub use coerce::coerce;
pub use emit::{BuildManifest, EmitResult, emit, verify_output};
pub use merge::{MergeEngine, MergedEntry, merge_documents};
pub use optimize::Optimizer;
pub use pipeline::{
    BuildOptions, BuildResult, BuildStats, ProgressReporter, SilentProgress, build_all,
    build_database, merge_sources,
};
pub use synth::RecordSynthesizer;
