//! End-to-end build: inputs → synthesize → merge → emit, per database.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use rangemeld_shared::{AppConfig, DatabaseConfig, MeldError, Result};
use rangemeld_sources::{Source, open_source};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::emit::emit;
use crate::merge::{MergeEngine, MergeStats, MergedEntry};
use crate::optimize::Optimizer;
use crate::synth::{RecordSynthesizer, SynthStats};

/// How often (in records) progress is reported while draining a source.
const PROGRESS_INTERVAL: u64 = 10_000;

/// Options shared by every database of a build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Directory relative input paths are resolved against.
    pub base_dir: PathBuf,
    /// Directory the NDJSON and manifest files are written to.
    pub output_dir: PathBuf,
    /// Tool version recorded in the manifest.
    pub tool_version: String,
}

/// Counters for one database build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    #[serde(flatten)]
    pub synth: SynthStats,
    #[serde(flatten)]
    pub merge: MergeStats,
    pub entries_emitted: u64,
}

/// Result of building one database.
#[derive(Debug)]
pub struct BuildResult {
    pub name: String,
    pub output_path: PathBuf,
    pub manifest_path: PathBuf,
    pub stats: BuildStats,
    pub elapsed: Duration,
}

/// Progress callback for reporting build status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a source is drained.
    fn source_started(&self, name: &str, current: usize, total: usize);
    /// Called periodically while a source is drained.
    fn records_read(&self, name: &str, count: u64);
    /// Called when a database build completes.
    fn done(&self, result: &BuildResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn source_started(&self, _name: &str, _current: usize, _total: usize) {}
    fn records_read(&self, _name: &str, _count: u64) {}
    fn done(&self, _result: &BuildResult) {}
}

/// Build the databases named in `selected`, or all of them when empty.
pub fn build_all(
    config: &AppConfig,
    selected: &[String],
    options: &BuildOptions,
    progress: &dyn ProgressReporter,
) -> Result<Vec<BuildResult>> {
    if let Some(unknown) = selected
        .iter()
        .find(|name| !config.databases.iter().any(|db| &db.name == *name))
    {
        return Err(MeldError::config(format!("unknown database {unknown:?}")));
    }

    config
        .databases
        .iter()
        .filter(|db| selected.is_empty() || selected.contains(&db.name))
        .map(|db| build_database(db, options, progress))
        .collect()
}

/// Build one database: merge every input, then emit.
///
/// Nothing is written unless every input drains cleanly.
#[instrument(skip_all, fields(db = %db.name))]
pub fn build_database(
    db: &DatabaseConfig,
    options: &BuildOptions,
    progress: &dyn ProgressReporter,
) -> Result<BuildResult> {
    let start = Instant::now();
    info!(inputs = db.inputs.len(), "starting database build");

    let sources = db
        .inputs
        .iter()
        .map(|input| open_source(input, &db.types, &options.base_dir));
    let (entries, mut stats) = merge_sources(db, sources, progress)?;
    stats.entries_emitted = entries.len() as u64;

    progress.phase("Writing output");
    let emitted = emit(db, &entries, &stats, &options.output_dir, &options.tool_version)?;

    let result = BuildResult {
        name: db.name.clone(),
        output_path: emitted.output_path,
        manifest_path: emitted.manifest_path,
        stats,
        elapsed: start.elapsed(),
    };

    info!(
        entries = stats.entries_emitted,
        merged = stats.merge.merged,
        resets = stats.merge.resets_applied,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "database build complete"
    );
    progress.done(&result);
    Ok(result)
}

/// Drain `sources` in order into one merge engine.
///
/// Sources are pulled from the iterator one at a time, so at most one is
/// open at any moment when the iterator opens them lazily.
pub fn merge_sources<I>(
    db: &DatabaseConfig,
    sources: I,
    progress: &dyn ProgressReporter,
) -> Result<(Vec<MergedEntry>, BuildStats)>
where
    I: IntoIterator<Item = Result<Box<dyn Source>>>,
{
    let sources = sources.into_iter();
    let total = db.inputs.len().max(sources.size_hint().0);
    let mut engine = MergeEngine::new(db.merge.conditional_resets.clone());
    let mut stats = BuildStats::default();

    progress.phase("Merging inputs");
    for (i, source) in sources.enumerate() {
        let mut source = source?;
        progress.source_started(source.name(), i + 1, total);
        let drained = drain_source(source.as_mut(), db, &mut engine, progress)?;
        stats.synth.absorb(&drained);
    }

    stats.merge = *engine.stats();
    Ok((engine.into_entries(), stats))
}

#[instrument(skip_all, fields(source = %source.name()))]
fn drain_source(
    source: &mut dyn Source,
    db: &DatabaseConfig,
    engine: &mut MergeEngine,
    progress: &dyn ProgressReporter,
) -> Result<SynthStats> {
    let name = source.name().to_string();
    let optimizer = Optimizer::new(db.mmdb.ip_version, &db.optimize);
    let mut synth = RecordSynthesizer::new(source, &db.optimize, optimizer);
    let mut reported = 0;

    while let Some(item) = synth.next() {
        let (network, document) = item?;
        engine.insert(network, document);

        let read = synth.stats().records_read;
        if read >= reported + PROGRESS_INTERVAL {
            progress.records_read(&name, read);
            reported = read;
        }
    }

    let stats = *synth.stats();
    info!(
        records = stats.records_read,
        networks = stats.networks_synthesized,
        discarded = stats.discarded_ip_version + stats.discarded_unrepresentable,
        trimmed = stats.prefix_trimmed,
        "source drained"
    );
    Ok(stats)
}
