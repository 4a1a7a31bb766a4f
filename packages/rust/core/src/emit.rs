//! Output emission: the NDJSON handoff file and its build manifest.
//!
//! Layout in the output directory:
//! ```text
//! <output_dir>/
//! ├── <name>.ndjson          one {"network": ..., "data": ...} per line
//! └── <name>.manifest.json   BuildManifest
//! ```
//! Both files are written to a temp file first and renamed into place.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rangemeld_shared::{DatabaseConfig, Document, MeldError, MmdbConfig, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::merge::MergedEntry;
use crate::pipeline::BuildStats;

/// Current manifest schema version.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Metadata written next to the NDJSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub schema_version: u32,
    pub name: String,
    /// Writer metadata passed through from the config.
    pub mmdb: MmdbConfig,
    pub tool_version: String,
    pub built_at: DateTime<Utc>,
    pub entry_count: usize,
    pub stats: BuildStats,
    /// File name of the NDJSON output, relative to the manifest.
    pub output_file: String,
    /// Hex SHA-256 of the NDJSON output.
    pub sha256: String,
}

/// Paths and manifest of an emitted database.
#[derive(Debug, Clone)]
pub struct EmitResult {
    pub output_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: BuildManifest,
}

#[derive(Serialize)]
struct EntryLine<'a> {
    network: String,
    data: &'a Document,
}

/// Write the merged entries and the manifest for one database.
#[instrument(skip_all, fields(db = %db.name, entries = entries.len()))]
pub fn emit(
    db: &DatabaseConfig,
    entries: &[MergedEntry],
    stats: &BuildStats,
    output_dir: &Path,
    tool_version: &str,
) -> Result<EmitResult> {
    std::fs::create_dir_all(output_dir).map_err(|e| MeldError::io(output_dir, e))?;

    let output_file = db.output_file_name();
    let output_path = output_dir.join(&output_file);
    let sha256 = write_ndjson(&output_path, entries)?;

    let manifest = BuildManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        name: db.name.clone(),
        mmdb: db.mmdb.clone(),
        tool_version: tool_version.to_string(),
        built_at: Utc::now(),
        entry_count: entries.len(),
        stats: *stats,
        output_file,
        sha256,
    };
    let manifest_path = output_dir.join(db.manifest_file_name());
    write_json(&manifest_path, &manifest)?;

    info!(
        output = %output_path.display(),
        sha256 = %manifest.sha256,
        "database emitted"
    );

    Ok(EmitResult {
        output_path,
        manifest_path,
        manifest,
    })
}

/// Check an emitted database against its manifest: schema version, entry
/// count and checksum.
pub fn verify_output(manifest_path: &Path) -> Result<BuildManifest> {
    let content =
        std::fs::read_to_string(manifest_path).map_err(|e| MeldError::io(manifest_path, e))?;
    let manifest: BuildManifest = serde_json::from_str(&content).map_err(|e| {
        MeldError::validation(format!("invalid {}: {e}", manifest_path.display()))
    })?;

    if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
        return Err(MeldError::validation(format!(
            "unsupported schema_version: {} (expected {MANIFEST_SCHEMA_VERSION})",
            manifest.schema_version
        )));
    }

    let output_path = manifest_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(&manifest.output_file);
    let file = File::open(&output_path).map_err(|e| MeldError::io(&output_path, e))?;

    let mut hasher = Sha256::new();
    let mut lines = 0usize;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| MeldError::io(&output_path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&line);
        lines += 1;
    }

    let actual = format!("{:x}", hasher.finalize());
    if actual != manifest.sha256 {
        return Err(MeldError::validation(format!(
            "checksum mismatch for {}: manifest has {}, file has {actual}",
            manifest.output_file, manifest.sha256
        )));
    }
    if lines != manifest.entry_count {
        return Err(MeldError::validation(format!(
            "{} has {lines} entries, manifest says {}",
            manifest.output_file, manifest.entry_count
        )));
    }

    debug!(path = %output_path.display(), "output verified");
    Ok(manifest)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Stream entries to `path` as NDJSON, returning the file's hex SHA-256.
fn write_ndjson(path: &Path, entries: &[MergedEntry]) -> Result<String> {
    let temp = temp_path(path);
    let sha256 = match stream_entries(&temp, entries) {
        Ok(sha256) => sha256,
        Err(e) => {
            discard_temp(&temp);
            return Err(e);
        }
    };
    std::fs::rename(&temp, path).map_err(|e| {
        discard_temp(&temp);
        MeldError::io(path, e)
    })?;
    debug!(path = %path.display(), entries = entries.len(), "wrote NDJSON");
    Ok(sha256)
}

fn stream_entries(temp: &Path, entries: &[MergedEntry]) -> Result<String> {
    let file = File::create(temp).map_err(|e| MeldError::io(temp, e))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();
    let mut line = Vec::new();

    for entry in entries {
        line.clear();
        let record = EntryLine {
            network: entry.network.to_string(),
            data: &entry.document,
        };
        serde_json::to_writer(&mut line, &record).map_err(|e| MeldError::io(temp, e.into()))?;
        line.push(b'\n');
        hasher.update(&line);
        writer.write_all(&line).map_err(|e| MeldError::io(temp, e))?;
    }
    writer.flush().map_err(|e| MeldError::io(temp, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write a pretty-printed JSON file atomically.
fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(|e| MeldError::io(path, e.into()))?;
    let temp = temp_path(path);
    std::fs::write(&temp, json)
        .and_then(|()| std::fs::rename(&temp, path))
        .map_err(|e| {
            discard_temp(&temp);
            MeldError::io(path, e)
        })?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

/// Best-effort removal of a temp file left by a failed write.
fn discard_temp(temp: &Path) {
    if let Err(e) = std::fs::remove_file(temp) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %temp.display(), error = %e, "failed to remove temp file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangemeld_shared::{Node, TypedValue, parse_config, parse_network};

    fn db() -> DatabaseConfig {
        let config = parse_config(
            r#"
[[databases]]
name = "geo"
[databases.mmdb]
ip_version = 4
database_type = "GeoLite2-Country"
"#,
        )
        .unwrap();
        config.databases[0].clone()
    }

    fn entries() -> Vec<MergedEntry> {
        let mut country = Document::new();
        country.insert("iso_code", Node::Value(TypedValue::String("US".into())));
        let mut doc = Document::new();
        doc.insert("country", Node::Map(country));
        doc.insert("asn", Node::Value(TypedValue::Uint32(7922)));
        doc.insert("hash", Node::Value(TypedValue::Bytes(vec![0xde, 0xad])));

        vec![
            MergedEntry {
                network: parse_network("10.0.0.0/8").unwrap(),
                document: doc,
            },
            MergedEntry {
                network: parse_network("11.0.0.0/8").unwrap(),
                document: Document::new(),
            },
        ]
    }

    #[test]
    fn emit_writes_ndjson_lines() {
        let dir = tempfile::tempdir().unwrap();
        let result = emit(&db(), &entries(), &BuildStats::default(), dir.path(), "0.1.0").unwrap();

        assert_eq!(result.output_path, dir.path().join("geo.ndjson"));
        let content = std::fs::read_to_string(&result.output_path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                serde_json::json!({
                    "network": "10.0.0.0/8",
                    "data": {"asn": 7922, "country": {"iso_code": "US"}, "hash": "dead"}
                }),
                serde_json::json!({"network": "11.0.0.0/8", "data": {}}),
            ]
        );
    }

    #[test]
    fn emit_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let stats = BuildStats {
            entries_emitted: 2,
            ..Default::default()
        };
        let result = emit(&db(), &entries(), &stats, dir.path(), "0.1.0").unwrap();

        let content = std::fs::read_to_string(dir.path().join("geo.manifest.json")).unwrap();
        let manifest: BuildManifest = serde_json::from_str(&content).unwrap();
        assert_eq!(manifest, result.manifest);
        assert_eq!(manifest.schema_version, MANIFEST_SCHEMA_VERSION);
        assert_eq!(manifest.entry_count, 2);
        assert_eq!(manifest.mmdb.ip_version, 4);
        assert_eq!(manifest.mmdb.database_type.as_deref(), Some("GeoLite2-Country"));
        assert_eq!(manifest.stats.entries_emitted, 2);
        assert_eq!(manifest.sha256.len(), 64);
    }

    #[test]
    fn emit_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        emit(&db(), &entries(), &BuildStats::default(), dir.path(), "0.1.0").unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{names:?}");
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn verify_accepts_fresh_output() {
        let dir = tempfile::tempdir().unwrap();
        let result = emit(&db(), &entries(), &BuildStats::default(), dir.path(), "0.1.0").unwrap();
        let manifest = verify_output(&result.manifest_path).unwrap();
        assert_eq!(manifest.entry_count, 2);
    }

    #[test]
    fn verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let result = emit(&db(), &entries(), &BuildStats::default(), dir.path(), "0.1.0").unwrap();
        std::fs::write(&result.output_path, "{}\n").unwrap();
        let err = verify_output(&result.manifest_path).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"), "{err}");
    }

    #[test]
    fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory at the target path makes the rename fail.
        let target = dir.path().join("geo.ndjson");
        std::fs::create_dir_all(target.join("occupied")).unwrap();

        let err = write_ndjson(&target, &entries()).unwrap_err();
        assert!(matches!(err, MeldError::Io { .. }), "{err}");
        assert!(!temp_path(&target).exists());
    }

    #[test]
    fn failed_create_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("geo.ndjson");
        assert!(write_ndjson(&target, &entries()).is_err());
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn verify_missing_manifest_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify_output(&dir.path().join("nope.manifest.json")).unwrap_err();
        assert!(matches!(err, MeldError::Io { .. }));
    }
}
