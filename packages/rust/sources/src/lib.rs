//! Input sources for rangemeld.
//!
//! A [`Source`] turns one input file into a lazy, single-pass stream of
//! [`RawRecord`]s. Two formats are supported:
//! - delimited text ([`CsvSource`]) with configured columns
//! - the IPFire location text dump ([`IpfireSource`])
//!
//! New formats are added by implementing [`Source`]; nothing else in the
//! pipeline needs to change.

mod csv_source;
mod ipfire;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rangemeld_shared::{DatabaseConfig, InputConfig, InputKind, MeldError, RawRecord, Result};
use tracing::{debug, instrument};

pub use csv_source::CsvSource;
pub use ipfire::{AS_NAME_KEY, IpfireSource};

/// A finite, single-pass stream of raw records.
///
/// `next_entry` returns `None` at end of stream. If the stream ended early
/// because of an error, `take_error` returns it (once); records yielded
/// before the failure remain valid.
pub trait Source {
    /// Name used in diagnostics (the configured file path).
    fn name(&self) -> &str;

    /// The next record, or `None` at end of stream.
    fn next_entry(&mut self) -> Option<RawRecord>;

    /// The error that terminated the stream, if any.
    fn take_error(&mut self) -> Option<MeldError>;
}

/// Open every input of a database, in declaration order.
///
/// Relative input paths are resolved against `base_dir`.
#[instrument(skip_all, fields(db = %db.name, inputs = db.inputs.len()))]
pub fn load_sources(db: &DatabaseConfig, base_dir: &Path) -> Result<Vec<Box<dyn Source>>> {
    db.inputs
        .iter()
        .map(|input| open_source(input, &db.types, base_dir))
        .collect()
}

/// Open a single input file as a [`Source`].
pub fn open_source(
    input: &InputConfig,
    types: &BTreeMap<String, String>,
    base_dir: &Path,
) -> Result<Box<dyn Source>> {
    let kind = input.resolve_kind()?;
    let path = base_dir.join(&input.file);
    let file = File::open(&path).map_err(|e| MeldError::io(&path, e))?;

    debug!(file = %path.display(), ?kind, "opened input");

    let source: Box<dyn Source> = match kind {
        InputKind::Csv => Box::new(
            CsvSource::new(&input.file, file, input, types)
                .map_err(|e| e.in_source(&input.file))?,
        ),
        InputKind::Ipfire => Box::new(
            IpfireSource::new(&input.file, BufReader::new(file), input, types)
                .map_err(|e| e.in_source(&input.file))?,
        ),
    };
    Ok(source)
}

/// Resolve the declared type of a mapped field path.
pub(crate) fn declared_type(types: &BTreeMap<String, String>, path: &str) -> Result<String> {
    types
        .get(path)
        .cloned()
        .ok_or_else(|| MeldError::config(format!("no type defined for field {path:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangemeld_shared::parse_config;

    const CONFIG: &str = r#"
[[databases]]
name = "test"

[databases.types]
"country.iso_code" = "string"

[[databases.inputs]]
file = "a.csv"
fields = ["net", "country.iso_code"]

[[databases.inputs]]
file = "b.ipfire.txt"
[databases.inputs.field_map]
country = "country.iso_code"
"#;

    #[test]
    fn load_sources_in_declaration_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.csv"), "10.0.0.0/8,US\n").unwrap();
        std::fs::write(
            dir.path().join("b.ipfire.txt"),
            "net: 10.1.0.0/16\ncountry: CA\n",
        )
        .unwrap();

        let config = parse_config(CONFIG).unwrap();
        let mut sources = load_sources(&config.databases[0], dir.path()).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name(), "a.csv");
        assert_eq!(sources[1].name(), "b.ipfire.txt");

        let first = sources[0].next_entry().expect("csv record");
        assert_eq!(first.values["country.iso_code"].text, "US");
        let second = sources[1].next_entry().expect("ipfire record");
        assert_eq!(second.values["country.iso_code"].text, "CA");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = parse_config(CONFIG).unwrap();
        let err = match load_sources(&config.databases[0], dir.path()) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, MeldError::Io { .. }));
    }

    #[test]
    fn unsupported_input_kind() {
        let input = InputConfig {
            file: "data.json".into(),
            ..Default::default()
        };
        let err = match open_source(&input, &BTreeMap::new(), Path::new(".")) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("unsupported input file"));
    }
}
