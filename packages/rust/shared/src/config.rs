//! Build configuration for rangemeld.
//!
//! One TOML file describes every output database: its field types, the
//! ordered list of inputs, optimization settings and merge rules.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MeldError, Result};
use crate::types::TypeTag;

/// CSV column holding a CIDR network.
pub const NET_COLUMN: &str = "net";
/// CSV column holding the first address of an inclusive interval.
pub const FROM_COLUMN: &str = "from";
/// CSV column holding the last address of an inclusive interval.
pub const TO_COLUMN: &str = "to";
/// Column name marking a CSV column to ignore.
pub const SKIP_COLUMN: &str = "-";

/// Whether a CSV column name carries no attribute.
pub fn is_skip_column(name: &str) -> bool {
    name.is_empty() || name == SKIP_COLUMN
}

/// Whether a CSV column name is one of the range columns.
pub fn is_range_column(name: &str) -> bool {
    matches!(name, NET_COLUMN | FROM_COLUMN | TO_COLUMN)
}

// ---------------------------------------------------------------------------
// Config structs (matching the TOML schema)
// ---------------------------------------------------------------------------

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Output databases, built independently of each other.
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

/// `[[databases]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name, used for output file names.
    pub name: String,

    /// Output file name (defaults to `<name>.ndjson`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Writer metadata.
    #[serde(default)]
    pub mmdb: MmdbConfig,

    /// Field path → type tag.
    #[serde(default)]
    pub types: BTreeMap<String, String>,

    /// Inputs, merged in declaration order.
    #[serde(default)]
    pub inputs: Vec<InputConfig>,

    /// Optimization settings.
    #[serde(default)]
    pub optimize: OptimizationConfig,

    /// Merge policy.
    #[serde(default)]
    pub merge: MergeConfig,
}

impl DatabaseConfig {
    /// Name of the NDJSON handoff file.
    pub fn output_file_name(&self) -> String {
        self.output
            .clone()
            .unwrap_or_else(|| format!("{}.ndjson", self.name))
    }

    /// Name of the build manifest file.
    pub fn manifest_file_name(&self) -> String {
        format!("{}.manifest.json", self.name)
    }

    /// Declared type tag for a field path.
    pub fn type_of(&self, path: &str) -> Option<&str> {
        self.types.get(path).map(String::as_str)
    }
}

/// `[databases.mmdb]` section: metadata passed through to the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmdbConfig {
    /// 4 or 6.
    #[serde(default = "default_ip_version")]
    pub ip_version: u8,

    /// Trie record size in bits: 24, 28 or 32.
    #[serde(default = "default_record_size")]
    pub record_size: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
}

impl Default for MmdbConfig {
    fn default() -> Self {
        Self {
            ip_version: default_ip_version(),
            record_size: default_record_size(),
            database_type: None,
            description: None,
            languages: Vec::new(),
        }
    }
}

fn default_ip_version() -> u8 {
    6
}
fn default_record_size() -> u16 {
    24
}

/// Input file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    /// Delimited text with configured columns.
    Csv,
    /// IPFire location database text dump.
    Ipfire,
}

/// `[[databases.inputs]]` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// Path to the input file.
    pub file: String,

    /// Explicit format; inferred from the file suffix when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<InputKind>,

    /// CSV: field path per column position.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,

    /// CSV: whether the first row is a header.
    #[serde(default)]
    pub header: bool,

    /// CSV: single-character field delimiter (default `,`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,

    /// Flat-text: feed key → field path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_map: BTreeMap<String, String>,
}

impl InputConfig {
    /// The input format, explicit or inferred from the file name.
    pub fn resolve_kind(&self) -> Result<InputKind> {
        if let Some(kind) = self.kind {
            return Ok(kind);
        }
        if self.file.ends_with(".csv") {
            Ok(InputKind::Csv)
        } else if self.file.ends_with(".ipfire.txt") {
            Ok(InputKind::Ipfire)
        } else {
            Err(MeldError::config(format!(
                "unsupported input file: {}",
                self.file
            )))
        }
    }

    /// The CSV delimiter as a byte.
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_deref() {
            None => Ok(b','),
            Some("\\t") | Some("\t") => Ok(b'\t'),
            Some(s) if s.len() == 1 => Ok(s.as_bytes()[0]),
            Some(other) => Err(MeldError::config(format!(
                "{}: delimiter must be a single character, got {other:?}",
                self.file
            ))),
        }
    }
}

/// Largest `float_decimals` an f64 can honour.
pub const MAX_FLOAT_DECIMALS: i32 = 15;

/// `[databases.optimize]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Decimal places kept on floats; 0 disables rounding, negative rounds
    /// to whole numbers.
    #[serde(default)]
    pub float_decimals: i32,

    /// Drop networks whose IP version differs from the database's.
    #[serde(default)]
    pub force_ip_version: bool,

    /// Widen networks longer than this prefix (0 disables), measured in the
    /// database's address width.
    #[serde(default)]
    pub max_prefix: u8,
}

/// `[databases.merge]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub conditional_resets: Vec<ConditionalResetRule>,
}

/// Clears the `reset` groups whenever one of the `if_changed` groups changes,
/// unless the incoming record supplies them itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalResetRule {
    /// Watched top-level keys.
    pub if_changed: BTreeSet<String>,
    /// Top-level keys to clear.
    pub reset: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Starter configuration written by [`init_config`].
const STARTER_CONFIG: &str = r#"# rangemeld build configuration.

[[databases]]
name = "geoip-country"

[databases.mmdb]
ip_version = 6
record_size = 24
database_type = "GeoIP2-Country"
description = "Country data merged from open sources"
languages = ["en"]

[databases.types]
"country.iso_code" = "string"
"autonomous_system_number" = "uint32"
"is_anycast" = "bool"

# Inputs are merged in order; later inputs overwrite top-level groups.
[[databases.inputs]]
file = "data/geo-whois-asn-country-ipv4.csv"
fields = ["from", "to", "country.iso_code"]

[[databases.inputs]]
file = "data/location.ipfire.txt"
[databases.inputs.field_map]
country = "country.iso_code"
aut-num = "autonomous_system_number"
is-anycast = "is_anycast"

[databases.optimize]
float_decimals = 2
force_ip_version = false
max_prefix = 0

[[databases.merge.conditional_resets]]
if_changed = ["country"]
reset = ["location"]
"#;

/// Load the configuration from a file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| MeldError::io(path, e))?;

    parse_config(&content)
        .map_err(|e| MeldError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Parse a configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<AppConfig> {
    toml::from_str(content).map_err(|e| MeldError::config(e.to_string()))
}

/// Write the starter configuration to `path`. Refuses to overwrite.
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(MeldError::config(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| MeldError::io(parent, e))?;
    }
    std::fs::write(path, STARTER_CONFIG).map_err(|e| MeldError::io(path, e))?;
    tracing::info!(path = %path.display(), "created starter config file");
    Ok(())
}

/// Check a configuration for errors that would otherwise surface mid-build.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.databases.is_empty() {
        return Err(MeldError::config("no databases configured"));
    }

    let mut names = BTreeSet::new();
    for db in &config.databases {
        if db.name.trim().is_empty() {
            return Err(MeldError::config("database name must not be empty"));
        }
        if !names.insert(db.name.as_str()) {
            return Err(MeldError::config(format!(
                "duplicate database name {:?}",
                db.name
            )));
        }
        validate_database(db)
            .map_err(|e| MeldError::config(format!("database {:?}: {}", db.name, strip_prefix(&e))))?;
    }
    Ok(())
}

fn strip_prefix(err: &MeldError) -> String {
    match err {
        MeldError::Config { message } => message.clone(),
        other => other.to_string(),
    }
}

fn validate_database(db: &DatabaseConfig) -> Result<()> {
    let max_bits = match db.mmdb.ip_version {
        4 => 32,
        6 => 128,
        other => {
            return Err(MeldError::config(format!(
                "ip_version must be 4 or 6, got {other}"
            )));
        }
    };
    if !matches!(db.mmdb.record_size, 24 | 28 | 32) {
        return Err(MeldError::config(format!(
            "record_size must be 24, 28 or 32, got {}",
            db.mmdb.record_size
        )));
    }
    if db.optimize.max_prefix > max_bits {
        return Err(MeldError::config(format!(
            "max_prefix {} exceeds the {max_bits}-bit address width",
            db.optimize.max_prefix
        )));
    }

    if db.optimize.float_decimals > MAX_FLOAT_DECIMALS {
        return Err(MeldError::config(format!(
            "float_decimals {} exceeds {MAX_FLOAT_DECIMALS}",
            db.optimize.float_decimals
        )));
    }

    for (path, tag) in &db.types {
        TypeTag::parse(tag).map_err(|e| MeldError::config(format!("type of {path:?}: {e}")))?;
    }

    if db.inputs.is_empty() {
        return Err(MeldError::config("no inputs configured"));
    }
    for input in &db.inputs {
        let kind = input.resolve_kind()?;
        let mapped: Vec<&str> = match kind {
            InputKind::Csv => {
                input.delimiter_byte()?;
                if input.fields.is_empty() && !input.header {
                    return Err(MeldError::config(format!(
                        "{}: csv input needs `fields` or `header = true`",
                        input.file
                    )));
                }
                input
                    .fields
                    .iter()
                    .map(String::as_str)
                    .filter(|f| !is_skip_column(f) && !is_range_column(f))
                    .collect()
            }
            InputKind::Ipfire => input.field_map.values().map(String::as_str).collect(),
        };
        for path in mapped {
            if db.type_of(path).is_none() {
                return Err(MeldError::config(format!(
                    "{}: no type defined for field {path:?}",
                    input.file
                )));
            }
        }
    }

    for rule in &db.merge.conditional_resets {
        if rule.if_changed.is_empty() || rule.reset.is_empty() {
            return Err(MeldError::config(
                "conditional reset rules need both `if_changed` and `reset`",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        parse_config(STARTER_CONFIG).expect("parse starter config")
    }

    #[test]
    fn starter_config_parses_and_validates() {
        let config = sample();
        assert_eq!(config.databases.len(), 1);
        let db = &config.databases[0];
        assert_eq!(db.mmdb.ip_version, 6);
        assert_eq!(db.inputs.len(), 2);
        assert_eq!(db.inputs[1].field_map["country"], "country.iso_code");
        assert_eq!(db.optimize.float_decimals, 2);
        assert_eq!(db.merge.conditional_resets.len(), 1);
        validate_config(&config).expect("valid");
    }

    #[test]
    fn config_roundtrip() {
        let config = sample();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed = parse_config(&toml_str).expect("deserialize");
        assert_eq!(parsed.databases[0].name, "geoip-country");
        assert_eq!(parsed.databases[0].types.len(), 3);
    }

    #[test]
    fn defaults_apply() {
        let config = parse_config(
            r#"
[[databases]]
name = "minimal"
"#,
        )
        .expect("parse");
        let db = &config.databases[0];
        assert_eq!(db.mmdb.ip_version, 6);
        assert_eq!(db.mmdb.record_size, 24);
        assert_eq!(db.optimize, OptimizationConfig::default());
        assert_eq!(db.output_file_name(), "minimal.ndjson");
        assert_eq!(db.manifest_file_name(), "minimal.manifest.json");
    }

    #[test]
    fn input_kind_inference() {
        let csv = InputConfig {
            file: "a/b.csv".into(),
            ..Default::default()
        };
        assert_eq!(csv.resolve_kind().unwrap(), InputKind::Csv);

        let ipfire = InputConfig {
            file: "location.ipfire.txt".into(),
            ..Default::default()
        };
        assert_eq!(ipfire.resolve_kind().unwrap(), InputKind::Ipfire);

        let other = InputConfig {
            file: "data.json".into(),
            ..Default::default()
        };
        assert!(other.resolve_kind().unwrap_err().to_string().contains("unsupported input file"));

        let explicit = InputConfig {
            file: "data.txt".into(),
            kind: Some(InputKind::Csv),
            ..Default::default()
        };
        assert_eq!(explicit.resolve_kind().unwrap(), InputKind::Csv);
    }

    #[test]
    fn delimiter_parsing() {
        let mut input = InputConfig::default();
        assert_eq!(input.delimiter_byte().unwrap(), b',');
        input.delimiter = Some("\\t".into());
        assert_eq!(input.delimiter_byte().unwrap(), b'\t');
        input.delimiter = Some(";".into());
        assert_eq!(input.delimiter_byte().unwrap(), b';');
        input.delimiter = Some(";;".into());
        assert!(input.delimiter_byte().is_err());
    }

    #[test]
    fn validation_rejects_untyped_field() {
        let mut config = sample();
        config.databases[0].types.remove("is_anycast");
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("no type defined for field \"is_anycast\""));
    }

    #[test]
    fn validation_rejects_unknown_type_tag() {
        let mut config = sample();
        config.databases[0]
            .types
            .insert("x".into(), "array:uint8".into());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unsupported type"));
    }

    #[test]
    fn validation_rejects_bad_prefix_and_version() {
        let mut config = sample();
        config.databases[0].mmdb.ip_version = 4;
        config.databases[0].optimize.max_prefix = 48;
        assert!(validate_config(&config).unwrap_err().to_string().contains("max_prefix"));

        config.databases[0].mmdb.ip_version = 5;
        assert!(validate_config(&config).unwrap_err().to_string().contains("ip_version"));
    }

    #[test]
    fn validation_rejects_excess_float_decimals() {
        let mut config = sample();
        config.databases[0].optimize.float_decimals = MAX_FLOAT_DECIMALS;
        validate_config(&config).unwrap();

        config.databases[0].optimize.float_decimals = 400;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("float_decimals 400"), "{err}");
    }

    #[test]
    fn validation_rejects_duplicate_names() {
        let mut config = sample();
        let copy = config.databases[0].clone();
        config.databases.push(copy);
        assert!(validate_config(&config).unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn init_config_writes_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("conf").join("rangemeld.toml");
        init_config(&path).expect("init");
        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.databases[0].name, "geoip-country");
        assert!(init_config(&path).is_err());
    }
}
