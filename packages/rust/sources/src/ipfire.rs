//! IPFire location database text dump.
//!
//! The dump is a sequence of blocks separated by blank lines, each block a
//! list of `key: value` lines:
//!
//! ```text
//! aut-num:        AS13335
//! name:           CLOUDFLARENET
//!
//! net:            1.1.1.0/24
//! country:        AU
//! aut-num:        13335
//! is-anycast:     yes
//! ```
//!
//! Blocks with a `net` key become records. Blocks with `aut-num` but no
//! `net` register an AS name, exposed to later network blocks under the
//! [`AS_NAME_KEY`] feed key.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, ErrorKind, Lines};
use std::sync::LazyLock;

use rangemeld_shared::{InputConfig, MeldError, RawRecord, RawValue, RecordRange, Result, network};
use regex::Regex;
use tracing::trace;

use crate::{Source, declared_type};

/// Feed key under which the registered AS name of a network is exposed.
pub const AS_NAME_KEY: &str = "aut-num-name";

const NET_KEY: &str = "net";
const ASN_KEY: &str = "aut-num";
const NAME_KEY: &str = "name";

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches `key: value`, value possibly empty.
static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9_-]*):\s*(.*?)\s*$").expect("key-value regex")
});

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MappedField {
    path: String,
    type_tag: String,
}

#[derive(Debug)]
struct BlockLine {
    number: usize,
    key: String,
    value: String,
}

/// IPFire dump [`Source`].
pub struct IpfireSource<R: BufRead> {
    name: String,
    lines: Lines<R>,
    line_no: usize,
    fields: BTreeMap<String, MappedField>,
    as_names: HashMap<String, String>,
    error: Option<MeldError>,
    done: bool,
}

impl<R: BufRead> std::fmt::Debug for IpfireSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpfireSource")
            .field("name", &self.name)
            .field("line_no", &self.line_no)
            .field("fields", &self.fields)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<R: BufRead> IpfireSource<R> {
    /// Create a source over `reader`, keeping only the feed keys listed in
    /// `input.field_map`.
    pub fn new(
        name: impl Into<String>,
        reader: R,
        input: &InputConfig,
        types: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let fields = input
            .field_map
            .iter()
            .map(|(key, path)| {
                let type_tag = declared_type(types, path)?;
                Ok((
                    key.clone(),
                    MappedField {
                        path: path.clone(),
                        type_tag,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            name: name.into(),
            lines: reader.lines(),
            line_no: 0,
            fields,
            as_names: HashMap::new(),
            error: None,
            done: false,
        })
    }

    fn fail(&mut self, err: MeldError) -> Option<RawRecord> {
        self.error = Some(err);
        self.done = true;
        None
    }

    /// Read the next non-empty block, or `None` at end of input.
    fn read_block(&mut self) -> Result<Option<Vec<BlockLine>>> {
        let mut block = Vec::new();
        loop {
            let Some(line) = self.lines.next() else {
                return Ok((!block.is_empty()).then_some(block));
            };
            self.line_no += 1;
            let line = line.map_err(|e| match e.kind() {
                ErrorKind::InvalidData => {
                    MeldError::malformed_row(self.line_no, "line is not valid UTF-8")
                }
                _ => MeldError::io(&self.name, e),
            })?;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                if block.is_empty() {
                    continue;
                }
                return Ok(Some(block));
            }
            if trimmed.starts_with('#') {
                continue;
            }

            let caps = KEY_VALUE_RE.captures(trimmed).ok_or_else(|| {
                MeldError::malformed_row(
                    self.line_no,
                    format!("expected `key: value`, got {trimmed:?}"),
                )
            })?;
            block.push(BlockLine {
                number: self.line_no,
                key: caps[1].to_string(),
                value: caps[2].to_string(),
            });
        }
    }

    /// Turn a block into a record, or register an AS name and yield nothing.
    fn process_block(&mut self, block: &[BlockLine]) -> Result<Option<RawRecord>> {
        // Repeated keys: the last occurrence wins.
        let find = |key: &str| block.iter().rev().find(|l| l.key == key);

        let Some(net_line) = find(NET_KEY) else {
            if let (Some(asn), Some(name)) = (find(ASN_KEY), find(NAME_KEY)) {
                trace!(asn = %asn.value, name = %name.value, "registered AS name");
                self.as_names
                    .insert(strip_as(&asn.value).to_string(), name.value.clone());
            }
            return Ok(None);
        };

        let network = network::parse_network(&net_line.value)
            .map_err(|e| MeldError::malformed_row(net_line.number, e))?;

        let mut values = BTreeMap::new();
        for line in block {
            if line.key == NET_KEY || line.value.is_empty() {
                continue;
            }
            let Some(field) = self.fields.get(&line.key) else {
                continue;
            };
            let text = normalize(&line.key, &line.value, &field.type_tag);
            values.insert(field.path.clone(), RawValue::new(field.type_tag.clone(), text));
        }

        if let Some(field) = self.fields.get(AS_NAME_KEY) {
            let as_name = find(ASN_KEY).and_then(|asn| self.as_names.get(strip_as(&asn.value)));
            if let Some(as_name) = as_name {
                values.insert(
                    field.path.clone(),
                    RawValue::new(field.type_tag.clone(), as_name.as_str()),
                );
            }
        }

        Ok(Some(RawRecord {
            row: net_line.number,
            range: RecordRange::Network(network),
            values,
        }))
    }
}

impl<R: BufRead> Source for IpfireSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_entry(&mut self) -> Option<RawRecord> {
        while !self.done {
            let block = match self.read_block() {
                Ok(Some(block)) => block,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => return self.fail(e),
            };
            match self.process_block(&block) {
                Ok(Some(record)) => return Some(record),
                Ok(None) => {}
                Err(e) => return self.fail(e),
            }
        }
        None
    }

    fn take_error(&mut self) -> Option<MeldError> {
        self.error.take()
    }
}

/// `AS13335` → `13335`.
fn strip_as(value: &str) -> &str {
    value
        .strip_prefix("AS")
        .or_else(|| value.strip_prefix("as"))
        .unwrap_or(value)
}

/// Rewrite feed conventions into the forms the coercer accepts.
fn normalize(key: &str, value: &str, type_tag: &str) -> String {
    if key == ASN_KEY {
        return strip_as(value).to_string();
    }
    if type_tag == "bool" {
        match value {
            "yes" => return "true".to_string(),
            "no" => return "false".to_string(),
            _ => {}
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
# Location database dump
# Generated for tests

aut-num:        AS13335
name:           CLOUDFLARENET

net:            1.1.1.0/24
country:        AU
aut-num:        13335
is-anycast:     yes

net:            2606:4700::/32
country:        US
is-anycast:     no
is-satellite-provider: yes
";

    fn types() -> BTreeMap<String, String> {
        [
            ("country.iso_code", "string"),
            ("autonomous_system_number", "uint32"),
            ("autonomous_system_organization", "string"),
            ("is_anycast", "bool"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn input() -> InputConfig {
        let field_map = [
            ("country", "country.iso_code"),
            ("aut-num", "autonomous_system_number"),
            ("aut-num-name", "autonomous_system_organization"),
            ("is-anycast", "is_anycast"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        InputConfig {
            file: "location.ipfire.txt".into(),
            field_map,
            ..Default::default()
        }
    }

    fn source(data: &str) -> IpfireSource<&[u8]> {
        IpfireSource::new("location.ipfire.txt", data.as_bytes(), &input(), &types())
            .expect("create source")
    }

    #[test]
    fn reads_network_blocks() {
        let mut src = source(DUMP);

        let first = src.next_entry().expect("first record");
        assert_eq!(
            first.range,
            RecordRange::Network(network::parse_network("1.1.1.0/24").unwrap())
        );
        assert_eq!(first.row, 7);
        assert_eq!(first.values["country.iso_code"].text, "AU");
        assert_eq!(first.values["autonomous_system_number"].text, "13335");
        assert_eq!(
            first.values["autonomous_system_organization"],
            RawValue::new("string", "CLOUDFLARENET")
        );
        assert_eq!(first.values["is_anycast"], RawValue::new("bool", "true"));

        let second = src.next_entry().expect("second record");
        assert_eq!(second.values["is_anycast"].text, "false");
        assert!(!second.values.contains_key("autonomous_system_number"));
        assert_eq!(second.values.len(), 2, "unmapped keys are dropped");

        assert!(src.next_entry().is_none());
        assert!(src.take_error().is_none());
    }

    #[test]
    fn as_name_applies_only_to_later_blocks() {
        let data = "\
net: 10.0.0.0/8
aut-num: 64500

aut-num: AS64500
name: EXAMPLE

net: 11.0.0.0/8
aut-num: 64500
";
        let mut src = source(data);
        let early = src.next_entry().expect("early");
        assert!(!early.values.contains_key("autonomous_system_organization"));
        let late = src.next_entry().expect("late");
        assert_eq!(late.values["autonomous_system_organization"].text, "EXAMPLE");
    }

    #[test]
    fn line_without_colon_is_malformed() {
        let mut src = source("net: 10.0.0.0/8\ncountry US\n");
        assert!(src.next_entry().is_none());
        let err = src.take_error().expect("error");
        assert!(matches!(err, MeldError::MalformedRow { row: 2, .. }), "{err}");
    }

    #[test]
    fn bad_network_is_malformed() {
        let mut src = source("net: 10.0.0.0/8\ncountry: US\n\nnet: 300.0.0.0/8\n");
        assert!(src.next_entry().is_some());
        assert!(src.next_entry().is_none());
        let err = src.take_error().expect("error");
        assert!(matches!(err, MeldError::MalformedRow { row: 4, .. }), "{err}");
    }

    #[test]
    fn invalid_utf8_is_malformed_at_its_line() {
        let data: &[u8] = b"net: 10.0.0.0/8\ncountry: US\n\nnet: 11.0.0.0/8\ncountry: \xff\xfe\n";
        let mut src = IpfireSource::new("location.ipfire.txt", data, &input(), &types())
            .expect("create source");
        assert!(src.next_entry().is_some());
        assert!(src.next_entry().is_none());
        let err = src.take_error().expect("error");
        assert!(matches!(err, MeldError::MalformedRow { row: 5, .. }), "{err}");
    }

    #[test]
    fn empty_values_are_omitted() {
        let mut src = source("net: 10.0.0.0/8\ncountry:\n");
        let record = src.next_entry().expect("record");
        assert!(record.values.is_empty());
    }

    #[test]
    fn empty_input_yields_nothing() {
        let mut src = source("# only comments\n\n\n");
        assert!(src.next_entry().is_none());
        assert!(src.take_error().is_none());
    }

    #[test]
    fn untyped_mapping_is_config_error() {
        let mut input = input();
        input.field_map.insert("city".into(), "city.name".into());
        let err = IpfireSource::new("x", "".as_bytes(), &input, &types()).unwrap_err();
        assert!(matches!(err, MeldError::Config { .. }));
    }

    #[test]
    fn strip_as_prefix() {
        assert_eq!(strip_as("AS13335"), "13335");
        assert_eq!(strip_as("13335"), "13335");
    }
}
