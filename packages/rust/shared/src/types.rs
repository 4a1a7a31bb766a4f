//! Core domain types: typed values, nested documents and raw source records.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use ip_network::IpNetwork;
use serde::{Serialize, Serializer};

use crate::error::{MeldError, Result};

/// Prefix marking a homogeneous array type tag (`array:uint32`).
pub const ARRAY_TYPE_PREFIX: &str = "array:";

// ---------------------------------------------------------------------------
// Type tags
// ---------------------------------------------------------------------------

/// Scalar types of the declared type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    String,
    HexBytes,
    Int32,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
}

impl ScalarType {
    /// Look up a scalar type by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "bool" => Self::Bool,
            "string" => Self::String,
            "hexbytes" => Self::HexBytes,
            "int32" => Self::Int32,
            "uint16" => Self::Uint16,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            _ => return None,
        };
        Some(ty)
    }

    /// The configuration name of this type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::String => "string",
            Self::HexBytes => "hexbytes",
            Self::Int32 => "int32",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

/// A parsed type tag: a scalar, or a homogeneous array of one scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Scalar(ScalarType),
    Array(ScalarType),
}

impl TypeTag {
    /// Parse a type tag such as `"string"` or `"array:uint32"`.
    ///
    /// Arrays do not nest: `"array:array:string"` is unsupported.
    pub fn parse(tag: &str) -> Result<Self> {
        let unsupported = || MeldError::UnsupportedType {
            type_tag: tag.to_string(),
        };
        match tag.strip_prefix(ARRAY_TYPE_PREFIX) {
            Some(sub) => ScalarType::from_name(sub)
                .map(Self::Array)
                .ok_or_else(unsupported),
            None => ScalarType::from_name(tag)
                .map(Self::Scalar)
                .ok_or_else(unsupported),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(ty) => f.write_str(ty.name()),
            Self::Array(ty) => write!(f, "{ARRAY_TYPE_PREFIX}{}", ty.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// TypedValue
// ---------------------------------------------------------------------------

/// A value coerced into one type of the declared type system.
///
/// `Array` elements all share one scalar type and never contain arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Int32(i32),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Float32(f32),
    Float64(f64),
    Array(Vec<TypedValue>),
}

impl Serialize for TypedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::String(v) => serializer.serialize_str(v),
            Self::Bytes(v) => serializer.serialize_str(&encode_hex(v)),
            Self::Int32(v) => serializer.serialize_i32(*v),
            Self::Uint16(v) => serializer.serialize_u16(*v),
            Self::Uint32(v) => serializer.serialize_u32(*v),
            Self::Uint64(v) => serializer.serialize_u64(*v),
            Self::Float32(v) => serializer.serialize_f32(*v),
            Self::Float64(v) => serializer.serialize_f64(*v),
            Self::Array(items) => serializer.collect_seq(items),
        }
    }
}

/// Lowercase hex encoding used for byte values in JSON output.
pub fn encode_hex(bytes: &[u8]) -> String {
    use fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// One slot of a [`Document`]: a typed leaf or a nested sub-document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Value(TypedValue),
    Map(Document),
}

/// Nested attribute document keyed by path segment.
///
/// Each sub-document is owned by its parent. Keys are kept sorted so that
/// serialization and iteration are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Node>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.0.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, node: Node) -> Option<Node> {
        self.0.insert(key.into(), node)
    }

    pub fn remove(&mut self, key: &str) -> Option<Node> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve a dotted path (`"location.latitude"`) to a node.
    pub fn get_path(&self, path: &str) -> Option<&Node> {
        let mut segments = path.split('.');
        let mut node = self.get(segments.next()?)?;
        for segment in segments {
            match node {
                Node::Map(doc) => node = doc.get(segment)?,
                Node::Value(_) => return None,
            }
        }
        Some(node)
    }

    /// Resolve a dotted path to a leaf value.
    pub fn value_at(&self, path: &str) -> Option<&TypedValue> {
        match self.get_path(path)? {
            Node::Value(v) => Some(v),
            Node::Map(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw source records
// ---------------------------------------------------------------------------

/// An unprocessed field value, carrying its declared type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue {
    pub type_tag: String,
    pub text: String,
}

impl RawValue {
    pub fn new(type_tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            text: text.into(),
        }
    }
}

/// The address range a raw record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRange {
    /// A single CIDR network.
    Network(IpNetwork),
    /// An inclusive address interval; both ends share one IP version.
    Interval { from: IpAddr, to: IpAddr },
}

/// One input row as produced by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based line/row number within the source, for diagnostics.
    pub row: usize,
    pub range: RecordRange,
    /// Field path → raw value.
    pub values: BTreeMap<String, RawValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_parsing() {
        assert_eq!(
            TypeTag::parse("uint32").unwrap(),
            TypeTag::Scalar(ScalarType::Uint32)
        );
        assert_eq!(
            TypeTag::parse("array:string").unwrap(),
            TypeTag::Array(ScalarType::String)
        );
        assert_eq!(TypeTag::parse("array:float64").unwrap().to_string(), "array:float64");
    }

    #[test]
    fn type_tag_rejects_unknown_and_nested() {
        for tag in ["uint8", "", "array:", "array:array:string", "String"] {
            let err = TypeTag::parse(tag).unwrap_err();
            assert!(matches!(err, MeldError::UnsupportedType { .. }), "{tag}");
        }
    }

    #[test]
    fn document_serializes_nested() {
        let mut location = Document::new();
        location.insert("latitude", Node::Value(TypedValue::Float32(1.5)));
        let mut doc = Document::new();
        doc.insert("location", Node::Map(location));
        doc.insert("flag", Node::Value(TypedValue::Bytes(vec![0xab, 0x01])));
        doc.insert(
            "asns",
            Node::Value(TypedValue::Array(vec![
                TypedValue::Uint32(1),
                TypedValue::Uint32(2),
            ])),
        );

        let json = serde_json::to_string(&doc).expect("serialize");
        assert_eq!(
            json,
            r#"{"asns":[1,2],"flag":"ab01","location":{"latitude":1.5}}"#
        );
    }

    #[test]
    fn document_path_lookup() {
        let mut country = Document::new();
        country.insert("iso_code", Node::Value(TypedValue::String("DE".into())));
        let mut doc = Document::new();
        doc.insert("country", Node::Map(country));

        assert_eq!(
            doc.value_at("country.iso_code"),
            Some(&TypedValue::String("DE".into()))
        );
        assert!(doc.value_at("country").is_none());
        assert!(doc.get_path("country.iso_code.x").is_none());
        assert!(doc.get_path("city").is_none());
    }
}
