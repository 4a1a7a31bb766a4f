//! Delimited-text source.
//!
//! Each column maps to a field path, one of the range columns (`net`,
//! `from`, `to`) or nothing (`-`). Lines starting with `#` are comments.

use std::collections::BTreeMap;
use std::io::Read;

use rangemeld_shared::config::{FROM_COLUMN, NET_COLUMN, TO_COLUMN, is_skip_column};
use rangemeld_shared::{
    InputConfig, MeldError, RawRecord, RawValue, RecordRange, Result, network,
};

use crate::{Source, declared_type};

/// What a CSV column contributes to a record.
#[derive(Debug, Clone)]
enum Column {
    Net,
    From,
    To,
    Skip,
    Field { path: String, type_tag: String },
}

impl Column {
    fn resolve(name: &str, types: &BTreeMap<String, String>) -> Result<Self> {
        let column = match name {
            NET_COLUMN => Self::Net,
            FROM_COLUMN => Self::From,
            TO_COLUMN => Self::To,
            name if is_skip_column(name) => Self::Skip,
            path => Self::Field {
                path: path.to_string(),
                type_tag: declared_type(types, path)?,
            },
        };
        Ok(column)
    }
}

/// CSV-backed [`Source`].
pub struct CsvSource<R: Read> {
    name: String,
    reader: csv::Reader<R>,
    columns: Vec<Column>,
    record: csv::StringRecord,
    error: Option<MeldError>,
    done: bool,
}

impl<R: Read> std::fmt::Debug for CsvSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSource")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<R: Read> CsvSource<R> {
    /// Create a source over `reader`.
    ///
    /// Columns come from `input.fields`; with `header = true` and no
    /// `fields`, the header row names them instead.
    pub fn new(
        name: impl Into<String>,
        reader: R,
        input: &InputConfig,
        types: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let name = name.into();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(input.header)
            .delimiter(input.delimiter_byte()?)
            .comment(Some(b'#'))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let names: Vec<String> = if input.fields.is_empty() && input.header {
            reader
                .headers()
                .map_err(|e| csv_error(&name, e))?
                .iter()
                .map(str::to_string)
                .collect()
        } else {
            input.fields.clone()
        };

        let columns = names
            .iter()
            .map(|n| Column::resolve(n, types))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            reader,
            columns,
            record: csv::StringRecord::new(),
            error: None,
            done: false,
        })
    }

    fn fail(&mut self, err: MeldError) -> Option<RawRecord> {
        self.error = Some(err);
        self.done = true;
        None
    }

    fn parse_record(&self) -> Result<RawRecord> {
        let row = self
            .record
            .position()
            .map_or(0, |p| p.line() as usize);

        let mut net = None;
        let mut from = None;
        let mut to = None;
        let mut values = BTreeMap::new();

        for (column, cell) in self.columns.iter().zip(self.record.iter()) {
            let cell = Some(cell).filter(|c| !c.is_empty());
            match column {
                Column::Skip => {}
                Column::Net => net = cell,
                Column::From => from = cell,
                Column::To => to = cell,
                Column::Field { path, type_tag } => {
                    // Empty cells mean "no data", not an empty value.
                    if let Some(text) = cell {
                        values.insert(path.clone(), RawValue::new(type_tag.clone(), text));
                    }
                }
            }
        }

        let range = match (net, from, to) {
            (Some(net), None, None) => RecordRange::Network(
                network::parse_network(net).map_err(|e| MeldError::malformed_row(row, e))?,
            ),
            (None, Some(from), Some(to)) => {
                let from = network::parse_addr(from).map_err(|e| MeldError::malformed_row(row, e))?;
                let to = network::parse_addr(to).map_err(|e| MeldError::malformed_row(row, e))?;
                if network::ip_version(from) != network::ip_version(to) {
                    return Err(MeldError::malformed_row(
                        row,
                        format!("range {from} - {to} mixes IP versions"),
                    ));
                }
                if from > to {
                    return Err(MeldError::malformed_row(
                        row,
                        format!("range start {from} is after range end {to}"),
                    ));
                }
                RecordRange::Interval { from, to }
            }
            (Some(_), _, _) => {
                return Err(MeldError::malformed_row(
                    row,
                    "both net and from/to are set",
                ));
            }
            (None, None, None) => {
                return Err(MeldError::malformed_row(
                    row,
                    "neither net nor from/to is set",
                ));
            }
            (None, _, _) => {
                return Err(MeldError::malformed_row(
                    row,
                    "from and to must both be set",
                ));
            }
        };

        Ok(RawRecord { row, range, values })
    }
}

impl<R: Read> Source for CsvSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_entry(&mut self) -> Option<RawRecord> {
        if self.done {
            return None;
        }
        match self.reader.read_record(&mut self.record) {
            Ok(true) => match self.parse_record() {
                Ok(record) => Some(record),
                Err(e) => self.fail(e),
            },
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                let err = csv_error(&self.name, e);
                self.fail(err)
            }
        }
    }

    fn take_error(&mut self) -> Option<MeldError> {
        self.error.take()
    }
}

/// Map a `csv` error to an I/O failure or a malformed row.
fn csv_error(name: &str, err: csv::Error) -> MeldError {
    let row = err.position().map_or(0, |p| p.line() as usize);
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => MeldError::io(name, source),
        _ => MeldError::malformed_row(row, message),
    }
}
