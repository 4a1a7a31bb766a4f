//! Record synthesis: one source's raw records into optimized
//! `(network, document)` pairs.

use std::collections::VecDeque;

use rangemeld_shared::{
    Document, IpNetwork, MeldError, OptimizationConfig, RawRecord, RecordRange, Result,
    interval_networks,
};
use rangemeld_sources::Source;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assemble::insert_path;
use crate::coerce::coerce;
use crate::optimize::{Discard, Optimizer, Outcome};

/// Counters collected while draining a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthStats {
    pub records_read: u64,
    pub intervals_expanded: u64,
    pub networks_synthesized: u64,
    pub discarded_ip_version: u64,
    pub discarded_unrepresentable: u64,
    pub prefix_trimmed: u64,
}

impl SynthStats {
    pub fn absorb(&mut self, other: &SynthStats) {
        self.records_read += other.records_read;
        self.intervals_expanded += other.intervals_expanded;
        self.networks_synthesized += other.networks_synthesized;
        self.discarded_ip_version += other.discarded_ip_version;
        self.discarded_unrepresentable += other.discarded_unrepresentable;
        self.prefix_trimmed += other.prefix_trimmed;
    }
}

/// Drives one [`Source`] to completion, yielding optimized pairs.
///
/// Yields `Err` at most once; iteration ends after an error. Coercion and
/// assembly failures carry the source name, row, field, raw value and
/// declared type. A terminal source error is wrapped with the source name.
pub struct RecordSynthesizer<'a> {
    source: &'a mut dyn Source,
    config: &'a OptimizationConfig,
    optimizer: Optimizer,
    pending: VecDeque<IpNetwork>,
    document: Document,
    stats: SynthStats,
    finished: bool,
}

impl<'a> RecordSynthesizer<'a> {
    pub fn new(
        source: &'a mut dyn Source,
        config: &'a OptimizationConfig,
        optimizer: Optimizer,
    ) -> Self {
        Self {
            source,
            config,
            optimizer,
            pending: VecDeque::new(),
            document: Document::new(),
            stats: SynthStats::default(),
            finished: false,
        }
    }

    pub fn stats(&self) -> &SynthStats {
        &self.stats
    }

    fn synthesize(&self, record: &RawRecord) -> Result<Document> {
        let mut doc = Document::new();
        for (field, raw) in &record.values {
            coerce(&raw.type_tag, &raw.text, self.config)
                .and_then(|value| insert_path(&mut doc, field, value))
                .map_err(|e| MeldError::Record {
                    source_name: self.source.name().to_string(),
                    row: record.row,
                    field: field.clone(),
                    value: raw.text.clone(),
                    type_tag: raw.type_tag.clone(),
                    source: Box::new(e),
                })?;
        }
        Ok(doc)
    }

    fn networks(&mut self, record: &RawRecord) -> Result<VecDeque<IpNetwork>> {
        match record.range {
            RecordRange::Network(network) => Ok(VecDeque::from([network])),
            RecordRange::Interval { from, to } => {
                self.stats.intervals_expanded += 1;
                interval_networks(from, to)
                    .map(VecDeque::from)
                    .map_err(|e| {
                        MeldError::malformed_row(record.row, e).in_source(self.source.name())
                    })
            }
        }
    }

    fn fail(&mut self, err: MeldError) -> Option<Result<(IpNetwork, Document)>> {
        self.finished = true;
        self.pending.clear();
        Some(Err(err))
    }
}

impl Iterator for RecordSynthesizer<'_> {
    type Item = Result<(IpNetwork, Document)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(network) = self.pending.pop_front() {
                match self.optimizer.apply(network) {
                    Outcome::Keep { network, trimmed } => {
                        if trimmed {
                            self.stats.prefix_trimmed += 1;
                        }
                        self.stats.networks_synthesized += 1;
                        let document = if self.pending.is_empty() {
                            std::mem::take(&mut self.document)
                        } else {
                            self.document.clone()
                        };
                        return Some(Ok((network, document)));
                    }
                    Outcome::Discard(reason) => {
                        debug!(%network, ?reason, "discarded network");
                        match reason {
                            Discard::VersionMismatch => self.stats.discarded_ip_version += 1,
                            Discard::Unrepresentable => {
                                self.stats.discarded_unrepresentable += 1
                            }
                        }
                        continue;
                    }
                }
            }

            if self.finished {
                return None;
            }

            let Some(record) = self.source.next_entry() else {
                self.finished = true;
                let err = self.source.take_error()?;
                let name = self.source.name().to_string();
                return Some(Err(err.in_source(name)));
            };
            self.stats.records_read += 1;

            let document = match self.synthesize(&record) {
                Ok(document) => document,
                Err(e) => return self.fail(e),
            };
            match self.networks(&record) {
                Ok(networks) => {
                    self.document = document;
                    self.pending = networks;
                }
                Err(e) => return self.fail(e),
            }
        }
    }
}
