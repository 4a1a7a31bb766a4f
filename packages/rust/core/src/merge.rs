//! Cross-source merge with conditional resets.
//!
//! Entries are keyed by [`NetworkKey`], so iteration order is the output
//! order: IPv4 before IPv6, then start address, then prefix length. CIDR
//! networks either nest or are disjoint; an incoming network overlaps the
//! entries that contain it, equal it, or sit inside it.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use rangemeld_shared::{ConditionalResetRule, Document, IpNetwork, NetworkKey};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A network with its final document.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedEntry {
    pub network: IpNetwork,
    pub document: Document,
}

/// Counters collected by the merge engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Incoming documents merged over an existing entry.
    pub merged: u64,
    /// Conditional reset rules that fired.
    pub resets_applied: u64,
}

/// Result of merging one document over another.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub document: Document,
    pub resets_applied: u64,
}

/// Merge `incoming` over `existing`.
///
/// Incoming top-level keys replace existing ones wholesale. A top-level key
/// has changed when `incoming` supplies it and `existing` had no value or a
/// different one. Every rule watching a changed key removes its reset keys,
/// except those `incoming` supplies.
pub fn merge_documents(
    existing: &Document,
    incoming: &Document,
    rules: &[ConditionalResetRule],
) -> MergeOutcome {
    let changed: BTreeSet<&str> = incoming
        .iter()
        .filter(|(key, node)| existing.get(key) != Some(*node))
        .map(|(key, _)| key)
        .collect();

    let mut document = existing.clone();
    for (key, node) in incoming.iter() {
        document.insert(key, node.clone());
    }

    let mut resets_applied = 0;
    for rule in rules {
        if !rule.if_changed.iter().any(|key| changed.contains(key.as_str())) {
            continue;
        }
        resets_applied += 1;
        for key in &rule.reset {
            if !incoming.contains_key(key) {
                document.remove(key);
            }
        }
    }

    MergeOutcome {
        document,
        resets_applied,
    }
}

/// Accumulates synthesized pairs for one output database.
#[derive(Debug, Default)]
pub struct MergeEngine {
    rules: Vec<ConditionalResetRule>,
    entries: BTreeMap<NetworkKey, MergedEntry>,
    stats: MergeStats,
}

impl MergeEngine {
    pub fn new(rules: Vec<ConditionalResetRule>) -> Self {
        Self {
            rules,
            ..Default::default()
        }
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge one pair into the engine.
    pub fn insert(&mut self, network: IpNetwork, incoming: Document) {
        let key = NetworkKey::of(&network);

        let base = match self.entries.get(&key) {
            Some(equal) => Some(&equal.document),
            None => self.most_specific_container(&key),
        };
        let outcome = base.map(|base| merge_documents(base, &incoming, &self.rules));
        let document = match outcome {
            Some(outcome) => {
                self.stats.merged += 1;
                self.stats.resets_applied += outcome.resets_applied;
                outcome.document
            }
            None => incoming.clone(),
        };
        trace!(%network, "merged entry");
        self.entries.insert(key, MergedEntry { network, document });

        // Entries inside the incoming network see its groups too.
        let last = NetworkKey {
            version: key.version,
            start: key.end(),
            prefix: u8::MAX,
        };
        for (_, entry) in self
            .entries
            .range_mut((Bound::Excluded(key), Bound::Included(last)))
        {
            let outcome = merge_documents(&entry.document, &incoming, &self.rules);
            self.stats.merged += 1;
            self.stats.resets_applied += outcome.resets_applied;
            entry.document = outcome.document;
        }
    }

    /// Consume the engine, returning entries in output order.
    pub fn into_entries(self) -> Vec<MergedEntry> {
        self.entries.into_values().collect()
    }

    fn most_specific_container(&self, key: &NetworkKey) -> Option<&Document> {
        (0..key.prefix)
            .rev()
            .find_map(|prefix| self.entries.get(&key.truncated(prefix)))
            .map(|entry| &entry.document)
    }
}
