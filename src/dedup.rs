//! Fingerprint-based deduplication.
//!
//! A fingerprint is built from a small ordered list of identifying fields.
//! Each field is lower-cased, split on anything that is not alphanumeric,
//! stripped of stop words and glued back together without separators; the
//! per-field parts are then joined with `_`. "The Acme Corp" in
//! "Wilmington" and "Acme" in "wilmington" both become `acme_wilmington`.

use crate::models::{fields, Record};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};

/// Which fields identify a record, and which words to ignore in them.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Identifying fields, in fingerprint order.
    pub fields: Vec<String>,
    /// Words dropped from every field before comparison.
    pub stop_words: Vec<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fields: vec![fields::NAME.to_string(), fields::CITY.to_string()],
            stop_words: default_stop_words(),
        }
    }
}

/// Articles, corporate suffixes and generic project nouns.
pub fn default_stop_words() -> Vec<String> {
    [
        "the", "a", "an", "and", "of", "inc", "llc", "llp", "ltd", "corp", "corporation", "co",
        "company", "pc", "pa", "pllc", "group", "project", "building", "facility",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Why a candidate was dropped as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateOf {
    /// An earlier record in the same run had the same fingerprint.
    Batch { earlier_name: String },
    /// The fingerprint was already present in the remote store.
    Existing,
}

/// Result of [`Deduplicator::dedup`].
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// First occurrence of every new fingerprint, in input order.
    pub accepted: Vec<Record>,
    /// Every dropped candidate with the reason it was dropped.
    pub duplicates: Vec<(Record, DuplicateOf)>,
    /// The existing set plus the fingerprints of every accepted record.
    pub fingerprints: HashSet<String>,
}

/// Fingerprints records and filters out repeats.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    config: DedupConfig,
    stop_words: HashSet<String>,
}

impl Deduplicator {
    /// Build a deduplicator; stop words are compared case-insensitively.
    pub fn new(config: DedupConfig) -> Self {
        let stop_words = config
            .stop_words
            .iter()
            .map(|w| w.to_lowercase())
            .collect();
        Self { config, stop_words }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Fingerprint of `record` over the configured fields.
    ///
    /// A missing field contributes an empty segment, so with fields
    /// `[name, city]` a record without a city yields `"acme_"`.
    pub fn fingerprint(&self, record: &Record) -> String {
        self.config
            .fields
            .iter()
            .map(|field| {
                record
                    .text(field)
                    .map(|value| self.normalize(&value))
                    .unwrap_or_default()
            })
            .join("_")
    }

    fn normalize(&self, value: &str) -> String {
        value
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty() && !self.stop_words.contains(*word))
            .collect()
    }

    /// Keep the first record for each fingerprint not already in `existing`.
    ///
    /// Neither the candidates nor `existing` are modified, so the same inputs
    /// always yield the same accepted set.
    ///
    /// # Arguments
    ///
    /// * `candidates` - Validated records, in harvest order
    /// * `existing` - Fingerprints already in the remote store
    /// * `name_field` - Field used to name records in log lines
    ///
    /// # Returns
    ///
    /// A [`DedupOutcome`] whose `accepted` and `duplicates` together hold
    /// every candidate exactly once.
    #[instrument(level = "info", skip_all, fields(candidates = candidates.len(), existing = existing.len()))]
    pub fn dedup(
        &self,
        candidates: &[Record],
        existing: &HashSet<String>,
        name_field: &str,
    ) -> DedupOutcome {
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut outcome = DedupOutcome {
            fingerprints: existing.clone(),
            ..Default::default()
        };

        for record in candidates {
            let fingerprint = self.fingerprint(record);
            let name = record.label(name_field);

            if let Some(earlier_name) = seen.get(&fingerprint) {
                warn!(%name, %fingerprint, earlier = %earlier_name, "Dropping duplicate of earlier record");
                outcome.duplicates.push((
                    record.clone(),
                    DuplicateOf::Batch {
                        earlier_name: earlier_name.clone(),
                    },
                ));
                continue;
            }
            if existing.contains(&fingerprint) {
                warn!(%name, %fingerprint, "Dropping record already in store");
                outcome
                    .duplicates
                    .push((record.clone(), DuplicateOf::Existing));
                continue;
            }

            seen.insert(fingerprint.clone(), name);
            outcome.fingerprints.insert(fingerprint);
            outcome.accepted.push(record.clone());
        }

        info!(
            accepted = outcome.accepted.len(),
            duplicates = outcome.duplicates.len(),
            "Deduplication complete"
        );
        outcome
    }
}
