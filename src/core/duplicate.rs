// Near-duplicate elimination over the complete set of processed records.
//
// Every ordered pair is compared. A pair (src, dest) marks dest for discard
// when the two are at least `threshold` similar and src outranks dest:
// larger source area first, then the lexicographically smaller identifier.

use crate::core::thumbnail::ProcessedRecord;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    pub identifier: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateReport {
    /// Kept identifier -> the records it suppresses.
    pub clusters: BTreeMap<String, Vec<DuplicateMatch>>,
    /// Every identifier that appears as a suppressed record in any cluster.
    pub discarded: BTreeSet<String>,
}

impl DuplicateReport {
    pub fn pair_count(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }
}

pub struct DuplicateResolver {
    pub threshold: f64,
}

impl DuplicateResolver {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Resolve using fingerprint correlation as the similarity score.
    pub fn resolve(&self, records: &[ProcessedRecord]) -> DuplicateReport {
        self.resolve_by(records, |a, b| a.fingerprint.correlation(&b.fingerprint))
    }

    /// Resolve with a caller-supplied symmetric similarity score.
    pub fn resolve_by<F>(&self, records: &[ProcessedRecord], similarity: F) -> DuplicateReport
    where
        F: Fn(&ProcessedRecord, &ProcessedRecord) -> f64 + Sync,
    {
        let similarity = &similarity;
        let threshold = self.threshold;

        let pairs: Vec<(usize, usize, f64)> = (0..records.len())
            .into_par_iter()
            .flat_map_iter(|i| {
                let src = &records[i];
                records.iter().enumerate().filter_map(move |(j, dest)| {
                    if src.identifier == dest.identifier || !outranks(src, dest) {
                        return None;
                    }
                    let score = similarity(src, dest);
                    (score >= threshold).then_some((i, j, score))
                })
            })
            .collect();

        let mut report = DuplicateReport::default();
        for (i, j, score) in pairs {
            let kept = &records[i];
            let dropped = &records[j];
            tracing::debug!(
                kept = %kept.identifier,
                discarded = %dropped.identifier,
                similarity = score,
                "duplicate pair"
            );
            report
                .clusters
                .entry(kept.identifier.clone())
                .or_default()
                .push(DuplicateMatch {
                    identifier: dropped.identifier.clone(),
                    similarity: score,
                });
            report.discarded.insert(dropped.identifier.clone());
        }

        for matches in report.clusters.values_mut() {
            matches.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        }

        report
    }
}

/// Strict priority: larger source area wins; equal areas keep the smaller identifier.
fn outranks(src: &ProcessedRecord, dest: &ProcessedRecord) -> bool {
    (src.area(), &dest.identifier) > (dest.area(), &src.identifier)
}
