//! Group-by over raw records keyed on the normalized event id.
//!
//! Every multi-valued column keeps its values in first-seen order and drops
//! repeats. Frequency counts records, not distinct values. Timestamps are
//! compared at whole-second precision.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use chrono::{DateTime, SubsecRound, Utc};

use crate::model::{RawEventRecord, SummaryRow};

#[derive(Debug)]
struct Distinct<T> { items: Vec<T>, seen: HashSet<T> }

impl<T> Default for Distinct<T> {
    fn default() -> Self { Self { items: Vec::new(), seen: HashSet::new() } }
}

impl<T: Eq + Hash + Clone> Distinct<T> {
    fn insert(&mut self, v: T) {
        if self.seen.insert(v.clone()) { self.items.push(v); }
    }
}

#[derive(Debug)]
struct RowBuilder {
    frequency: usize,
    sources: Distinct<String>,
    levels: Distinct<String>,
    category: Option<String>,
    timestamps: Distinct<DateTime<Utc>>,
    descriptions: Distinct<String>,
}

impl RowBuilder {
    fn new() -> Self {
        Self { frequency: 0, sources: Distinct::default(), levels: Distinct::default(), category: None, timestamps: Distinct::default(), descriptions: Distinct::default() }
    }

    fn fold(&mut self, rec: &RawEventRecord) {
        self.frequency += 1;
        self.sources.insert(rec.source.clone());
        self.levels.insert(rec.level_label());
        if self.category.is_none() && let Some(c) = rec.category.as_ref().filter(|c| !c.is_empty()) {
            self.category = Some(c.clone());
        }
        self.timestamps.insert(rec.time.trunc_subsecs(0));
        self.descriptions.insert(rec.description.clone());
    }

    fn into_row(self, serial: usize, event_id: u16) -> SummaryRow {
        SummaryRow {
            serial,
            event_id,
            sources: self.sources.items,
            levels: self.levels.items,
            category: self.category,
            timestamps: self.timestamps.items,
            descriptions: self.descriptions.items,
            frequency: self.frequency,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub rows: Vec<SummaryRow>,
    /// Records dropped because they carried no event id.
    pub skipped: usize,
}

impl Aggregation {
    pub fn total_frequency(&self) -> usize { self.rows.iter().map(|r| r.frequency).sum() }
}

#[derive(Debug)]
pub struct Aggregator {
    groups: BTreeMap<u16, RowBuilder>,
    skipped: usize,
}

impl Default for Aggregator {
    fn default() -> Self { Self::new() }
}

impl Aggregator {
    pub fn new() -> Self { Self { groups: BTreeMap::new(), skipped: 0 } }

    pub fn push(&mut self, rec: &RawEventRecord) {
        let Some(key) = rec.normalized_id() else {
            log::warn!("Skipping record from {} at {} without an event id", rec.source, rec.time);
            self.skipped += 1;
            return;
        };
        self.groups.entry(key).or_insert_with(RowBuilder::new).fold(rec);
    }

    /// Emits rows in ascending id order; serial numbers follow that order.
    pub fn finish(self) -> Aggregation {
        let rows = self.groups.into_iter().enumerate().map(|(i, (id, b))| b.into_row(i + 1, id)).collect();
        Aggregation { rows, skipped: self.skipped }
    }
}

pub fn aggregate<'a, I>(records: I) -> Aggregation
where
    I: IntoIterator<Item = &'a RawEventRecord>,
{
    let mut agg = Aggregator::new();
    for r in records { agg.push(r); }
    let out = agg.finish();
    log::debug!("Aggregated {} records into {} rows ({} skipped)", out.total_frequency(), out.rows.len(), out.skipped);
    out
}
