//! Thread-safe tag and combination counting.
//!
//! Both count maps live behind one lock so a reader never observes a record
//! counted in one map but not the other. Workers accumulate a batch into a
//! local [`BatchTally`] and fold it in with a single lock acquisition.

pub mod dimension;
pub mod stats;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use self::dimension::Combination;

#[derive(Debug, Default)]
struct AggregateState {
    tag_counts: HashMap<String, u64>,
    combination_counts: HashMap<Combination, u64>,
}

impl AggregateState {
    fn add(&mut self, port: u16, protocol: &str, tag: &str, n: u64) {
        self.add_tag(tag, n);
        self.add_combination(port, protocol, n);
    }

    fn add_tag(&mut self, tag: &str, n: u64) {
        match self.tag_counts.get_mut(tag) {
            Some(count) => *count += n,
            None => {
                self.tag_counts.insert(tag.to_string(), n);
            }
        }
    }

    fn add_combination(&mut self, port: u16, protocol: &str, n: u64) {
        *self
            .combination_counts
            .entry(Combination::new(port, protocol))
            .or_default() += n;
    }
}

/// Running tag counts, combination counts, and rejected-line count.
pub struct Aggregator {
    state: Mutex<AggregateState>,
    errors: AtomicU64,
}

impl Aggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AggregateState::default()),
            errors: AtomicU64::new(0),
        }
    }

    /// Count one record against its tag and its (port, protocol) combination.
    pub fn record(&self, port: u16, protocol: &str, tag: &str) {
        self.state.lock().add(port, protocol, tag, 1);
    }

    /// Count one rejected line.
    pub fn record_error(&self) {
        self.record_errors(1);
    }

    /// Count `n` rejected lines.
    pub fn record_errors(&self, n: u64) {
        if n > 0 {
            self.errors.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Fold a worker-local tally into the shared counts.
    pub fn record_batch(&self, tally: &BatchTally<'_>) {
        self.record_errors(tally.errors);
        if tally.records == 0 {
            return;
        }

        let mut state = self.state.lock();
        for (tag, n) in &tally.tag_counts {
            state.add_tag(tag, *n);
        }
        for ((port, protocol), n) in &tally.combination_counts {
            state.add_combination(*port, protocol, *n);
        }
    }

    /// Number of rejected lines so far.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns a sorted copy of the current counts.
    pub fn snapshot(&self) -> AggregateSnapshot {
        let state = self.state.lock();
        AggregateSnapshot {
            tag_counts: state
                .tag_counts
                .iter()
                .map(|(tag, n)| (tag.clone(), *n))
                .collect(),
            combination_counts: state
                .combination_counts
                .iter()
                .map(|(combination, n)| (combination.clone(), *n))
                .collect(),
            errors: self.errors(),
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-batch counts built without locking, keyed by names borrowed from the
/// lookup tables.
#[derive(Debug, Default)]
pub struct BatchTally<'a> {
    tag_counts: HashMap<&'a str, u64>,
    combination_counts: HashMap<(u16, &'a str), u64>,
    records: u64,
    errors: u64,
}

impl<'a> BatchTally<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one accepted record.
    pub fn add(&mut self, port: u16, protocol: &'a str, tag: &'a str) {
        *self.tag_counts.entry(tag).or_default() += 1;
        *self.combination_counts.entry((port, protocol)).or_default() += 1;
        self.records += 1;
    }

    /// Count one rejected line.
    pub fn add_error(&mut self) {
        self.errors += 1;
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }
}

/// Finalized, sorted view of an aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateSnapshot {
    pub tag_counts: BTreeMap<String, u64>,
    pub combination_counts: BTreeMap<Combination, u64>,
    pub errors: u64,
}

impl AggregateSnapshot {
    /// Number of records counted; equal to the sum of combination counts.
    pub fn records(&self) -> u64 {
        self.combination_counts.values().sum()
    }

    pub fn tag_count(&self, tag: &str) -> u64 {
        self.tag_counts.get(tag).copied().unwrap_or(0)
    }

    pub fn combination_count(&self, port: u16, protocol: &str) -> u64 {
        self.combination_counts
            .get(&Combination::new(port, protocol))
            .copied()
            .unwrap_or(0)
    }
}
