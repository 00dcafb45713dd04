// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Mixed add/contains/remove workloads for measuring set throughput.

use crate::{
    backlink::BacklinkList,
    harris::HarrisList,
    locked::{LockBasedHashSet, LockBasedList},
    set::ConcurrentSet,
    skiplist::SkipList,
    striped::StripedHashSet,
    DefaultHashBuilder,
};

use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Barrier,
    },
    panic, thread,
    time::{Duration, Instant},
};

use hashbrown::HashMap;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};

/// An invalid [`Workload`] or an unknown set name.
///
/// [`Workload`]: struct.Workload.html
#[derive(Clone, Debug, Error, PartialEq)]
pub enum WorkloadError {
    #[error("a workload needs at least one thread")]
    NoThreads,
    #[error("the key range must not be empty")]
    EmptyKeyRange,
    #[error("cannot prefill {prefill} distinct keys from a key range of {key_range}")]
    PrefillExceedsKeyRange { prefill: u64, key_range: u64 },
    #[error("invalid operation mix {0:?}: weights must be finite, non-negative and not all zero")]
    InvalidMix(OperationMix),
    #[error("unknown set implementation {0:?}")]
    UnknownSet(String),
}

/// Relative weights of each operation kind in a workload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OperationMix {
    pub contains: f64,
    pub add: f64,
    pub remove: f64,
}

impl OperationMix {
    /// Mostly lookups with some insertions.
    pub const ADD_AND_CONTAINS: Self = Self {
        contains: 0.8,
        add: 0.2,
        remove: 0.0,
    };

    pub const ONLY_CONTAINS: Self = Self {
        contains: 1.0,
        add: 0.0,
        remove: 0.0,
    };

    pub const ONLY_REMOVE: Self = Self {
        contains: 0.0,
        add: 0.0,
        remove: 1.0,
    };

    fn validate(&self) -> Result<(), WorkloadError> {
        let weights = [self.contains, self.add, self.remove];
        let valid = weights.iter().all(|w| w.is_finite() && *w >= 0.0);

        if !valid || weights.iter().sum::<f64>() <= 0.0 {
            return Err(WorkloadError::InvalidMix(*self));
        }

        Ok(())
    }

    /// Splits `operations` into (contains, add, remove) counts.
    fn counts(&self, operations: usize) -> (usize, usize, usize) {
        let total = self.contains + self.add + self.remove;
        let scaled = |weight: f64| (operations as f64 * weight / total) as usize;

        let contains = scaled(self.contains).min(operations);
        let add = scaled(self.contains + self.add).clamp(contains, operations) - contains;

        (contains, add, operations - contains - add)
    }
}

impl Default for OperationMix {
    fn default() -> Self {
        Self::ADD_AND_CONTAINS
    }
}

/// A single operation against a set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Contains(u64),
    Add(u64),
    Remove(u64),
}

/// A reproducible benchmark scenario.
///
/// The set is first filled with the keys `0..prefill`. The generated
/// operations are then split round-robin between `threads` threads, which
/// start together and run to completion.
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub threads: usize,
    pub operations: usize,
    /// Keys are drawn from `0..key_range`.
    pub key_range: u64,
    pub prefill: u64,
    pub mix: OperationMix,
    pub seed: u64,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            threads: 1,
            operations: 10_000,
            key_range: 1 << 20,
            prefill: 100,
            mix: OperationMix::default(),
            seed: 42,
        }
    }
}

impl Workload {
    pub fn validate(&self) -> Result<(), WorkloadError> {
        if self.threads == 0 {
            return Err(WorkloadError::NoThreads);
        }

        if self.key_range == 0 {
            return Err(WorkloadError::EmptyKeyRange);
        }

        if self.prefill > self.key_range {
            return Err(WorkloadError::PrefillExceedsKeyRange {
                prefill: self.prefill,
                key_range: self.key_range,
            });
        }

        self.mix.validate()
    }

    /// Generates the operation sequence of this workload.
    ///
    /// The operation kinds are shuffled first, then keys are assigned in
    /// order against a model of the set's contents: additions draw a random
    /// key from the key range, lookups and removals pick a key the model
    /// holds at that point (or a random one if the model is empty).
    pub fn generate(&self) -> Result<Vec<Operation>, WorkloadError> {
        self.validate()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let (contains, add, remove) = self.mix.counts(self.operations);

        let mut kinds = Vec::with_capacity(self.operations);
        kinds.extend((0..contains).map(|_| Operation::Contains(0)));
        kinds.extend((0..add).map(|_| Operation::Add(0)));
        kinds.extend((0..remove).map(|_| Operation::Remove(0)));
        kinds.shuffle(&mut rng);

        let mut model = Model::prefilled(self.prefill);

        let operations = kinds
            .into_iter()
            .map(|kind| match kind {
                Operation::Contains(_) => {
                    Operation::Contains(model.pick(&mut rng, self.key_range))
                }
                Operation::Add(_) => {
                    let key = rng.random_range(0..self.key_range);
                    model.insert(key);

                    Operation::Add(key)
                }
                Operation::Remove(_) => {
                    let key = model.pick(&mut rng, self.key_range);
                    model.remove(key);

                    Operation::Remove(key)
                }
            })
            .collect();

        debug!(contains, add, remove, seed = self.seed, "generated workload");

        Ok(operations)
    }

    /// Prefills `set`, runs the workload against it and reports how long the
    /// operations took.
    pub fn run(&self, set: &dyn ConcurrentSet<u64>) -> Result<Report, WorkloadError> {
        let operations = self.generate()?;

        for key in 0..self.prefill {
            set.add(key);
        }

        let successes = Successes::default();
        let barrier = Barrier::new(self.threads + 1);

        let elapsed = thread::scope(|scope| {
            let workers: Vec<_> = (0..self.threads)
                .map(|start| {
                    let operations = &operations;
                    let successes = &successes;
                    let barrier = &barrier;

                    scope.spawn(move || {
                        barrier.wait();

                        for &operation in operations.iter().skip(start).step_by(self.threads) {
                            successes.record(operation, apply(set, operation));
                        }
                    })
                })
                .collect();

            barrier.wait();
            let started = Instant::now();

            for worker in workers {
                if let Err(payload) = worker.join() {
                    panic::resume_unwind(payload);
                }
            }

            started.elapsed()
        });

        let report = Report {
            threads: self.threads,
            operations: operations.len(),
            elapsed,
            contains_hits: successes.contains.load(Ordering::Relaxed),
            adds: successes.add.load(Ordering::Relaxed),
            removes: successes.remove.load(Ordering::Relaxed),
        };

        info!(
            threads = report.threads,
            operations = report.operations,
            elapsed_us = report.elapsed.as_micros() as u64,
            throughput = report.throughput(),
            "workload finished"
        );

        Ok(report)
    }
}

/// Applies `operation` to `set`, returning whether it succeeded.
pub fn apply(set: &dyn ConcurrentSet<u64>, operation: Operation) -> bool {
    match operation {
        Operation::Contains(key) => set.contains(&key),
        Operation::Add(key) => set.add(key),
        Operation::Remove(key) => set.remove(&key),
    }
}

/// The outcome of running a [`Workload`].
///
/// [`Workload`]: struct.Workload.html
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Report {
    pub threads: usize,
    pub operations: usize,
    pub elapsed: Duration,
    /// Number of lookups that found their key.
    pub contains_hits: usize,
    /// Number of insertions of a key not already present.
    pub adds: usize,
    /// Number of removals of a present key.
    pub removes: usize,
}

impl Report {
    /// Operations per second.
    pub fn throughput(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();

        if seconds == 0.0 {
            f64::INFINITY
        } else {
            self.operations as f64 / seconds
        }
    }
}

/// Selects one of the set implementations by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetKind {
    HarrisList,
    BacklinkList,
    SkipList,
    StripedHashSet,
    LockBasedHashSet,
    LockBasedList,
}

impl SetKind {
    pub const ALL: [SetKind; 6] = [
        SetKind::HarrisList,
        SetKind::BacklinkList,
        SetKind::SkipList,
        SetKind::StripedHashSet,
        SetKind::LockBasedHashSet,
        SetKind::LockBasedList,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SetKind::HarrisList => "harris-list",
            SetKind::BacklinkList => "backlink-list",
            SetKind::SkipList => "skip-list",
            SetKind::StripedHashSet => "striped-hash-set",
            SetKind::LockBasedHashSet => "lock-based-hash-set",
            SetKind::LockBasedList => "lock-based-list",
        }
    }

    /// Creates an empty set of this kind with its default configuration.
    pub fn build(self) -> Box<dyn ConcurrentSet<u64>> {
        match self {
            SetKind::HarrisList => Box::new(HarrisList::<u64>::new()),
            SetKind::BacklinkList => Box::new(BacklinkList::<u64>::new()),
            SetKind::SkipList => Box::new(SkipList::<u64>::new()),
            SetKind::StripedHashSet => Box::new(StripedHashSet::<u64>::new()),
            SetKind::LockBasedHashSet => Box::new(LockBasedHashSet::<u64>::new()),
            SetKind::LockBasedList => Box::new(LockBasedList::<u64>::new()),
        }
    }
}

impl fmt::Display for SetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SetKind {
    type Err = WorkloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SetKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| WorkloadError::UnknownSet(s.to_string()))
    }
}

#[derive(Default)]
struct Successes {
    contains: AtomicUsize,
    add: AtomicUsize,
    remove: AtomicUsize,
}

impl Successes {
    fn record(&self, operation: Operation, succeeded: bool) {
        if !succeeded {
            return;
        }

        let counter = match operation {
            Operation::Contains(_) => &self.contains,
            Operation::Add(_) => &self.add,
            Operation::Remove(_) => &self.remove,
        };

        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The keys a set is expected to hold while a workload is generated.
struct Model {
    keys: Vec<u64>,
    positions: HashMap<u64, usize, DefaultHashBuilder>,
}

impl Model {
    fn prefilled(prefill: u64) -> Self {
        Self {
            keys: (0..prefill).collect(),
            positions: (0..prefill).map(|key| (key, key as usize)).collect(),
        }
    }

    fn insert(&mut self, key: u64) {
        if !self.positions.contains_key(&key) {
            self.positions.insert(key, self.keys.len());
            self.keys.push(key);
        }
    }

    fn remove(&mut self, key: u64) {
        if let Some(index) = self.positions.remove(&key) {
            self.keys.swap_remove(index);

            if let Some(&moved) = self.keys.get(index) {
                self.positions.insert(moved, index);
            }
        }
    }

    fn pick<R: Rng>(&self, rng: &mut R, key_range: u64) -> u64 {
        if self.keys.is_empty() {
            rng.random_range(0..key_range)
        } else {
            self.keys[rng.random_range(0..self.keys.len())]
        }
    }
}
