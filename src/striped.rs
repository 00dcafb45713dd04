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

//! A hash set whose buckets are locked individually.

use crate::DefaultHashBuilder;

use std::{
    borrow::Borrow,
    fmt,
    hash::{BuildHasher, Hash},
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

/// Number of buckets a `StripedHashSet` starts with by default.
pub const DEFAULT_NUM_BUCKETS: usize = 16;

/// Default bound on the fraction of non-empty buckets before the table grows.
pub const DEFAULT_MAX_FILL_RATIO: f64 = 0.8;

/// A concurrent hash set with one lock per bucket.
///
/// Each bucket is a `Vec` behind its own mutex, so operations on different
/// buckets proceed in parallel. The bucket table itself sits behind a
/// reader-writer lock: every operation holds it shared for its duration,
/// while a resize takes it exclusively and rehashes every element into a
/// table twice as large.
///
/// The table grows once the fraction of non-empty buckets exceeds the
/// maximum fill ratio. It never shrinks.
///
/// The default hashing algorithm is [aHash]; another one can be chosen with
/// [`with_hasher`] or [`with_buckets_and_hasher`].
///
/// [aHash]: https://docs.rs/ahash
/// [`with_hasher`]: #method.with_hasher
/// [`with_buckets_and_hasher`]: #method.with_buckets_and_hasher
pub struct StripedHashSet<T, S = DefaultHashBuilder> {
    table: RwLock<Table<T>>,
    max_fill_ratio: f64,
    build_hasher: S,
}

impl<T> StripedHashSet<T, DefaultHashBuilder> {
    /// Creates an empty `StripedHashSet` with the default number of buckets
    /// and fill ratio.
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Creates an empty `StripedHashSet` with at least `num_buckets` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `num_buckets` is zero.
    pub fn with_buckets(num_buckets: usize) -> Self {
        Self::with_buckets_and_hasher(
            num_buckets,
            DEFAULT_MAX_FILL_RATIO,
            DefaultHashBuilder::default(),
        )
    }
}

impl<T, S> StripedHashSet<T, S> {
    /// Creates an empty `StripedHashSet` that will use `build_hasher` to hash
    /// elements.
    pub fn with_hasher(build_hasher: S) -> Self {
        Self::with_buckets_and_hasher(DEFAULT_NUM_BUCKETS, DEFAULT_MAX_FILL_RATIO, build_hasher)
    }

    /// Creates an empty `StripedHashSet` with `num_buckets` buckets that grows
    /// once more than `max_fill_ratio` of its buckets are non-empty.
    ///
    /// # Panics
    ///
    /// Panics if `num_buckets` is zero or `max_fill_ratio` is not positive.
    pub fn with_buckets_and_hasher(
        num_buckets: usize,
        max_fill_ratio: f64,
        build_hasher: S,
    ) -> Self {
        assert!(num_buckets > 0);
        assert!(max_fill_ratio > 0.0);

        Self {
            table: RwLock::new(Table::with_buckets(num_buckets)),
            max_fill_ratio,
            build_hasher,
        }
    }

    /// Returns the number of elements in the set.
    ///
    /// Buckets are counted one at a time, so concurrent updates may or may not
    /// be reflected.
    pub fn len(&self) -> usize {
        self.table
            .read()
            .buckets
            .iter()
            .map(|bucket| bucket.lock().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the current number of buckets.
    pub fn num_buckets(&self) -> usize {
        self.table.read().buckets.len()
    }

    /// Calls `f` on every element, one bucket at a time.
    pub fn for_each<F: FnMut(&T)>(&self, mut f: F) {
        let table = self.table.read();

        for bucket in table.buckets.iter() {
            bucket.lock().iter().for_each(&mut f);
        }
    }
}

impl<T: Hash + Eq, S: BuildHasher> StripedHashSet<T, S> {
    /// Inserts `elem` into the set, returning `false` if it was already
    /// present.
    pub fn add(&self, elem: T) -> bool {
        let hash = self.build_hasher.hash_one(&elem);

        let (num_buckets, num_filled) = {
            let table = self.table.read();
            let mut bucket = table.bucket(hash).lock();

            if bucket.contains(&elem) {
                return false;
            }

            bucket.push(elem);

            let num_filled = if bucket.len() == 1 {
                table.filled.fetch_add(1, Ordering::Relaxed) + 1
            } else {
                table.filled.load(Ordering::Relaxed)
            };

            (table.buckets.len(), num_filled)
        };

        if num_filled as f64 / num_buckets as f64 > self.max_fill_ratio {
            self.grow(num_buckets);
        }

        true
    }

    pub fn contains<Q: ?Sized + Hash + Eq>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
    {
        let hash = self.build_hasher.hash_one(key);
        let table = self.table.read();
        let bucket = table.bucket(hash).lock();

        bucket.iter().any(|elem| elem.borrow() == key)
    }

    pub fn remove<Q: ?Sized + Hash + Eq>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
    {
        let hash = self.build_hasher.hash_one(key);
        let table = self.table.read();
        let mut bucket = table.bucket(hash).lock();

        match bucket.iter().position(|elem| elem.borrow() == key) {
            Some(index) => {
                bucket.swap_remove(index);

                if bucket.is_empty() {
                    table.filled.fetch_sub(1, Ordering::Relaxed);
                }

                true
            }
            None => false,
        }
    }

    /// Doubles the table, unless another thread already grew it past
    /// `observed_buckets`.
    fn grow(&self, observed_buckets: usize) {
        let mut table = self.table.write();

        if table.buckets.len() != observed_buckets {
            return;
        }

        let mut grown = Table::with_buckets(observed_buckets * 2);

        for bucket in table.buckets.iter_mut() {
            for elem in bucket.get_mut().drain(..) {
                let index = grown.index(self.build_hasher.hash_one(&elem));
                let target = grown.buckets[index].get_mut();

                if target.is_empty() {
                    *grown.filled.get_mut() += 1;
                }

                target.push(elem);
            }
        }

        debug!(
            from = observed_buckets,
            to = grown.buckets.len(),
            filled = *grown.filled.get_mut(),
            "grew striped hash set"
        );

        *table = grown;
    }
}

impl<T> Default for StripedHashSet<T, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, S> fmt::Debug for StripedHashSet<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read();
        let mut set = f.debug_set();

        for bucket in table.buckets.iter() {
            set.entries(bucket.lock().iter());
        }

        set.finish()
    }
}

struct Table<T> {
    buckets: Box<[Mutex<Vec<T>>]>,
    filled: AtomicUsize,
}

impl<T> Table<T> {
    fn with_buckets(num_buckets: usize) -> Self {
        Self {
            buckets: (0..num_buckets).map(|_| Mutex::new(Vec::new())).collect(),
            filled: AtomicUsize::new(0),
        }
    }

    fn bucket(&self, hash: u64) -> &Mutex<Vec<T>> {
        &self.buckets[self.index(hash)]
    }

    fn index(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }
}
