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

//! Coarse-grained lock-based sets, used as baselines.

use crate::{
    comparator::{Comparator, NaturalOrder},
    DefaultHashBuilder,
};

use std::{
    borrow::Borrow,
    fmt,
    hash::{BuildHasher, Hash},
};

use hashbrown::HashSet;
use parking_lot::Mutex;

/// A sorted set protected by a single mutex.
///
/// Elements are stored in a sorted `Vec` and located by binary search with
/// the set's comparator, so lookups are logarithmic but every insertion and
/// removal shifts the tail of the vector.
pub struct LockBasedList<T, C = NaturalOrder> {
    elems: Mutex<Vec<T>>,
    comparator: C,
}

impl<T> LockBasedList<T, NaturalOrder> {
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<T, C> LockBasedList<T, C> {
    pub fn with_comparator(comparator: C) -> Self {
        Self {
            elems: Mutex::new(Vec::new()),
            comparator,
        }
    }

    pub fn len(&self) -> usize {
        self.elems.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.lock().is_empty()
    }

    pub fn add(&self, elem: T) -> bool
    where
        C: Comparator<T>,
    {
        let mut elems = self.elems.lock();

        match Self::position(&self.comparator, &elems, &elem) {
            Ok(_) => false,
            Err(index) => {
                elems.insert(index, elem);

                true
            }
        }
    }

    pub fn contains<Q: ?Sized>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        Self::position(&self.comparator, &self.elems.lock(), key).is_ok()
    }

    pub fn remove<Q: ?Sized>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let mut elems = self.elems.lock();

        match Self::position(&self.comparator, &elems, key) {
            Ok(index) => {
                elems.remove(index);

                true
            }
            Err(_) => false,
        }
    }

    /// Calls `f` on every element in ascending order while holding the lock.
    pub fn for_each<F: FnMut(&T)>(&self, f: F) {
        self.elems.lock().iter().for_each(f);
    }

    fn position<Q: ?Sized>(comparator: &C, elems: &[T], key: &Q) -> Result<usize, usize>
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        elems.binary_search_by(|elem| comparator.compare(elem.borrow(), key))
    }
}

impl<T> Default for LockBasedList<T, NaturalOrder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, C> fmt::Debug for LockBasedList<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.elems.lock().iter()).finish()
    }
}

/// A hash set protected by a single mutex.
///
/// Iteration order is unspecified.
pub struct LockBasedHashSet<T, S = DefaultHashBuilder> {
    elems: Mutex<HashSet<T, S>>,
}

impl<T> LockBasedHashSet<T, DefaultHashBuilder> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<T, S> LockBasedHashSet<T, S> {
    pub fn with_hasher(build_hasher: S) -> Self {
        Self {
            elems: Mutex::new(HashSet::with_hasher(build_hasher)),
        }
    }

    pub fn with_capacity_and_hasher(capacity: usize, build_hasher: S) -> Self {
        Self {
            elems: Mutex::new(HashSet::with_capacity_and_hasher(capacity, build_hasher)),
        }
    }

    pub fn len(&self) -> usize {
        self.elems.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.lock().is_empty()
    }

    /// Calls `f` on every element while holding the lock.
    pub fn for_each<F: FnMut(&T)>(&self, f: F) {
        self.elems.lock().iter().for_each(f);
    }
}

impl<T: Hash + Eq, S: BuildHasher> LockBasedHashSet<T, S> {
    pub fn add(&self, elem: T) -> bool {
        self.elems.lock().insert(elem)
    }

    pub fn contains<Q: ?Sized + Hash + Eq>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
    {
        self.elems.lock().contains(key)
    }

    pub fn remove<Q: ?Sized + Hash + Eq>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
    {
        self.elems.lock().remove(key)
    }
}

impl<T> Default for LockBasedHashSet<T, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, S> fmt::Debug for LockBasedHashSet<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.elems.lock().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::comparator::FnComparator;

    #[test]
    fn list_keeps_order() {
        let list = LockBasedList::new();

        for i in [5, 1, 4, 2, 3] {
            assert!(list.add(i));
        }

        assert!(!list.add(3));
        assert_eq!(list.len(), 5);

        let mut elems = Vec::new();
        list.for_each(|&elem| elems.push(elem));

        assert_eq!(elems, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn list_with_comparator() {
        let list = LockBasedList::with_comparator(FnComparator(|lhs: &u8, rhs: &u8| rhs.cmp(lhs)));

        for i in 0..8 {
            assert!(list.add(i));
        }

        assert!(list.remove(&3));
        assert!(!list.remove(&3));
        assert!(!list.contains(&3));

        let mut elems = Vec::new();
        list.for_each(|&elem| elems.push(elem));

        assert_eq!(elems, [7, 6, 5, 4, 2, 1, 0]);
    }

    #[test]
    fn hash_set_basics() {
        let set = LockBasedHashSet::with_capacity(16);

        assert!(set.is_empty());
        assert!(set.add("a".to_string()));
        assert!(!set.add("a".to_string()));
        assert!(set.contains("a"));
        assert!(set.remove("a"));
        assert!(!set.contains("a"));
        assert!(set.is_empty());
    }
}
