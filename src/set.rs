// MIT License
//
// Copyright (c) 2019 Gregory Meyer
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

//! The contract shared by every set in this crate.

use crate::{
    backlink::BacklinkList,
    comparator::Comparator,
    harris::HarrisList,
    locked::{LockBasedHashSet, LockBasedList},
    skiplist::SkipList,
    striped::StripedHashSet,
};

use std::hash::{BuildHasher, Hash};

/// A set of elements that can be shared between threads.
///
/// This trait is object safe, so heterogeneous implementations can be driven
/// through a `Box<dyn ConcurrentSet<T>>`. The inherent methods of each set
/// are more flexible: their lookups accept any borrowed form of `T`.
pub trait ConcurrentSet<T>: Send + Sync {
    /// Inserts `elem`, returning `false` if an equivalent element was already
    /// present.
    fn add(&self, elem: T) -> bool;

    fn contains(&self, elem: &T) -> bool;

    /// Removes the element equivalent to `elem`, returning `true` if this
    /// call removed it.
    fn remove(&self, elem: &T) -> bool;

    /// Calls `f` on every member. Ordered sets visit members in ascending
    /// order.
    fn for_each(&self, f: &mut dyn FnMut(&T));

    fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut elems = Vec::new();
        self.for_each(&mut |elem| elems.push(elem.clone()));

        elems
    }

    fn is_empty(&self) -> bool {
        let mut empty = true;
        self.for_each(&mut |_| empty = false);

        empty
    }
}

impl<T: Send + Sync, C: Comparator<T> + Send + Sync> ConcurrentSet<T> for HarrisList<T, C> {
    fn add(&self, elem: T) -> bool {
        HarrisList::add(self, elem)
    }

    fn contains(&self, elem: &T) -> bool {
        HarrisList::contains(self, elem)
    }

    fn remove(&self, elem: &T) -> bool {
        HarrisList::remove(self, elem)
    }

    fn for_each(&self, f: &mut dyn FnMut(&T)) {
        let guard = &crossbeam_epoch::pin();
        self.iter(guard).for_each(f);
    }
}

impl<T: Send + Sync, C: Comparator<T> + Send + Sync> ConcurrentSet<T> for BacklinkList<T, C> {
    fn add(&self, elem: T) -> bool {
        BacklinkList::add(self, elem)
    }

    fn contains(&self, elem: &T) -> bool {
        BacklinkList::contains(self, elem)
    }

    fn remove(&self, elem: &T) -> bool {
        BacklinkList::remove(self, elem)
    }

    fn for_each(&self, f: &mut dyn FnMut(&T)) {
        let guard = &crossbeam_epoch::pin();
        self.iter(guard).for_each(f);
    }
}

impl<T: Send + Sync, C: Comparator<T> + Send + Sync> ConcurrentSet<T> for SkipList<T, C> {
    fn add(&self, elem: T) -> bool {
        SkipList::add(self, elem)
    }

    fn contains(&self, elem: &T) -> bool {
        SkipList::contains(self, elem)
    }

    fn remove(&self, elem: &T) -> bool {
        SkipList::remove(self, elem)
    }

    fn for_each(&self, f: &mut dyn FnMut(&T)) {
        let guard = &crossbeam_epoch::pin();
        self.iter(guard).for_each(f);
    }
}

impl<T: Send, C: Comparator<T> + Send + Sync> ConcurrentSet<T> for LockBasedList<T, C> {
    fn add(&self, elem: T) -> bool {
        LockBasedList::add(self, elem)
    }

    fn contains(&self, elem: &T) -> bool {
        LockBasedList::contains(self, elem)
    }

    fn remove(&self, elem: &T) -> bool {
        LockBasedList::remove(self, elem)
    }

    fn for_each(&self, f: &mut dyn FnMut(&T)) {
        LockBasedList::for_each(self, f);
    }

    fn is_empty(&self) -> bool {
        LockBasedList::is_empty(self)
    }
}

impl<T, S> ConcurrentSet<T> for LockBasedHashSet<T, S>
where
    T: Hash + Eq + Send,
    S: BuildHasher + Send,
{
    fn add(&self, elem: T) -> bool {
        LockBasedHashSet::add(self, elem)
    }

    fn contains(&self, elem: &T) -> bool {
        LockBasedHashSet::contains(self, elem)
    }

    fn remove(&self, elem: &T) -> bool {
        LockBasedHashSet::remove(self, elem)
    }

    fn for_each(&self, f: &mut dyn FnMut(&T)) {
        LockBasedHashSet::for_each(self, f);
    }

    fn is_empty(&self) -> bool {
        LockBasedHashSet::is_empty(self)
    }
}

impl<T, S> ConcurrentSet<T> for StripedHashSet<T, S>
where
    T: Hash + Eq + Send,
    S: BuildHasher + Send + Sync,
{
    fn add(&self, elem: T) -> bool {
        StripedHashSet::add(self, elem)
    }

    fn contains(&self, elem: &T) -> bool {
        StripedHashSet::contains(self, elem)
    }

    fn remove(&self, elem: &T) -> bool {
        StripedHashSet::remove(self, elem)
    }

    fn for_each(&self, f: &mut dyn FnMut(&T)) {
        StripedHashSet::for_each(self, f);
    }
}
