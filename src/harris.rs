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

//! A lockfree sorted set that deletes nodes by marking their successor edge.


use crate::{
    atomic::AtomicDualState,
    comparator::{Comparator, NaturalOrder},
};

use std::{borrow::Borrow, cmp::Ordering, fmt};

use crossbeam_epoch::{self, Guard, Owned, Shared};
use crossbeam_utils::Backoff;

/// A lockfree concurrent sorted set implemented as a singly linked list.
///
/// `HarrisList` follows Tim Harris' design: a node is removed in two steps.
/// First it is logically deleted by setting the mark bit that shares a word
/// with its successor pointer; from that instant on it is no longer a member
/// of the set and no new node can be linked behind it. Later, any search that
/// walks past the marked node unlinks it from its predecessor and retires it
/// to the epoch collector.
///
/// Elements are kept in ascending order according to the set's
/// [`Comparator`]. [`new`] orders elements by their [`Ord`] implementation,
/// [`with_comparator`] accepts any other total order.
///
/// A failed unlink restarts the search from the head of the list, so heavy
/// contention on long lists degrades throughput. [`BacklinkList`] avoids these
/// restarts.
///
/// [`Comparator`]: ../comparator/trait.Comparator.html
/// [`new`]: #method.new
/// [`with_comparator`]: #method.with_comparator
/// [`Ord`]: https://doc.rust-lang.org/std/cmp/trait.Ord.html
/// [`BacklinkList`]: ../backlink/struct.BacklinkList.html
pub struct HarrisList<T, C = NaturalOrder> {
    head: AtomicDualState<Node<T>, bool>,
    comparator: C,
}

impl<T> HarrisList<T, NaturalOrder> {
    /// Creates an empty `HarrisList` ordered by `T`'s `Ord` implementation.
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<T, C> HarrisList<T, C> {
    /// Creates an empty `HarrisList` that orders its elements with
    /// `comparator`.
    pub fn with_comparator(comparator: C) -> Self {
        Self {
            head: AtomicDualState::null(false),
            comparator,
        }
    }

    /// Returns an iterator over the members of this set in ascending order.
    ///
    /// The iterator is weakly consistent: it never yields an element twice or
    /// out of order, but concurrent insertions and removals may or may not be
    /// reflected in what it yields.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        Iter {
            curr: self.head.get(guard).0,
            guard,
        }
    }

    /// Returns `true` if no members were observed in this set.
    pub fn is_empty(&self) -> bool {
        let guard = &crossbeam_epoch::pin();

        self.iter(guard).next().is_none()
    }
}

impl<T, C> HarrisList<T, C> {
    /// Inserts `elem` into the set.
    ///
    /// Returns `true` if `elem` was inserted and `false` if an equivalent
    /// element was already present, in which case `elem` is dropped.
    pub fn add(&self, elem: T) -> bool
    where
        C: Comparator<T>,
    {
        let guard = &crossbeam_epoch::pin();
        let backoff = Backoff::new();
        let mut node = Owned::new(Node::new(elem));

        loop {
            let window = self.search(&node.elem, guard);

            if window.found {
                return false;
            }

            node.next.set(window.curr, false);

            match window
                .prev
                .compare_and_set_owned(window.curr, node, false, false, guard)
            {
                Ok(_) => return true,
                Err((_, returned)) => node = returned,
            }

            backoff.spin();
        }
    }

    /// Returns `true` if an element equivalent to `key` is a member of the
    /// set.
    pub fn contains<Q: ?Sized>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let guard = &crossbeam_epoch::pin();
        let window = self.search(key, guard);

        window.found && !unsafe { window.curr.deref() }.next.state(guard)
    }

    /// Removes the element equivalent to `key` from the set.
    ///
    /// Returns `true` if this call logically deleted the element. The node
    /// stays linked until a later search unlinks it.
    pub fn remove<Q: ?Sized>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let guard = &crossbeam_epoch::pin();
        let backoff = Backoff::new();

        loop {
            let window = self.search(key, guard);

            if !window.found {
                return false;
            }

            let target = unsafe { window.curr.deref() };
            let (next, marked) = target.next.get(guard);

            if marked {
                return false;
            }

            match target.next.compare_and_set(next, next, false, true, guard) {
                Ok(_) => return true,
                Err(mismatch) if mismatch.state => return false,
                Err(_) => backoff.spin(),
            }
        }
    }

    /// Finds the first unmarked node whose element is not less than `key`,
    /// unlinking every marked node on the way.
    fn search<'g, Q: ?Sized>(&'g self, key: &Q, guard: &'g Guard) -> Window<'g, T>
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let backoff = Backoff::new();

        'restart: loop {
            let mut prev = &self.head;
            let mut curr = prev.get(guard).0;

            while let Some(curr_ref) = unsafe { curr.as_ref() } {
                let (next, marked) = curr_ref.next.get(guard);

                if marked {
                    match prev.compare_and_set(curr, next, false, false, guard) {
                        Ok(_) => unsafe { guard.defer_destroy(curr) },
                        Err(_) => {
                            backoff.spin();

                            continue 'restart;
                        }
                    }

                    curr = next;

                    continue;
                }

                match self.comparator.compare(curr_ref.elem.borrow(), key) {
                    Ordering::Less => {
                        prev = &curr_ref.next;
                        curr = next;
                    }
                    Ordering::Equal => {
                        return Window {
                            prev,
                            curr,
                            found: true,
                        }
                    }
                    Ordering::Greater => break,
                }
            }

            return Window {
                prev,
                curr,
                found: false,
            };
        }
    }
}

impl<T> Default for HarrisList<T, NaturalOrder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, C> fmt::Debug for HarrisList<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &crossbeam_epoch::pin();

        f.debug_set().entries(self.iter(guard)).finish()
    }
}

impl<T, C> Drop for HarrisList<T, C> {
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let mut curr = self.head.get(guard).0;

        while let Some(curr_ref) = unsafe { curr.as_ref() } {
            let next = curr_ref.next.get(guard).0;
            unsafe { drop(curr.into_owned()) };
            curr = next;
        }
    }
}

/// An ascending iterator over the members of a [`HarrisList`].
///
/// [`HarrisList`]: struct.HarrisList.html
pub struct Iter<'g, T> {
    curr: Shared<'g, Node<T>>,
    guard: &'g Guard,
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        while let Some(curr_ref) = unsafe { self.curr.as_ref() } {
            let (next, marked) = curr_ref.next.get(self.guard);
            self.curr = next;

            if !marked {
                return Some(&curr_ref.elem);
            }
        }

        None
    }
}

#[repr(align(8))]
struct Node<T> {
    elem: T,
    next: AtomicDualState<Node<T>, bool>,
}

impl<T> Node<T> {
    fn new(elem: T) -> Self {
        Self {
            elem,
            next: AtomicDualState::null(false),
        }
    }
}

struct Window<'g, T> {
    prev: &'g AtomicDualState<Node<T>, bool>,
    curr: Shared<'g, Node<T>>,
    found: bool,
}
