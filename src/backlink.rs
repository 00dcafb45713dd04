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

//! A lockfree sorted set whose deleted nodes point back to their predecessor.


use crate::{
    atomic::{AtomicDualState, Label},
    comparator::{Comparator, NaturalOrder},
};

use std::{borrow::Borrow, cmp::Ordering, fmt, sync::atomic};

use crossbeam_epoch::{self, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;

/// A lockfree concurrent sorted set implemented as a singly linked list with
/// backlinks.
///
/// `BacklinkList` implements the list of Fomitchev and Ruppert. Removing a node
/// takes three steps, each of which any thread may complete on behalf of
/// another:
///
/// 1. The predecessor is *flagged*, which freezes its successor edge.
/// 2. The node stores a *backlink* to the flagged predecessor and is
///    *marked*, which logically deletes it.
/// 3. The predecessor's edge is swung past the node and the flag is cleared.
///
/// A thread whose compare-and-set fails because its anchor node was deleted
/// follows backlinks to the closest live ancestor and resumes from there
/// instead of restarting at the head of the list.
///
/// Insertion is linearized at the compare-and-set that links the new node and
/// removal at the compare-and-set that flags its predecessor; exactly one of
/// any number of racing removals of the same element reports success.
pub struct BacklinkList<T, C = NaturalOrder> {
    head: Box<Node<T>>,
    comparator: C,
}

impl<T> BacklinkList<T, NaturalOrder> {
    /// Creates an empty `BacklinkList` ordered by `T`'s `Ord` implementation.
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<T, C> BacklinkList<T, C> {
    /// Creates an empty `BacklinkList` that orders its elements with
    /// `comparator`.
    pub fn with_comparator(comparator: C) -> Self {
        Self {
            head: Box::new(Node::sentinel()),
            comparator,
        }
    }

    /// Returns an iterator over the members of this set in ascending order.
    ///
    /// Like [`HarrisList::iter`], the iterator is weakly consistent.
    ///
    /// [`HarrisList::iter`]: ../harris/struct.HarrisList.html#method.iter
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        Iter {
            curr: self.head.next.get(guard).0,
            guard,
        }
    }

    /// Returns `true` if no members were observed in this set.
    pub fn is_empty(&self) -> bool {
        let guard = &crossbeam_epoch::pin();

        self.iter(guard).next().is_none()
    }

    /// Inserts `elem` into the set.
    ///
    /// Returns `true` if `elem` was inserted and `false` if an equivalent
    /// element was already present, in which case `elem` is dropped.
    pub fn add(&self, elem: T) -> bool
    where
        C: Comparator<T>,
    {
        let guard = &crossbeam_epoch::pin();
        let new = Owned::new(Node::new(elem)).into_shared(guard);
        let new_ref = unsafe { new.deref() };
        let elem = new_ref.elem();

        let backoff = Backoff::new();
        let (mut prev, mut next) = self.search_from(elem, self.head(), Bound::Through, guard);

        loop {
            if self.holds(prev, elem) {
                unsafe { drop(new.into_owned()) };

                return false;
            }

            let prev_ref = unsafe { prev.deref() };
            let (prev_next, prev_label) = prev_ref.next.get(guard);

            if prev_label == Label::Flag {
                self.help_flagged(prev, prev_next, guard);
            } else {
                new_ref.next.set(next, Label::None);

                match prev_ref
                    .next
                    .compare_and_set(next, new, Label::None, Label::None, guard)
                {
                    Ok(_) => return true,
                    Err(mismatch) => {
                        if mismatch.state == Label::Flag {
                            self.help_flagged(prev, mismatch.current, guard);
                        }

                        prev = self.live_ancestor(prev, guard);
                    }
                }
            }

            backoff.spin();
            (prev, next) = self.search_from(elem, prev, Bound::Through, guard);
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
        let (curr, _) = self.search_from(key, self.head(), Bound::Through, guard);

        self.holds(curr, key) && unsafe { curr.deref() }.next.state(guard) != Label::Mark
    }

    /// Removes the element equivalent to `key` from the set.
    ///
    /// Returns `true` if this call flagged the element's predecessor, and
    /// therefore was the one to remove it.
    pub fn remove<Q: ?Sized>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let guard = &crossbeam_epoch::pin();
        let (prev, target) = self.search_from(key, self.head(), Bound::Below, guard);

        if !self.holds(target, key) {
            return false;
        }

        let (prev, flagged) = self.try_flag(prev, target, key, guard);

        if !prev.is_null() {
            self.help_flagged(prev, target, guard);
        }

        flagged
    }

    fn head(&self) -> Shared<'_, Node<T>> {
        Shared::from(&*self.head as *const Node<T>)
    }

    /// Returns `true` if `node` is an element node equivalent to `key`.
    fn holds<Q: ?Sized>(&self, node: Shared<'_, Node<T>>, key: &Q) -> bool
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        match unsafe { node.as_ref() }.and_then(|node| node.elem.as_ref()) {
            Some(elem) => self.comparator.equivalent(elem.borrow(), key),
            None => false,
        }
    }

    /// Walks forward from `curr` while the next node's element is below
    /// `key` (or equivalent to it, with `Bound::Through`).
    ///
    /// Returns the last node passed and its successor at that moment. Marked
    /// successors of flagged nodes are unlinked on the way.
    fn search_from<'g, Q: ?Sized>(
        &self,
        key: &Q,
        mut curr: Shared<'g, Node<T>>,
        bound: Bound,
        guard: &'g Guard,
    ) -> (Shared<'g, Node<T>>, Shared<'g, Node<T>>)
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let mut next = unsafe { curr.deref() }.next.get(guard).0;

        while let Some(next_ref) = unsafe { next.as_ref() } {
            if !bound.admits(self.comparator.compare(next_ref.elem().borrow(), key)) {
                break;
            }

            let (curr_next, curr_label) = unsafe { curr.deref() }.next.get(guard);

            if next_ref.next.state(guard) == Label::Mark
                && (curr_label != Label::Mark || curr_next != next)
            {
                if curr_next == next {
                    self.help_marked(curr, next, guard);
                }

                next = unsafe { curr.deref() }.next.get(guard).0;

                continue;
            }

            curr = next;
            next = next_ref.next.get(guard).0;
        }

        (curr, next)
    }

    /// Flags the edge from `prev` to `target`.
    ///
    /// Returns the node found to be flagged for `target`, or null if `target`
    /// was removed in the meantime, and whether this call set the flag.
    fn try_flag<'g, Q: ?Sized>(
        &self,
        mut prev: Shared<'g, Node<T>>,
        target: Shared<'g, Node<T>>,
        key: &Q,
        guard: &'g Guard,
    ) -> (Shared<'g, Node<T>>, bool)
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let backoff = Backoff::new();

        loop {
            let prev_ref = unsafe { prev.deref() };

            if prev_ref.next.get(guard) == (target, Label::Flag) {
                return (prev, false);
            }

            match prev_ref
                .next
                .compare_and_set(target, target, Label::None, Label::Flag, guard)
            {
                Ok(_) => return (prev, true),
                Err(mismatch) if mismatch.current == target && mismatch.state == Label::Flag => {
                    return (prev, false)
                }
                Err(mismatch) if mismatch.state == Label::Flag => {
                    self.help_flagged(prev, mismatch.current, guard);
                }
                Err(_) => (),
            }

            prev = self.live_ancestor(prev, guard);

            let (found_prev, found) = self.search_from(key, prev, Bound::Below, guard);

            if found != target {
                return (Shared::null(), false);
            }

            prev = found_prev;
            backoff.spin();
        }
    }

    /// Finishes the removal of `target`, whose predecessor `prev` is flagged.
    fn help_flagged<'g>(
        &self,
        prev: Shared<'g, Node<T>>,
        target: Shared<'g, Node<T>>,
        guard: &'g Guard,
    ) {
        let target_ref = unsafe { target.deref() };
        target_ref.backlink.store(prev, atomic::Ordering::Release);

        if target_ref.next.state(guard) != Label::Mark {
            self.try_mark(target, guard);
        }

        self.help_marked(prev, target, guard);
    }

    fn try_mark<'g>(&self, target: Shared<'g, Node<T>>, guard: &'g Guard) {
        let target_ref = unsafe { target.deref() };
        let backoff = Backoff::new();

        loop {
            let (next, label) = target_ref.next.get(guard);

            match label {
                Label::Mark => return,
                Label::Flag => self.help_flagged(target, next, guard),
                Label::None => {
                    match target_ref
                        .next
                        .compare_and_set(next, next, Label::None, Label::Mark, guard)
                    {
                        Ok(_) => return,
                        Err(mismatch) if mismatch.state == Label::Flag => {
                            self.help_flagged(target, mismatch.current, guard)
                        }
                        Err(_) => backoff.spin(),
                    }
                }
            }
        }
    }

    /// Unlinks the marked `target` from its flagged predecessor `prev`.
    ///
    /// Only the thread whose compare-and-set succeeds retires `target`.
    fn help_marked<'g>(
        &self,
        prev: Shared<'g, Node<T>>,
        target: Shared<'g, Node<T>>,
        guard: &'g Guard,
    ) {
        let next = unsafe { target.deref() }.next.get(guard).0;

        if unsafe { prev.deref() }
            .next
            .compare_and_set(target, next, Label::Flag, Label::None, guard)
            .is_ok()
        {
            unsafe { guard.defer_destroy(target) };
        }
    }

    /// Follows backlinks from `node` until reaching a node that is not marked.
    fn live_ancestor<'g>(
        &self,
        mut node: Shared<'g, Node<T>>,
        guard: &'g Guard,
    ) -> Shared<'g, Node<T>> {
        loop {
            let node_ref = unsafe { node.deref() };

            if node_ref.next.state(guard) != Label::Mark {
                return node;
            }

            node = node_ref.backlink.load(atomic::Ordering::Acquire, guard);
        }
    }
}

impl<T> Default for BacklinkList<T, NaturalOrder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, C> fmt::Debug for BacklinkList<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &crossbeam_epoch::pin();

        f.debug_set().entries(self.iter(guard)).finish()
    }
}

impl<T, C> Drop for BacklinkList<T, C> {
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let mut curr = self.head.next.get(guard).0;

        while let Some(curr_ref) = unsafe { curr.as_ref() } {
            let next = curr_ref.next.get(guard).0;
            unsafe { drop(curr.into_owned()) };
            curr = next;
        }
    }
}

/// An ascending iterator over the members of a [`BacklinkList`].
///
/// [`BacklinkList`]: struct.BacklinkList.html
pub struct Iter<'g, T> {
    curr: Shared<'g, Node<T>>,
    guard: &'g Guard,
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        while let Some(curr_ref) = unsafe { self.curr.as_ref() } {
            let (next, label) = curr_ref.next.get(self.guard);
            self.curr = next;

            if label != Label::Mark {
                return curr_ref.elem.as_ref();
            }
        }

        None
    }
}

/// How far a search advances past nodes equivalent to its key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Bound {
    /// Stop before the first node not less than the key.
    Below,
    /// Stop before the first node greater than the key.
    Through,
}

impl Bound {
    pub(crate) fn admits(self, ordering: Ordering) -> bool {
        match self {
            Bound::Below => ordering == Ordering::Less,
            Bound::Through => ordering != Ordering::Greater,
        }
    }
}

#[repr(align(8))]
struct Node<T> {
    elem: Option<T>,
    next: AtomicDualState<Node<T>, Label>,
    backlink: Atomic<Node<T>>,
}

impl<T> Node<T> {
    fn new(elem: T) -> Self {
        Self {
            elem: Some(elem),
            next: AtomicDualState::null(Label::None),
            backlink: Atomic::null(),
        }
    }

    fn sentinel() -> Self {
        Self {
            elem: None,
            next: AtomicDualState::null(Label::None),
            backlink: Atomic::null(),
        }
    }

    fn elem(&self) -> &T {
        match &self.elem {
            Some(elem) => elem,
            None => unreachable!("the head of a list has no element"),
        }
    }
}
