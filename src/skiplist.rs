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

//! A lockfree skip list built from flag and backlink lists.

pub mod level;
mod node;
#[cfg(test)]
mod tests;

use self::{level::LevelGenerator, node::Node};

use crate::{
    atomic::Label,
    backlink::Bound,
    comparator::{Comparator, NaturalOrder},
    error::ConfigError,
};

use std::{borrow::Borrow, fmt, sync::atomic::Ordering};

use crossbeam_epoch::{self, Guard, Owned, Shared};
use crossbeam_utils::Backoff;
use tracing::{debug, trace};

/// The largest number of levels a [`SkipList`] may be configured with.
///
/// [`SkipList`]: struct.SkipList.html
pub const MAX_LEVELS: usize = 64;

/// Construction parameters for a [`SkipList`].
///
/// [`SkipList`]: struct.SkipList.html
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SkipListConfig {
    /// Number of levels, including the bottom one. Must be in
    /// `1..=MAX_LEVELS`.
    pub max_level: usize,
    /// Initial state of the tower height generator. Must not be zero.
    pub seed: u32,
}

impl SkipListConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_level == 0 || self.max_level > MAX_LEVELS {
            return Err(ConfigError::MaxLevel {
                actual: self.max_level,
                max: MAX_LEVELS,
            });
        }

        if self.seed == 0 {
            return Err(ConfigError::ZeroSeed);
        }

        Ok(())
    }
}

impl Default for SkipListConfig {
    fn default() -> Self {
        Self {
            max_level: 32,
            seed: 42,
        }
    }
}

/// A lockfree concurrent sorted set implemented as a skip list.
///
/// Every level of a `SkipList` is a [`BacklinkList`]-style list, and each
/// element is represented by a tower of nodes, one per level it appears on.
/// The tower's bottom node is its root; removing an element marks the root,
/// which removes the element from the set. Upper nodes of a removed tower are
/// treated as deleted by every search and unlinked by whichever search passes
/// them first.
///
/// Tower heights are drawn from a geometric distribution by a shared
/// [`LevelGenerator`], so searches take an expected logarithmic number of
/// steps.
///
/// [`BacklinkList`]: ../backlink/struct.BacklinkList.html
/// [`LevelGenerator`]: level/struct.LevelGenerator.html
pub struct SkipList<T, C = NaturalOrder> {
    heads: Box<[Node<T>]>,
    levels: LevelGenerator,
    comparator: C,
}

impl<T> SkipList<T, NaturalOrder> {
    /// Creates an empty `SkipList` ordered by `T`'s `Ord` implementation,
    /// using the default configuration.
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }

    /// Creates an empty `SkipList` ordered by `T`'s `Ord` implementation.
    pub fn with_config(config: SkipListConfig) -> Result<Self, ConfigError> {
        Self::with_config_and_comparator(config, NaturalOrder)
    }
}

impl<T, C> SkipList<T, C> {
    /// Creates an empty `SkipList` that orders its elements with
    /// `comparator`, using the default configuration.
    pub fn with_comparator(comparator: C) -> Self {
        Self::from_valid_config(SkipListConfig::default(), comparator)
    }

    /// Creates an empty `SkipList` that orders its elements with
    /// `comparator`.
    ///
    /// Returns an error if `config` is invalid.
    pub fn with_config_and_comparator(
        config: SkipListConfig,
        comparator: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self::from_valid_config(config, comparator))
    }

    fn from_valid_config(config: SkipListConfig, comparator: C) -> Self {
        let heads: Box<[Node<T>]> = (0..config.max_level).map(|_| Node::sentinel()).collect();

        debug_assert_eq!(heads.len(), config.max_level);

        for level in 1..heads.len() {
            let below = Shared::from(&heads[level - 1] as *const Node<T>);
            heads[level].down.store(below, Ordering::Relaxed);
        }

        debug!(
            max_level = config.max_level,
            seed = config.seed,
            "created skip list"
        );

        Self {
            heads,
            levels: LevelGenerator::new(config.seed, config.max_level),
            comparator,
        }
    }

    /// Returns the number of levels of this skip list.
    pub fn max_level(&self) -> usize {
        self.levels.max_level()
    }

    /// Returns an iterator over the members of this set in ascending order.
    ///
    /// The iterator walks the bottom level and is weakly consistent.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        Iter {
            curr: self.heads[0].next.get(guard).0,
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
    /// element was already present, in which case `elem` is dropped. The
    /// element is a member as soon as its bottom node is linked; the rest of
    /// its tower is built afterwards.
    pub fn add(&self, elem: T) -> bool
    where
        C: Comparator<T>,
    {
        let guard = &crossbeam_epoch::pin();
        let root = Owned::new(Node::root(elem)).into_shared(guard);
        let root_ref = unsafe { root.deref() };
        let elem = root_ref.key(guard);

        let (prev, next) = self.search_to_level(elem, 0, Bound::Through, guard);

        if self.insert_node(root, prev, next, guard).is_none() {
            unsafe { drop(root.into_owned()) };

            return false;
        }

        let height = self.levels.next_height();
        let mut below = root;

        for level in 1..height {
            if root_ref.is_marked(guard) {
                break;
            }

            let (prev, next) = self.search_to_level(elem, level, Bound::Through, guard);
            let node = Owned::new(Node::upper(root, below)).into_shared(guard);
            root_ref.acquire();

            match self.insert_node(node, prev, next, guard) {
                Some(prev) => {
                    root_ref.set_top(node);
                    below = node;

                    if root_ref.is_marked(guard) {
                        trace!(level, "tower removed while being built");
                        self.delete_node::<T>(prev, node, guard);

                        break;
                    }
                }
                None => {
                    trace!(level, "tower build stopped by an equivalent tower");

                    unsafe {
                        drop(node.into_owned());
                        Node::release(root, guard);
                    }

                    break;
                }
            }
        }

        unsafe { Node::release(root, guard) };

        true
    }

    /// Returns `true` if an element equivalent to `key` is a member of the
    /// set.
    pub fn contains<Q: ?Sized>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let guard = &crossbeam_epoch::pin();
        let (curr, _) = self.search_to_level(key, 0, Bound::Through, guard);

        self.holds(curr, key, guard) && !unsafe { curr.deref() }.is_marked(guard)
    }

    /// Removes the element equivalent to `key` from the set.
    ///
    /// Returns `true` if this call removed the element. Afterwards the upper
    /// levels are searched once more so that the rest of the tower is
    /// unlinked promptly.
    pub fn remove<Q: ?Sized>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let guard = &crossbeam_epoch::pin();
        let (prev, target) = self.search_to_level(key, 0, Bound::Below, guard);

        if !self.holds(target, key, guard) {
            return false;
        }

        if !self.delete_node::<Q>(prev, target, guard) {
            return false;
        }

        if self.max_level() > 1 {
            self.search_to_level(key, 1, Bound::Through, guard);
        }

        true
    }

    fn head(&self, level: usize) -> Shared<'_, Node<T>> {
        Shared::from(&self.heads[level] as *const Node<T>)
    }

    /// Returns the highest level that has at least one node, or zero.
    fn upper_head_level(&self, guard: &Guard) -> usize {
        (1..self.heads.len())
            .rev()
            .find(|&level| !self.heads[level].next.get(guard).0.is_null())
            .unwrap_or(0)
    }

    /// Returns `true` if `node` belongs to a tower whose element is
    /// equivalent to `key`.
    fn holds<Q: ?Sized>(&self, node: Shared<'_, Node<T>>, key: &Q, guard: &Guard) -> bool
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        match unsafe { node.as_ref() }.and_then(|node| node.elem(guard)) {
            Some(elem) => self.comparator.equivalent(elem.borrow(), key),
            None => false,
        }
    }

    /// Descends from the highest populated level to `level`, returning the
    /// window found there.
    fn search_to_level<'g, Q: ?Sized>(
        &'g self,
        key: &Q,
        level: usize,
        bound: Bound,
        guard: &'g Guard,
    ) -> (Shared<'g, Node<T>>, Shared<'g, Node<T>>)
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let mut curr_level = self.upper_head_level(guard).max(level);
        let mut curr = self.head(curr_level);

        loop {
            let (prev, next) = self.search_right(key, curr, bound, guard);

            if curr_level == level {
                return (prev, next);
            }

            curr = unsafe { prev.deref() }.down.load(Ordering::Acquire, guard);
            curr_level -= 1;
        }
    }

    /// Walks right along one level, deleting nodes of removed towers that it
    /// would otherwise pass.
    fn search_right<'g, Q: ?Sized>(
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
            if !bound.admits(self.comparator.compare(next_ref.key(guard).borrow(), key)) {
                break;
            }

            if next_ref.is_deleted(guard) {
                let (prev, outcome) = self.try_flag::<Q>(curr, next, guard);
                curr = prev;

                if outcome != FlagOutcome::Gone {
                    self.help_flagged(curr, next, guard);
                }

                next = unsafe { curr.deref() }.next.get(guard).0;

                continue;
            }

            curr = next;
            next = next_ref.next.get(guard).0;
        }

        (curr, next)
    }

    /// Links `new` between `prev` and `next`, searching again from the
    /// closest live ancestor whenever the window changes.
    ///
    /// Returns the predecessor `new` was linked behind, or `None` if an
    /// equivalent node was found first.
    fn insert_node<'g>(
        &self,
        new: Shared<'g, Node<T>>,
        mut prev: Shared<'g, Node<T>>,
        mut next: Shared<'g, Node<T>>,
        guard: &'g Guard,
    ) -> Option<Shared<'g, Node<T>>>
    where
        C: Comparator<T>,
    {
        let new_ref = unsafe { new.deref() };
        let key = new_ref.key(guard);
        let backoff = Backoff::new();

        loop {
            if self.holds(prev, key, guard) {
                return None;
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
                    Ok(_) => return Some(prev),
                    Err(mismatch) => {
                        if mismatch.state == Label::Flag {
                            self.help_flagged(prev, mismatch.current, guard);
                        }

                        prev = self.live_ancestor(prev, guard);
                    }
                }
            }

            backoff.spin();
            (prev, next) = self.search_right(key, prev, Bound::Through, guard);
        }
    }

    /// Deletes `target` from the level it shares with `prev`.
    ///
    /// Returns `true` if this call flagged `target`'s predecessor.
    fn delete_node<'g, Q: ?Sized>(
        &self,
        prev: Shared<'g, Node<T>>,
        target: Shared<'g, Node<T>>,
        guard: &'g Guard,
    ) -> bool
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let (prev, outcome) = self.try_flag::<Q>(prev, target, guard);

        if outcome != FlagOutcome::Gone {
            self.help_flagged(prev, target, guard);
        }

        outcome == FlagOutcome::Won
    }

    fn try_flag<'g, Q: ?Sized>(
        &self,
        mut prev: Shared<'g, Node<T>>,
        target: Shared<'g, Node<T>>,
        guard: &'g Guard,
    ) -> (Shared<'g, Node<T>>, FlagOutcome)
    where
        T: Borrow<Q>,
        C: Comparator<Q>,
    {
        let key: &Q = unsafe { target.deref() }.key(guard).borrow();
        let backoff = Backoff::new();

        loop {
            let prev_ref = unsafe { prev.deref() };

            if prev_ref.next.get(guard) == (target, Label::Flag) {
                return (prev, FlagOutcome::Helping);
            }

            match prev_ref
                .next
                .compare_and_set(target, target, Label::None, Label::Flag, guard)
            {
                Ok(_) => return (prev, FlagOutcome::Won),
                Err(mismatch) if mismatch.current == target && mismatch.state == Label::Flag => {
                    return (prev, FlagOutcome::Helping)
                }
                Err(mismatch) if mismatch.state == Label::Flag => {
                    self.help_flagged(prev, mismatch.current, guard);
                }
                Err(_) => (),
            }

            prev = self.live_ancestor(prev, guard);

            let (found_prev, found) = self.search_right(key, prev, Bound::Below, guard);

            if found != target {
                return (found_prev, FlagOutcome::Gone);
            }

            prev = found_prev;
            backoff.spin();
        }
    }

    fn help_flagged<'g>(
        &self,
        prev: Shared<'g, Node<T>>,
        target: Shared<'g, Node<T>>,
        guard: &'g Guard,
    ) {
        let target_ref = unsafe { target.deref() };
        target_ref.backlink.store(prev, Ordering::Release);

        if !target_ref.is_marked(guard) {
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

    /// Unlinks the marked `target` from its flagged predecessor `prev`. The
    /// thread that succeeds gives up the reference `target` held on its
    /// tower.
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
            unsafe { Node::release(Node::tower_root(target, guard), guard) };
        }
    }

    fn live_ancestor<'g>(
        &self,
        mut node: Shared<'g, Node<T>>,
        guard: &'g Guard,
    ) -> Shared<'g, Node<T>> {
        loop {
            let node_ref = unsafe { node.deref() };

            if !node_ref.is_marked(guard) {
                return node;
            }

            node = node_ref.backlink.load(Ordering::Acquire, guard);
        }
    }

    /// Returns the elements of the live towers linked at `level`.
    #[cfg(test)]
    fn level_elems<'g>(&'g self, level: usize, guard: &'g Guard) -> Vec<&'g T> {
        let mut elems = Vec::new();
        let mut curr = self.heads[level].next.get(guard).0;

        while let Some(curr_ref) = unsafe { curr.as_ref() } {
            if !curr_ref.is_deleted(guard) {
                elems.push(curr_ref.key(guard));
            }

            curr = curr_ref.next.get(guard).0;
        }

        elems
    }
}

impl<T> Default for SkipList<T, NaturalOrder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, C> fmt::Debug for SkipList<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &crossbeam_epoch::pin();

        f.debug_set().entries(self.iter(guard)).finish()
    }
}

impl<T, C> Drop for SkipList<T, C> {
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let mut roots = Vec::new();

        for head in self.heads.iter() {
            let mut curr = head.next.get(guard).0;

            while let Some(curr_ref) = unsafe { curr.as_ref() } {
                roots.push(Node::tower_root(curr, guard));
                curr = curr_ref.next.get(guard).0;
            }
        }

        for root in roots {
            unsafe { Node::release_unsynchronized(root, guard) };
        }
    }
}

/// An ascending iterator over the members of a [`SkipList`].
///
/// [`SkipList`]: struct.SkipList.html
pub struct Iter<'g, T> {
    curr: Shared<'g, Node<T>>,
    guard: &'g Guard,
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        while let Some(curr_ref) = unsafe { self.curr.as_ref() } {
            self.curr = curr_ref.next.get(self.guard).0;

            if !curr_ref.is_marked(self.guard) {
                return curr_ref.elem(self.guard);
            }
        }

        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FlagOutcome {
    /// This call flagged the predecessor.
    Won,
    /// Another thread flagged the predecessor first.
    Helping,
    /// The target was no longer linked.
    Gone,
}
