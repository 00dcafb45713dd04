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

use crate::atomic::{AtomicDualState, Label};

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{Atomic, Guard, Shared};

/// One level of a skip list tower, or one of the head sentinels.
///
/// The level-0 node of a tower is its root: it owns the element and counts
/// the references that keep the tower alive. Upper nodes read the element
/// through `root` and reach the level below through `down`.
///
/// A tower is freed as a whole. Its root starts with two references, one for
/// the level-0 link and one for the thread building the tower, and gains one
/// for every upper node linked into a level. Unlinking any node of the tower
/// drops a reference; when the last one goes, every node from `top` down to
/// the root is retired together, so `down` and `root` never dangle for a
/// thread that reached any node of the tower.
#[repr(align(8))]
pub(super) struct Node<T> {
    elem: Option<T>,
    root: Atomic<Node<T>>,
    pub(super) down: Atomic<Node<T>>,
    pub(super) next: AtomicDualState<Node<T>, Label>,
    pub(super) backlink: Atomic<Node<T>>,
    top: Atomic<Node<T>>,
    links: AtomicUsize,
}

impl<T> Node<T> {
    pub(super) fn sentinel() -> Self {
        Self {
            elem: None,
            root: Atomic::null(),
            down: Atomic::null(),
            next: AtomicDualState::null(Label::None),
            backlink: Atomic::null(),
            top: Atomic::null(),
            links: AtomicUsize::new(0),
        }
    }

    pub(super) fn root(elem: T) -> Self {
        Self {
            elem: Some(elem),
            root: Atomic::null(),
            down: Atomic::null(),
            next: AtomicDualState::null(Label::None),
            backlink: Atomic::null(),
            top: Atomic::null(),
            links: AtomicUsize::new(2),
        }
    }

    pub(super) fn upper(root: Shared<'_, Node<T>>, down: Shared<'_, Node<T>>) -> Self {
        Self {
            elem: None,
            root: Atomic::from(root),
            down: Atomic::from(down),
            next: AtomicDualState::null(Label::None),
            backlink: Atomic::null(),
            top: Atomic::null(),
            links: AtomicUsize::new(0),
        }
    }

    /// Returns the root of this node's tower, which is `this` for roots and
    /// sentinels.
    pub(super) fn tower_root<'g>(this: Shared<'g, Self>, guard: &'g Guard) -> Shared<'g, Self> {
        let root = unsafe { this.deref() }.root.load(Ordering::Acquire, guard);

        if root.is_null() {
            this
        } else {
            root
        }
    }

    /// Returns the element of this node's tower, or `None` for a sentinel.
    pub(super) fn elem<'g>(&'g self, guard: &'g Guard) -> Option<&'g T> {
        match unsafe { self.root.load(Ordering::Acquire, guard).as_ref() } {
            Some(root) => root.elem.as_ref(),
            None => self.elem.as_ref(),
        }
    }

    /// Like [`elem`], for nodes known not to be sentinels.
    ///
    /// [`elem`]: #method.elem
    pub(super) fn key<'g>(&'g self, guard: &'g Guard) -> &'g T {
        match self.elem(guard) {
            Some(elem) => elem,
            None => unreachable!("sentinels are never compared"),
        }
    }

    /// Returns `true` if the element of this node's tower was removed.
    pub(super) fn is_deleted(&self, guard: &Guard) -> bool {
        match unsafe { self.root.load(Ordering::Acquire, guard).as_ref() } {
            Some(root) => root.is_marked(guard),
            None => self.is_marked(guard),
        }
    }

    pub(super) fn is_marked(&self, guard: &Guard) -> bool {
        self.next.state(guard) == Label::Mark
    }

    /// Adds a reference for an upper node about to be linked.
    pub(super) fn acquire(&self) {
        debug_assert!(self.elem.is_some());

        self.links.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `node` as the highest node ever linked for this tower.
    pub(super) fn set_top(&self, node: Shared<'_, Node<T>>) {
        self.top.store(node, Ordering::Release);
    }

    /// Drops one reference to the tower rooted at `root`, retiring the
    /// whole tower if it was the last one.
    ///
    /// # Safety
    ///
    /// `root` must be a tower root and the caller must own the reference it
    /// gives up.
    pub(super) unsafe fn release(root: Shared<'_, Self>, guard: &Guard) {
        if root.deref().links.fetch_sub(1, Ordering::AcqRel) == 1 {
            Self::retire_tower(root, guard);
        }
    }

    /// Like [`release`], but frees the tower immediately.
    ///
    /// # Safety
    ///
    /// No other thread may access the tower.
    ///
    /// [`release`]: #method.release
    pub(super) unsafe fn release_unsynchronized(root: Shared<'_, Self>, guard: &Guard) {
        if root.deref().links.fetch_sub(1, Ordering::AcqRel) == 1 {
            for node in Self::tower_nodes(root, guard) {
                drop(node.into_owned());
            }
        }
    }

    unsafe fn retire_tower(root: Shared<'_, Self>, guard: &Guard) {
        for node in Self::tower_nodes(root, guard) {
            guard.defer_destroy(node);
        }
    }

    /// Collects every node of a tower, from its top down to its root.
    unsafe fn tower_nodes<'g>(root: Shared<'g, Self>, guard: &'g Guard) -> Vec<Shared<'g, Self>> {
        let mut nodes = Vec::new();
        let mut curr = root.deref().top.load(Ordering::Acquire, guard);

        if curr.is_null() {
            curr = root;
        }

        while let Some(curr_ref) = curr.as_ref() {
            nodes.push(curr);
            curr = curr_ref.down.load(Ordering::Acquire, guard);
        }

        debug_assert_eq!(nodes.last(), Some(&root));

        nodes
    }
}
