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

//! Atomically updatable (pointer, state) pairs.
//!
//! Every lockfree structure in this crate links its nodes through an
//! [`AtomicDualState`]: a successor pointer and a small state tag that must
//! always change together. The tag is stored in the low bits of the pointer
//! left free by the node's alignment, so both halves are read and replaced
//! by a single word-sized atomic operation.

use std::{fmt, marker::PhantomData, mem, sync::atomic::Ordering};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

/// A state tag that can be packed into the low bits of a pointer.
///
/// Implementations must map every value to a tag of at most two bits and
/// must round-trip through [`into_tag`] and [`from_tag`].
///
/// [`into_tag`]: #tymethod.into_tag
/// [`from_tag`]: #tymethod.from_tag
pub trait StateTag: Copy + Eq + fmt::Debug {
    fn into_tag(self) -> usize;

    fn from_tag(tag: usize) -> Self;
}

impl StateTag for bool {
    fn into_tag(self) -> usize {
        self as usize
    }

    fn from_tag(tag: usize) -> Self {
        tag & MARK_BIT != 0
    }
}

/// Deletion lifecycle of a list node, as seen on its successor edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Label {
    /// The node is live and its successor edge is unlocked.
    None,
    /// The node has committed to deleting its immediate successor.
    Flag,
    /// The node itself is logically deleted.
    Mark,
}

impl StateTag for Label {
    fn into_tag(self) -> usize {
        match self {
            Label::None => 0,
            Label::Flag => FLAG_TAG,
            Label::Mark => MARK_TAG,
        }
    }

    fn from_tag(tag: usize) -> Self {
        debug_assert_ne!(tag & (FLAG_TAG | MARK_TAG), FLAG_TAG | MARK_TAG);

        if tag & MARK_TAG != 0 {
            Label::Mark
        } else if tag & FLAG_TAG != 0 {
            Label::Flag
        } else {
            Label::None
        }
    }
}

/// The pair observed by a failed [`compare_and_set`].
///
/// [`compare_and_set`]: struct.AtomicDualState.html#method.compare_and_set
pub struct StateMismatch<'g, P, S> {
    pub current: Shared<'g, P>,
    pub state: S,
}

impl<P, S: fmt::Debug> fmt::Debug for StateMismatch<'_, P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMismatch")
            .field("current", &self.current.as_raw())
            .field("state", &self.state)
            .finish()
    }
}

/// A pointer and a state tag that are compared and swapped as one unit.
///
/// Pointers handed to an `AtomicDualState` must not carry a tag of their own
/// and must point to types aligned to at least four bytes.
pub struct AtomicDualState<P, S> {
    inner: Atomic<P>,
    state: PhantomData<S>,
}

impl<P, S: StateTag> AtomicDualState<P, S> {
    /// Creates a pair with a null pointer and the given state.
    pub fn null(state: S) -> Self {
        Self::new(Shared::null(), state)
    }

    pub fn new(ptr: Shared<'_, P>, state: S) -> Self {
        debug_assert!(mem::align_of::<P>() >= 4);
        debug_assert_eq!(ptr.tag(), 0);

        Self {
            inner: Atomic::from(ptr.with_tag(state.into_tag())),
            state: PhantomData,
        }
    }

    /// Returns a consistent snapshot of the pointer and its state.
    pub fn get<'g>(&self, guard: &'g Guard) -> (Shared<'g, P>, S) {
        let current = self.inner.load(Ordering::Acquire, guard);

        (current.with_tag(0), S::from_tag(current.tag()))
    }

    /// Returns only the state half of the pair.
    pub fn state(&self, guard: &Guard) -> S {
        self.get(guard).1
    }

    /// Unconditionally replaces both halves of the pair.
    pub fn set(&self, ptr: Shared<'_, P>, state: S) {
        debug_assert_eq!(ptr.tag(), 0);

        self.inner
            .store(ptr.with_tag(state.into_tag()), Ordering::Release);
    }

    /// Replaces the pair with `(new_ptr, new_state)` iff it currently holds
    /// `(expected_ptr, expected_state)`.
    ///
    /// On success the newly stored pointer is returned. On failure nothing is
    /// written and the pair that was observed instead is returned.
    pub fn compare_and_set<'g>(
        &self,
        expected_ptr: Shared<'_, P>,
        new_ptr: Shared<'_, P>,
        expected_state: S,
        new_state: S,
        guard: &'g Guard,
    ) -> Result<Shared<'g, P>, StateMismatch<'g, P, S>> {
        debug_assert_eq!(new_ptr.tag(), 0);

        self.inner
            .compare_exchange(
                expected_ptr.with_tag(expected_state.into_tag()),
                new_ptr.with_tag(new_state.into_tag()),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            )
            .map(|stored| stored.with_tag(0))
            .map_err(|e| StateMismatch {
                current: e.current.with_tag(0),
                state: S::from_tag(e.current.tag()),
            })
    }

    /// Like [`compare_and_set`], but publishes a freshly allocated pointer.
    ///
    /// If the exchange fails, ownership of `new_ptr` is handed back to the
    /// caller alongside the observed pair.
    ///
    /// [`compare_and_set`]: #method.compare_and_set
    pub fn compare_and_set_owned<'g>(
        &self,
        expected_ptr: Shared<'_, P>,
        new_ptr: Owned<P>,
        expected_state: S,
        new_state: S,
        guard: &'g Guard,
    ) -> Result<Shared<'g, P>, (StateMismatch<'g, P, S>, Owned<P>)> {
        self.inner
            .compare_exchange(
                expected_ptr.with_tag(expected_state.into_tag()),
                new_ptr.with_tag(new_state.into_tag()),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            )
            .map(|stored| stored.with_tag(0))
            .map_err(|e| {
                (
                    StateMismatch {
                        current: e.current.with_tag(0),
                        state: S::from_tag(e.current.tag()),
                    },
                    e.new.with_tag(0),
                )
            })
    }
}

impl<P, S: StateTag + fmt::Debug> fmt::Debug for AtomicDualState<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &crossbeam_epoch::pin();
        let (ptr, state) = self.get(guard);

        f.debug_tuple("AtomicDualState")
            .field(&ptr.as_raw())
            .field(&state)
            .finish()
    }
}

const MARK_BIT: usize = 0b01; // set on a mark-bit list node once it is logically deleted
const FLAG_TAG: usize = 0b01; // set on a node that is deleting its successor
const MARK_TAG: usize = 0b10; // set on a node that is logically deleted
