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

//! Lockfree and fine-grained locking concurrent sets.
//!
//! The ordered sets in this crate build on each other:
//!
//! * [`HarrisList`] is a sorted linked list that deletes nodes by marking
//!   them and lets later searches unlink them.
//! * [`BacklinkList`] adds flagged predecessors and backlinks, so a thread
//!   that loses a race resumes from the nearest live node instead of the
//!   head of the list.
//! * [`SkipList`] stacks such lists into towers for logarithmic searches.
//!
//! [`StripedHashSet`], [`LockBasedList`] and [`LockBasedHashSet`] are
//! lock-based sets to compare them against. Every set implements
//! [`ConcurrentSet`], and the [`workload`] module drives any of them with
//! mixed operation sequences.
//!
//! Memory of removed nodes is reclaimed with [crossbeam-epoch].
//!
//! [`HarrisList`]: harris/struct.HarrisList.html
//! [`BacklinkList`]: backlink/struct.BacklinkList.html
//! [`SkipList`]: skiplist/struct.SkipList.html
//! [`StripedHashSet`]: striped/struct.StripedHashSet.html
//! [`LockBasedList`]: locked/struct.LockBasedList.html
//! [`LockBasedHashSet`]: locked/struct.LockBasedHashSet.html
//! [`ConcurrentSet`]: set/trait.ConcurrentSet.html
//! [`workload`]: workload/index.html
//! [crossbeam-epoch]: https://docs.rs/crossbeam-epoch

pub mod atomic;
pub mod backlink;
pub mod comparator;
pub mod error;
pub mod harris;
pub mod locked;
pub mod set;
pub mod skiplist;
pub mod striped;
pub mod workload;

#[cfg(test)]
mod test_util;

pub use backlink::BacklinkList;
pub use comparator::{Comparator, FnComparator, NaturalOrder};
pub use error::ConfigError;
pub use harris::HarrisList;
pub use locked::{LockBasedHashSet, LockBasedList};
pub use set::ConcurrentSet;
pub use skiplist::{SkipList, SkipListConfig};
pub use striped::StripedHashSet;
pub use workload::{SetKind, Workload};

/// Default hasher for the hash-based sets.
///
/// This is currently [aHash], a hashing algorithm designed around acceleration
/// by the [AES-NI] instruction set on x86 processors. aHash is not
/// cryptographically secure, but is fast and resistant to DoS attacks.
///
/// [aHash]: https://docs.rs/ahash
/// [AES-NI]: https://en.wikipedia.org/wiki/AES_instruction_set
pub type DefaultHashBuilder = ahash::RandomState;
