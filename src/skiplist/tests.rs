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

use super::*;

use crate::{
    comparator::FnComparator,
    test_util::{self, DropNotifier, NoisyDropper},
};

use std::{
    collections::BTreeSet,
    iter,
    sync::{
        atomic::{AtomicIsize, AtomicUsize, Ordering as AtomicOrdering},
        Arc, Barrier,
    },
    thread::{self, JoinHandle},
};

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

fn assert_towers_consistent<T: Ord + fmt::Debug, C>(set: &SkipList<T, C>) {
    let guard = &crossbeam_epoch::pin();
    let bottom: BTreeSet<_> = set.level_elems(0, guard).into_iter().collect();

    for level in 0..set.max_level() {
        let elems = set.level_elems(level, guard);

        assert!(elems.windows(2).all(|pair| pair[0] < pair[1]));

        for elem in elems {
            assert!(bottom.contains(elem), "{:?} missing from level 0", elem);
        }
    }
}

fn assert_upper_levels_empty<T, C>(set: &SkipList<T, C>) {
    let guard = &crossbeam_epoch::pin();

    assert_eq!(set.upper_head_level(guard), 0);

    for level in 1..set.max_level() {
        assert!(set.heads[level].next.get(guard).0.is_null());
    }
}

#[test]
fn single_element_lifecycle() {
    let set = SkipList::new();

    assert!(set.add(5));
    assert!(!set.add(5));
    assert!(set.contains(&5));
    assert!(set.remove(&5));
    assert!(!set.remove(&5));
    assert!(!set.contains(&5));
    assert!(set.is_empty());
    assert_upper_levels_empty(&set);
}

#[test]
fn config_validation() {
    let config = SkipListConfig {
        max_level: 0,
        ..Default::default()
    };
    assert_eq!(
        SkipList::<i32>::with_config(config).err(),
        Some(ConfigError::MaxLevel {
            actual: 0,
            max: MAX_LEVELS
        })
    );

    let config = SkipListConfig {
        max_level: MAX_LEVELS + 1,
        ..Default::default()
    };
    assert!(SkipList::<i32>::with_config(config).is_err());

    let config = SkipListConfig {
        seed: 0,
        ..Default::default()
    };
    assert_eq!(
        SkipList::<i32>::with_config(config).err(),
        Some(ConfigError::ZeroSeed)
    );

    let set = SkipList::<i32>::with_config(SkipListConfig {
        max_level: MAX_LEVELS,
        seed: 1,
    })
    .unwrap();
    assert_eq!(set.max_level(), MAX_LEVELS);
}

#[test]
fn single_level() {
    let set = SkipList::with_config(SkipListConfig {
        max_level: 1,
        seed: 42,
    })
    .unwrap();

    for i in (0..64).rev() {
        assert!(set.add(i));
    }

    for i in (0..64).step_by(3) {
        assert!(set.remove(&i));
    }

    let guard = &crossbeam_epoch::pin();
    let elems: Vec<_> = set.iter(guard).copied().collect();
    let expected: Vec<_> = (0..64).filter(|i| i % 3 != 0).collect();

    assert_eq!(elems, expected);
}

#[test]
fn insertion_orders() {
    const MAX_VALUE: u32 = 1024;

    let mut shuffled: Vec<_> = (0..MAX_VALUE).collect();
    shuffled.shuffle(&mut StdRng::seed_from_u64(42));

    let orders = [
        (0..MAX_VALUE).collect::<Vec<_>>(),
        (0..MAX_VALUE).rev().collect(),
        shuffled,
    ];

    for order in &orders {
        let set = SkipList::new();

        for &value in order {
            assert!(set.add(value));
        }

        for &value in order {
            assert!(!set.add(value));
            assert!(set.contains(&value));
        }

        let guard = &crossbeam_epoch::pin();
        let elems: Vec<_> = set.iter(guard).copied().collect();

        assert_eq!(elems, (0..MAX_VALUE).collect::<Vec<_>>());
        assert!(set.upper_head_level(guard) > 0);
        assert_towers_consistent(&set);
    }
}

#[test]
fn removal_clears_upper_levels() {
    const MAX_VALUE: u32 = 1024;

    let set = SkipList::new();

    for i in 0..MAX_VALUE {
        assert!(set.add(i));
    }

    for i in (0..MAX_VALUE).rev() {
        assert!(set.remove(&i));
        assert!(!set.contains(&i));
    }

    assert!(set.is_empty());
    assert_upper_levels_empty(&set);
}

#[test]
fn custom_comparator() {
    let set = SkipList::with_comparator(FnComparator(|lhs: &i32, rhs: &i32| rhs.cmp(lhs)));

    for i in 0..128 {
        assert!(set.add(i));
    }

    assert!(set.remove(&64));
    assert!(!set.contains(&64));

    let guard = &crossbeam_epoch::pin();
    let elems: Vec<_> = set.iter(guard).copied().collect();
    let expected: Vec<_> = (0..128).rev().filter(|&i| i != 64).collect();

    assert_eq!(elems, expected);
}

#[test]
fn parity_split() {
    const MAX_VALUE: u32 = 42;

    let set = Arc::new(SkipList::new());
    let barrier = Arc::new(Barrier::new(2));

    let threads: Vec<_> = (0..2)
        .map(|parity| {
            let set = set.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                for i in (parity..MAX_VALUE).step_by(2) {
                    assert!(set.add(i));
                }
            })
        })
        .collect();

    for result in threads.into_iter().map(JoinHandle::join) {
        assert!(result.is_ok());
    }

    let guard = &crossbeam_epoch::pin();
    let elems: Vec<_> = set.iter(guard).copied().collect();

    assert_eq!(elems, (0..MAX_VALUE).collect::<Vec<_>>());
    assert_towers_consistent(&set);
}

#[test]
fn concurrent_insertion() {
    const MAX_VALUE: u32 = 512;
    const NUM_THREADS: usize = 16;
    const MAX_INSERTED_VALUE: u32 = (NUM_THREADS as u32) * MAX_VALUE;

    let set = Arc::new(SkipList::new());
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let set = set.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                for j in (0..MAX_VALUE).map(|j| j * NUM_THREADS as u32 + i as u32) {
                    assert!(set.add(j));
                }
            })
        })
        .collect();

    for result in threads.into_iter().map(JoinHandle::join) {
        assert!(result.is_ok());
    }

    let guard = &crossbeam_epoch::pin();
    let elems: Vec<_> = set.iter(guard).copied().collect();

    assert_eq!(elems, (0..MAX_INSERTED_VALUE).collect::<Vec<_>>());
    assert_towers_consistent(&set);
}

#[test]
fn concurrent_overlapped_removal() {
    const MAX_VALUE: u32 = 1024;
    const NUM_THREADS: usize = 8;

    let set = Arc::new(SkipList::new());

    for i in 0..MAX_VALUE {
        assert!(set.add(i));
    }

    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let removed = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let set = set.clone();
            let barrier = barrier.clone();
            let removed = removed.clone();

            thread::spawn(move || {
                barrier.wait();

                for i in 0..MAX_VALUE {
                    if set.remove(&i) {
                        removed.fetch_add(1, AtomicOrdering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for result in threads.into_iter().map(JoinHandle::join) {
        assert!(result.is_ok());
    }

    assert_eq!(removed.load(AtomicOrdering::Relaxed), MAX_VALUE as usize);
    assert!(set.is_empty());

    assert!(!set.contains(&u32::MAX));
    assert_upper_levels_empty(&set);
}

#[test]
fn concurrent_insertion_and_removal() {
    const MAX_VALUE: i32 = 256;
    const NUM_THREADS: usize = 8;

    let set = Arc::new(SkipList::new());
    let barrier = Arc::new(Barrier::new(NUM_THREADS * 2));

    let insert_threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let set = set.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                for j in (0..MAX_VALUE).map(|j| j + (i as i32 * MAX_VALUE)) {
                    assert!(set.add(j));
                }
            })
        })
        .collect();

    let remove_threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let set = set.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                for j in (0..MAX_VALUE).map(|j| j + (i as i32 * MAX_VALUE)) {
                    while !set.remove(&j) {
                        thread::yield_now();
                    }

                    assert!(!set.contains(&j));
                }
            })
        })
        .collect();

    for result in insert_threads
        .into_iter()
        .chain(remove_threads.into_iter())
        .map(JoinHandle::join)
    {
        assert!(result.is_ok());
    }

    assert!(set.is_empty());
    assert!(!set.contains(&i32::MAX));
    assert_upper_levels_empty(&set);
}

#[test]
fn concurrent_churn() {
    const KEY_RANGE: u32 = 64;
    const NUM_OPERATIONS: usize = 8192;
    const NUM_THREADS: u64 = 8;

    let set = Arc::new(SkipList::new());
    let barrier = Arc::new(Barrier::new(NUM_THREADS as usize));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let set = set.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(i);

                barrier.wait();

                for _ in 0..NUM_OPERATIONS {
                    let key = rng.random_range(0..KEY_RANGE);

                    if rng.random_bool(0.5) {
                        set.add(key);
                    } else {
                        set.remove(&key);
                    }
                }
            })
        })
        .collect();

    for result in threads.into_iter().map(JoinHandle::join) {
        assert!(result.is_ok());
    }

    assert_towers_consistent(&set);

    for key in 0..KEY_RANGE {
        set.remove(&key);
    }

    assert!(set.is_empty());
    assert!(!set.contains(&u32::MAX));
    assert_upper_levels_empty(&set);
}

#[test]
fn concurrent_random_operations() {
    const KEY_RANGE: u32 = 256;
    const NUM_OPERATIONS: usize = 4096;
    const NUM_THREADS: u32 = 8;

    let set = Arc::new(SkipList::new());
    let barrier = Arc::new(Barrier::new(NUM_THREADS as usize));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let set = set.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(u64::from(i));
                let mut model = BTreeSet::new();

                barrier.wait();

                for _ in 0..NUM_OPERATIONS {
                    let key = rng.random_range(0..KEY_RANGE) * NUM_THREADS + i;

                    match rng.random_range(0..3) {
                        0 => assert_eq!(set.add(key), model.insert(key)),
                        1 => assert_eq!(set.remove(&key), model.remove(&key)),
                        _ => assert_eq!(set.contains(&key), model.contains(&key)),
                    }
                }

                model
            })
        })
        .collect();

    let mut expected = BTreeSet::new();

    for result in threads.into_iter().map(JoinHandle::join) {
        expected.extend(result.unwrap());
    }

    let guard = &crossbeam_epoch::pin();
    let elems: Vec<_> = set.iter(guard).copied().collect();

    assert_eq!(elems, expected.into_iter().collect::<Vec<_>>());
    assert_towers_consistent(&set);
}

fn contended_churn(config: SkipListConfig) {
    const KEY_RANGE: u32 = 8;
    const NUM_OPERATIONS: usize = 8192;
    const NUM_THREADS: u64 = 8;

    let set = Arc::new(SkipList::with_config(config).unwrap());
    let balances: Arc<Vec<_>> = Arc::new((0..KEY_RANGE).map(|_| AtomicIsize::new(0)).collect());
    let barrier = Arc::new(Barrier::new(NUM_THREADS as usize));

    let threads: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let set = set.clone();
            let balances = balances.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(i);
                let mut parents = Vec::new();

                barrier.wait();

                for _ in 0..NUM_OPERATIONS {
                    let key = rng.random_range(0..KEY_RANGE);
                    let balance = &balances[key as usize];

                    match rng.random_range(0..3) {
                        0 => {
                            let parent = Arc::new(DropNotifier::new());

                            if set.add(NoisyDropper::new(parent.clone(), key)) {
                                balance.fetch_add(1, AtomicOrdering::Relaxed);
                            }

                            parents.push(parent);
                        }
                        1 => {
                            if set.remove(&key) {
                                balance.fetch_sub(1, AtomicOrdering::Relaxed);
                            }
                        }
                        _ => {
                            set.contains(&key);
                        }
                    }
                }

                parents
            })
        })
        .collect();

    let parents: Vec<_> = threads
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();

    let members: BTreeSet<u32> = {
        let guard = &crossbeam_epoch::pin();

        set.iter(guard).map(|elem| elem.elem).collect()
    };

    for key in 0..KEY_RANGE {
        let balance = balances[key as usize].load(AtomicOrdering::Relaxed);

        assert!(balance == 0 || balance == 1, "key {} has balance {}", key, balance);
        assert_eq!(balance == 1, members.contains(&key));
    }

    assert!(!set.contains(&KEY_RANGE));
    assert_towers_consistent(&set);
    test_util::run_deferred();

    let live = parents.iter().filter(|parent| !parent.was_dropped()).count();
    assert_eq!(live, members.len());

    drop(set);

    for parent in &parents {
        assert!(parent.was_dropped());
    }
}

#[test]
fn concurrent_contended_churn() {
    contended_churn(SkipListConfig::default());
}

#[test]
fn concurrent_contended_churn_short_towers() {
    contended_churn(SkipListConfig {
        max_level: 3,
        seed: 7,
    });
}

#[test]
fn drop_removed_element() {
    let parent = Arc::new(DropNotifier::new());

    {
        let set = SkipList::new();

        assert!(set.add(NoisyDropper::new(parent.clone(), 0)));
        assert!(!set.add(NoisyDropper::new(Arc::new(DropNotifier::new()), 0)));
        assert!(set.remove(&0));

        test_util::run_deferred();

        assert!(parent.was_dropped());
    }
}

#[test]
fn drop_many_elements() {
    const NUM_VALUES: usize = 1 << 10;

    let parents: Vec<_> = iter::repeat_with(|| Arc::new(DropNotifier::new()))
        .take(NUM_VALUES)
        .collect();

    {
        let set = SkipList::new();

        for (i, parent) in parents.iter().enumerate() {
            assert!(set.add(NoisyDropper::new(parent.clone(), i)));
        }

        for i in (0..NUM_VALUES).step_by(2) {
            assert!(set.remove(&i));
        }

        test_util::run_deferred();

        for (i, parent) in parents.iter().enumerate() {
            assert_eq!(parent.was_dropped(), i % 2 == 0);
        }
    }

    for parent in &parents {
        assert!(parent.was_dropped());
    }
}
