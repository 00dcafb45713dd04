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

//! Tower heights for the skip list.

use std::sync::atomic::{AtomicU32, Ordering};

/// A lockfree xorshift generator that draws skip list tower heights.
///
/// Heights follow a geometric distribution: a tower reaches level `k` with
/// probability `2^-k`, up to the configured maximum. The generator state is a
/// single word advanced with a compare-and-set loop, so every thread draws
/// from the same sequence.
#[derive(Debug)]
pub struct LevelGenerator {
    state: AtomicU32,
    max_level: usize,
}

impl LevelGenerator {
    /// Creates a generator seeded with `seed` that never returns heights
    /// greater than `max_level`.
    ///
    /// A zero seed would make xorshift emit zeros forever; callers validate
    /// it before getting here.
    pub fn new(seed: u32, max_level: usize) -> Self {
        debug_assert_ne!(seed, 0);
        debug_assert!(max_level > 0);

        Self {
            state: AtomicU32::new(seed),
            max_level,
        }
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Draws a tower height in `1..=max_level`.
    pub fn next_height(&self) -> usize {
        let mut current = self.state.load(Ordering::Relaxed);

        loop {
            let next = xorshift(current);

            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return self.height_of(next),
                Err(actual) => current = actual,
            }
        }
    }

    fn height_of(&self, word: u32) -> usize {
        (word.trailing_ones() as usize + 1).min(self.max_level)
    }
}

fn xorshift(mut x: u32) -> u32 {
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;

    x
}
