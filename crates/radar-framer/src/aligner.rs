// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte alignment of the acquisition stream.
//!
//! The FIFO carries 8-byte words:
//! ```text
//! +-------+-------+-------------------+
//! | I(BE) | Q(BE) | auxiliary (4 B)   |
//! +-------+-------+-------------------+
//!  0     1 2     3 4                 7
//! ```
//! Chunks are cut at arbitrary byte positions, so a word can straddle any
//! number of chunks. The aligner keeps the position inside the current word
//! and the bytes of a half-received I/Q group between calls.

/// Bytes per transport word.
pub const WORD_LEN: usize = 8;

/// Bytes of the word that carry I and Q.
pub const GROUP_LEN: usize = 4;

/// One I/Q sample as delivered by the ADC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    pub i: i16,
    pub q: i16,
}

impl Sample {
    #[must_use]
    pub const fn new(i: i16, q: i16) -> Self {
        Self { i, q }
    }

    /// Decode a group of two big-endian `i16` values, I first.
    #[must_use]
    pub const fn from_be_bytes(group: [u8; GROUP_LEN]) -> Self {
        Self {
            i: i16::from_be_bytes([group[0], group[1]]),
            q: i16::from_be_bytes([group[2], group[3]]),
        }
    }

    /// Encode into a full transport word with a zero auxiliary field.
    #[must_use]
    pub fn to_word(self) -> [u8; WORD_LEN] {
        let mut word = [0u8; WORD_LEN];
        word[..2].copy_from_slice(&self.i.to_be_bytes());
        word[2..4].copy_from_slice(&self.q.to_be_bytes());
        word
    }

    /// Number of components (0, 1 or 2) sitting on an ADC rail.
    #[must_use]
    pub fn saturated_components(self) -> u32 {
        u32::from(is_rail(self.i)) + u32::from(is_rail(self.q))
    }
}

fn is_rail(value: i16) -> bool {
    value == i16::MAX || value == i16::MIN
}

/// Reassembles I/Q groups from a chunked byte stream.
#[derive(Debug, Clone, Default)]
pub struct ByteAligner {
    /// Position inside the current word, `0..WORD_LEN`.
    offset: usize,
    /// First bytes of the current word while it is incomplete.
    group: [u8; GROUP_LEN],
    /// Warm-up bytes still to be discarded before alignment starts.
    skip: usize,
}

impl ByteAligner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte position inside the current word.
    #[must_use]
    pub fn byte_offset(&self) -> usize {
        self.offset
    }

    /// Warm-up bytes not yet discarded.
    #[must_use]
    pub fn pending_skip(&self) -> usize {
        self.skip
    }

    /// Start a new sweep: drop any partial word and arm the warm-up discard.
    pub fn begin_sweep(&mut self, warmup_samples: usize) {
        self.offset = 0;
        self.skip = warmup_samples * WORD_LEN;
    }

    /// Drop any partial word and cancel a pending warm-up discard.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.skip = 0;
    }

    /// Consume a chunk, calling `emit` for every completed group.
    ///
    /// Returns the number of groups emitted. A group is complete once its
    /// fourth byte has arrived; the auxiliary half of the word is skipped
    /// even when it only arrives with a later chunk.
    pub fn feed<F>(&mut self, chunk: &[u8], mut emit: F) -> usize
    where
        F: FnMut(Sample),
    {
        let skipped = self.skip.min(chunk.len());
        self.skip -= skipped;

        let mut emitted = 0;
        for &byte in &chunk[skipped..] {
            if self.offset < GROUP_LEN {
                self.group[self.offset] = byte;
            }
            self.offset += 1;
            if self.offset == GROUP_LEN {
                emit(Sample::from_be_bytes(self.group));
                emitted += 1;
            }
            self.offset %= WORD_LEN;
        }

        debug_assert!(self.offset < WORD_LEN, "byte offset escaped the word");
        emitted
    }
}
