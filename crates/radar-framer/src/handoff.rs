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

//! Frame handoff between the acquisition thread and the compute stage.
//!
//! A fixed pool of [`WindowedFrame`] buffers circulates between the two
//! sides. A buffer is always in exactly one place:
//!
//! ```text
//!            publish()                 recv()
//!   free pool ───────► ready queue ──────────► ReadyFrame (consumer)
//!       ▲                                          │
//!       └──────────────── drop ◄───────────────────┘
//! ```
//!
//! The producer writes only into buffers it took from the free pool and the
//! consumer reads only buffers it received, so a frame can never be
//! observed half-written. When the pool is empty the producer either waits
//! for the consumer or drops the new frame, depending on the
//! [`BackpressurePolicy`].

use std::ops::Deref;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio_util::sync::CancellationToken;

use crate::conditioner::WindowedFrame;
use crate::error::HandoffClosed;

/// Fewest buffers that still allow the producer to write while the consumer reads.
pub const MIN_SLOTS: usize = 2;

/// What the producer does when every buffer is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait until the consumer releases a buffer. No frame is lost.
    #[default]
    Block,
    /// Drop the frame that just completed and keep acquiring.
    DropNewest,
}

impl std::str::FromStr for BackpressurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Self::Block),
            "drop" | "drop_newest" => Ok(Self::DropNewest),
            other => Err(format!("unknown backpressure policy '{other}' (expected 'block' or 'drop')")),
        }
    }
}

/// Result of handing a frame to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    Delivered { sequence: u64 },
    Dropped { sequence: u64 },
    /// Shutdown was requested while waiting for a free buffer.
    Cancelled { sequence: u64 },
}

/// Producer-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffStats {
    pub delivered: u64,
    pub dropped: u64,
    /// Times the producer had to wait for a free buffer.
    pub stalls: u64,
}

type Buffer = Box<WindowedFrame>;

/// Create a handoff with `slots` preallocated `rows × cols` buffers.
///
/// `slots` is raised to [`MIN_SLOTS`] if smaller.
#[must_use]
pub fn handoff(
    slots: usize,
    policy: BackpressurePolicy,
    rows: usize,
    cols: usize,
) -> (FrameProducer, FrameConsumer) {
    let slots = slots.max(MIN_SLOTS);
    let (ready_tx, ready_rx) = mpsc::channel(slots);
    let (free_tx, free_rx) = mpsc::unbounded_channel();

    for _ in 0..slots {
        // Receiver is alive in this scope
        let _ = free_tx.send(Box::new(WindowedFrame::new(rows, cols)));
    }

    (
        FrameProducer {
            ready_tx,
            free_rx,
            policy,
            next_sequence: 0,
            stats: HandoffStats::default(),
        },
        FrameConsumer { ready_rx, free_tx },
    )
}

/// Acquisition side of the handoff.
///
/// [`publish`](Self::publish) may block, so it must be called from a plain
/// thread, never from inside an async task.
#[derive(Debug)]
pub struct FrameProducer {
    ready_tx: mpsc::Sender<Buffer>,
    free_rx: mpsc::UnboundedReceiver<Buffer>,
    policy: BackpressurePolicy,
    next_sequence: u64,
    stats: HandoffStats,
}

impl FrameProducer {
    #[must_use]
    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    #[must_use]
    pub fn stats(&self) -> HandoffStats {
        self.stats
    }

    /// Fill a free buffer with `fill` and signal the consumer once.
    ///
    /// The buffer is queued only after `fill` returns. Sequence numbers are
    /// assigned to every completed frame, so a dropped frame leaves a gap.
    /// Under [`BackpressurePolicy::Block`] the wait for a free buffer ends
    /// early with [`Published::Cancelled`] once `cancel` fires.
    pub fn publish<F>(&mut self, cancel: &CancellationToken, fill: F) -> Result<Published, HandoffClosed>
    where
        F: FnOnce(&mut WindowedFrame),
    {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let mut buffer = match self.free_rx.try_recv() {
            Ok(buffer) => buffer,
            Err(TryRecvError::Disconnected) => return Err(HandoffClosed),
            Err(TryRecvError::Empty) => match self.policy {
                BackpressurePolicy::Block => {
                    self.stats.stalls += 1;
                    debug!("Frame {sequence}: waiting for the consumer to release a buffer");
                    match self.wait_for_buffer(cancel) {
                        Wait::Buffer(buffer) => buffer,
                        Wait::Closed => return Err(HandoffClosed),
                        Wait::Cancelled => {
                            debug!("Frame {sequence} abandoned: shutdown requested");
                            return Ok(Published::Cancelled { sequence });
                        }
                    }
                }
                BackpressurePolicy::DropNewest => {
                    self.stats.dropped += 1;
                    warn!("Frame {sequence} dropped: consumer still busy with earlier frames");
                    return Ok(Published::Dropped { sequence });
                }
            },
        };

        buffer.sequence = sequence;
        fill(&mut buffer);

        match self.ready_tx.try_send(buffer) {
            Ok(()) => {
                self.stats.delivered += 1;
                Ok(Published::Delivered { sequence })
            }
            Err(TrySendError::Closed(_)) => Err(HandoffClosed),
            Err(TrySendError::Full(_)) => {
                unreachable!("ready queue holds every buffer, it cannot be full")
            }
        }
    }

    /// Block the calling thread until a buffer comes back, the consumer
    /// goes away or `cancel` fires.
    fn wait_for_buffer(&mut self, cancel: &CancellationToken) -> Wait {
        let runtime = match tokio::runtime::Builder::new_current_thread().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot wait for cancellation ({e}), waiting for the consumer only");
                return self.free_rx.blocking_recv().map_or(Wait::Closed, Wait::Buffer);
            }
        };

        let free_rx = &mut self.free_rx;
        runtime.block_on(async {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Wait::Cancelled,
                buffer = free_rx.recv() => buffer.map_or(Wait::Closed, Wait::Buffer),
            }
        })
    }
}

/// How a wait for a free buffer ended.
enum Wait {
    Buffer(Buffer),
    Closed,
    Cancelled,
}

/// Compute side of the handoff.
#[derive(Debug)]
pub struct FrameConsumer {
    ready_rx: mpsc::Receiver<Buffer>,
    free_tx: mpsc::UnboundedSender<Buffer>,
}

impl FrameConsumer {
    /// Wait for the next frame.
    ///
    /// Returns `None` once `cancel` fires or after the producer is gone and
    /// every queued frame has been taken.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Option<ReadyFrame> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            buffer = self.ready_rx.recv() => buffer.map(|buffer| self.wrap(buffer)),
        }
    }

    /// Take a queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<ReadyFrame> {
        self.ready_rx.try_recv().ok().map(|buffer| self.wrap(buffer))
    }

    /// Stop accepting frames. The producer sees [`HandoffClosed`] on its
    /// next publish; frames already queued can still be received.
    pub fn close(&mut self) {
        self.ready_rx.close();
    }

    fn wrap(&self, buffer: Buffer) -> ReadyFrame {
        ReadyFrame {
            buffer: Some(buffer),
            free_tx: self.free_tx.clone(),
        }
    }
}

/// A frame owned by the consumer. Dropping it returns the buffer to the producer.
#[derive(Debug)]
pub struct ReadyFrame {
    buffer: Option<Buffer>,
    free_tx: mpsc::UnboundedSender<Buffer>,
}

impl Deref for ReadyFrame {
    type Target = WindowedFrame;

    fn deref(&self) -> &WindowedFrame {
        self.buffer.as_deref().expect("buffer present until drop")
    }
}

impl Drop for ReadyFrame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            // Producer gone means nobody needs the buffer back
            let _ = self.free_tx.send(buffer);
        }
    }
}
