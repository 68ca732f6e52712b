/*! Graph: runs a set of blocks until none of them have more work.

Generalized from the teacher's single-threaded `Graph` (not the
multithreaded `MTGraph`): §5 requires the pipeline to be single-threaded
and cooperative, consuming and fully processing one frame at a time, so
blocks are polled round-robin on the caller's thread rather than each
getting its own OS thread.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::block::{Block, BlockRet};
use crate::error::Result;

/// A cheaply-clonable flag used to request the pipeline shut down.
///
/// Set from a signal handler (e.g. `ctrlc`); checked by the frame source
/// between reads, realizing §5's "cancellation is exterior".
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a new, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True if cancellation has been requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A graph of blocks, run to completion on a single thread.
pub struct Graph {
    blocks: Vec<Box<dyn Block>>,
    cancel: CancellationToken,
}

impl Graph {
    /// Create a new, empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Add a block to the graph. Blocks are polled in the order added.
    pub fn add(&mut self, b: Box<dyn Block>) {
        self.blocks.push(b);
    }

    /// Get a cancellation token that can be used to stop [`Graph::run`].
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one round: call `work()` on every block once.
    ///
    /// Returns `true` if every block reported [`BlockRet::EOF`] or
    /// [`BlockRet::Noop`] (i.e. nothing happened and nothing ever will).
    pub fn step(&mut self) -> Result<bool> {
        let mut all_done = true;
        for b in &mut self.blocks {
            if b.work()? == BlockRet::Ok {
                all_done = false;
            }
        }
        Ok(all_done)
    }

    /// Run the graph until every block is done or cancellation is
    /// requested.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_canceled() {
                return Ok(());
            }
            if self.step()? {
                return Ok(());
            }
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
