//! Worker pools and cross-mask routing.
//!
//! Each configured role gets a pool of long-running worker tasks, every
//! member with a private work queue. A work item carries the connection
//! itself, so dispatch responsibility transfers with the item and at most
//! one worker ever touches a connection at a time.
//!
//! Routing is `conn_id % pool_size`: a connection always lands on the same
//! member of a pool, which preserves per-connection ordering. There is no
//! ordering guarantee between different connections or different masks.

use tokio::sync::mpsc;

use crate::engine::mask::ThreadMask;
use crate::engine::pool::PoolEntry;
use crate::engine::state::Action;
use crate::error::{Error, Result};

/// A unit of dispatch: one connection and the action to run on it.
pub struct WorkItem<C> {
    pub conn: Box<C>,
    pub action: Action,
}

/// Senders for one role's members.
pub struct WorkerPool<C> {
    pub mask: ThreadMask,
    senders: Vec<mpsc::UnboundedSender<WorkItem<C>>>,
}

impl<C> WorkerPool<C> {
    pub fn new(mask: ThreadMask, members: usize) -> (Self, Vec<mpsc::UnboundedReceiver<WorkItem<C>>>) {
        let mut senders = Vec::with_capacity(members);
        let mut receivers = Vec::with_capacity(members);
        for _ in 0..members {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }
        (Self { mask, senders }, receivers)
    }
}

/// Routes work items to the pool matching a target mask.
pub struct Router<C> {
    pools: Vec<WorkerPool<C>>,
}

impl<C: PoolEntry> Router<C> {
    pub fn new(pools: Vec<WorkerPool<C>>) -> Self {
        Self { pools }
    }

    /// Union of all configured role masks.
    pub fn available_mask(&self) -> ThreadMask {
        self.pools
            .iter()
            .fold(ThreadMask::NONE, |acc, p| acc.union(p.mask))
    }

    /// Enqueue `item` for a member of the pool covering `target`.
    ///
    /// Delivery order across pools is unspecified; a single connection's
    /// items are never reordered relative to each other because the member
    /// choice is a pure function of the connection id.
    pub fn forward(&self, target: ThreadMask, item: WorkItem<C>) -> Result<()> {
        let pool = self
            .pools
            .iter()
            .find(|p| p.mask.intersects(target))
            .ok_or_else(|| Error::UncoveredState {
                state: "forward",
                required: target.to_string(),
            })?;
        let member = item.conn.id() % pool.senders.len();
        pool.senders[member].send(item).map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "worker pool shut down",
            ))
        })
    }
}
