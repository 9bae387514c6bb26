//! Thread capability masks.
//!
//! Every worker is tagged with one role mask at startup. The dispatcher only
//! hands a connection to a worker whose mask matches the action bound to the
//! connection's current state, so thread affinity can only change at the
//! defined hand-off points, never mid-action.

use std::fmt;

/// A bitset of worker roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadMask(u8);

impl ThreadMask {
    pub const NONE: ThreadMask = ThreadMask(0);
    /// Establishes outbound transports, including the TLS handshake.
    pub const CONNECT: ThreadMask = ThreadMask(1);
    /// Runs the request/response cycle.
    pub const WORKER: ThreadMask = ThreadMask(1 << 1);
    /// Parks idle connections and owns the timeout sweep.
    pub const KEEPALIVE: ThreadMask = ThreadMask(1 << 2);

    /// Map a configuration role name to its mask.
    pub fn from_role(role: &str) -> Option<ThreadMask> {
        match role {
            "connect" => Some(ThreadMask::CONNECT),
            "worker" => Some(ThreadMask::WORKER),
            "keepalive" => Some(ThreadMask::KEEPALIVE),
            _ => None,
        }
    }

    pub fn union(self, other: ThreadMask) -> ThreadMask {
        ThreadMask(self.0 | other.0)
    }

    /// True when the two masks share at least one role.
    pub fn intersects(self, other: ThreadMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ThreadMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for (bit, name) in [
            (ThreadMask::CONNECT, "connect"),
            (ThreadMask::WORKER, "worker"),
            (ThreadMask::KEEPALIVE, "keepalive"),
        ] {
            if self.intersects(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}
