//! Protocol state table.
//!
//! States and their `(mask, action)` bindings are registered once when a
//! protocol is brought up and are immutable afterwards. The table is an
//! explicit tagged-variant registry rather than a mutable global map, so
//! concurrent dispatch never races protocol registration.
//!
//! The modeled HTTP client walks:
//!
//! ```text
//! free -> tls_handshake -> client_request -> client_body
//!      -> server_response -> server_body -> waiting
//!      -> (client_request | free)
//! ```
//!
//! `waiting` is the keepalive-idle, recyclable state; `free` is the true
//! initial/terminal state of a connection slot.

use crate::engine::mask::ThreadMask;
use crate::error::{Error, Result};

/// A named point in a connection's protocol lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateId {
    Free,
    TlsHandshake,
    ClientRequest,
    ClientBody,
    ServerResponse,
    ServerBody,
    Waiting,
}

impl StateId {
    pub fn name(self) -> &'static str {
        match self {
            StateId::Free => "free",
            StateId::TlsHandshake => "tls_handshake",
            StateId::ClientRequest => "client_request",
            StateId::ClientBody => "client_body",
            StateId::ServerResponse => "server_response",
            StateId::ServerBody => "server_body",
            StateId::Waiting => "waiting",
        }
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A stateless dispatch tag naming the function bound to a state.
///
/// The bound function receives `(thread context, connection)` and operates
/// on the connection only for the duration of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ConnectHost,
    ProcessTlsHandshake,
    ProcessNextRequest,
    WriteClientBody,
    ReadServerResponse,
    ReadServerBody,
    KeepaliveWait,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::ConnectHost => "connect_host",
            Action::ProcessTlsHandshake => "process_tls_handshake",
            Action::ProcessNextRequest => "process_next_request",
            Action::WriteClientBody => "write_client_body",
            Action::ReadServerResponse => "read_server_response",
            Action::ReadServerBody => "read_server_body",
            Action::KeepaliveWait => "keepalive_wait_connection",
        }
    }
}

/// How an action ended. Every action does exactly one of these.
#[derive(Debug)]
pub enum Flow {
    /// Keep the connection on the current worker and run the next action.
    Continue(Action),
    /// Hand the connection to a worker of another mask at this state
    /// boundary.
    Forward(ThreadMask, Action),
    /// Park the connection in the idle pool for keepalive reuse.
    Release,
    /// Close the connection and return its slot to the free list.
    Close,
}

/// One `(mask, action)` binding of a state.
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    pub mask: ThreadMask,
    pub action: Action,
}

#[derive(Debug)]
struct StateDef {
    id: StateId,
    bindings: Vec<Binding>,
}

/// Immutable registry of states built once at protocol registration.
#[derive(Debug)]
pub struct StateTable {
    states: Vec<StateDef>,
}

/// Builder used during protocol registration; no dynamic redefinition is
/// possible once [`build`](StateTableBuilder::build) has run.
#[derive(Debug, Default)]
pub struct StateTableBuilder {
    states: Vec<StateDef>,
}

impl StateTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a state with its bindings.
    ///
    /// Rejects duplicate states and bindings whose masks overlap: exactly
    /// one action must be selectable per (state, firing mask) pair, and an
    /// ambiguity here is a configuration defect, not a runtime condition.
    pub fn register_state(mut self, id: StateId, bindings: Vec<Binding>) -> Result<Self> {
        if self.states.iter().any(|s| s.id == id) {
            return Err(Error::DuplicateState(id.name()));
        }
        for (i, a) in bindings.iter().enumerate() {
            for b in &bindings[i + 1..] {
                if a.mask.intersects(b.mask) {
                    return Err(Error::AmbiguousBinding {
                        state: id.name(),
                        first: a.mask.to_string(),
                        second: b.mask.to_string(),
                    });
                }
            }
        }
        self.states.push(StateDef { id, bindings });
        Ok(self)
    }

    pub fn build(self) -> StateTable {
        StateTable { states: self.states }
    }
}

impl StateTable {
    /// Look up the action bound to `(state, firing mask)`.
    ///
    /// A miss indicates a mask/state coverage bug; callers log it and drop
    /// the event. Startup validation makes this unreachable in a correctly
    /// configured process.
    pub fn action_for(&self, state: StateId, firing: ThreadMask) -> Option<Action> {
        self.states
            .iter()
            .find(|s| s.id == state)?
            .bindings
            .iter()
            .find(|b| b.mask.intersects(firing))
            .map(|b| b.action)
    }

    /// Verify that every binding of every state is executable by at least
    /// one configured role. Unreachable states are a fatal configuration
    /// defect.
    pub fn validate_coverage(&self, available: ThreadMask) -> Result<()> {
        for state in &self.states {
            for binding in &state.bindings {
                if !binding.mask.intersects(available) {
                    return Err(Error::UncoveredState {
                        state: state.id.name(),
                        required: binding.mask.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
