//! Load tickets: per-loader sequence numbers plus a cancellation handle.

use std::fmt;

use tokio_util::sync::CancellationToken;

/// Sequence number of one loader invocation. Monotonic within one loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(u64);

impl TicketId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket-{}", self.0)
    }
}

/// A ticket is *current* iff its id equals the loader's latest issued id.
/// Superseded tickets are discarded, never retried or merged.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    pub id: TicketId,
    pub attempt: u32,
    pub token: CancellationToken,
}

impl LoadTicket {
    pub fn new(id: TicketId, attempt: u32) -> Self {
        Self {
            id,
            attempt,
            token: CancellationToken::new(),
        }
    }
}
