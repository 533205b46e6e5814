use crate::error::{EvseError, Result};
use crate::protocol::Payload;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Where the outcome of an in-flight request goes
pub(crate) enum Reply {
    Command(oneshot::Sender<Result<Payload>>),
    /// One attempt per serial; callers asking meanwhile join `waiters`.
    /// A re-login started by the poll tick has no waiters.
    Login {
        password: String,
        waiters: Vec<oneshot::Sender<Result<()>>>,
    },
}

impl Reply {
    pub(crate) fn fail(self, err: EvseError) {
        match self {
            Reply::Command(tx) => {
                let _ = tx.send(Err(err));
            }
            Reply::Login { waiters, .. } => {
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }
    }
}

pub(crate) struct Pending {
    pub serial: String,
    /// Name of the request, for timeout messages
    pub name: &'static str,
    pub expects: &'static [u16],
    pub deadline: Instant,
    pub reply: Reply,
}

/// In-flight requests in send order
///
/// A response resolves the oldest request for the same serial that lists
/// its code.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Vec<Pending>,
}

impl PendingTable {
    pub(crate) fn push(&mut self, pending: Pending) {
        self.entries.push(pending);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// The login attempt in flight for `serial`, if any
    pub(crate) fn login_mut(&mut self, serial: &str) -> Option<&mut Pending> {
        self.entries
            .iter_mut()
            .find(|p| p.serial == serial && matches!(p.reply, Reply::Login { .. }))
    }

    pub(crate) fn take_match(&mut self, serial: &str, code: u16) -> Option<Pending> {
        let idx = self
            .entries
            .iter()
            .position(|p| p.serial == serial && p.expects.contains(&code))?;
        Some(self.entries.remove(idx))
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|p| p.deadline).min()
    }

    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<Pending> {
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|p| p.deadline <= now);
        self.entries = live;
        expired
    }

    pub(crate) fn drain(&mut self) -> Vec<Pending> {
        std::mem::take(&mut self.entries)
    }
}
