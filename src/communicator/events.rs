use crate::error::Result;
use crate::logging::get_logger;
use crate::session::DeviceSession;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Lifecycle transition of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Added,
    Changed,
    Removed,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Added, EventKind::Changed, EventKind::Removed];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Added => f.write_str("ADDED"),
            EventKind::Changed => f.write_str("CHANGED"),
            EventKind::Removed => f.write_str("REMOVED"),
        }
    }
}

/// Snapshot of a session at the moment of a transition
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEvent {
    pub kind: EventKind,
    pub session: DeviceSession,
    pub at: DateTime<Utc>,
}

impl DeviceEvent {
    pub fn new(kind: EventKind, session: &DeviceSession) -> Self {
        Self {
            kind,
            session: session.clone(),
            at: Utc::now(),
        }
    }
}

/// Run `handler` for every event whose kind is in `kinds`
///
/// The receiver is subscribed before this returns. Handler errors are
/// logged and the listener keeps going.
pub(crate) fn spawn_listener<F, Fut>(
    mut rx: broadcast::Receiver<DeviceEvent>,
    kinds: Vec<EventKind>,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(DeviceEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let logger = get_logger("listener");
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if kinds.contains(&event.kind) => {
                    let serial = event.session.serial.clone();
                    let kind = event.kind;
                    if let Err(e) = handler(event).await {
                        logger
                            .for_serial(&serial)
                            .warn(&format!("Listener failed on {} event: {}", kind, e));
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    logger.warn(&format!("Listener fell behind, skipped {} event(s)", n));
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
