use crate::error::Result;
use crate::protocol::Payload;
use crate::session::DeviceSession;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Requests accepted by the communicator loop from its handles
pub(crate) enum Request {
    Login {
        serial: String,
        /// `None` uses the saved password
        password: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Command {
        serial: String,
        payload: Payload,
        /// Require a logged-in session even if the command itself does not
        privileged: bool,
        reply: oneshot::Sender<Result<Payload>>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<DeviceSession>>,
    },
    Session {
        serial: String,
        reply: oneshot::Sender<Option<DeviceSession>>,
    },
    LoadEvses {
        path: PathBuf,
        reply: oneshot::Sender<Result<usize>>,
    },
    SaveEvses {
        path: PathBuf,
        reply: oneshot::Sender<Result<usize>>,
    },
}
