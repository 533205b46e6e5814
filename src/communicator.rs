//! Communicator: owns the transport and every device session
//!
//! A single task runs the loop in `runtime.rs`. It consumes inbound
//! packets, handle requests, the liveness sweep, the charge record poll
//! and request deadlines, so session mutation never happens concurrently. [`Communicator`] is the
//! cheap handle callers use: command methods post a request carrying a
//! oneshot reply and await it while the loop keeps serving other traffic.

use crate::config::Config;
use crate::dump::{DatagramDump, DumpRecord};
use crate::error::{EvseError, Result};
use crate::logging::get_logger;
use crate::persistence::EvseStore;
use crate::protocol::charge::{ChargeStartParams, new_charge_id, validate_amps};
use crate::protocol::{
    ChargeStartRequest, DecodeOptions, OutputCurrent, Payload, SystemTime, VersionInfo,
    parse_serial,
};
use crate::session::DeviceSession;
use crate::transport::{Transport, UdpTransport};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::Path;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

mod commands;
mod events;
mod pending;
mod runtime;

use commands::Request;
pub use events::{DeviceEvent, EventKind};
use pending::PendingTable;
use runtime::Runtime;

/// Lifecycle of the communicator loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunicatorState {
    Running,
    /// Stopped on request
    Stopped,
    /// Ended by a transport failure
    Failed(String),
}

/// Handle to a running communicator
pub struct Communicator {
    config: Config,
    requests: mpsc::UnboundedSender<Request>,
    shutdown: mpsc::UnboundedSender<()>,
    events: broadcast::Sender<DeviceEvent>,
    dump: broadcast::Sender<DumpRecord>,
    state: watch::Receiver<CommunicatorState>,
    logger: crate::logging::StructuredLogger,
}

impl Communicator {
    /// Bind the UDP port from `config` and start the loop
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = UdpTransport::bind(&config.network).await?;
        Self::start_with_transport(config, transport)
    }

    /// Start the loop on an existing transport; the loop owns it and drops
    /// it when it ends
    pub fn start_with_transport<T: Transport + 'static>(config: Config, transport: T) -> Result<Self> {
        config.validate()?;
        let logger = get_logger("communicator");

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(config.session.event_capacity);
        let (state_tx, state_rx) = watch::channel(CommunicatorState::Running);
        let dump = DatagramDump::new(config.dump_datagrams, config.session.event_capacity);
        let dump_tx = dump.sender();

        let mut store = EvseStore::new(&config.evses_file);
        let persist = !config.evses_file.is_empty();
        if persist && let Err(e) = store.load() {
            logger.warn(&format!("Ignoring unreadable device list: {}", e));
        }

        let runtime = Runtime {
            options: DecodeOptions::from_config(&config.protocol),
            config: config.clone(),
            transport: Box::new(transport),
            sessions: Default::default(),
            pending: PendingTable::default(),
            store,
            persist,
            events: events_tx.clone(),
            dump,
            requests: requests_rx,
            shutdown: shutdown_rx,
            state: state_tx,
            logger: logger.clone(),
        };
        tokio::spawn(async move {
            let _ = runtime.run().await;
        });

        logger.info(&format!("Communicator started (port {})", config.network.port));
        Ok(Self {
            config,
            requests: requests_tx,
            shutdown: shutdown_tx,
            events: events_tx,
            dump: dump_tx,
            state: state_rx,
            logger,
        })
    }

    /// Stop the loop, cancel in-flight commands and release the transport
    pub async fn stop(&self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.closed().await
    }

    /// Wait for the loop to end; a transport failure is returned here
    pub async fn closed(&self) -> Result<()> {
        let mut state = self.state.clone();
        loop {
            match &*state.borrow_and_update() {
                CommunicatorState::Running => {}
                CommunicatorState::Stopped => return Ok(()),
                CommunicatorState::Failed(reason) => return Err(EvseError::transport(reason.clone())),
            }
            if state.changed().await.is_err() {
                return match &*state.borrow() {
                    CommunicatorState::Failed(reason) => Err(EvseError::transport(reason.clone())),
                    CommunicatorState::Stopped => Ok(()),
                    CommunicatorState::Running => {
                        Err(EvseError::transport("Communicator loop ended unexpectedly"))
                    }
                };
            }
        }
    }

    pub fn state(&self) -> watch::Receiver<CommunicatorState> {
        self.state.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Raw lifecycle event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Lifecycle events of the given kinds as a stream; lagged events are
    /// skipped
    pub fn event_stream(&self, kinds: &[EventKind]) -> impl Stream<Item = DeviceEvent> + use<> {
        let kinds = kinds.to_vec();
        BroadcastStream::new(self.events.subscribe())
            .filter_map(move |event| event.ok().filter(|e| kinds.contains(&e.kind)))
    }

    /// Run `handler` on its own task for each matching event
    pub fn add_event_listener<F, Fut>(&self, kinds: &[EventKind], handler: F) -> JoinHandle<()>
    where
        F: Fn(DeviceEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        events::spawn_listener(self.events.subscribe(), kinds.to_vec(), handler)
    }

    /// Raw datagram dump, populated when `dump_datagrams` is on
    pub fn subscribe_dump(&self) -> broadcast::Receiver<DumpRecord> {
        self.dump.subscribe()
    }

    pub async fn sessions(&self) -> Result<Vec<DeviceSession>> {
        self.ask(|reply| Request::Sessions { reply }).await
    }

    pub async fn session(&self, serial: &str) -> Result<Option<DeviceSession>> {
        let serial = parse_serial(serial)?;
        self.ask(|reply| Request::Session { serial, reply }).await
    }

    /// Log in with `password`; resolves once the device confirms
    pub async fn login(&self, serial: &str, password: &str) -> Result<()> {
        let serial = parse_serial(serial)?;
        let password = Some(password.to_string());
        self.ask(|reply| Request::Login {
            serial,
            password,
            reply,
        })
        .await?
    }

    /// Log in with the password remembered for `serial`
    pub async fn login_saved(&self, serial: &str) -> Result<()> {
        let serial = parse_serial(serial)?;
        self.ask(|reply| Request::Login {
            serial,
            password: None,
            reply,
        })
        .await?
    }

    /// Read the device clock
    pub async fn fetch_system_time(&self, serial: &str) -> Result<DateTime<Utc>> {
        let response = self
            .command(serial, Payload::SystemTime(SystemTime::get()), false)
            .await?;
        device_time(response)
    }

    /// Set the device clock to now; returns the time the device reports
    pub async fn set_system_time(&self, serial: &str) -> Result<DateTime<Utc>> {
        let response = self
            .command(serial, Payload::SystemTime(SystemTime::set(Utc::now())), true)
            .await?;
        device_time(response)
    }

    /// Start a charge; returns the generated charge id
    pub async fn charge_start(&self, serial: &str, params: ChargeStartParams) -> Result<String> {
        params.validate()?;
        if params.single_phase {
            self.logger
                .for_serial(serial)
                .warn("Single-phase charging is not supported by the protocol, ignoring");
        }
        let charge_id = new_charge_id();
        let request =
            ChargeStartRequest::new(&self.config.protocol.user_id, &charge_id, params.max_amps);
        match self
            .command(serial, Payload::ChargeStart(request), true)
            .await?
        {
            Payload::ChargeStartResponse(_) => Ok(charge_id),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn charge_stop(&self, serial: &str) -> Result<()> {
        match self.command(serial, Payload::ChargeStop, true).await? {
            Payload::ChargeStopResponse(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Read the configured output current limit in A
    pub async fn fetch_max_current(&self, serial: &str) -> Result<u8> {
        let response = self
            .command(serial, Payload::OutputCurrent(OutputCurrent::get()), false)
            .await?;
        output_current(response)
    }

    /// Set the output current limit; returns the limit the device reports
    pub async fn set_max_current(&self, serial: &str, amps: u8) -> Result<u8> {
        validate_amps("amps", amps)?;
        let response = self
            .command(serial, Payload::OutputCurrent(OutputCurrent::set(amps)), true)
            .await?;
        output_current(response)
    }

    pub async fn fetch_version(&self, serial: &str) -> Result<VersionInfo> {
        match self.command(serial, Payload::GetVersion, false).await? {
            Payload::VersionResponse(version) => Ok(version),
            other => Err(unexpected(&other)),
        }
    }

    /// Replace the device list with the content of `path`; later learned
    /// passwords are saved there
    pub async fn load_evses<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref().to_path_buf();
        self.ask(|reply| Request::LoadEvses { path, reply }).await?
    }

    /// Write the device list to `path`
    pub async fn save_evses<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref().to_path_buf();
        self.ask(|reply| Request::SaveEvses { path, reply }).await?
    }

    async fn command(&self, serial: &str, payload: Payload, privileged: bool) -> Result<Payload> {
        let serial = parse_serial(serial)?;
        self.ask(|reply| Request::Command {
            serial,
            payload,
            privileged,
            reply,
        })
        .await?
    }

    async fn ask<R>(&self, build: impl FnOnce(oneshot::Sender<R>) -> Request) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(build(tx))
            .map_err(|_| EvseError::cancelled("Communicator is not running"))?;
        rx.await
            .map_err(|_| EvseError::cancelled("Communicator stopped before replying"))
    }
}

fn device_time(response: Payload) -> Result<DateTime<Utc>> {
    match response {
        Payload::SystemTimeResponse(time) => time
            .datetime()
            .ok_or_else(|| EvseError::malformed(format!("Invalid device time {}", time.timestamp))),
        other => Err(unexpected(&other)),
    }
}

fn output_current(response: Payload) -> Result<u8> {
    match response {
        Payload::OutputCurrentResponse(current) => Ok(current.amps),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(payload: &Payload) -> EvseError {
    EvseError::malformed(format!("Unexpected response {}", payload.name()))
}
