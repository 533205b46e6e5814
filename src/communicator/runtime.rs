use super::commands::Request;
use super::events::{DeviceEvent, EventKind};
use super::pending::{Pending, PendingTable, Reply};
use super::CommunicatorState;
use crate::config::Config;
use crate::dump::{DatagramDump, DumpDirection};
use crate::error::{EvseError, Result};
use crate::logging::StructuredLogger;
use crate::persistence::EvseStore;
use crate::protocol::codes;
use crate::protocol::{Datagram, DecodeOptions, Payload, decode_packet, lookup};
use crate::session::{DeviceSession, SessionStatus};
use crate::transport::Transport;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, sleep_until};

/// The owning loop: transport, sessions and in-flight requests live here
pub(crate) struct Runtime {
    pub(crate) config: Config,
    pub(crate) options: DecodeOptions,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) sessions: HashMap<String, DeviceSession>,
    pub(crate) pending: PendingTable,
    pub(crate) store: EvseStore,
    /// Whether the device list is written back to disk
    pub(crate) persist: bool,
    pub(crate) events: broadcast::Sender<DeviceEvent>,
    pub(crate) dump: DatagramDump,
    pub(crate) requests: mpsc::UnboundedReceiver<Request>,
    pub(crate) shutdown: mpsc::UnboundedReceiver<()>,
    pub(crate) state: watch::Sender<CommunicatorState>,
    pub(crate) logger: StructuredLogger,
}

impl Runtime {
    /// Run until stopped or the transport fails
    pub(crate) async fn run(mut self) -> Result<()> {
        self.logger.info("Communicator loop started");

        let mut sweep = interval(self.config.session.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll = self.config.session.poll_interval().map(|period| {
            let mut poll = interval(period);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            poll
        });

        let result = loop {
            let deadline = self.pending.next_deadline();
            tokio::select! {
                received = self.transport.recv_from() => {
                    match received {
                        Ok((bytes, from)) => {
                            if let Err(e) = self.handle_packet(&bytes, from).await {
                                break Err(e);
                            }
                        }
                        Err(e) => break Err(e),
                    }
                }
                Some(request) = self.requests.recv() => {
                    if let Err(e) = self.handle_request(request).await {
                        break Err(e);
                    }
                }
                _ = sweep.tick() => self.sweep(Instant::now()),
                _ = tick(&mut poll) => {
                    if let Err(e) = self.poll(Instant::now()).await {
                        break Err(e);
                    }
                }
                _ = sleep_until_deadline(deadline) => self.expire_pending(Instant::now()),
                _ = self.shutdown.recv() => {
                    self.logger.info("Shutdown signal received");
                    break Ok(());
                }
            }
        };

        self.finish(&result);
        result
    }

    fn finish(&mut self, result: &Result<()>) {
        let reason = match result {
            Ok(()) => EvseError::cancelled("Communicator stopped"),
            Err(e) => e.clone(),
        };
        for pending in self.pending.drain() {
            pending.reply.fail(reason.clone());
        }
        if self.persist
            && let Err(e) = self.store.save()
        {
            self.logger.warn(&format!("Failed to save device list: {}", e));
        }
        match result {
            Ok(()) => {
                self.logger.info("Communicator stopped");
                self.state.send_replace(CommunicatorState::Stopped);
            }
            Err(e) => {
                self.logger.error(&format!("Communicator failed: {}", e));
                self.state
                    .send_replace(CommunicatorState::Failed(e.to_string()));
            }
        }
    }

    async fn handle_packet(&mut self, bytes: &[u8], from: SocketAddr) -> Result<()> {
        let frames = decode_packet(bytes, &self.options);
        self.dump.record(DumpDirection::Received, from, bytes, || {
            frames
                .iter()
                .map(|f| match f {
                    Ok(d) => d.name().to_string(),
                    Err(e) => e.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" + ")
        });

        for frame in frames {
            match frame {
                Ok(datagram) => self.handle_datagram(datagram, from).await?,
                Err(e) => {
                    self.logger
                        .debug(&format!("Dropping datagram from {}: {}", from, e));
                }
            }
        }
        Ok(())
    }

    async fn handle_datagram(&mut self, datagram: Datagram, from: SocketAddr) -> Result<()> {
        let Some(serial) = datagram.serial.clone() else {
            self.logger.debug(&format!(
                "Ignoring {} from {} without serial",
                datagram.name(),
                from
            ));
            return Ok(());
        };
        if datagram.payload.is_unknown() {
            self.logger.for_serial(&serial).debug(&format!(
                "Unknown command {:#06x} ({} payload bytes)",
                datagram.command,
                datagram.raw.len().saturating_sub(crate::protocol::FRAME_OVERHEAD)
            ));
        }

        let now = Instant::now();
        let mut changed = false;
        let added = !self.sessions.contains_key(&serial);
        if added {
            let mut session = DeviceSession::new(&serial, from, now);
            if let Some(record) = self.store.get(&serial) {
                session.apply_record(record);
            }
            session.apply(&datagram.payload);
            self.logger
                .for_serial(&serial)
                .info(&format!("Discovered charger at {}", from));
            self.sessions.insert(serial.clone(), session);
        } else if let Some(session) = self.sessions.get_mut(&serial) {
            changed |= session.touch(from, now);
            changed |= session.apply(&datagram.payload);
        }

        changed |= self.resolve_pending(&serial, &datagram).await?;
        self.auto_acknowledge(&serial, &datagram.payload).await?;

        if added {
            self.emit(EventKind::Added, &serial);
        } else if changed {
            self.emit(EventKind::Changed, &serial);
        }
        Ok(())
    }

    /// Hand a response to the oldest request waiting for it
    async fn resolve_pending(&mut self, serial: &str, datagram: &Datagram) -> Result<bool> {
        let Some(pending) = self.pending.take_match(serial, datagram.command) else {
            return Ok(false);
        };
        match pending.reply {
            Reply::Command(reply) => {
                let _ = reply.send(Ok(datagram.payload.clone()));
                Ok(false)
            }
            Reply::Login { password, waiters } => {
                if datagram.command == codes::PASSWORD_ERROR {
                    self.logger.for_serial(serial).warn("Password rejected");
                    let changed = self.set_status(serial, SessionStatus::Discovered);
                    Reply::Login { password, waiters }
                        .fail(EvseError::password_rejected(serial));
                    return Ok(changed);
                }

                let confirm = Datagram::new(serial, Payload::LoginConfirm)
                    .with_password(Some(&password));
                if let Err(e) = self.send(serial, &confirm).await {
                    Reply::Login { password, waiters }.fail(e.clone());
                    return Err(e);
                }
                if let Some(session) = self.sessions.get_mut(serial) {
                    session.password = Some(password.clone());
                    session.last_keepalive = Some(Instant::now());
                }
                if self.store.set_password(serial, &password)
                    && self.persist
                    && let Err(e) = self.store.save()
                {
                    self.logger
                        .warn(&format!("Failed to save device list: {}", e));
                }
                let changed = self.set_status(serial, SessionStatus::LoggedIn);
                self.logger.for_serial(serial).info("Logged in");
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
                Ok(changed)
            }
        }
    }

    async fn auto_acknowledge(&mut self, serial: &str, payload: &Payload) -> Result<()> {
        let logged_in = self
            .sessions
            .get(serial)
            .is_some_and(DeviceSession::is_logged_in);
        if !logged_in {
            return Ok(());
        }
        let ack = match payload {
            Payload::Heading => Payload::HeadingResponse,
            Payload::AcStatus(_) => Payload::AcStatusResponse,
            Payload::ChargingStatus(_) => Payload::ChargingStatusResponse,
            _ => return Ok(()),
        };
        let keepalive = matches!(ack, Payload::HeadingResponse);
        let password = self.sessions.get(serial).and_then(|s| s.password.clone());
        let datagram = Datagram::new(serial, ack).with_password(password.as_deref());
        self.send(serial, &datagram).await?;
        if keepalive && let Some(session) = self.sessions.get_mut(serial) {
            session.last_keepalive = Some(Instant::now());
        }
        Ok(())
    }

    async fn handle_request(&mut self, request: Request) -> Result<()> {
        match request {
            Request::Login {
                serial,
                password,
                reply,
            } => self.start_login(serial, password, reply).await,
            Request::Command {
                serial,
                payload,
                privileged,
                reply,
            } => self.start_command(serial, payload, privileged, reply).await,
            Request::Sessions { reply } => {
                let mut sessions: Vec<_> = self.sessions.values().cloned().collect();
                sessions.sort_by(|a, b| a.serial.cmp(&b.serial));
                let _ = reply.send(sessions);
                Ok(())
            }
            Request::Session { serial, reply } => {
                let _ = reply.send(self.sessions.get(&serial).cloned());
                Ok(())
            }
            Request::LoadEvses { path, reply } => {
                let _ = reply.send(self.load_evses(path));
                Ok(())
            }
            Request::SaveEvses { path, reply } => {
                let _ = reply.send(self.save_evses(path));
                Ok(())
            }
        }
    }

    async fn start_login(
        &mut self,
        serial: String,
        password: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    ) -> Result<()> {
        let Some(session) = self.sessions.get(&serial) else {
            let _ = reply.send(Err(EvseError::device_not_found(&serial)));
            return Ok(());
        };
        if session.is_logged_in() {
            let _ = reply.send(Ok(()));
            return Ok(());
        }
        let saved = session.password.clone();

        // A second caller joins the attempt already in flight
        if let Some(in_flight) = self.pending.login_mut(&serial)
            && let Reply::Login {
                password: trying,
                waiters,
            } = &mut in_flight.reply
        {
            if password.as_ref().is_none_or(|p| *p == *trying) {
                waiters.push(reply);
            } else {
                let _ = reply.send(Err(EvseError::invalid_parameter(
                    "password",
                    format!("Login to {} already in progress", serial),
                )));
            }
            return Ok(());
        }

        let Some(password) = password.or(saved) else {
            let _ = reply.send(Err(EvseError::invalid_parameter(
                "password",
                format!("No saved password for {}", serial),
            )));
            return Ok(());
        };
        self.send_login(serial, password, vec![reply]).await
    }

    /// Send RequestLogin and wait for LoginResponse or PasswordError
    async fn send_login(
        &mut self,
        serial: String,
        password: String,
        waiters: Vec<oneshot::Sender<Result<()>>>,
    ) -> Result<()> {
        let request = Datagram::new(&serial, Payload::RequestLogin).with_password(Some(&password));
        if let Err(e) = self.send(&serial, &request).await {
            Reply::Login { password, waiters }.fail(e.clone());
            return Err(e);
        }

        if self.set_status(&serial, SessionStatus::LoggingIn) {
            self.emit(EventKind::Changed, &serial);
        }
        self.pending.push(Pending {
            serial,
            name: "Login",
            expects: &[codes::LOGIN_RESPONSE, codes::PASSWORD_ERROR],
            deadline: Instant::now() + self.config.session.login_timeout(),
            reply: Reply::Login { password, waiters },
        });
        Ok(())
    }

    async fn start_command(
        &mut self,
        serial: String,
        payload: Payload,
        privileged: bool,
        reply: oneshot::Sender<Result<Payload>>,
    ) -> Result<()> {
        let Some(descriptor) = lookup(payload.code()) else {
            let _ = reply.send(Err(EvseError::invalid_parameter(
                "command",
                format!("Unregistered command {:#06x}", payload.code()),
            )));
            return Ok(());
        };
        let Some(session) = self.sessions.get(&serial) else {
            let _ = reply.send(Err(EvseError::device_not_found(&serial)));
            return Ok(());
        };
        if (descriptor.requires_auth || privileged) && !session.is_logged_in() {
            let _ = reply.send(Err(EvseError::auth_required(format!(
                "{} needs a logged-in session with {}",
                descriptor.name, serial
            ))));
            return Ok(());
        }

        let datagram =
            Datagram::new(&serial, payload).with_password(session.password.as_deref());
        if let Err(e) = self.send(&serial, &datagram).await {
            let _ = reply.send(Err(e.clone()));
            return Err(e);
        }

        if descriptor.expects_response() {
            self.pending.push(Pending {
                serial,
                name: descriptor.name,
                expects: descriptor.responses,
                deadline: Instant::now() + self.config.session.request_timeout(),
                reply: Reply::Command(reply),
            });
        } else {
            let _ = reply.send(Ok(datagram.payload));
        }
        Ok(())
    }

    /// Encode and send to the session's current endpoint
    async fn send(&mut self, serial: &str, datagram: &Datagram) -> Result<()> {
        let Some(addr) = self.sessions.get(serial).map(|s| s.address) else {
            return Err(EvseError::device_not_found(serial));
        };
        let bytes = datagram.encode();
        self.dump
            .record(DumpDirection::Sent, addr, &bytes, || datagram.name().to_string());
        self.logger
            .for_serial(serial)
            .trace(&format!("Sending {} to {}", datagram.name(), addr));
        self.transport.send_to(&bytes, addr).await
    }

    /// Poll tick: log in again where keepalives stopped, otherwise ask
    /// logged-in devices for their charge record
    async fn poll(&mut self, now: Instant) -> Result<()> {
        let relogin_after = self.config.session.relogin_after();
        let mut logged_in: Vec<(String, Option<String>)> = self
            .sessions
            .values()
            .filter(|s| s.is_logged_in())
            .map(|s| {
                let stale = relogin_after.is_some_and(|after| s.keepalive_stale(now, after));
                (s.serial.clone(), s.password.clone().filter(|_| stale))
            })
            .collect();
        logged_in.sort();

        for (serial, relogin) in logged_in {
            if let Some(password) = relogin
                && self.pending.login_mut(&serial).is_none()
            {
                self.logger
                    .for_serial(&serial)
                    .info("No keepalive acknowledged, logging in again");
                self.send_login(serial, password, Vec::new()).await?;
                continue;
            }
            let password = self.sessions.get(&serial).and_then(|s| s.password.clone());
            let request = Datagram::new(&serial, Payload::RequestChargeStatusRecord)
                .with_password(password.as_deref());
            self.send(&serial, &request).await?;
        }
        Ok(())
    }

    fn sweep(&mut self, now: Instant) {
        let timeout = self.config.session.liveness_timeout();
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.is_expired(now, timeout))
            .map(|s| s.serial.clone())
            .collect();

        for serial in expired {
            if let Some(mut session) = self.sessions.remove(&serial) {
                session.set_status(SessionStatus::Absent);
                self.logger.for_serial(&serial).info(&format!(
                    "No datagram for {}s, removing",
                    timeout.as_secs()
                ));
                let _ = self.events.send(DeviceEvent::new(EventKind::Removed, &session));
            }
        }
    }

    fn expire_pending(&mut self, now: Instant) {
        for pending in self.pending.take_expired(now) {
            let err = EvseError::timeout(format!(
                "No response to {} from {}",
                pending.name, pending.serial
            ));
            self.logger.for_serial(&pending.serial).warn(&err.to_string());
            let still_logging_in = self
                .sessions
                .get(&pending.serial)
                .is_some_and(|s| s.status == SessionStatus::LoggingIn);
            if matches!(pending.reply, Reply::Login { .. })
                && still_logging_in
                && self.set_status(&pending.serial, SessionStatus::Discovered)
            {
                self.emit(EventKind::Changed, &pending.serial);
            }
            pending.reply.fail(err);
        }
    }

    fn set_status(&mut self, serial: &str, status: SessionStatus) -> bool {
        self.sessions
            .get_mut(serial)
            .is_some_and(|s| s.set_status(status))
    }

    fn emit(&self, kind: EventKind, serial: &str) {
        if let Some(session) = self.sessions.get(serial) {
            // No receivers is fine
            let _ = self.events.send(DeviceEvent::new(kind, session));
        }
    }

    fn load_evses(&mut self, path: PathBuf) -> Result<usize> {
        let mut store = EvseStore::new(&path);
        store.load()?;
        for (serial, record) in store.records() {
            if let Some(session) = self.sessions.get_mut(serial) {
                session.apply_record(record);
            }
        }
        let count = store.len();
        self.store = store;
        self.persist = true;
        Ok(count)
    }

    fn save_evses(&mut self, path: PathBuf) -> Result<usize> {
        let mut store = EvseStore::new(&path);
        store.replace(self.store.records().clone());
        store.save()?;
        Ok(store.len())
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
