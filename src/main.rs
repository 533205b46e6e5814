use anyhow::{Context, Result};
use clap::Parser;
use emproto::cli::{CliArgs, CliCommand, Plan};
use emproto::communicator::{Communicator, DeviceEvent, EventKind};
use emproto::config::Config;
use emproto::logging::init_logging;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::{error, info};

/// Shared by the event listener and `main`
struct Monitor {
    communicator: Communicator,
    plan: Plan,
    tz: chrono_tz::Tz,
    /// Serials already logged in with a password from the command line
    logged_in: Mutex<HashSet<String>>,
    command_claimed: AtomicBool,
    done: Notify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let plan = args.plan().context("Invalid arguments")?;

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    if let Some(evses) = &args.evses {
        config.evses_file = evses.to_string_lossy().into_owned();
    }
    if let Some(level) = &args.log_level {
        config.logging.console_level = Some(level.clone());
    }
    config.dump_datagrams |= plan.dump;

    init_logging(&config.logging).context("Failed to initialize logging")?;
    info!("EmProto {} starting up", env!("APP_VERSION"));

    let tz = config.tz();
    let communicator = Communicator::start(config)
        .await
        .context("Failed to start communicator")?;

    if plan.dump {
        let mut dump = communicator.subscribe_dump();
        tokio::spawn(async move {
            while let Ok(record) = dump.recv().await {
                println!("{}", record);
            }
        });
    }

    let monitor = Arc::new(Monitor {
        communicator,
        plan,
        tz,
        logged_in: Mutex::new(HashSet::new()),
        command_claimed: AtomicBool::new(false),
        done: Notify::new(),
    });

    let for_listener = Arc::clone(&monitor);
    let listener = monitor
        .communicator
        .add_event_listener(&EventKind::ALL, move |event| {
            let monitor = Arc::clone(&for_listener);
            async move {
                monitor.on_event(event).await;
                Ok::<(), emproto::EvseError>(())
            }
        });

    info!("Press Ctrl+C to exit");
    let outcome = tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to wait for Ctrl+C"),
        _ = monitor.done.notified() => Ok(()),
        res = monitor.communicator.closed() => res.context("Communicator failed"),
    };

    listener.abort();
    if let Err(e) = monitor.communicator.stop().await {
        error!("Communicator stopped with error: {}", e);
    }
    outcome
}

impl Monitor {
    async fn on_event(&self, event: DeviceEvent) {
        let session = &event.session;
        if !self.plan.matches(session) {
            return;
        }

        println!(
            "[{}] {} {}",
            event.at.with_timezone(&self.tz).format("%Y-%m-%d %H:%M:%S"),
            event.kind,
            session
        );
        if event.kind == EventKind::Removed {
            return;
        }
        if let Some(state) = &session.state
            && let Ok(json) = serde_json::to_string(state)
        {
            println!("    State: {}", json);
        }
        if let Some(charge) = &session.current_charge
            && let Ok(json) = serde_json::to_string(charge)
        {
            println!("    Charge: {}", json);
        }

        if let Some(password) = self.plan.password_for(session) {
            let first = self
                .logged_in
                .lock()
                .map(|mut seen| seen.insert(session.serial.clone()))
                .unwrap_or(false);
            if first {
                match self.communicator.login(&session.serial, password).await {
                    Ok(()) => info!("Logged in to {}", session.serial),
                    Err(e) => error!("Login to {} failed: {}", session.serial, e),
                }
            }
        }

        let Some(command) = self.plan.command else {
            return;
        };
        if self.command_claimed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.run_command(&session.serial, command).await {
            error!("Command on {} failed: {}", session.serial, e);
        }
        self.done.notify_one();
    }

    async fn run_command(&self, serial: &str, command: CliCommand) -> emproto::Result<()> {
        let communicator = &self.communicator;
        let needs_login = matches!(command, CliCommand::Start(_) | CliCommand::Stop | CliCommand::SetTime);
        if needs_login
            && !communicator
                .session(serial)
                .await?
                .is_some_and(|s| s.is_logged_in())
        {
            communicator.login_saved(serial).await?;
        }

        match command {
            CliCommand::Start(params) => {
                let charge_id = communicator.charge_start(serial, params).await?;
                info!("Charge {} started on {}", charge_id, serial);
            }
            CliCommand::Stop => {
                communicator.charge_stop(serial).await?;
                info!("Charge stopped on {}", serial);
            }
            CliCommand::GetTime => {
                let time = communicator.fetch_system_time(serial).await?;
                info!("Time on {}: {}", serial, time.with_timezone(&self.tz));
            }
            CliCommand::SetTime => {
                let time = communicator.set_system_time(serial).await?;
                info!("Time set on {}: {}", serial, time.with_timezone(&self.tz));
            }
        }
        Ok(())
    }
}
