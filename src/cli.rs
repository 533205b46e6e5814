//! Command line model for the `emproto` monitor binary
//!
//! Flags are parsed by clap. The trailing words keep the short syntax of
//! the device test tool:
//!
//! ```text
//! <serial|name|model>=<password>   remember a password, watch that device
//! <serial|name|model>              watch only matching devices
//! start=<amps> | start=1x<amps>    start charging (1x: single phase)
//! stop | gettime | settime         one-shot commands
//! dump                             print every datagram
//! ```

use crate::error::{EvseError, Result};
use crate::protocol::charge::ChargeStartParams;
use crate::session::DeviceSession;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "emproto",
    version = env!("APP_VERSION"),
    about = "Monitor and control EmProto EV chargers on the local network"
)]
pub struct CliArgs {
    /// Configuration file (YAML); default search path when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Saved device list, overrides `evses_file` from the configuration
    #[arg(short, long)]
    pub evses: Option<PathBuf>,

    /// Log level for the console, overrides the configuration
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Device passwords, filter keyword, command and `dump`
    #[arg(value_name = "ARG", trailing_var_arg = true)]
    pub words: Vec<String>,
}

/// One-shot command sent to the first matching device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliCommand {
    Start(ChargeStartParams),
    Stop,
    GetTime,
    SetTime,
}

impl CliCommand {
    fn keyword(word: &str) -> Option<Self> {
        match word {
            "stop" => Some(CliCommand::Stop),
            "gettime" => Some(CliCommand::GetTime),
            "settime" => Some(CliCommand::SetTime),
            _ => None,
        }
    }
}

/// What the trailing words ask for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Passwords to log in with, keyed by the word given before `=`
    pub passwords: BTreeMap<String, String>,
    /// Lowercased filter matched against serial, name and brand/model
    pub keyword: Option<String>,
    pub command: Option<CliCommand>,
    pub dump: bool,
}

impl CliArgs {
    pub fn plan(&self) -> Result<Plan> {
        parse_words(&self.words)
    }
}

/// Interpret the trailing words
pub fn parse_words<S: AsRef<str>>(words: &[S]) -> Result<Plan> {
    let mut plan = Plan::default();
    for word in words {
        let word = word.as_ref();
        if let Some((key, value)) = word.split_once('=') {
            if key == "start" {
                plan.set_command(CliCommand::Start(parse_start(value)?))?;
            } else {
                if key.is_empty() {
                    return Err(EvseError::invalid_parameter("password", "Missing device before '='"));
                }
                plan.passwords.insert(key.to_string(), value.to_string());
                if plan.keyword.is_none() {
                    plan.keyword = Some(key.to_lowercase());
                }
            }
        } else if let Some(command) = CliCommand::keyword(word) {
            plan.set_command(command)?;
        } else if word == "dump" {
            plan.dump = true;
        } else {
            if plan.keyword.is_some() {
                return Err(EvseError::invalid_parameter(
                    "keyword",
                    "Only a single filter keyword is supported",
                ));
            }
            plan.keyword = Some(word.to_lowercase());
        }
    }
    Ok(plan)
}

/// `16` or `1x16`; the phase prefix only marks single-phase when it is 1
pub fn parse_start(value: &str) -> Result<ChargeStartParams> {
    let invalid = || EvseError::invalid_parameter("start", format!("Invalid start parameter: {:?}", value));
    let (phases, amps) = match value.split_once('x') {
        Some((phases, amps)) => {
            if phases.len() != 1 || !phases.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            (Some(phases), amps)
        }
        None => (None, value),
    };
    if amps.is_empty() || !amps.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let max_amps: u8 = amps.parse().map_err(|_| invalid())?;
    let params = ChargeStartParams {
        max_amps,
        single_phase: phases == Some("1"),
    };
    params.validate()?;
    Ok(params)
}

impl Plan {
    fn set_command(&mut self, command: CliCommand) -> Result<()> {
        if self.command.is_some() {
            return Err(EvseError::invalid_parameter("command", "Multiple commands given"));
        }
        self.command = Some(command);
        Ok(())
    }

    /// Whether `session` passes the keyword filter
    pub fn matches(&self, session: &DeviceSession) -> bool {
        let Some(keyword) = &self.keyword else {
            return true;
        };
        if session.serial.contains(keyword.as_str()) {
            return true;
        }
        if let Some(name) = &session.config.name
            && name.to_lowercase().contains(keyword.as_str())
        {
            return true;
        }
        session.info.as_ref().is_some_and(|info| {
            format!("{} {}", info.brand, info.model)
                .to_lowercase()
                .contains(keyword.as_str())
        })
    }

    /// Password given for `session`, looked up by serial then by name
    pub fn password_for(&self, session: &DeviceSession) -> Option<&str> {
        self.passwords
            .iter()
            .find(|(key, _)| {
                key.eq_ignore_ascii_case(&session.serial)
                    || session
                        .config
                        .name
                        .as_deref()
                        .is_some_and(|n| key.eq_ignore_ascii_case(n))
            })
            .map(|(_, password)| password.as_str())
    }
}
