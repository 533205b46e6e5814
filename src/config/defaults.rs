use super::*;

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 28376,
            broadcast: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_secs: 30,
            sweep_interval_ms: 1000,
            request_timeout_ms: 5000,
            login_timeout_ms: 3000,
            poll_interval_ms: 5000,
            relogin_after_secs: 30,
            event_capacity: 256,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            p51_guard: P51Guard::Strict,
            user_id: "emmgr".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/emproto.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            session: SessionConfig::default(),
            protocol: ProtocolConfig::default(),
            logging: LoggingConfig::default(),
            evses_file: "evses.json".to_string(),
            dump_datagrams: false,
            timezone: "UTC".to_string(),
        }
    }
}
