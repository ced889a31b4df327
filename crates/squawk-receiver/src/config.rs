//! Receiver configuration.
//!
//! Configuration is loaded from environment variables. The API key is
//! redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default role announced in the auth request.
pub const DEFAULT_ROLE: &str = "listener";

/// Default room to join.
pub const DEFAULT_ROOM: &str = "PRO";

/// Default address written into generated offers.
pub const DEFAULT_RECEIVER_IP: &str = "127.0.0.1";

/// Default receiver port list.
pub const DEFAULT_RECEIVER_PORTS: &str = "5004";

/// Default directory for offer files handed to the recorder.
pub const DEFAULT_SDP_DIR: &str = "./sdp-offers";

/// Default reconnect interval after an unexpected close.
pub const DEFAULT_RETRY_INTERVAL_SECONDS: u64 = 20;

/// Default total time spent retrying before giving up (15 minutes).
pub const DEFAULT_RETRY_WINDOW_SECONDS: u64 = 15 * 60;

/// Default keep-alive ping interval.
pub const DEFAULT_PING_INTERVAL_SECONDS: u64 = 30;

/// Placeholder shipped in sample configs; treated as "no offer file".
pub const OFFER_FILE_PLACEHOLDER: &str = "<sdp_offer_file_path>";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Receiver configuration.
#[derive(Clone)]
pub struct Config {
    /// Signaling server URL (ws:// or wss://).
    pub server_url: String,

    /// API key sent in the auth request.
    /// Protected by `SecretString` to prevent accidental logging.
    pub api_key: SecretString,

    /// Role sent in the auth request.
    pub role: String,

    /// Room to join after authenticating.
    pub room: String,

    /// Local address embedded in generated offers.
    pub receiver_ip: String,

    /// Receiver ports, in configuration order, without duplicates.
    pub receiver_ports: Vec<u16>,

    /// Pre-built offer used verbatim instead of the generated template.
    pub prebuilt_offer: Option<String>,

    /// Directory the offer artifacts are written to.
    pub sdp_dir: PathBuf,

    /// Recorder command line run per joined session.
    pub recorder_command: Option<String>,

    /// Reconnect interval after an unexpected close.
    pub retry_interval: Duration,

    /// Total retry window before giving up.
    pub retry_window: Duration,

    /// Keep-alive ping interval.
    pub ping_interval: Duration,

    /// Prometheus exporter bind address, if any.
    pub metrics_bind_address: Option<SocketAddr>,

    /// Log output format.
    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts the API key.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field("api_key", &"[REDACTED]")
            .field("role", &self.role)
            .field("room", &self.room)
            .field("receiver_ip", &self.receiver_ip)
            .field("receiver_ports", &self.receiver_ports)
            .field(
                "prebuilt_offer",
                &self.prebuilt_offer.as_ref().map(|_| "[FROM FILE]"),
            )
            .field("sdp_dir", &self.sdp_dir)
            .field("recorder_command", &self.recorder_command)
            .field("retry_interval", &self.retry_interval)
            .field("retry_window", &self.retry_window)
            .field("ping_interval", &self.ping_interval)
            .field("metrics_bind_address", &self.metrics_bind_address)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to read SDP offer file {path}: {reason}")]
    OfferFile { path: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let server_url = vars
            .get("SQUAWK_ADDR")
            .ok_or_else(|| ConfigError::MissingEnvVar("SQUAWK_ADDR".to_string()))?
            .clone();
        if !(server_url.starts_with("ws://") || server_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(format!(
                "SQUAWK_ADDR must be a ws:// or wss:// URL, got {server_url}"
            )));
        }

        let api_key = SecretString::from(
            vars.get("SQUAWK_API_KEY")
                .ok_or_else(|| ConfigError::MissingEnvVar("SQUAWK_API_KEY".to_string()))?
                .clone(),
        );

        let role = vars
            .get("SQUAWK_ROLE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROLE.to_string());

        let room = vars
            .get("SQUAWK_ROOM")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROOM.to_string());

        let receiver_ip = vars
            .get("RECEIVER_IP")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RECEIVER_IP.to_string());

        let receiver_ports = parse_port_list(
            vars.get("RECEIVER_PORTS")
                .map_or(DEFAULT_RECEIVER_PORTS, String::as_str),
        )?;

        let prebuilt_offer = match vars.get("RECEIVER_SDP_OFFER_FILE") {
            Some(path) if !path.trim().is_empty() && path != OFFER_FILE_PLACEHOLDER => {
                let offer =
                    std::fs::read_to_string(path).map_err(|e| ConfigError::OfferFile {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                Some(offer)
            }
            _ => None,
        };

        let sdp_dir = PathBuf::from(
            vars.get("RECEIVER_SDP_DIR")
                .map_or(DEFAULT_SDP_DIR, String::as_str),
        );

        let recorder_command = vars
            .get("RECEIVER_RECORDER_COMMAND")
            .filter(|cmd| !cmd.trim().is_empty())
            .cloned();

        let retry_interval = Duration::from_secs(parse_seconds(
            vars,
            "RECEIVER_RETRY_INTERVAL_SECONDS",
            DEFAULT_RETRY_INTERVAL_SECONDS,
        )?);
        let retry_window = Duration::from_secs(parse_seconds(
            vars,
            "RECEIVER_RETRY_WINDOW_SECONDS",
            DEFAULT_RETRY_WINDOW_SECONDS,
        )?);
        if retry_window <= retry_interval {
            return Err(ConfigError::InvalidValue(format!(
                "RECEIVER_RETRY_WINDOW_SECONDS ({}) must exceed RECEIVER_RETRY_INTERVAL_SECONDS ({})",
                retry_window.as_secs(),
                retry_interval.as_secs()
            )));
        }

        let ping_interval = Duration::from_secs(parse_seconds(
            vars,
            "RECEIVER_PING_INTERVAL_SECONDS",
            DEFAULT_PING_INTERVAL_SECONDS,
        )?);

        let metrics_bind_address = match vars
            .get("RECEIVER_METRICS_BIND_ADDRESS")
            .filter(|addr| !addr.trim().is_empty())
        {
            Some(addr) => Some(addr.parse::<SocketAddr>().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "RECEIVER_METRICS_BIND_ADDRESS must be host:port, got {addr}: {e}"
                ))
            })?),
            None => None,
        };

        let log_format = match vars.get("RECEIVER_LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "RECEIVER_LOG_FORMAT must be text or json, got {other}"
                )))
            }
        };

        Ok(Config {
            server_url,
            api_key,
            role,
            room,
            receiver_ip,
            receiver_ports,
            prebuilt_offer,
            sdp_dir,
            recorder_command,
            retry_interval,
            retry_window,
            ping_interval,
            metrics_bind_address,
            log_format,
        })
    }
}

/// Parse a positive number of seconds, falling back to `default` when unset.
fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidValue(format!(
            "{name} must be a positive integer, got {raw}"
        ))),
        Ok(secs) => Ok(secs),
    }
}

/// Parse `5004,5006,6000-6003` into an ordered, de-duplicated port list.
fn parse_port_list(raw: &str) -> Result<Vec<u16>, ConfigError> {
    let mut ports = Vec::new();

    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = item.split_once('-') {
            let start = parse_port(start)?;
            let end = parse_port(end)?;
            if start > end {
                return Err(ConfigError::InvalidValue(format!(
                    "RECEIVER_PORTS range {item} is reversed"
                )));
            }
            for port in start..=end {
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
        } else {
            let port = parse_port(item)?;
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
    }

    if ports.is_empty() {
        return Err(ConfigError::InvalidValue(
            "RECEIVER_PORTS must list at least one port".to_string(),
        ));
    }
    Ok(ports)
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidValue(format!(
            "RECEIVER_PORTS entry {raw} is not a valid port"
        ))),
        Ok(port) => Ok(port),
    }
}
