//! Show timing and server configuration, loaded from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Timing constants every process reading the same show must agree on
#[derive(Debug, Clone, PartialEq)]
pub struct ShowConfig {
    /// How long a round accepts votes
    pub active_duration: Duration,
    /// How long results are shown before the next wait
    pub locked_duration: Duration,
    /// Countdown between rounds when auto-run is on
    pub wait_duration: Duration,
    /// Stability below which screens switch to glitch mode (informational only)
    pub glitch_threshold: u8,
    /// Minimum time between two votes from one device
    pub cooldown: Duration,
    /// How long a controller lease stays valid without renewal
    pub lease_ttl: Duration,
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            active_duration: Duration::from_secs(20),
            locked_duration: Duration::from_secs(6),
            wait_duration: Duration::from_secs(8),
            glitch_threshold: 30,
            cooldown: Duration::from_secs(2),
            lease_ttl: Duration::from_secs(6),
        }
    }
}

impl ShowConfig {
    /// Load config from environment variables, keeping defaults for anything unset
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            active_duration: env_secs("SHOW_ACTIVE_SECS").unwrap_or(defaults.active_duration),
            locked_duration: env_secs("SHOW_LOCKED_SECS").unwrap_or(defaults.locked_duration),
            wait_duration: env_secs("SHOW_WAIT_SECS").unwrap_or(defaults.wait_duration),
            glitch_threshold: env_parse("SHOW_GLITCH_THRESHOLD")
                .map(|t: u8| t.min(crate::types::MAX_STABILITY))
                .unwrap_or(defaults.glitch_threshold),
            cooldown: env_parse("SHOW_COOLDOWN_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.cooldown),
            lease_ttl: env_parse("SHOW_LEASE_TTL_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.lease_ttl),
        }
    }

    /// Interval at which a controller renews its lease
    pub fn heartbeat_interval(&self) -> Duration {
        (self.lease_ttl / 3).max(Duration::from_millis(50))
    }
}

/// Where the stage operator that drives timers lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerMode {
    /// One house operator inside the server; stage consoles send it commands
    Embedded,
    /// Every stage console connection gets its own operator; they elect via the lease
    Console,
}

impl FromStr for ControllerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "embedded" | "house" => Ok(Self::Embedded),
            "console" | "consoles" => Ok(Self::Console),
            other => Err(format!("Unknown controller mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Snapshot file loaded at boot and rewritten on change
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval: Duration,
    pub controller: ControllerMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 6573)),
            snapshot_path: None,
            snapshot_interval: Duration::from_secs(2),
            controller: ControllerMode::Embedded,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: env_parse("SHOW_BIND").unwrap_or(defaults.bind),
            snapshot_path: std::env::var("SHOW_SNAPSHOT_PATH")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            snapshot_interval: env_secs("SHOW_SNAPSHOT_INTERVAL_SECS")
                .unwrap_or(defaults.snapshot_interval),
            controller: env_parse("SHOW_CONTROLLER").unwrap_or(defaults.controller),
        }
    }
}

/// Parse an env var, warning (and returning `None`) when it is set but invalid
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse(key)
        .filter(|secs: &u64| *secs > 0)
        .map(Duration::from_secs)
}
