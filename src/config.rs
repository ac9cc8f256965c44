use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::info;

use crate::game::costs::CostTable;

/// What happens to a player's territory when their connection leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeavePolicy {
    /// Owned tiles decay to neutral immediately.
    #[default]
    ResetTerritory,
    /// Tiles stay owned; a later `enter` with the same member id resumes them.
    KeepTerritory,
}

/// A session registered at startup, standing in for the lobby service.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalSession {
    pub id: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub board_height: usize,
    pub board_width: usize,
    pub max_players: usize,
    pub wait_seconds: u64,
    pub running_seconds: u64,
    pub loop_interval_ms: u64,
    /// Elimination is only checked once Running is at least this old.
    pub elimination_min_age_seconds: u64,
    pub initial_energy: f64,
    /// Flat income on top of owned productivity, per second.
    pub base_energy_rate: f64,
    pub leave_policy: LeavePolicy,
    pub lease_ttl_factor: f64,
    /// Hard wall-clock limit of the host running a session, if any.
    pub host_execution_ceiling_seconds: Option<u64>,
    pub costs: CostTable,
    pub bind_address: String,
    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
    pub local_session: Option<LocalSession>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            board_height: 11,
            board_width: 11,
            max_players: 6,
            wait_seconds: 30,
            running_seconds: 60,
            loop_interval_ms: 10,
            elimination_min_age_seconds: 5,
            initial_energy: 0.0,
            base_energy_rate: 0.0,
            leave_policy: LeavePolicy::default(),
            lease_ttl_factor: 1.2,
            host_execution_ceiling_seconds: None,
            costs: CostTable::default(),
            bind_address: "127.0.0.1:9001".to_string(),
            redis_url: None,
            redis_key_prefix: "tile-capture".to_string(),
            local_session: None,
        }
    }
}

impl GameConfig {
    /// Layers `.env`, an optional `config/tile-capture.toml` and `APP__*`
    /// environment variables (e.g. `APP__WAIT_SECONDS=10`) over the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }

        Config::builder()
            .add_source(
                File::with_name("config/tile-capture")
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn wait_duration(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }

    pub fn running_duration(&self) -> Duration {
        Duration::from_secs(self.running_seconds)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }

    pub fn elimination_min_age(&self) -> Duration {
        Duration::from_secs(self.elimination_min_age_seconds)
    }

    /// Longest a session can possibly live: wait plus running.
    pub fn session_lifetime(&self) -> Duration {
        self.wait_duration() + self.running_duration()
    }

    /// Lease expiry, slightly longer than the session lifetime so a crashed
    /// owner eventually frees the session.
    pub fn lease_ttl(&self) -> Duration {
        let secs = self.session_lifetime().as_secs_f64() * self.lease_ttl_factor;
        Duration::from_secs(secs.ceil() as u64)
    }

    /// True when a host ceiling is configured and the lease would outlive it.
    pub fn exceeds_host_ceiling(&self) -> bool {
        self.host_execution_ceiling_seconds
            .map_or(false, |ceiling| self.lease_ttl() > Duration::from_secs(ceiling))
    }
}
