use std::path::PathBuf;
use std::str::FromStr;

use crate::game::components::Position;
use crate::game::constants::{aoi, net, sim};

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Client awareness radius (world units)
    pub aoi_radius: f32,
    /// Spatial locator cell size (world units)
    pub locator_cell_size: f32,
    /// Capacity of every inbound and outbound queue
    pub queue_capacity: usize,
    /// Dynamic objects spawned at startup
    pub npc_count: usize,
    /// Metrics endpoint port, 0 disables it
    pub metrics_port: u16,
    /// Replication mapping file; built-in mapping when absent
    pub replication_config: Option<PathBuf>,
    /// Where client entities appear on connect
    pub spawn_point: Position,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: sim::TICK_RATE,
            aoi_radius: aoi::AOI_RADIUS,
            locator_cell_size: aoi::LOCATOR_CELL_SIZE,
            queue_capacity: net::QUEUE_CAPACITY,
            npc_count: 0,
            metrics_port: 9090,
            replication_config: None,
            spawn_point: Position::default(),
        }
    }
}

/// Parse `name` into `slot` if set and accepted by `valid`, warning otherwise
fn read_var<T, L, V>(lookup: &L, name: &str, slot: &mut T, valid: V, expected: &str)
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
    V: Fn(&T) -> bool,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(parsed) if valid(&parsed) => *slot = parsed,
        Ok(_) => tracing::warn!("{} must be {}, using default", name, expected),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", name, raw),
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::load_from(|name| std::env::var(name).ok())
    }

    /// Load config through an arbitrary variable lookup
    pub fn load_from<L: Fn(&str) -> Option<String>>(lookup: L) -> Self {
        let mut config = Self::default();

        read_var(&lookup, "TICK_RATE", &mut config.tick_rate, |v| (1..=240).contains(v), "1-240");
        read_var(&lookup, "AOI_RADIUS", &mut config.aoi_radius, |v| *v > 0.0, "> 0");
        read_var(
            &lookup,
            "LOCATOR_CELL_SIZE",
            &mut config.locator_cell_size,
            |v| *v > 0.0,
            "> 0",
        );
        read_var(&lookup, "QUEUE_CAPACITY", &mut config.queue_capacity, |v| *v > 0, "> 0");
        read_var(&lookup, "NPC_COUNT", &mut config.npc_count, |v| *v <= 100_000, "<= 100000");
        read_var(&lookup, "METRICS_PORT", &mut config.metrics_port, |_| true, "a port");

        if let Some(path) = lookup("REPLICATION_CONFIG") {
            if !path.is_empty() {
                config.replication_config = Some(PathBuf::from(path));
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > 240 {
            return Err(ConfigError::Invalid("tick_rate must be 1-240".to_string()));
        }
        if !(self.aoi_radius.is_finite() && self.aoi_radius > 0.0) {
            return Err(ConfigError::Invalid("aoi_radius must be > 0".to_string()));
        }
        if !(self.locator_cell_size.is_finite() && self.locator_cell_size > 0.0) {
            return Err(ConfigError::Invalid("locator_cell_size must be > 0".to_string()));
        }
        if self.aoi_radius / self.locator_cell_size > aoi::MAX_RADIUS_CELLS {
            return Err(ConfigError::Invalid(format!(
                "aoi_radius must be at most {} cells of locator_cell_size",
                aoi::MAX_RADIUS_CELLS
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Fixed timestep in seconds
    pub fn timestep(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }
}

/// Client-side prediction settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Fixed timestep in seconds; must match the server
    pub timestep: f32,
    /// Ticks of input kept for replay
    pub input_history_length: usize,
    /// Ticks the client starts ahead of the server's reported tick
    pub initial_tick_offset: u32,
    /// Seconds to wait for a ConnectionResponse
    pub connection_response_wait_s: f32,
    /// Starting replication tick offset for remote entities
    pub replication_offset: i32,
    /// Capacity of each inbound client queue
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timestep: sim::TICK_TIMESTEP_S,
            input_history_length: net::INPUT_HISTORY_LENGTH,
            initial_tick_offset: net::INITIAL_TICK_OFFSET,
            connection_response_wait_s: net::CONNECTION_RESPONSE_WAIT_S,
            replication_offset: net::INITIAL_REPLICATION_OFFSET,
            queue_capacity: net::QUEUE_CAPACITY,
        }
    }
}
