//! Per-client movement replication
//!
//! Each tick every client receives at most one `MovementUpdate`, holding:
//! - entities that entered its AOI this tick (all broadcast fields)
//! - entities in its AOI whose observed components changed (mapped fields)
//! - its own entity, if its last input arrived too late to apply
//!
//! Which fields an observed change broadcasts is plain data loaded from a
//! [`ReplicationConfig`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, trace};

use crate::config::ConfigError;
use crate::game::components::{ComponentKind, ComponentMask};
use crate::game::error::SimulationError;
use crate::game::registry::{Entity, Registry};
use crate::game::tick_clock::TickNum;
use crate::net::protocol::{MovementState, MovementUpdate, ServerMessage};
use crate::net::sink::MessageSink;

// ============================================================================
// Configuration
// ============================================================================

/// Fields sent whenever `component` changes on a replicated entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedMapping {
    pub component: ComponentKind,
    pub broadcast: Vec<ComponentKind>,
}

/// Observed component to broadcast fields table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub observed: Vec<ObservedMapping>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        // Input drives velocity and position, so they travel together
        Self {
            observed: vec![ObservedMapping {
                component: ComponentKind::Input,
                broadcast: vec![
                    ComponentKind::Input,
                    ComponentKind::Position,
                    ComponentKind::Velocity,
                    ComponentKind::Rotation,
                ],
            }],
        }
    }
}

impl ReplicationConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Built-in mapping when `path` is None
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, mapping) in self.observed.iter().enumerate() {
            if mapping.broadcast.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{:?} broadcasts no fields",
                    mapping.component
                )));
            }
            if self.observed[..i]
                .iter()
                .any(|m| m.component == mapping.component)
            {
                return Err(ConfigError::Invalid(format!(
                    "{:?} is mapped twice",
                    mapping.component
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Replication system
// ============================================================================

/// Counts from one replication pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub messages: usize,
    pub entries: usize,
    /// Updates the sink refused; their entities get full state next tick
    pub deferred: usize,
}

pub struct ReplicationSystem {
    /// Observed kind and the fields it broadcasts
    mapping: Vec<(ComponentKind, ComponentMask)>,
    /// Union of every broadcast set; used for first sight and hard corrections
    full: ComponentMask,
}

impl ReplicationSystem {
    pub fn new(config: &ReplicationConfig) -> Self {
        let mapping: Vec<(ComponentKind, ComponentMask)> = config
            .observed
            .iter()
            .map(|m| (m.component, m.broadcast.iter().copied().collect()))
            .collect();
        let full = mapping
            .iter()
            .fold(ComponentMask::EMPTY, |acc, (_, mask)| acc.union(*mask));
        Self { mapping, full }
    }

    /// Fields to send for a set of observed changes
    pub fn broadcast_for(&self, changed: ComponentMask) -> ComponentMask {
        self.mapping
            .iter()
            .filter(|(kind, _)| changed.contains(*kind))
            .fold(ComponentMask::EMPTY, |acc, (_, mask)| acc.union(*mask))
    }

    #[inline]
    pub fn full_mask(&self) -> ComponentMask {
        self.full
    }

    /// Send this tick's updates and clear the observed-change tags
    pub fn send_updates<S: MessageSink<ServerMessage>>(
        &self,
        registry: &mut Registry,
        sink: &mut S,
        tick: TickNum,
    ) -> Result<ReplicationStats, SimulationError> {
        let mut stats = ReplicationStats::default();
        let mut pending: Vec<(Entity, ComponentMask)> = Vec::new();

        for observer in registry.clients.sorted_entities() {
            let Some(client) = registry.clients.get(observer) else {
                continue;
            };
            let net_id = client.net_id;

            pending.clear();
            pending.extend(
                client
                    .entities_that_entered_aoi
                    .iter()
                    .map(|&e| (e, self.full)),
            );
            for &subject in &client.entities_in_aoi {
                if let Some(changed) = registry.observed_changes.get(subject) {
                    let fields = self.broadcast_for(*changed);
                    if !fields.is_empty() {
                        pending.push((subject, fields));
                    }
                }
            }
            if client.input_was_dropped {
                pending.push((observer, self.full));
            }

            let entries = collect_entries(registry, &mut pending)?;
            let Some(client) = registry.clients.get_mut(observer) else {
                continue;
            };
            client.entities_that_entered_aoi.clear();
            client.input_was_dropped = false;

            if entries.is_empty() {
                continue;
            }
            let subjects: Vec<Entity> = entries.iter().map(|e| e.entity).collect();
            let update = ServerMessage::MovementUpdate(MovementUpdate {
                tick_num: tick,
                entries,
            });
            match sink.send(net_id, update) {
                Ok(()) => {
                    trace!("[tick {}] {} movement entries -> {}", tick, subjects.len(), observer);
                    stats.messages += 1;
                    stats.entries += subjects.len();
                }
                Err(e) => {
                    // Observed changes are cleared below, so fall back to a
                    // full resend of everything this update carried
                    debug!("[tick {}] Movement update to {} deferred: {}", tick, observer, e);
                    stats.deferred += 1;
                    for subject in subjects {
                        if subject == observer {
                            client.input_was_dropped = true;
                        } else {
                            client.entities_that_entered_aoi.push(subject);
                        }
                    }
                }
            }
        }

        registry.observed_changes.clear();
        Ok(stats)
    }
}

impl Default for ReplicationSystem {
    fn default() -> Self {
        Self::new(&ReplicationConfig::default())
    }
}

/// Sort, merge duplicates, and read the requested fields
fn collect_entries(
    registry: &Registry,
    pending: &mut Vec<(Entity, ComponentMask)>,
) -> Result<Vec<MovementState>, SimulationError> {
    pending.sort_unstable_by_key(|(e, _)| *e);
    pending.dedup_by(|later, earlier| {
        if later.0 == earlier.0 {
            earlier.1 = earlier.1.union(later.1);
            true
        } else {
            false
        }
    });

    pending
        .iter()
        .map(|&(entity, fields)| movement_state(registry, entity, fields))
        .collect()
}

fn movement_state(
    registry: &Registry,
    entity: Entity,
    fields: ComponentMask,
) -> Result<MovementState, SimulationError> {
    fn require<T: Copy>(
        value: Option<&T>,
        entity: Entity,
        name: &'static str,
    ) -> Result<T, SimulationError> {
        value.copied().ok_or_else(|| {
            error!("Replicated entity {} has no {}", entity, name);
            SimulationError::missing(entity, name)
        })
    }

    let mut state = MovementState::empty(entity);
    for kind in fields.iter() {
        match kind {
            ComponentKind::Input => {
                state.input = Some(require(registry.inputs.get(entity), entity, "Input")?)
            }
            ComponentKind::Position => {
                state.position = Some(require(registry.positions.get(entity), entity, "Position")?)
            }
            ComponentKind::Velocity => {
                state.velocity = Some(require(registry.velocities.get(entity), entity, "Velocity")?)
            }
            ComponentKind::Rotation => {
                state.rotation = Some(require(registry.rotations.get(entity), entity, "Rotation")?)
            }
        }
    }
    Ok(state)
}
