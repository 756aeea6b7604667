//! Client admission and removal
//!
//! Connection events are consumed at the start of a tick so a departing
//! client is cleaned out of every AOI list before anything else runs.

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::game::components::{
    BoundingBox, ClientSimData, Collision, EntityType, Input, Interaction, InteractionType, Name,
    Position, PreviousPosition, Rotation, Sprite, Velocity,
};
use crate::game::constants::bounds::{CLIENT_HALF_EXTENT, CLIENT_HEIGHT};
use crate::game::error::SimulationError;
use crate::game::registry::{Entity, Registry};
use crate::game::spatial::SpatialLocator;
use crate::game::tick_clock::TickNum;
use crate::net::aoi::AoiSystem;
use crate::net::protocol::{NetworkId, ServerMessage};
use crate::net::receiver::ConnectionEvent;
use crate::net::sink::MessageSink;

/// Connected clients by network id
pub type ClientIndex = FxHashMap<NetworkId, Entity>;

/// Sprite every client entity is drawn with
pub const CLIENT_SPRITE: u16 = 1;

/// What one pass over the connection queue did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionReport {
    pub connected: Vec<NetworkId>,
    pub disconnected: Vec<NetworkId>,
}

pub struct ClientConnectionSystem {
    spawn_point: Position,
    clients: ClientIndex,
    /// Admitted clients whose ConnectionResponse the sink refused
    unanswered: Vec<NetworkId>,
}

impl ClientConnectionSystem {
    pub fn new(spawn_point: Position) -> Self {
        Self {
            spawn_point,
            clients: ClientIndex::default(),
            unanswered: Vec::new(),
        }
    }

    /// Clients still waiting for their ConnectionResponse
    pub fn unanswered(&self) -> &[NetworkId] {
        &self.unanswered
    }

    pub fn clients(&self) -> &ClientIndex {
        &self.clients
    }

    pub fn entity_for(&self, net_id: NetworkId) -> Option<Entity> {
        self.clients.get(&net_id).copied()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Apply every queued connect and disconnect in arrival order
    pub fn process_events<S, I>(
        &mut self,
        events: I,
        registry: &mut Registry,
        locator: &mut SpatialLocator,
        aoi: &mut AoiSystem,
        sink: &mut S,
        tick: TickNum,
    ) -> Result<ConnectionReport, SimulationError>
    where
        S: MessageSink<ServerMessage>,
        I: IntoIterator<Item = ConnectionEvent>,
    {
        let mut report = ConnectionReport::default();

        let unanswered = std::mem::take(&mut self.unanswered);
        for net_id in unanswered {
            if let Some(entity) = self.entity_for(net_id) {
                self.respond(net_id, entity, registry, sink, tick);
            }
        }

        for event in events {
            match event {
                ConnectionEvent::Connected(net_id) => {
                    if self.clients.contains_key(&net_id) {
                        warn!("[tick {}] Client {} connected twice, ignoring", tick, net_id);
                        continue;
                    }
                    let entity = self.admit(net_id, registry, locator, sink, tick);
                    info!("[tick {}] Client {} connected as {}", tick, net_id, entity);
                    report.connected.push(net_id);
                }
                ConnectionEvent::Disconnected(net_id) => {
                    let Some(entity) = self.clients.remove(&net_id) else {
                        warn!("[tick {}] Disconnect for unknown client {}", tick, net_id);
                        continue;
                    };
                    self.unanswered.retain(|id| *id != net_id);
                    aoi.remove_entity(registry, sink, entity, tick)?;
                    locator.remove(entity);
                    registry.despawn(entity);
                    info!("[tick {}] Client {} disconnected, removed {}", tick, net_id, entity);
                    report.disconnected.push(net_id);
                }
            }
        }

        Ok(report)
    }

    fn admit<S: MessageSink<ServerMessage>>(
        &mut self,
        net_id: NetworkId,
        registry: &mut Registry,
        locator: &mut SpatialLocator,
        sink: &mut S,
        tick: TickNum,
    ) -> Entity {
        let position = self.spawn_point;
        let model_bounds = BoundingBox::centered(CLIENT_HALF_EXTENT, CLIENT_HEIGHT);
        let bounds = BoundingBox::model_to_world(&model_bounds, &position);

        let entity = registry.spawn();
        registry.positions.insert(entity, position);
        registry
            .previous_positions
            .insert(entity, PreviousPosition::from(position));
        registry.velocities.insert(entity, Velocity::default());
        registry.inputs.insert(entity, Input::default());
        registry.rotations.insert(entity, Rotation::default());
        registry.collisions.insert(entity, Collision { model_bounds });
        registry.bounding_boxes.insert(entity, bounds);
        registry.names.insert(
            entity,
            Name {
                name: format!("Player {}", net_id),
            },
        );
        registry.sprites.insert(
            entity,
            Sprite {
                numeric_id: CLIENT_SPRITE,
            },
        );
        registry.interactions.insert(
            entity,
            Interaction {
                supported: vec![InteractionType::Talk, InteractionType::Inspect],
            },
        );
        registry.entity_types.insert(entity, EntityType::ClientEntity);
        registry.clients.insert(entity, ClientSimData::new(net_id));
        // Forces an AOI pass for the newcomer this tick
        registry.position_changed.insert(entity, ());

        locator.insert_or_update(entity, bounds);
        self.clients.insert(net_id, entity);
        self.respond(net_id, entity, registry, sink, tick);

        entity
    }

    /// Send the ConnectionResponse, queueing a retry if the sink refuses it
    fn respond<S: MessageSink<ServerMessage>>(
        &mut self,
        net_id: NetworkId,
        entity: Entity,
        registry: &Registry,
        sink: &mut S,
        tick: TickNum,
    ) {
        let position = registry.positions.get(entity).copied().unwrap_or(self.spawn_point);
        let response = ServerMessage::ConnectionResponse {
            tick_num: tick,
            entity,
            position,
        };
        if let Err(e) = sink.send(net_id, response) {
            debug!("[tick {}] Connection response to {} deferred: {}", tick, net_id, e);
            self.unanswered.push(net_id);
        }
    }
}

impl Default for ClientConnectionSystem {
    fn default() -> Self {
        Self::new(Position::default())
    }
}
