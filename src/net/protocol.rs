//! Wire messages and codec
//!
//! Every message carries the tick number it was produced on so the receiver
//! can reorder or discard it without cross-queue ordering.

use serde::{Deserialize, Serialize};

use crate::game::components::{
    EntityType, Input, Interaction, Name, Position, Rotation, Sprite, Velocity,
};
use crate::game::registry::Entity;
use crate::game::tick_clock::TickNum;

/// Transport-assigned client identifier
pub type NetworkId = u32;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Keep-alive carrying the client's current tick
    Heartbeat { tick_num: TickNum },
    /// Held input changed on `tick_num`
    ///
    /// `net_id` is overwritten by the receiver with the socket's id.
    InputChangeRequest {
        tick_num: TickNum,
        input: Input,
        net_id: NetworkId,
    },
}

impl ClientMessage {
    pub fn tick_num(&self) -> TickNum {
        match self {
            ClientMessage::Heartbeat { tick_num } => *tick_num,
            ClientMessage::InputChangeRequest { tick_num, .. } => *tick_num,
        }
    }
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    ConnectionResponse {
        tick_num: TickNum,
        entity: Entity,
        position: Position,
    },
    EntityInit(EntityInit),
    EntityDelete { tick_num: TickNum, entity: Entity },
    MovementUpdate(MovementUpdate),
    /// Shift the client's tick by `adjustment` (positive = run ahead)
    TickAdjustment { tick_num: TickNum, adjustment: i32 },
}

impl ServerMessage {
    pub fn tick_num(&self) -> TickNum {
        match self {
            ServerMessage::ConnectionResponse { tick_num, .. } => *tick_num,
            ServerMessage::EntityInit(init) => init.tick_num,
            ServerMessage::EntityDelete { tick_num, .. } => *tick_num,
            ServerMessage::MovementUpdate(update) => update.tick_num,
            ServerMessage::TickAdjustment { tick_num, .. } => *tick_num,
        }
    }

    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionResponse { .. } => "ConnectionResponse",
            ServerMessage::EntityInit(_) => "EntityInit",
            ServerMessage::EntityDelete { .. } => "EntityDelete",
            ServerMessage::MovementUpdate(_) => "MovementUpdate",
            ServerMessage::TickAdjustment { .. } => "TickAdjustment",
        }
    }
}

/// First-sight payload for an entity entering a client's AOI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInit {
    pub tick_num: TickNum,
    pub entity: Entity,
    pub name: Name,
    pub sprite: Sprite,
    pub position: Position,
    pub rotation: Rotation,
    pub interaction: Interaction,
    /// Lets the client tell players from world objects
    pub entity_type: EntityType,
}

/// Batched per-client movement state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementUpdate {
    pub tick_num: TickNum,
    /// Sorted by entity, one entry per entity
    pub entries: Vec<MovementState>,
}

/// State of one entity; only the broadcast fields are present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementState {
    pub entity: Entity,
    pub input: Option<Input>,
    pub position: Option<Position>,
    pub velocity: Option<Velocity>,
    pub rotation: Option<Rotation>,
}

impl MovementState {
    pub fn empty(entity: Entity) -> Self {
        Self {
            entity,
            input: None,
            position: None,
            velocity: None,
            rotation: None,
        }
    }
}

/// Encode a message using bincode's standard configuration
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::standard())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode's standard configuration
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
