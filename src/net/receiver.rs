//! Network receive thread
//!
//! A dedicated OS thread blocks on inbound frames from the transport,
//! decodes them, and routes each message type into its own bounded queue.
//! The simulation only ever pops from those queues.

use crossbeam_channel::Receiver;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

use crate::game::components::{Input, Position};
use crate::game::registry::Entity;
use crate::game::tick_clock::TickNum;
use crate::net::protocol::{
    decode, ClientMessage, DecodeError, EntityInit, MovementUpdate, NetworkId, ServerMessage,
};
use crate::net::queue::{MessageProducer, MessageQueue};

/// One undecoded message as handed over by the transport
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub net_id: NetworkId,
    pub payload: Vec<u8>,
}

/// Connection lifecycle events, pushed directly by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(NetworkId),
    Disconnected(NetworkId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub net_id: NetworkId,
    pub tick_num: TickNum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputChangeRequest {
    pub net_id: NetworkId,
    pub tick_num: TickNum,
    pub input: Input,
}

/// Decodes a frame and pushes it to the right queue
pub trait FrameRouter {
    fn route(&self, frame: RawFrame) -> Result<(), DecodeError>;
}

/// Spawn the blocking receive loop
///
/// Exits when every sender of `frames` has been dropped.
pub fn spawn_receiver<R>(frames: Receiver<RawFrame>, router: R) -> std::io::Result<JoinHandle<()>>
where
    R: FrameRouter + Send + 'static,
{
    thread::Builder::new()
        .name("net-recv".to_string())
        .spawn(move || {
            while let Ok(frame) = frames.recv() {
                let net_id = frame.net_id;
                if let Err(e) = router.route(frame) {
                    debug!("Dropping undecodable frame from {}: {}", net_id, e);
                }
            }
            info!("Receive loop exiting, transport closed");
        })
}

// ============================================================================
// Server side
// ============================================================================

/// Inbound queues consumed by the server simulation
pub struct ServerQueues {
    pub connections: MessageQueue<ConnectionEvent>,
    pub heartbeats: MessageQueue<Heartbeat>,
    pub inputs: MessageQueue<InputChangeRequest>,
}

impl ServerQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: MessageQueue::new("connections", capacity),
            heartbeats: MessageQueue::new("heartbeats", capacity),
            inputs: MessageQueue::new("inputs", capacity),
        }
    }

    pub fn producers(&self) -> ServerProducers {
        ServerProducers {
            connections: self.connections.producer(),
            heartbeats: self.heartbeats.producer(),
            inputs: self.inputs.producer(),
        }
    }
}

/// Producer handles for [`ServerQueues`], owned by the network side
#[derive(Clone)]
pub struct ServerProducers {
    pub connections: MessageProducer<ConnectionEvent>,
    pub heartbeats: MessageProducer<Heartbeat>,
    pub inputs: MessageProducer<InputChangeRequest>,
}

impl FrameRouter for ServerProducers {
    fn route(&self, frame: RawFrame) -> Result<(), DecodeError> {
        // Saturation is logged by the queue; the message is simply lost
        match decode::<ClientMessage>(&frame.payload)? {
            ClientMessage::Heartbeat { tick_num } => {
                let _ = self.heartbeats.push(Heartbeat {
                    net_id: frame.net_id,
                    tick_num,
                });
            }
            ClientMessage::InputChangeRequest { tick_num, input, .. } => {
                let _ = self.inputs.push(InputChangeRequest {
                    net_id: frame.net_id,
                    tick_num,
                    input,
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Client side
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionResponse {
    pub tick_num: TickNum,
    pub entity: Entity,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDelete {
    pub tick_num: TickNum,
    pub entity: Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickAdjustment {
    pub tick_num: TickNum,
    pub adjustment: i32,
}

/// Inbound queues consumed by the client simulation
pub struct ClientQueues {
    pub connection_responses: MessageQueue<ConnectionResponse>,
    pub entity_inits: MessageQueue<EntityInit>,
    pub entity_deletes: MessageQueue<EntityDelete>,
    pub movement_updates: MessageQueue<MovementUpdate>,
    pub tick_adjustments: MessageQueue<TickAdjustment>,
}

impl ClientQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            connection_responses: MessageQueue::new("connection_responses", capacity),
            entity_inits: MessageQueue::new("entity_inits", capacity),
            entity_deletes: MessageQueue::new("entity_deletes", capacity),
            movement_updates: MessageQueue::new("movement_updates", capacity),
            tick_adjustments: MessageQueue::new("tick_adjustments", capacity),
        }
    }

    pub fn producers(&self) -> ClientProducers {
        ClientProducers {
            connection_responses: self.connection_responses.producer(),
            entity_inits: self.entity_inits.producer(),
            entity_deletes: self.entity_deletes.producer(),
            movement_updates: self.movement_updates.producer(),
            tick_adjustments: self.tick_adjustments.producer(),
        }
    }

    /// Route an already-decoded message; used when no wire is involved
    pub fn push(&self, message: ServerMessage) {
        self.producers().dispatch(message);
    }
}

#[derive(Clone)]
pub struct ClientProducers {
    pub connection_responses: MessageProducer<ConnectionResponse>,
    pub entity_inits: MessageProducer<EntityInit>,
    pub entity_deletes: MessageProducer<EntityDelete>,
    pub movement_updates: MessageProducer<MovementUpdate>,
    pub tick_adjustments: MessageProducer<TickAdjustment>,
}

impl ClientProducers {
    fn dispatch(&self, message: ServerMessage) {
        let _ = match message {
            ServerMessage::ConnectionResponse {
                tick_num,
                entity,
                position,
            } => self.connection_responses.push(ConnectionResponse {
                tick_num,
                entity,
                position,
            }),
            ServerMessage::EntityInit(init) => self.entity_inits.push(init),
            ServerMessage::EntityDelete { tick_num, entity } => {
                self.entity_deletes.push(EntityDelete { tick_num, entity })
            }
            ServerMessage::MovementUpdate(update) => self.movement_updates.push(update),
            ServerMessage::TickAdjustment {
                tick_num,
                adjustment,
            } => self.tick_adjustments.push(TickAdjustment {
                tick_num,
                adjustment,
            }),
        };
    }
}

impl FrameRouter for ClientProducers {
    fn route(&self, frame: RawFrame) -> Result<(), DecodeError> {
        self.dispatch(decode::<ServerMessage>(&frame.payload)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::components::{InputState, InputType};
    use crate::net::protocol::encode;
    use crossbeam_channel::bounded;

    fn frame<T: serde::Serialize>(net_id: NetworkId, message: &T) -> RawFrame {
        RawFrame {
            net_id,
            payload: encode(message).unwrap(),
        }
    }

    #[test]
    fn test_server_routing_overrides_net_id() {
        let queues = ServerQueues::new(8);
        let producers = queues.producers();
        let input = Input::default().with(InputType::Down, InputState::Pressed);

        producers
            .route(frame(
                5,
                &ClientMessage::InputChangeRequest {
                    tick_num: 10,
                    input,
                    net_id: 999,
                },
            ))
            .unwrap();
        producers
            .route(frame(5, &ClientMessage::Heartbeat { tick_num: 11 }))
            .unwrap();

        assert_eq!(
            queues.inputs.pop(),
            Some(InputChangeRequest {
                net_id: 5,
                tick_num: 10,
                input
            })
        );
        assert_eq!(
            queues.heartbeats.pop(),
            Some(Heartbeat {
                net_id: 5,
                tick_num: 11
            })
        );
    }

    #[test]
    fn test_receiver_thread_exits_on_close() {
        let queues = ServerQueues::new(8);
        let (tx, rx) = bounded(8);
        let handle = spawn_receiver(rx, queues.producers()).unwrap();

        tx.send(frame(1, &ClientMessage::Heartbeat { tick_num: 3 }))
            .unwrap();
        tx.send(RawFrame {
            net_id: 1,
            payload: vec![0xff],
        })
        .unwrap();
        drop(tx);
        handle.join().unwrap();

        assert_eq!(queues.heartbeats.drain().len(), 1);
        assert!(queues.inputs.is_empty());
    }

    #[test]
    fn test_client_routing() {
        let queues = ClientQueues::new(8);
        let producers = queues.producers();
        producers
            .route(frame(
                0,
                &ServerMessage::TickAdjustment {
                    tick_num: 4,
                    adjustment: -2,
                },
            ))
            .unwrap();
        queues.push(ServerMessage::EntityDelete {
            tick_num: 4,
            entity: Entity::new(9, 0),
        });

        assert_eq!(
            queues.tick_adjustments.pop(),
            Some(TickAdjustment {
                tick_num: 4,
                adjustment: -2
            })
        );
        assert_eq!(queues.entity_deletes.pop().map(|d| d.entity), Some(Entity::new(9, 0)));
    }
}
