//! Client simulation loop
//!
//! Drives the connection handshake, keeps the local tick ahead of the
//! server, predicts the player entity, and feeds remote entities.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::client::predictor::Predictor;
use crate::client::remote::RemoteEntities;
use crate::config::ClientConfig;
use crate::game::components::{Input, Position};
use crate::game::registry::Entity;
use crate::game::tick_clock::{tick_delta, TickNum};
use crate::net::protocol::{ClientMessage, NetworkId};
use crate::net::receiver::{ClientProducers, ClientQueues, ConnectionResponse};
use crate::net::sink::MessageSink;

/// Destination id for messages the client sends; the transport has only one peer
pub const SERVER_ID: NetworkId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    AwaitingConnectionResponse,
    Connected,
}

/// What one call to [`ClientSimulation::frame`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub ticks_run: u32,
    pub reconciliations: u32,
    pub remote_updates: usize,
}

pub struct ClientSimulation<S> {
    config: ClientConfig,
    queues: ClientQueues,
    sink: S,
    state: ConnectionState,
    connect_started: Option<Instant>,
    current_tick: TickNum,
    player: Option<Entity>,
    predictor: Option<Predictor>,
    remote: RemoteEntities,
    /// Last input reported to the server
    last_sent_input: Input,
    /// Tick adjustment not yet absorbed; only ever negative between frames
    pending_adjustment: i32,
}

impl<S: MessageSink<ClientMessage>> ClientSimulation<S> {
    pub fn new(config: ClientConfig, sink: S) -> Self {
        let queues = ClientQueues::new(config.queue_capacity);
        let remote = RemoteEntities::new(config.replication_offset);
        Self {
            config,
            queues,
            sink,
            state: ConnectionState::Disconnected,
            connect_started: None,
            current_tick: 0,
            player: None,
            predictor: None,
            remote,
            last_sent_input: Input::default(),
            pending_adjustment: 0,
        }
    }

    /// Producer handles for the client's receive thread
    pub fn producers(&self) -> ClientProducers {
        self.queues.producers()
    }

    /// Start the handshake; ignored unless disconnected
    pub fn connect(&mut self, now: Instant) {
        if self.state != ConnectionState::Disconnected {
            return;
        }
        info!("Connecting to server");
        self.state = ConnectionState::AwaitingConnectionResponse;
        self.connect_started = Some(now);
    }

    /// The transport reported a failure; drop everything and start over
    pub fn connection_error(&mut self) {
        warn!("Connection lost at tick {}", self.current_tick);
        self.reset();
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.connect_started = None;
        self.current_tick = 0;
        self.player = None;
        self.predictor = None;
        self.remote = RemoteEntities::new(self.config.replication_offset);
        self.last_sent_input = Input::default();
        self.pending_adjustment = 0;
        // Anything still queued belongs to the old session
        self.queues.connection_responses.drain();
        self.queues.entity_inits.drain();
        self.queues.entity_deletes.drain();
        self.queues.movement_updates.drain();
        self.queues.tick_adjustments.drain();
    }

    fn accept(&mut self, response: ConnectionResponse) {
        self.current_tick = response
            .tick_num
            .wrapping_add(self.config.initial_tick_offset);
        self.player = Some(response.entity);
        self.predictor = Some(Predictor::new(
            &self.config,
            response.position,
            self.current_tick,
        ));
        self.state = ConnectionState::Connected;
        self.connect_started = None;
        info!(
            "Connected as {} (server tick {}, local tick {})",
            response.entity, response.tick_num, self.current_tick
        );
    }

    /// Run one frame: handshake progress, inbound messages, and every tick
    /// that is due
    ///
    /// `held` is the input currently held by the player.
    pub fn frame(&mut self, now: Instant, held: Input) -> FrameReport {
        let mut report = FrameReport::default();

        if self.state == ConnectionState::AwaitingConnectionResponse {
            if let Some(response) = self.queues.connection_responses.pop() {
                self.accept(response);
            } else if self.handshake_expired(now) {
                warn!(
                    "No connection response after {:.1}s, giving up",
                    self.config.connection_response_wait_s
                );
                self.reset();
            }
        }
        if self.state != ConnectionState::Connected {
            return report;
        }

        for adjustment in self.queues.tick_adjustments.drain() {
            debug!(
                "[tick {}] Server adjusted tick by {}",
                self.current_tick, adjustment.adjustment
            );
            self.pending_adjustment += adjustment.adjustment;
            self.remote.apply_adjustment(adjustment.adjustment);
        }

        // One tick per frame, shifted by pending adjustments. A backward
        // shift larger than a frame carries over into the following frames.
        let due = 1 + self.pending_adjustment;
        self.pending_adjustment = due.min(0);
        let target = self.current_tick.wrapping_add(due.max(0) as u32);

        self.receive_world(&mut report);

        while tick_delta(target, self.current_tick) > 0 {
            self.run_tick(held);
            report.remote_updates += self.remote.advance(self.current_tick);
            self.current_tick = self.current_tick.wrapping_add(1);
            report.ticks_run += 1;
        }

        report
    }

    fn handshake_expired(&self, now: Instant) -> bool {
        let wait = Duration::from_secs_f32(self.config.connection_response_wait_s);
        self.connect_started
            .is_some_and(|started| now.saturating_duration_since(started) >= wait)
    }

    fn receive_world(&mut self, report: &mut FrameReport) {
        for init in self.queues.entity_inits.drain() {
            if Some(init.entity) == self.player {
                continue;
            }
            self.remote.apply_init(init);
        }
        for delete in self.queues.entity_deletes.drain() {
            self.remote.apply_delete(delete.entity);
        }

        for update in self.queues.movement_updates.drain() {
            let own = self.player.and_then(|player| {
                update.entries.iter().find(|e| e.entity == player).cloned()
            });
            if let (Some(state), Some(predictor)) = (own, self.predictor.as_mut()) {
                if let (Some(position), Some(velocity)) = (state.position, state.velocity) {
                    // Rejections are logged by the predictor
                    if let Ok(result) =
                        predictor.reconcile(update.tick_num, position, velocity, state.input)
                    {
                        if let Some(missed) = result.missed_input {
                            // Forces the held input out again on the next tick
                            self.last_sent_input = missed;
                        }
                        report.reconciliations += 1;
                    }
                }
            }
            self.remote.buffer(update, self.player);
        }
    }

    fn run_tick(&mut self, held: Input) {
        let tick = self.current_tick;

        let changed = held != self.last_sent_input;
        let message = if changed {
            ClientMessage::InputChangeRequest {
                tick_num: tick,
                input: held,
                net_id: SERVER_ID,
            }
        } else {
            ClientMessage::Heartbeat { tick_num: tick }
        };
        match self.sink.send(SERVER_ID, message) {
            Ok(()) if changed => self.last_sent_input = held,
            Ok(()) => {}
            // An unsent change goes out again next tick
            Err(e) => debug!("[tick {}] Send to server failed: {}", tick, e),
        }

        if let Some(predictor) = self.predictor.as_mut() {
            predictor.predict(tick, held);
        }
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline]
    pub fn current_tick(&self) -> TickNum {
        self.current_tick
    }

    pub fn player(&self) -> Option<Entity> {
        self.player
    }

    /// Predicted position of the player entity
    pub fn player_position(&self) -> Option<Position> {
        self.predictor.as_ref().map(|p| p.position())
    }

    pub fn remote(&self) -> &RemoteEntities {
        &self.remote
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::components::{InputState, InputType};
    use crate::net::protocol::ServerMessage;
    use crate::net::sink::RecordingSink;

    fn client() -> ClientSimulation<RecordingSink<ClientMessage>> {
        ClientSimulation::new(ClientConfig::default(), RecordingSink::new())
    }

    fn respond(client: &ClientSimulation<RecordingSink<ClientMessage>>, tick_num: TickNum) {
        client
            .producers()
            .connection_responses
            .push(ConnectionResponse {
                tick_num,
                entity: Entity::new(0, 0),
                position: Position::new(1.0, 2.0, 0.0),
            })
            .unwrap();
    }

    #[test]
    fn test_handshake_sets_tick_ahead_of_server() {
        let mut c = client();
        let now = Instant::now();
        assert_eq!(c.frame(now, Input::default()).ticks_run, 0);

        c.connect(now);
        assert_eq!(c.state(), ConnectionState::AwaitingConnectionResponse);
        respond(&c, 100);

        let report = c.frame(now, Input::default());
        assert_eq!(c.state(), ConnectionState::Connected);
        assert_eq!(report.ticks_run, 1);
        assert_eq!(c.current_tick(), 106);
        assert_eq!(
            c.sink().sent(),
            &[(SERVER_ID, ClientMessage::Heartbeat { tick_num: 105 })]
        );
    }

    #[test]
    fn test_handshake_times_out() {
        let mut c = client();
        let start = Instant::now();
        c.connect(start);
        c.frame(start + Duration::from_secs(1), Input::default());
        assert_eq!(c.state(), ConnectionState::AwaitingConnectionResponse);

        c.frame(start + Duration::from_secs(6), Input::default());
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_input_change_sent_once() {
        let mut c = client();
        let now = Instant::now();
        c.connect(now);
        respond(&c, 0);
        let right = Input::default().with(InputType::Right, InputState::Pressed);

        c.frame(now, right);
        c.frame(now, right);
        let sent: Vec<_> = c.sink_mut().take().into_iter().map(|(_, m)| m).collect();
        assert!(matches!(sent[0], ClientMessage::InputChangeRequest { tick_num: 5, .. }));
        assert_eq!(sent[1], ClientMessage::Heartbeat { tick_num: 6 });
        assert!(c.player_position().unwrap().x > 1.0);
    }

    #[test]
    fn test_tick_adjustments_change_ticks_run() {
        let mut c = client();
        let now = Instant::now();
        c.connect(now);
        respond(&c, 0);
        c.frame(now, Input::default());
        let offset = c.remote().replication_offset();

        let producers = c.producers();
        producers.tick_adjustments.push(crate::net::receiver::TickAdjustment {
            tick_num: 1,
            adjustment: 2,
        })
        .unwrap();
        assert_eq!(c.frame(now, Input::default()).ticks_run, 3);
        assert_eq!(c.remote().replication_offset(), offset - 2);

        producers.tick_adjustments.push(crate::net::receiver::TickAdjustment {
            tick_num: 2,
            adjustment: -1,
        })
        .unwrap();
        assert_eq!(c.frame(now, Input::default()).ticks_run, 0);
        assert_eq!(c.frame(now, Input::default()).ticks_run, 1);

        // A large backward shift is spread over several frames
        producers.tick_adjustments.push(crate::net::receiver::TickAdjustment {
            tick_num: 3,
            adjustment: -3,
        })
        .unwrap();
        let ran: Vec<u32> = (0..4).map(|_| c.frame(now, Input::default()).ticks_run).collect();
        assert_eq!(ran, vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_connection_error_resets() {
        let mut c = client();
        let now = Instant::now();
        c.connect(now);
        respond(&c, 10);
        c.frame(now, Input::default());
        c.producers()
            .entity_inits
            .push(crate::net::protocol::EntityInit {
                tick_num: 10,
                entity: Entity::new(4, 0),
                name: Default::default(),
                sprite: Default::default(),
                position: Position::default(),
                rotation: Default::default(),
                interaction: Default::default(),
                entity_type: crate::game::components::EntityType::ClientEntity,
            })
            .unwrap();
        c.frame(now, Input::default());
        assert_eq!(c.remote().len(), 1);

        c.connection_error();
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert!(c.player().is_none());
        assert!(c.remote().is_empty());
        assert_eq!(c.current_tick(), 0);
    }

    #[test]
    fn test_own_update_reconciles() {
        let mut c = client();
        let now = Instant::now();
        c.connect(now);
        respond(&c, 0);
        for _ in 0..4 {
            c.frame(now, Input::default());
        }
        // Predicted ticks 5..=8; server says it was at (50, 2) on tick 6
        let mut state = crate::net::protocol::MovementState::empty(Entity::new(0, 0));
        state.position = Some(Position::new(50.0, 2.0, 0.0));
        state.velocity = Some(Default::default());
        c.queues.push(
            ServerMessage::MovementUpdate(crate::net::protocol::MovementUpdate {
                tick_num: 6,
                entries: vec![state],
            }),
        );
        let report = c.frame(now, Input::default());
        assert_eq!(report.reconciliations, 1);
        assert_eq!(c.player_position(), Some(Position::new(50.0, 2.0, 0.0)));
        assert_eq!(c.remote().pending_updates(), 0);
    }
}
