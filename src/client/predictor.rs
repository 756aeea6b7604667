//! Client-side prediction and server reconciliation
//!
//! The client runs its own entity ahead of the server using the same
//! movement step. When the server's state for tick T arrives, the local
//! state is overwritten with it and every input after T is replayed, which
//! brings the prediction back in line without a snap.

use tracing::{debug, error, warn};

use crate::client::input_history::InputHistory;
use crate::config::ClientConfig;
use crate::game::components::{Input, Position, Velocity};
use crate::game::systems::movement;
use crate::game::tick_clock::{tick_delta, TickNum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PredictionError {
    #[error("authoritative tick {tick} is ahead of predicted tick {latest}")]
    FutureTick { tick: TickNum, latest: TickNum },
    #[error("authoritative tick {tick} is not newer than {last}")]
    StaleTick { tick: TickNum, last: TickNum },
    #[error("input for tick {tick} is no longer in the history")]
    InputHistoryExhausted { tick: TickNum },
}

/// Result of a successful reconciliation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation {
    /// Ticks re-simulated after the authoritative one
    pub replayed: u32,
    /// How far the corrected prediction moved from the old one
    pub correction: f32,
    /// The server is still holding this input through the latest predicted
    /// tick; the client's own held input never reached it and must be resent
    pub missed_input: Option<Input>,
}

#[derive(Debug, Clone)]
pub struct Predictor {
    history: InputHistory,
    timestep: f32,
    position: Position,
    velocity: Velocity,
    /// First tick this entity existed on; earlier ticks replay as idle
    origin: TickNum,
    /// Last tick simulated locally
    latest: TickNum,
    last_authoritative: Option<TickNum>,
}

impl Predictor {
    /// Start predicting from `position`, with `first_tick` the next tick to run
    pub fn new(config: &ClientConfig, position: Position, first_tick: TickNum) -> Self {
        Self {
            history: InputHistory::new(config.input_history_length),
            timestep: config.timestep,
            position,
            velocity: Velocity::default(),
            origin: first_tick,
            latest: first_tick.wrapping_sub(1),
            last_authoritative: None,
        }
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.position
    }

    #[inline]
    pub fn velocity(&self) -> Velocity {
        self.velocity
    }

    /// Last tick that has been predicted
    #[inline]
    pub fn latest_tick(&self) -> TickNum {
        self.latest
    }

    /// Run `tick` locally with `input` and remember the input for replay
    pub fn predict(&mut self, tick: TickNum, input: Input) {
        self.history.record(tick, input);
        movement::step(&mut self.position, &mut self.velocity, &input, self.timestep);
        self.latest = tick;
    }

    /// Adopt the server's state for `tick` and replay everything after it
    ///
    /// When the server reports a different input for `tick` than was
    /// predicted, a change was lost on the way. The ticks that were
    /// predicted with the lost input are replayed with the server's instead,
    /// since that is what the server will run for them.
    ///
    /// Nothing is modified when an error is returned.
    pub fn reconcile(
        &mut self,
        tick: TickNum,
        position: Position,
        velocity: Velocity,
        input: Option<Input>,
    ) -> Result<Reconciliation, PredictionError> {
        if let Some(last) = self.last_authoritative {
            if tick_delta(tick, last) <= 0 {
                debug!("Discarding stale update for tick {} (have {})", tick, last);
                return Err(PredictionError::StaleTick { tick, last });
            }
        }

        let lead = tick_delta(self.latest, tick);
        if lead < 0 {
            error!(
                "Received update for tick {} while only predicted up to {}",
                tick, self.latest
            );
            return Err(PredictionError::FutureTick {
                tick,
                latest: self.latest,
            });
        }

        let mut replay = self.replay_inputs(tick, lead as u32)?;

        let mut missed_input = None;
        if let (Some(server_input), Some(predicted)) = (input, self.input_at(tick)) {
            if server_input != predicted {
                let lost_run = replay.iter().take_while(|i| **i == predicted).count();
                for (offset, slot) in replay.iter_mut().take(lost_run).enumerate() {
                    *slot = server_input;
                    self.history
                        .record(tick.wrapping_add(offset as u32 + 1), server_input);
                }
                if lost_run == replay.len() {
                    missed_input = Some(server_input);
                }
                debug!(
                    "Server held a different input on tick {}, replaying {} ticks with it",
                    tick, lost_run
                );
            }
        }

        let before = self.position;
        self.position = position;
        self.velocity = velocity;
        for input in &replay {
            movement::step(&mut self.position, &mut self.velocity, input, self.timestep);
        }
        self.last_authoritative = Some(tick);

        Ok(Reconciliation {
            replayed: replay.len() as u32,
            correction: before.as_vec3().distance_sq_to(self.position.as_vec3()).sqrt(),
            missed_input,
        })
    }

    /// Input predicted on `tick`; ticks before the entity existed are idle
    fn input_at(&self, tick: TickNum) -> Option<Input> {
        if tick_delta(tick, self.origin) < 0 {
            return Some(Input::default());
        }
        self.history.get(tick)
    }

    /// Inputs for `tick+1 ..= tick+count`, in order
    fn replay_inputs(&self, tick: TickNum, count: u32) -> Result<Vec<Input>, PredictionError> {
        (1..=count)
            .map(|offset| {
                let t = tick.wrapping_add(offset);
                self.input_at(t).ok_or_else(|| {
                    warn!("Cannot replay from tick {}: input for {} evicted", tick, t);
                    PredictionError::InputHistoryExhausted { tick: t }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::components::{InputState, InputType};

    fn right() -> Input {
        Input::default().with(InputType::Right, InputState::Pressed)
    }

    fn predictor() -> Predictor {
        Predictor::new(&ClientConfig::default(), Position::default(), 100)
    }

    #[test]
    fn test_matching_authority_needs_no_correction() {
        let mut local = predictor();
        for tick in 100..110 {
            local.predict(tick, right());
        }
        let predicted = local.position();

        let (p, v) = server_state_at(104);
        let r = local.reconcile(104, p, v, None).unwrap();
        assert_eq!(r.replayed, 5);
        assert!(r.correction < 1e-3);
        assert!(local.position().as_vec3().approx_eq(predicted.as_vec3(), 1e-3));

        // Same tick again is stale
        let err = local.reconcile(104, p, v, None).unwrap_err();
        assert_eq!(err, PredictionError::StaleTick { tick: 104, last: 104 });
    }

    fn server_state_at(tick: TickNum) -> (Position, Velocity) {
        let mut server = predictor();
        for t in 100..=tick {
            server.predict(t, right());
        }
        (server.position(), server.velocity())
    }

    #[test]
    fn test_divergence_converges_after_replay() {
        let mut local = predictor();
        for tick in 100..110 {
            local.predict(tick, right());
        }
        let predicted = local.position();

        // Server held the entity still until 103
        let blocked = Position::new(0.0, 0.0, 0.0);
        let r = local.reconcile(103, blocked, Velocity::default(), None).unwrap();
        assert_eq!(r.replayed, 6);
        assert!(r.correction > 0.0);
        assert!(local.position().x < predicted.x);
        assert!(local.position().x > 0.0);
        assert_eq!(local.latest_tick(), 109);
    }

    #[test]
    fn test_future_tick_rejected() {
        let mut local = predictor();
        local.predict(100, right());
        let before = local.position();
        let err = local
            .reconcile(101, Position::new(9.0, 9.0, 0.0), Velocity::default(), None)
            .unwrap_err();
        assert_eq!(err, PredictionError::FutureTick { tick: 101, latest: 100 });
        assert_eq!(local.position(), before);
    }

    #[test]
    fn test_history_exhausted() {
        let mut local = predictor();
        for tick in 100..130 {
            local.predict(tick, right());
        }
        let err = local
            .reconcile(102, Position::default(), Velocity::default(), None)
            .unwrap_err();
        assert!(matches!(err, PredictionError::InputHistoryExhausted { .. }));
    }

    #[test]
    fn test_ticks_before_origin_replay_idle() {
        let mut local = predictor();
        local.predict(100, Input::default());
        let r = local
            .reconcile(98, Position::new(5.0, 0.0, 0.0), Velocity::default(), None)
            .unwrap();
        assert_eq!(r.replayed, 2);
        assert_eq!(local.position(), Position::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_lost_input_replayed_with_server_input() {
        let mut local = predictor();
        // Idle, then a change to Right on 103 that the server never applied
        for tick in 100..103 {
            local.predict(tick, Input::default());
        }
        for tick in 103..108 {
            local.predict(tick, right());
        }

        let r = local
            .reconcile(104, Position::default(), Velocity::default(), Some(Input::default()))
            .unwrap();
        assert_eq!(r.replayed, 3);
        assert_eq!(r.missed_input, Some(Input::default()));
        // Server stood still through 107, and so does the replay
        assert_eq!(local.position(), Position::default());
    }

    #[test]
    fn test_later_change_survives_lost_input() {
        let mut local = predictor();
        let up = Input::default().with(InputType::Up, InputState::Pressed);
        local.predict(100, right());
        local.predict(101, right());
        local.predict(102, up);

        let r = local
            .reconcile(100, Position::default(), Velocity::default(), Some(Input::default()))
            .unwrap();
        // Only 101 was predicted with the lost input; 102's change still stands
        assert_eq!(r.missed_input, None);
        assert_eq!(local.position().x, 0.0);
        assert!(local.position().y > 0.0);
    }
}
