//! Applies client input requests on the tick they were made for

use tracing::debug;

use crate::game::constants::net::MAX_HELD_INPUT_LEAD;
use crate::game::registry::Registry;
use crate::game::systems::connection::ClientIndex;
use crate::game::tick_clock::{tick_delta, TickNum};
use crate::net::receiver::InputChangeRequest;

/// Counts from one input pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub applied: usize,
    pub held: usize,
    pub dropped: usize,
}

/// Holds early requests until their tick comes up
#[derive(Debug, Default)]
pub struct InputSystem {
    held: Vec<InputChangeRequest>,
}

impl InputSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Apply held requests that are now due, then this tick's arrivals
    ///
    /// - tick == current: applied through the tracked input path
    /// - tick > current: held (up to `MAX_HELD_INPUT_LEAD` ahead)
    /// - tick < current: dropped, and the client is flagged for a correction
    pub fn process_inputs(
        &mut self,
        registry: &mut Registry,
        clients: &ClientIndex,
        arrivals: Vec<InputChangeRequest>,
        current: TickNum,
    ) -> InputStats {
        let mut stats = InputStats::default();

        let mut batch = std::mem::take(&mut self.held);
        batch.extend(arrivals);
        // Stable: same-tick requests keep arrival order, so the last one wins
        batch.sort_by_key(|r| tick_delta(r.tick_num, current));

        for request in batch {
            let Some(&entity) = clients.get(&request.net_id) else {
                debug!("[tick {}] Input from unknown client {}", current, request.net_id);
                continue;
            };

            let lead = tick_delta(request.tick_num, current);
            if lead == 0 {
                registry.set_input(entity, request.input);
                stats.applied += 1;
            } else if lead > 0 {
                if lead as u32 > MAX_HELD_INPUT_LEAD {
                    debug!(
                        "[tick {}] Input from {} is {} ticks ahead, discarding",
                        current, request.net_id, lead
                    );
                    continue;
                }
                self.held.push(request);
                stats.held += 1;
            } else {
                debug!(
                    "[tick {}] Dropped input from {} for past tick {}",
                    current, request.net_id, request.tick_num
                );
                if let Some(client) = registry.clients.get_mut(entity) {
                    client.input_was_dropped = true;
                }
                stats.dropped += 1;
            }
        }

        stats
    }

    /// Forget held requests from a departed client
    pub fn forget(&mut self, net_id: crate::net::protocol::NetworkId) {
        self.held.retain(|r| r.net_id != net_id);
    }
}
