//! Keeps each client's tick a small, steady distance ahead of the server
//!
//! Every inbound message carries the tick the client produced it on. The
//! lead is that tick minus the server's current tick. A client whose lead
//! leaves `TICK_LEAD_MIN..=TICK_LEAD_MAX` is told to shift by
//! `TICK_LEAD_TARGET - lead`, after which it is left alone for
//! `TICK_ADJUSTMENT_COOLDOWN` ticks so the correction can take effect.

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::game::constants::net::{
    TICK_ADJUSTMENT_COOLDOWN, TICK_LEAD_MAX, TICK_LEAD_MIN, TICK_LEAD_TARGET,
};
use crate::game::tick_clock::{tick_delta, TickNum};
use crate::net::protocol::{NetworkId, ServerMessage};
use crate::net::receiver::Heartbeat;
use crate::net::sink::MessageSink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSyncStats {
    pub observed: usize,
    pub stale: usize,
    pub adjustments: usize,
}

#[derive(Debug, Default)]
pub struct TickSync {
    /// Tick of the last adjustment sent to each client
    last_adjustment: FxHashMap<NetworkId, TickNum>,
}

impl TickSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain heartbeats, counting the ones already behind the server
    ///
    /// A stale heartbeat carries nothing to apply, but its tick still
    /// tells us the client has fallen behind.
    pub fn process_heartbeats<S, I>(&mut self, heartbeats: I, current: TickNum, sink: &mut S) -> TickSyncStats
    where
        S: MessageSink<ServerMessage>,
        I: IntoIterator<Item = Heartbeat>,
    {
        let mut stats = TickSyncStats::default();
        for heartbeat in heartbeats {
            if tick_delta(heartbeat.tick_num, current) < 0 {
                debug!(
                    "[tick {}] Stale heartbeat from {} for tick {}",
                    current, heartbeat.net_id, heartbeat.tick_num
                );
                stats.stale += 1;
            }
            if self.observe(heartbeat.net_id, heartbeat.tick_num, current, sink).is_some() {
                stats.adjustments += 1;
            }
            stats.observed += 1;
        }
        stats
    }

    /// Check one message tick, sending an adjustment if the client drifted
    ///
    /// Returns the adjustment sent, if any.
    pub fn observe<S: MessageSink<ServerMessage>>(
        &mut self,
        net_id: NetworkId,
        message_tick: TickNum,
        current: TickNum,
        sink: &mut S,
    ) -> Option<i32> {
        let lead = tick_delta(message_tick, current) as i64;
        if (TICK_LEAD_MIN..=TICK_LEAD_MAX).contains(&lead) {
            return None;
        }

        if let Some(&last) = self.last_adjustment.get(&net_id) {
            if tick_delta(current, last) < TICK_ADJUSTMENT_COOLDOWN as i32 {
                trace!("[tick {}] Client {} lead {} (cooling down)", current, net_id, lead);
                return None;
            }
        }

        let adjustment = (TICK_LEAD_TARGET - lead).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        let message = ServerMessage::TickAdjustment {
            tick_num: current,
            adjustment,
        };
        // No cooldown unless the client was actually told
        if let Err(e) = sink.send(net_id, message) {
            debug!("[tick {}] Adjustment for client {} not sent: {}", current, net_id, e);
            return None;
        }
        debug!(
            "[tick {}] Client {} lead {}, adjusting by {}",
            current, net_id, lead, adjustment
        );
        self.last_adjustment.insert(net_id, current);
        Some(adjustment)
    }

    pub fn forget(&mut self, net_id: NetworkId) {
        self.last_adjustment.remove(&net_id);
    }
}
