//! Entities the client only sees, never predicts
//!
//! Init and Delete take effect as soon as they arrive. Movement for other
//! entities is buffered and applied once the replication tick reaches it,
//! which keeps remote motion smooth despite jitter in arrival times.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::game::components::{
    EntityType, Input, Interaction, Name, Position, Rotation, Sprite, Velocity,
};
use crate::game::registry::Entity;
use crate::game::tick_clock::{tick_delta, TickNum};
use crate::net::protocol::{EntityInit, MovementUpdate};

/// Last known state of one remote entity
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub entity_type: EntityType,
    pub name: Name,
    pub sprite: Sprite,
    pub interaction: Interaction,
    pub position: Position,
    pub rotation: Rotation,
    pub velocity: Velocity,
    pub input: Input,
}

#[derive(Debug, Clone)]
pub struct RemoteEntities {
    entities: FxHashMap<Entity, RemoteEntity>,
    pending: VecDeque<MovementUpdate>,
    /// Added to the current tick to get the replication tick; negative
    replication_offset: i32,
}

impl RemoteEntities {
    pub fn new(replication_offset: i32) -> Self {
        Self {
            entities: FxHashMap::default(),
            pending: VecDeque::new(),
            replication_offset,
        }
    }

    /// Tick whose state is currently being shown
    #[inline]
    pub fn replication_tick(&self, current: TickNum) -> TickNum {
        current.wrapping_add_signed(self.replication_offset)
    }

    #[inline]
    pub fn replication_offset(&self) -> i32 {
        self.replication_offset
    }

    /// Keep the replication tick in place while the client tick jumps
    pub fn apply_adjustment(&mut self, adjustment: i32) {
        self.replication_offset -= adjustment;
    }

    pub fn apply_init(&mut self, init: EntityInit) {
        trace!("Init {} '{}' at tick {}", init.entity, init.name.name, init.tick_num);
        self.entities.insert(
            init.entity,
            RemoteEntity {
                entity_type: init.entity_type,
                name: init.name,
                sprite: init.sprite,
                interaction: init.interaction,
                position: init.position,
                rotation: init.rotation,
                velocity: Velocity::default(),
                input: Input::default(),
            },
        );
    }

    pub fn apply_delete(&mut self, entity: Entity) -> bool {
        self.entities.remove(&entity).is_some()
    }

    /// Queue the entries of `update` that are not the local player
    pub fn buffer(&mut self, mut update: MovementUpdate, player: Option<Entity>) {
        if let Some(player) = player {
            update.entries.retain(|e| e.entity != player);
        }
        if !update.entries.is_empty() {
            self.pending.push_back(update);
        }
    }

    /// Apply every buffered update at or before the replication tick
    ///
    /// Returns how many updates were applied.
    pub fn advance(&mut self, current: TickNum) -> usize {
        let replication_tick = self.replication_tick(current);
        let mut applied = 0;

        while let Some(front) = self.pending.front() {
            if tick_delta(front.tick_num, replication_tick) > 0 {
                break;
            }
            let Some(update) = self.pending.pop_front() else {
                break;
            };
            for state in update.entries {
                let Some(remote) = self.entities.get_mut(&state.entity) else {
                    trace!("Movement for unknown {} at tick {}", state.entity, update.tick_num);
                    continue;
                };
                if let Some(input) = state.input {
                    remote.input = input;
                }
                if let Some(position) = state.position {
                    remote.position = position;
                }
                if let Some(velocity) = state.velocity {
                    remote.velocity = velocity;
                }
                if let Some(rotation) = state.rotation {
                    remote.rotation = rotation;
                }
            }
            applied += 1;
        }

        applied
    }

    pub fn get(&self, entity: Entity) -> Option<&RemoteEntity> {
        self.entities.get(&entity)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn pending_updates(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::MovementState;

    fn init(entity: Entity) -> EntityInit {
        EntityInit {
            tick_num: 0,
            entity,
            name: Name {
                name: "crate".to_string(),
            },
            sprite: Sprite { numeric_id: 3 },
            position: Position::default(),
            rotation: Rotation::default(),
            interaction: Interaction::default(),
            entity_type: EntityType::DynamicObject,
        }
    }

    fn moved_to(tick_num: TickNum, entity: Entity, x: f32) -> MovementUpdate {
        let mut state = MovementState::empty(entity);
        state.position = Some(Position::new(x, 0.0, 0.0));
        MovementUpdate {
            tick_num,
            entries: vec![state],
        }
    }

    #[test]
    fn test_updates_wait_for_replication_tick() {
        let mut remote = RemoteEntities::new(-10);
        let e = Entity::new(1, 0);
        remote.apply_init(init(e));
        remote.buffer(moved_to(20, e, 5.0), None);

        assert_eq!(remote.advance(29), 0);
        assert_eq!(remote.get(e).unwrap().position.x, 0.0);

        assert_eq!(remote.advance(30), 1);
        assert_eq!(remote.get(e).unwrap().position.x, 5.0);
        assert_eq!(remote.pending_updates(), 0);
    }

    #[test]
    fn test_init_keeps_entity_type() {
        let mut remote = RemoteEntities::new(-10);
        let object = Entity::new(1, 0);
        let player = Entity::new(2, 0);
        remote.apply_init(init(object));
        remote.apply_init(EntityInit {
            entity_type: EntityType::ClientEntity,
            ..init(player)
        });

        assert_eq!(remote.get(object).unwrap().entity_type, EntityType::DynamicObject);
        assert_eq!(remote.get(player).unwrap().entity_type, EntityType::ClientEntity);
    }

    #[test]
    fn test_adjustment_keeps_replication_tick() {
        let mut remote = RemoteEntities::new(-10);
        assert_eq!(remote.replication_tick(50), 40);
        remote.apply_adjustment(3);
        assert_eq!(remote.replication_tick(53), 40);
        remote.apply_adjustment(-2);
        assert_eq!(remote.replication_tick(51), 40);
    }

    #[test]
    fn test_player_entries_filtered_and_deletes_immediate() {
        let mut remote = RemoteEntities::new(-2);
        let player = Entity::new(0, 0);
        let other = Entity::new(1, 0);
        remote.apply_init(init(other));

        remote.buffer(moved_to(5, player, 1.0), Some(player));
        assert_eq!(remote.pending_updates(), 0);

        assert!(remote.apply_delete(other));
        assert!(remote.is_empty());
        assert!(!remote.apply_delete(other));
    }
}
