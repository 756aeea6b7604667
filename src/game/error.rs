use thiserror::Error;

use crate::game::registry::Entity;

/// Broken simulation invariants. Any of these aborts the current tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// A reverse AOI entry that symmetry guarantees was not there
    #[error("entity {subject} missing from AOI list of {observer}")]
    MissingAoiEntry { observer: Entity, subject: Entity },

    /// An entity was about to be announced twice to the same client
    #[error("entity {subject} already in AOI list of {observer}")]
    DuplicateAoiEntry { observer: Entity, subject: Entity },

    /// A component the AOI or replication path depends on is absent
    #[error("entity {entity} has no {component} component")]
    MissingComponent {
        entity: Entity,
        component: &'static str,
    },
}

impl SimulationError {
    pub fn missing(entity: Entity, component: &'static str) -> Self {
        SimulationError::MissingComponent { entity, component }
    }
}
