pub mod components;
pub mod constants;
pub mod error;
pub mod performance;
pub mod registry;
pub mod simulation;
pub mod spatial;
pub mod systems;
pub mod tick_clock;
