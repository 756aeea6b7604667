//! Client-side prediction, reconciliation, and remote entity replication

pub mod input_history;
pub mod predictor;
pub mod remote;
pub mod simulation;
