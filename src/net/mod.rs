pub mod aoi;
pub mod protocol;
pub mod queue;
pub mod receiver;
pub mod replication;
pub mod sink;
pub mod tick_sync;
