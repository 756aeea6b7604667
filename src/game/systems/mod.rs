pub mod connection;
pub mod input;
pub mod movement;
