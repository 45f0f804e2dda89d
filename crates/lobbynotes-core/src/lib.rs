// Library root: re-exports all modules so integration tests and the binary
// can access the crate's public API.

pub mod cache;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod inspector;
pub mod payload;
pub mod player;
pub mod populator;
pub mod protocol;
pub mod reader;
pub mod recorder;
pub mod roster;
