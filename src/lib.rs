pub mod config;
pub mod engine;
pub mod model;
pub mod observability;
pub mod store;
pub mod sweeper;
pub mod wal;
