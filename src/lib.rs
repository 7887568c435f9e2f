pub mod app;
pub mod config;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod schema;
pub mod shared;
pub mod task;
pub mod tools;
pub mod watch;
