pub mod api;
pub mod bootstrap;
pub mod checklist;
pub mod cli;
pub mod config;
pub mod database;
pub mod node;
pub mod nonce;
pub mod render;
pub mod telemetry;
pub mod utils;
