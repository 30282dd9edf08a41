// Public API for the relay binary, participating clients and integration tests

pub mod app;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod state;
pub mod types;
pub mod ws;
