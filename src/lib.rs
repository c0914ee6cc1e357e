// Public API for integration tests and potential library usage

pub mod api;
pub mod app;
pub mod audience;
pub mod auth;
pub mod clock;
pub mod config;
pub mod protocol;
pub mod stage;
pub mod state;
pub mod store;
pub mod tally;
pub mod tasks;
pub mod types;
pub mod view;
pub mod ws;
