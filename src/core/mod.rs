//! Installer infrastructure: settings, context, locking, state and output.

pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod output;
pub mod state;
