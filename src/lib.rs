//! Idasen Desk Bridge library
//! Keeps a Bluetooth sit/stand desk connected, moves it to preset heights
//! and runs a perpetual sit/stand schedule.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;

pub use commands::{ClientCommand, OutboundMessage, handle_message};
pub use config::{ConfigStore, DeskConfig};
pub use state::AppState;
