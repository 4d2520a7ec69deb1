//! Bluetooth functionality for the Idasen Desk Bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, and receiving height notifications from the desk.

pub mod adapter;
pub mod connection;
pub mod constants;
pub mod device;
pub mod notification;
pub mod protocol;
pub mod scanner;
pub mod types;

// Re-export types that should be publicly accessible
pub use adapter::DeskAdapter;
pub use connection::{ConnectionManager, RetryPolicy};
pub use device::BluestDesk;
pub use notification::NotificationHandler;
pub use protocol::{HeightSample, MotionCommand};
pub use scanner::discover_desks;
pub use types::{DiscoveredDesk, LinkState};
