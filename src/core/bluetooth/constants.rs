//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, timeouts, and other configuration values.

use uuid::Uuid;

/// Advertised names of supported desks contain this
pub const DESK_NAME_FRAGMENT: &str = "Desk";

/// Linak control service (holds the command characteristic)
pub const UUID_CONTROL_SERVICE: Uuid = Uuid::from_u128(0x99fa0001_338a_1024_8a49_009c0215f78a);

/// Linak position service (holds the height characteristic)
pub const UUID_POSITION_SERVICE: Uuid = Uuid::from_u128(0x99fa0020_338a_1024_8a49_009c0215f78a);

/// Height/speed characteristic, readable and notifying
pub const UUID_HEIGHT_CHAR: Uuid = Uuid::from_u128(0x99fa0021_338a_1024_8a49_009c0215f78a);

/// Command characteristic, written with 2-byte motion codes
pub const UUID_COMMAND_CHAR: Uuid = Uuid::from_u128(0x99fa0002_338a_1024_8a49_009c0215f78a);

/// Reference input characteristic
pub const UUID_REFERENCE_INPUT_CHAR: Uuid = Uuid::from_u128(0x99fa0031_338a_1024_8a49_009c0215f78a);

/// Height/speed record size in bytes
pub const HEIGHT_PACKET_SIZE: usize = 4;

/// Command record size in bytes
pub const COMMAND_PACKET_SIZE: usize = 2;

/// Raw command codes, sent as little-endian u16
pub const COMMAND_UP: u16 = 71;
pub const COMMAND_DOWN: u16 = 70;
pub const COMMAND_STOP: u16 = 255;

/// Machine height 0 is this many millimetres above the floor
pub const HUMAN_HEIGHT_OFFSET_MM: f64 = 620.0;

/// Attempts made by the initial connect before giving up
pub const MAX_CONNECT_RETRIES: u32 = 2;

/// Delay between initial connect attempts in seconds
pub const CONNECT_RETRY_DELAY_SECS: u64 = 30;

/// Delay between reconnect attempts once a session existed, in seconds
pub const RECONNECT_DELAY_SECS: u64 = 30;

/// Liveness monitor tick in seconds
pub const MONITOR_INTERVAL_SECS: u64 = 2;

/// Timeout for Bluetooth operations in seconds
pub const BLUETOOTH_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;

/// Buffered notifications between the radio and the event bus
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Height difference treated as "at target", in millimetres
pub const MOVE_TOLERANCE_MM: f64 = 20.0;

/// A directional command is re-sent every this many moving samples
pub const REDRIVE_EVERY_SAMPLES: u32 = 6;

/// Wait before the single stall retry, in seconds
pub const STALL_RETRY_DELAY_SECS: u64 = 2;

/// Safety timeout for one move, in seconds
pub const MOVE_TIMEOUT_SECS: u64 = 30;
