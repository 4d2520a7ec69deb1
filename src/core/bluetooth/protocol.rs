//! Desk wire format
//! Decodes height/speed notifications and encodes motion commands.

use serde::Serialize;

use crate::core::bluetooth::constants::{
    COMMAND_DOWN, COMMAND_PACKET_SIZE, COMMAND_STOP, COMMAND_UP, HEIGHT_PACKET_SIZE,
    HUMAN_HEIGHT_OFFSET_MM,
};
use crate::core::error::DeskError;

/// Motion commands understood by the desk firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionCommand {
    /// Nudge the desk up (71)
    Up,
    /// Nudge the desk down (70)
    Down,
    /// Stop moving (255)
    Stop,
}

impl MotionCommand {
    /// Raw command code
    pub fn code(&self) -> u16 {
        match self {
            Self::Up => COMMAND_UP,
            Self::Down => COMMAND_DOWN,
            Self::Stop => COMMAND_STOP,
        }
    }

    /// Convert the command to its byte representation
    pub fn to_bytes(&self) -> [u8; COMMAND_PACKET_SIZE] {
        self.code().to_le_bytes()
    }
}

/// One height/speed reading
///
/// Height is in machine millimetres, 0 being the lowest position the desk can reach.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct HeightSample {
    pub height_mm: f64,
    pub speed_mm_s: f64,
}

impl HeightSample {
    pub fn new(height_mm: f64, speed_mm_s: f64) -> Self {
        Self { height_mm, speed_mm_s }
    }

    /// Height of the desk top above the floor
    pub fn human_height_mm(&self) -> f64 {
        self.height_mm + HUMAN_HEIGHT_OFFSET_MM
    }

    pub fn is_stationary(&self) -> bool {
        self.speed_mm_s == 0.0
    }
}

/// Decodes a 4 byte record: u16 LE height in 0.1 mm, i16 LE speed in 0.01 mm/s
pub fn decode(raw: &[u8]) -> Result<HeightSample, DeskError> {
    let record: [u8; HEIGHT_PACKET_SIZE] = raw
        .try_into()
        .map_err(|_| DeskError::MalformedPayload { len: raw.len() })?;

    let height_raw = u16::from_le_bytes([record[0], record[1]]);
    let speed_raw = i16::from_le_bytes([record[2], record[3]]);

    Ok(HeightSample {
        height_mm: f64::from(height_raw) / 10.0,
        speed_mm_s: f64::from(speed_raw) / 100.0,
    })
}

/// Encodes a motion command for the command characteristic
pub fn encode_command(command: MotionCommand) -> [u8; COMMAND_PACKET_SIZE] {
    command.to_bytes()
}

#[cfg(test)]
pub(crate) fn encode_sample(height_mm: f64, speed_mm_s: f64) -> Vec<u8> {
    let height_raw = (height_mm * 10.0).round() as u16;
    let speed_raw = (speed_mm_s * 100.0).round() as i16;
    let mut raw = height_raw.to_le_bytes().to_vec();
    raw.extend_from_slice(&speed_raw.to_le_bytes());
    raw
}
