//! ANT+ FE-C control pages.
//!
//! Each command becomes one 8-byte acknowledged data page.

use super::types::{ControlCommand, MachineClass, TrainerError};

/// FE-C data page length.
pub const PAGE_LEN: usize = 8;

/// Basic resistance control (Page 48 / 0x30)
pub fn set_basic_resistance(resistance_percent: f64) -> [u8; PAGE_LEN] {
    let resistance = (resistance_percent / 0.5).round().clamp(0.0, 200.0) as u8;
    [0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, resistance]
}

/// Target power control (Page 49 / 0x31)
pub fn set_target_power(power_watts: f64) -> [u8; PAGE_LEN] {
    let power_quarter_watts = (power_watts * 4.0).round().clamp(0.0, f64::from(u16::MAX)) as u16;
    let bytes = power_quarter_watts.to_le_bytes();
    [0x31, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, bytes[0], bytes[1]]
}

/// Track resistance (grade/slope) simulation (Page 51 / 0x33)
pub fn set_track_resistance(grade_percent: f64, rolling_resistance: f64) -> [u8; PAGE_LEN] {
    // Grade: -200% to +200% with 0.01% resolution, offset by 200%
    let grade_encoded = ((grade_percent + 200.0) / 0.01)
        .round()
        .clamp(0.0, 40_000.0) as u16;
    let grade_bytes = grade_encoded.to_le_bytes();

    let rr = (rolling_resistance / 0.00005).round().clamp(0.0, 255.0) as u8;

    [
        0x33,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        grade_bytes[0],
        grade_bytes[1],
        rr,
    ]
}

/// Translate a command into an FE-C page.
pub fn encode(command: &ControlCommand) -> Result<[u8; PAGE_LEN], TrainerError> {
    match command {
        ControlCommand::SetPowerTarget { watts } => Ok(set_target_power(*watts)),
        ControlCommand::SetSimulationParameters {
            grade,
            rolling_resistance,
            ..
        } => Ok(set_track_resistance(*grade, *rolling_resistance)),
        ControlCommand::SetResistanceLevel { level } => Ok(set_basic_resistance(*level)),
        ControlCommand::StartSession | ControlCommand::StopSession => {
            Err(unsupported(MachineClass::FeC, command))
        }
    }
}

/// Translate a command for a resistance-only trainer.
///
/// Only the basic resistance page is understood.
pub fn encode_resistance_only(command: &ControlCommand) -> Result<[u8; PAGE_LEN], TrainerError> {
    match command {
        ControlCommand::SetResistanceLevel { level } => Ok(set_basic_resistance(*level)),
        _ => Err(unsupported(MachineClass::ResistanceOnly, command)),
    }
}

fn unsupported(class: MachineClass, command: &ControlCommand) -> TrainerError {
    TrainerError::Unsupported {
        class,
        command: format!("{:?}", command),
    }
}
