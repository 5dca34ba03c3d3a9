//! FTMS (Fitness Machine Service) control point encoding.
//!
//! Builds Fitness Machine Control Point writes and decodes the control
//! point indications and Fitness Machine Status notifications that come
//! back. Data notifications (Indoor Bike Data) are translated to readings
//! by device drivers and do not pass through here.

use super::types::{CommandResponse, ControlCommand, TrainerError};
use crate::sensors::types::{MachineRunState, MachineStatus};

/// FTMS Control Point opcodes.
#[repr(u8)]
pub enum FtmsControlOpcode {
    /// Request control of the fitness machine
    RequestControl = 0x00,
    /// Reset the fitness machine
    Reset = 0x01,
    /// Set target resistance level
    SetTargetResistanceLevel = 0x04,
    /// Set target power
    SetTargetPower = 0x05,
    /// Start or resume training
    StartOrResume = 0x07,
    /// Stop or pause training
    StopOrPause = 0x08,
    /// Set indoor bike simulation parameters
    SetIndoorBikeSimulation = 0x11,
}

/// Response code opcode prefixing every control point indication.
pub const RESPONSE_CODE: u8 = 0x80;

/// Control point result codes.
pub mod result_code {
    pub const SUCCESS: u8 = 0x01;
    pub const OPCODE_NOT_SUPPORTED: u8 = 0x02;
    pub const INVALID_PARAMETER: u8 = 0x03;
    pub const OPERATION_FAILED: u8 = 0x04;
    pub const CONTROL_NOT_PERMITTED: u8 = 0x05;
}

/// Default wind resistance coefficient sent with simulation parameters (kg/m).
const DEFAULT_CW: f64 = 0.51;

/// Translate a command into a control point write.
pub fn encode(command: &ControlCommand) -> Result<Vec<u8>, TrainerError> {
    let bytes = match command {
        ControlCommand::SetPowerTarget { watts } => {
            build_set_target_power(watts.round().clamp(0.0, i16::MAX as f64) as i16)
        }
        ControlCommand::SetSimulationParameters {
            grade,
            wind_speed,
            rolling_resistance,
        } => build_set_simulation(
            scale_i16(*wind_speed, 1000.0),
            scale_i16(*grade, 100.0),
            (rolling_resistance * 10_000.0).round().clamp(0.0, 255.0) as u8,
            (DEFAULT_CW * 100.0).round() as u8,
        ),
        ControlCommand::SetResistanceLevel { level } => {
            build_set_target_resistance(scale_i16(*level, 10.0))
        }
        ControlCommand::StartSession => build_start_training(),
        ControlCommand::StopSession => build_stop_training(false),
    };
    Ok(bytes)
}

fn scale_i16(value: f64, factor: f64) -> i16 {
    (value * factor)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

/// Build a control point command to request control.
pub fn build_request_control() -> Vec<u8> {
    vec![FtmsControlOpcode::RequestControl as u8]
}

/// Build a control point command to reset the machine.
pub fn build_reset() -> Vec<u8> {
    vec![FtmsControlOpcode::Reset as u8]
}

/// Build a control point command to start training.
pub fn build_start_training() -> Vec<u8> {
    vec![FtmsControlOpcode::StartOrResume as u8]
}

/// Build a control point command to stop training.
///
/// `pause` - true to pause, false to stop
pub fn build_stop_training(pause: bool) -> Vec<u8> {
    vec![
        FtmsControlOpcode::StopOrPause as u8,
        if pause { 0x02 } else { 0x01 },
    ]
}

/// Build a control point command to set target power (ERG mode).
pub fn build_set_target_power(target_watts: i16) -> Vec<u8> {
    let mut cmd = vec![FtmsControlOpcode::SetTargetPower as u8];
    cmd.extend_from_slice(&target_watts.to_le_bytes());
    cmd
}

/// Build a control point command to set target resistance level.
///
/// `level` - Resistance level (0.1 resolution, so 100 = 10.0)
pub fn build_set_target_resistance(level: i16) -> Vec<u8> {
    let mut cmd = vec![FtmsControlOpcode::SetTargetResistanceLevel as u8];
    cmd.extend_from_slice(&level.to_le_bytes());
    cmd
}

/// Build a control point command to set simulation parameters.
///
/// `wind_speed` - Wind speed in m/s (0.001 resolution)
/// `grade` - Grade in percent (0.01 resolution)
/// `crr` - Coefficient of rolling resistance (0.0001 resolution)
/// `cw` - Wind resistance coefficient (0.01 resolution)
pub fn build_set_simulation(wind_speed: i16, grade: i16, crr: u8, cw: u8) -> Vec<u8> {
    let mut cmd = vec![FtmsControlOpcode::SetIndoorBikeSimulation as u8];
    cmd.extend_from_slice(&wind_speed.to_le_bytes());
    cmd.extend_from_slice(&grade.to_le_bytes());
    cmd.push(crr);
    cmd.push(cw);
    cmd
}

/// Decode a control point indication into `(request opcode, response)`.
pub fn parse_control_point_response(data: &[u8]) -> Option<(u8, CommandResponse)> {
    if data.len() < 3 || data[0] != RESPONSE_CODE {
        return None;
    }
    let opcode = data[1];
    let response = match data[2] {
        result_code::SUCCESS => CommandResponse::Ack,
        result_code::OPCODE_NOT_SUPPORTED => CommandResponse::Nack("op code not supported".into()),
        result_code::INVALID_PARAMETER => CommandResponse::Nack("invalid parameter".into()),
        result_code::OPERATION_FAILED => CommandResponse::Nack("operation failed".into()),
        result_code::CONTROL_NOT_PERMITTED => CommandResponse::Nack("control not permitted".into()),
        other => CommandResponse::Nack(format!("result code 0x{:02X}", other)),
    };
    Some((opcode, response))
}

/// Decode a Fitness Machine Status notification.
///
/// Updates `previous` with what the notification reports and returns the
/// result; unknown opcodes leave it unchanged.
pub fn parse_machine_status(data: &[u8], previous: &MachineStatus) -> Option<MachineStatus> {
    let (&opcode, params) = data.split_first()?;
    let mut status = previous.clone();

    match opcode {
        // Reset
        0x01 => status = MachineStatus {
            state: MachineRunState::Idle,
            ..Default::default()
        },
        // Stopped or paused by the user
        0x02 => {
            status.state = match params.first() {
                Some(0x02) => MachineRunState::Paused,
                _ => MachineRunState::Stopped,
            }
        }
        // Stopped by safety key
        0x03 => status.state = MachineRunState::Stopped,
        // Started or resumed by the user
        0x04 => status.state = MachineRunState::Running,
        // Target resistance level changed (uint8, 0.1)
        0x07 => {
            let level = *params.first()?;
            status.resistance_level = Some(f64::from(level) / 10.0);
        }
        // Target power changed (sint16, W)
        0x08 => {
            let watts = i16::from_le_bytes([*params.first()?, *params.get(1)?]);
            status.target_power_watts = Some(f64::from(watts));
        }
        // Indoor bike simulation parameters changed
        0x12 => {
            if params.len() < 4 {
                return None;
            }
            let grade = i16::from_le_bytes([params[2], params[3]]);
            status.grade_percent = Some(f64::from(grade) / 100.0);
        }
        // Control permission lost
        0xFF => status.state = MachineRunState::ControlLost,
        _ => {}
    }

    Some(status)
}
