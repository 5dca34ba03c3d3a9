//! Trainer control types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{fec, ftms};
use crate::sensors::types::MachineStatus;

/// Class of controllable machine, as advertised on connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineClass {
    /// Bluetooth Fitness Machine Service
    Ftms,
    /// ANT+ Fitness Equipment Control
    FeC,
    /// Trainer that only accepts a resistance level
    ResistanceOnly,
}

/// What a machine class can be commanded to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineCapabilities {
    /// Accepts an absolute power target (ERG)
    pub power_target: bool,
    /// Accepts grade simulation parameters
    pub simulation: bool,
    /// Accepts a resistance level
    pub resistance: bool,
    /// Accepts start/stop commands
    pub start_stop: bool,
}

impl MachineClass {
    /// Capabilities of this class.
    pub fn capabilities(&self) -> MachineCapabilities {
        match self {
            MachineClass::Ftms => MachineCapabilities {
                power_target: true,
                simulation: true,
                resistance: true,
                start_stop: true,
            },
            MachineClass::FeC => MachineCapabilities {
                power_target: true,
                simulation: true,
                resistance: true,
                start_stop: false,
            },
            MachineClass::ResistanceOnly => MachineCapabilities {
                power_target: false,
                simulation: false,
                resistance: true,
                start_stop: false,
            },
        }
    }

    /// Translate a command into this class's wire format.
    pub fn encode(&self, command: &ControlCommand) -> Result<Vec<u8>, TrainerError> {
        match self {
            MachineClass::Ftms => ftms::encode(command),
            MachineClass::FeC => fec::encode(command).map(|page| page.to_vec()),
            MachineClass::ResistanceOnly => fec::encode_resistance_only(command).map(|page| page.to_vec()),
        }
    }
}

impl std::fmt::Display for MachineClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineClass::Ftms => write!(f, "FTMS"),
            MachineClass::FeC => write!(f, "FE-C"),
            MachineClass::ResistanceOnly => write!(f, "Resistance-only"),
        }
    }
}

/// Who sets the trainer target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Targets follow the plan
    #[default]
    Auto,
    /// Targets follow direct user commands
    Manual,
}

/// How the trainer is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolMode {
    /// Absolute power target (ERG)
    PowerTarget,
    /// Grade simulation
    Simulation,
    /// Fixed resistance level
    FixedResistance,
}

/// Connection and control state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum TrainerState {
    /// No machine
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Connected and accepting commands
    Connected { mode: ControlMode },
    /// Last command failed; recording continues
    Faulted { mode: ControlMode, reason: String },
}

impl TrainerState {
    /// Control mode, if connected or faulted.
    pub fn mode(&self) -> Option<ControlMode> {
        match self {
            TrainerState::Connected { mode } | TrainerState::Faulted { mode, .. } => Some(*mode),
            TrainerState::Disconnected | TrainerState::Connecting => None,
        }
    }

    /// Whether commands can be sent.
    pub fn can_send(&self) -> bool {
        self.mode().is_some()
    }
}

impl std::fmt::Display for TrainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainerState::Disconnected => write!(f, "Disconnected"),
            TrainerState::Connecting => write!(f, "Connecting"),
            TrainerState::Connected { mode } => write!(f, "Connected ({:?})", mode),
            TrainerState::Faulted { mode, reason } => write!(f, "Faulted ({:?}): {}", mode, reason),
        }
    }
}

/// Control-protocol vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Absolute power target in watts
    SetPowerTarget { watts: f64 },
    /// Grade simulation
    SetSimulationParameters {
        /// Grade in percent
        grade: f64,
        /// Wind speed in m/s
        wind_speed: f64,
        /// Coefficient of rolling resistance
        rolling_resistance: f64,
    },
    /// Resistance level in percent of the machine's range
    SetResistanceLevel { level: f64 },
    /// Start or resume
    StartSession,
    /// Stop
    StopSession,
}

impl ControlCommand {
    /// Protocol mode this command puts the machine in, if any.
    pub fn protocol_mode(&self) -> Option<ProtocolMode> {
        match self {
            ControlCommand::SetPowerTarget { .. } => Some(ProtocolMode::PowerTarget),
            ControlCommand::SetSimulationParameters { .. } => Some(ProtocolMode::Simulation),
            ControlCommand::SetResistanceLevel { .. } => Some(ProtocolMode::FixedResistance),
            ControlCommand::StartSession | ControlCommand::StopSession => None,
        }
    }
}

/// A command translated for a machine class, ready to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedCommand {
    /// Sequence number assigned by the engine
    pub id: u64,
    /// Target machine class
    pub class: MachineClass,
    /// Command in vocabulary form
    pub command: ControlCommand,
    /// Wire bytes
    pub bytes: Vec<u8>,
}

/// Response to a sent command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResponse {
    /// Accepted
    Ack,
    /// Refused with a reason
    Nack(String),
    /// No response within the bounded wait
    Timeout,
}

/// Live trainer session state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainerSession {
    /// Connected machine class
    pub class: Option<MachineClass>,
    /// Active protocol mode
    pub protocol_mode: Option<ProtocolMode>,
    /// Last commanded target
    pub last_command: Option<ControlCommand>,
    /// Last status reported by the machine
    pub last_status: Option<MachineStatus>,
}

/// Trainer control errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainerError {
    /// Machine refused the command
    #[error("Trainer refused command: {0}")]
    ControlNack(String),

    /// No response in time
    #[error("Trainer did not respond in time")]
    ControlTimeout,

    /// Command not supported by the machine class
    #[error("{class} does not support {command}")]
    Unsupported { class: MachineClass, command: String },

    /// No machine connected
    #[error("No trainer connected")]
    NotConnected,
}
