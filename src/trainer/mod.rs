//! Smart trainer control: FTMS and FE-C command encoding, grade simulation
//! and the control state machine.

pub mod channel;
pub mod engine;
pub mod fec;
pub mod ftms;
pub mod grade;
pub mod types;

pub use channel::{ControlChannel, LoopbackChannel};
pub use engine::{Motion, TrainerControlEngine};
pub use grade::{RoutePoint, VirtualRoute};
pub use types::{
    CommandResponse, ControlCommand, ControlMode, EncodedCommand, MachineClass, ProtocolMode,
    TrainerError, TrainerSession, TrainerState,
};
