//! Trainer control engine.
//!
//! Turns plan step changes, route progress and direct user adjustments into
//! control commands for the connected machine. The engine is pure state:
//! it returns [`EncodedCommand`]s and is told about responses afterwards.
//! Sending and waiting happen elsewhere, so recording never blocks on the
//! trainer.

use std::collections::BTreeMap;

use super::grade::{grade_compensation, VirtualRoute};
use super::types::{
    CommandResponse, ControlCommand, ControlMode, EncodedCommand, MachineClass, TrainerError,
    TrainerSession, TrainerState,
};
use crate::sensors::types::{MachineRunState, MachineStatus};
use crate::storage::config::TrainerSettings;
use crate::workouts::engine::PlanEvent;

/// Rider motion fed on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Motion {
    /// Current speed in m/s
    pub speed_mps: f64,
    /// Distance covered in meters
    pub distance_m: f64,
}

/// Trainer control engine.
pub struct TrainerControlEngine {
    settings: TrainerSettings,
    state: TrainerState,
    /// Control mode, kept across reconnects
    mode: ControlMode,
    session: TrainerSession,
    /// Power target of the active plan step
    plan_power: Option<f64>,
    /// Last command requested by the user in Manual
    manual_command: Option<ControlCommand>,
    route: Option<VirtualRoute>,
    rider_weight_kg: f64,
    motion: Motion,
    session_started: bool,
    next_id: u64,
    in_flight: BTreeMap<u64, ControlCommand>,
}

impl TrainerControlEngine {
    /// Create a disconnected engine.
    pub fn new(settings: TrainerSettings, rider_weight_kg: f64) -> Self {
        Self {
            settings,
            state: TrainerState::Disconnected,
            mode: ControlMode::Auto,
            session: TrainerSession::default(),
            plan_power: None,
            manual_command: None,
            route: None,
            rider_weight_kg,
            motion: Motion::default(),
            session_started: false,
            next_id: 1,
            in_flight: BTreeMap::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    /// Current control mode.
    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Live session details.
    pub fn session(&self) -> &TrainerSession {
        &self.session
    }

    /// Commands sent and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The attached virtual route.
    pub fn route(&self) -> Option<&VirtualRoute> {
        self.route.as_ref()
    }

    /// Attach a virtual route for grade simulation.
    pub fn set_route(&mut self, route: Option<VirtualRoute>) -> Vec<EncodedCommand> {
        self.route = route.filter(|r| !r.is_empty());
        self.apply_auto()
    }

    /// Update rider weight used for grade compensation.
    pub fn set_rider_weight(&mut self, kg: f64) {
        self.rider_weight_kg = kg;
    }

    /// A connection attempt started.
    pub fn begin_connect(&mut self) {
        if matches!(self.state, TrainerState::Disconnected) {
            self.state = TrainerState::Connecting;
        }
    }

    /// The machine connected and advertised its class.
    pub fn on_connected(&mut self, class: MachineClass) -> Vec<EncodedCommand> {
        tracing::info!("Trainer connected ({})", class);
        self.session.class = Some(class);
        self.session.protocol_mode = None;
        self.session.last_command = None;
        self.state = TrainerState::Connected { mode: self.mode };

        let mut commands = Vec::new();
        if self.session_started && class.capabilities().start_stop {
            commands.extend(self.dispatch(ControlCommand::StartSession));
        }
        commands.extend(self.reapply());
        commands
    }

    /// The machine went away.
    pub fn on_disconnected(&mut self) {
        tracing::warn!("Trainer disconnected");
        self.state = TrainerState::Disconnected;
        self.session.class = None;
        self.in_flight.clear();
    }

    /// Recording started or resumed.
    pub fn start_session(&mut self) -> Vec<EncodedCommand> {
        self.session_started = true;
        if self.supports_start_stop() {
            self.dispatch(ControlCommand::StartSession)
        } else {
            Vec::new()
        }
    }

    /// Recording stopped.
    pub fn stop_session(&mut self) -> Vec<EncodedCommand> {
        self.session_started = false;
        if self.supports_start_stop() {
            self.dispatch(ControlCommand::StopSession)
        } else {
            Vec::new()
        }
    }

    fn supports_start_stop(&self) -> bool {
        self.session
            .class
            .is_some_and(|c| c.capabilities().start_stop)
    }

    /// React to a plan event. Only Auto mode follows the plan.
    pub fn on_plan_event(&mut self, event: &PlanEvent) -> Vec<EncodedCommand> {
        self.plan_power = event.power_target();
        match self.mode {
            ControlMode::Auto => self.apply_auto(),
            ControlMode::Manual => Vec::new(),
        }
    }

    /// Plan detached: drop the plan target.
    pub fn on_plan_detached(&mut self) -> Vec<EncodedCommand> {
        self.plan_power = None;
        match self.mode {
            ControlMode::Auto => self.apply_auto(),
            ControlMode::Manual => Vec::new(),
        }
    }

    /// Recombine the target as the rider moves along the route.
    pub fn on_tick(&mut self, motion: Motion) -> Vec<EncodedCommand> {
        self.motion = motion;
        if self.mode != ControlMode::Auto || self.route.is_none() {
            return Vec::new();
        }

        let Some(command) = self.auto_command() else {
            return Vec::new();
        };
        if self.changed_enough(&command) {
            self.dispatch(command)
        } else {
            Vec::new()
        }
    }

    /// Direct user power target. Switches to Manual.
    pub fn set_manual_power(&mut self, watts: f64) -> Vec<EncodedCommand> {
        self.manual(ControlCommand::SetPowerTarget {
            watts: watts.max(0.0),
        })
    }

    /// Direct user resistance level. Switches to Manual.
    pub fn set_manual_resistance(&mut self, level: f64) -> Vec<EncodedCommand> {
        self.manual(ControlCommand::SetResistanceLevel {
            level: level.clamp(0.0, 100.0),
        })
    }

    /// Direct user grade. Switches to Manual.
    pub fn set_manual_grade(&mut self, grade: f64) -> Vec<EncodedCommand> {
        let command = self.simulation(grade);
        self.manual(command)
    }

    fn manual(&mut self, command: ControlCommand) -> Vec<EncodedCommand> {
        if self.mode == ControlMode::Auto {
            tracing::info!("Trainer switched to manual control");
        }
        self.set_mode(ControlMode::Manual);
        self.manual_command = Some(command.clone());
        self.dispatch(command)
    }

    /// Return control to the plan and re-apply its current target.
    pub fn enable_auto(&mut self) -> Vec<EncodedCommand> {
        tracing::info!("Trainer returned to automatic control");
        self.set_mode(ControlMode::Auto);
        self.manual_command = None;
        self.apply_auto()
    }

    fn set_mode(&mut self, mode: ControlMode) {
        self.mode = mode;
        match &mut self.state {
            TrainerState::Connected { mode: m } | TrainerState::Faulted { mode: m, .. } => *m = mode,
            TrainerState::Disconnected | TrainerState::Connecting => {}
        }
    }

    /// A response arrived for command `id`.
    ///
    /// Failures fault the engine but are never resent; the next scheduled
    /// command goes out as usual and an `Ack` clears the fault.
    pub fn on_response(&mut self, id: u64, response: &CommandResponse) -> Option<TrainerError> {
        let command = self.in_flight.remove(&id)?;
        if !self.state.can_send() {
            return None;
        }

        match response {
            CommandResponse::Ack => {
                if let TrainerState::Faulted { mode, .. } = self.state {
                    tracing::info!("Trainer recovered after fault");
                    self.state = TrainerState::Connected { mode };
                }
                None
            }
            CommandResponse::Nack(reason) => {
                tracing::warn!("Trainer refused {:?}: {}", command, reason);
                self.fault(reason.clone());
                Some(TrainerError::ControlNack(reason.clone()))
            }
            CommandResponse::Timeout => {
                tracing::warn!("Trainer command {:?} timed out", command);
                self.fault("timeout".to_string());
                Some(TrainerError::ControlTimeout)
            }
        }
    }

    fn fault(&mut self, reason: String) {
        self.state = TrainerState::Faulted {
            mode: self.mode,
            reason,
        };
    }

    /// A status notification arrived from the machine.
    pub fn on_status(&mut self, status: MachineStatus) {
        if status.state == MachineRunState::ControlLost && self.state.can_send() {
            tracing::warn!("Trainer reported control permission lost");
            self.fault("control permission lost".to_string());
        }
        self.session.last_status = Some(status);
    }

    fn reapply(&mut self) -> Vec<EncodedCommand> {
        match self.mode {
            ControlMode::Auto => self.apply_auto(),
            ControlMode::Manual => match self.manual_command.clone() {
                Some(command) => self.dispatch(command),
                None => Vec::new(),
            },
        }
    }

    fn apply_auto(&mut self) -> Vec<EncodedCommand> {
        if self.mode != ControlMode::Auto {
            return Vec::new();
        }
        match self.auto_command() {
            Some(command) => self.dispatch(command),
            None => Vec::new(),
        }
    }

    /// Command the plan and route call for right now.
    fn auto_command(&self) -> Option<ControlCommand> {
        let class = self.session.class?;
        let caps = class.capabilities();
        let grade = self
            .route
            .as_ref()
            .map(|r| r.grade_at(self.motion.distance_m));

        match (self.plan_power, grade) {
            (Some(target), Some(grade)) if caps.power_target => {
                let mass = self.rider_weight_kg + self.settings.bike_weight_kg;
                let watts = target + grade_compensation(mass, self.motion.speed_mps, grade);
                Some(ControlCommand::SetPowerTarget {
                    watts: watts.max(0.0),
                })
            }
            (Some(target), None) if caps.power_target => Some(ControlCommand::SetPowerTarget {
                watts: target.max(0.0),
            }),
            (None, Some(grade)) if caps.simulation => Some(self.simulation(grade)),
            _ => None,
        }
    }

    fn simulation(&self, grade: f64) -> ControlCommand {
        ControlCommand::SetSimulationParameters {
            grade,
            wind_speed: self.settings.wind_speed_mps,
            rolling_resistance: self.settings.rolling_resistance,
        }
    }

    fn changed_enough(&self, command: &ControlCommand) -> bool {
        match (command, &self.session.last_command) {
            (
                ControlCommand::SetPowerTarget { watts },
                Some(ControlCommand::SetPowerTarget { watts: last }),
            ) => (watts - last).abs() >= self.settings.min_power_delta_w,
            (
                ControlCommand::SetSimulationParameters { grade, .. },
                Some(ControlCommand::SetSimulationParameters { grade: last, .. }),
            ) => (grade - last).abs() >= self.settings.min_grade_delta_pct,
            _ => true,
        }
    }

    fn dispatch(&mut self, command: ControlCommand) -> Vec<EncodedCommand> {
        let Some(class) = self.session.class else {
            return Vec::new();
        };
        if !self.state.can_send() {
            return Vec::new();
        }

        let bytes = match class.encode(&command) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!("Not sending command: {}", e);
                return Vec::new();
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!("Trainer command #{}: {:?}", id, command);

        if let Some(mode) = command.protocol_mode() {
            self.session.protocol_mode = Some(mode);
            self.session.last_command = Some(command.clone());
        }
        self.in_flight.insert(id, command.clone());

        vec![EncodedCommand {
            id,
            class,
            command,
            bytes,
        }]
    }
}
