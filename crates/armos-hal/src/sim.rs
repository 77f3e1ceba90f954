//! [`SimLink`] – in-memory arm for tests and hardware-free sessions.
//!
//! The simulated arm keeps a [`StepVector`] and applies every stepper
//! command through the same [`MotionGate`] as the controller, so it rejects
//! exactly what the controller would. Angles and poses are derived from the
//! tracked steps with the shared [`StepConverter`] and
//! [`KinematicsSolver`].
//!
//! # Fault injection
//!
//! A [`SimControl`] handle stays with the test after the link has been boxed
//! into a controller. Faults queued on it are consumed, one per command, by
//! the next device command (`echo`, `calibrate` or a move):
//!
//! | Fault | Effect |
//! |---|---|
//! | [`SimFault::Timeout`] | The command executes but its acknowledgment is lost; returns [`ArmError::LinkTimeout`]. |
//! | [`SimFault::Device`]  | The command is refused before any motion; returns [`ArmError::DeviceFault`]. |
//!
//! # Example
//!
//! ```rust
//! use armos_hal::{DeviceLink, SimControl, SimFault, SimLink};
//! use armos_types::{ArmError, MotionProfile};
//!
//! let control = SimControl::new();
//! let mut link = SimLink::builder("sim0").control(control.clone()).build().unwrap();
//!
//! link.move_steppers(&MotionProfile::default(), &[10, 0, 0, 0, 0, 0, 0]).unwrap();
//!
//! control.inject(SimFault::Timeout);
//! let err = link.echo().unwrap_err();
//! assert!(matches!(err, ArmError::LinkTimeout { .. }));
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use armos_kernel::MotionGate;
use armos_kinematics::{
    DhSolver, KinematicsSolver, StepConverter, joints_for_pose, pose_of, step_delta,
};
use armos_types::{
    AXIS_COUNT, ArmError, AxisConfig, JointVector, MotionProfile, Pose, StepVector,
};
use tracing::{debug, warn};

use crate::link::DeviceLink;

/// Acknowledgment timeout reported by simulated timeouts.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Commands kept by [`SimControl::commands`]; older ones are dropped.
pub const COMMAND_LOG_CAPACITY: usize = 1_024;

// ────────────────────────────────────────────────────────────────────────────
// Fault injection
// ────────────────────────────────────────────────────────────────────────────

/// A failure the simulated board will produce on its next command.
#[derive(Debug, Clone, PartialEq)]
pub enum SimFault {
    /// Command runs, acknowledgment never arrives.
    Timeout,
    /// Command refused with the given board message.
    Device(String),
}

/// A device command as received by the simulated board.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    Echo,
    Calibrate { speed: u32, enabled: [bool; AXIS_COUNT] },
    MoveSteppers { profile: MotionProfile, delta: StepVector },
}

#[derive(Debug, Default)]
struct SimShared {
    faults: VecDeque<SimFault>,
    commands: VecDeque<SimCommand>,
}

/// Shared handle for injecting faults into, and observing, a [`SimLink`].
#[derive(Debug, Clone, Default)]
pub struct SimControl {
    shared: Arc<Mutex<SimShared>>,
}

impl SimControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for the next device command.
    pub fn inject(&self, fault: SimFault) {
        self.with(|s| s.faults.push_back(fault));
    }

    /// Number of queued faults not yet consumed.
    pub fn pending_faults(&self) -> usize {
        self.with(|s| s.faults.len())
    }

    /// The last [`COMMAND_LOG_CAPACITY`] commands the board has received,
    /// oldest first.
    pub fn commands(&self) -> Vec<SimCommand> {
        self.with(|s| s.commands.iter().cloned().collect())
    }

    fn take_fault(&self) -> Option<SimFault> {
        self.with(|s| s.faults.pop_front())
    }

    fn log(&self, command: SimCommand) {
        self.with(|s| {
            if s.commands.len() == COMMAND_LOG_CAPACITY {
                s.commands.pop_front();
            }
            s.commands.push_back(command);
        });
    }

    fn with<R>(&self, f: impl FnOnce(&mut SimShared) -> R) -> R {
        // The queue stays consistent even if a test panicked mid-update.
        let mut guard = match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for [`SimLink`].
pub struct SimLinkBuilder {
    port: String,
    axes: [AxisConfig; AXIS_COUNT],
    solver: Arc<dyn KinematicsSolver>,
    steps: StepVector,
    control: SimControl,
    timeout_ms: u64,
}

impl SimLinkBuilder {
    /// Axis table; defaults to the AR3 table.
    pub fn axes(mut self, axes: [AxisConfig; AXIS_COUNT]) -> Self {
        self.axes = axes;
        self
    }

    /// Kinematics used for angle and pose queries; defaults to the AR3.
    pub fn solver(mut self, solver: Arc<dyn KinematicsSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Power-on step counts; defaults to all zeros.
    pub fn initial_steps(mut self, steps: StepVector) -> Self {
        self.steps = steps;
        self
    }

    pub fn control(mut self, control: SimControl) -> Self {
        self.control = control;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Open the simulated link.
    ///
    /// # Errors
    ///
    /// - [`ArmError::Connection`] – the port name is blank.
    /// - [`ArmError::AxisOutOfRange`] – the power-on steps exceed the travel.
    pub fn build(self) -> Result<SimLink, ArmError> {
        if self.port.trim().is_empty() {
            return Err(ArmError::Connection {
                port: self.port,
                details: "no port given".to_string(),
            });
        }
        let converter = StepConverter::new(self.axes);
        let gate = MotionGate::new(converter.limits());
        gate.admit_position(&self.steps)?;
        debug!(port = %self.port, "simulated link connected");
        Ok(SimLink {
            port: self.port,
            steps: self.steps,
            converter,
            gate,
            solver: self.solver,
            control: self.control,
            timeout_ms: self.timeout_ms,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimLink
// ────────────────────────────────────────────────────────────────────────────

/// In-memory stepper board.
pub struct SimLink {
    port: String,
    steps: StepVector,
    converter: StepConverter,
    gate: MotionGate,
    solver: Arc<dyn KinematicsSolver>,
    control: SimControl,
    timeout_ms: u64,
}

impl SimLink {
    /// Start building a link on `port`.
    pub fn builder(port: impl Into<String>) -> SimLinkBuilder {
        SimLinkBuilder {
            port: port.into(),
            axes: AxisConfig::ar3_defaults(),
            solver: Arc::new(DhSolver::ar3()),
            steps: [0; AXIS_COUNT],
            control: SimControl::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Connect with the given axis table and default kinematics.
    pub fn connect(port: &str, axes: [AxisConfig; AXIS_COUNT]) -> Result<Self, ArmError> {
        Self::builder(port).axes(axes).build()
    }

    /// Apply the next queued fault to `operation`.
    ///
    /// `Device` faults refuse the command; `Timeout` faults let `apply` run
    /// and then drop the acknowledgment.
    fn execute(
        &mut self,
        operation: &str,
        apply: impl FnOnce(&mut Self),
    ) -> Result<(), ArmError> {
        match self.control.take_fault() {
            Some(SimFault::Device(details)) => {
                warn!(operation, %details, "simulated device fault");
                Err(ArmError::DeviceFault {
                    operation: operation.to_string(),
                    details,
                })
            }
            Some(SimFault::Timeout) => {
                apply(self);
                warn!(operation, timeout_ms = self.timeout_ms, "simulated acknowledgment lost");
                Err(ArmError::LinkTimeout {
                    operation: operation.to_string(),
                    timeout_ms: self.timeout_ms,
                })
            }
            None => {
                apply(self);
                Ok(())
            }
        }
    }
}

impl DeviceLink for SimLink {
    fn port(&self) -> &str {
        &self.port
    }

    fn echo(&mut self) -> Result<(), ArmError> {
        self.control.log(SimCommand::Echo);
        self.execute("echo", |_| {})
    }

    fn set_directions(&mut self, directions: [bool; AXIS_COUNT]) {
        self.converter.set_directions(directions);
    }

    fn directions(&self) -> [bool; AXIS_COUNT] {
        self.converter.directions()
    }

    fn current_stepper_position(&self) -> StepVector {
        self.steps
    }

    fn current_joint_radians(&self) -> JointVector {
        self.converter.steps_to_angles(&self.steps, false)
    }

    fn current_pose(&self) -> Pose {
        pose_of(self.solver.as_ref(), &self.current_joint_radians())
    }

    fn calibrate(&mut self, speed: u32, enabled: [bool; AXIS_COUNT]) -> Result<(), ArmError> {
        MotionProfile::with_speed(speed).validate()?;
        self.control.log(SimCommand::Calibrate { speed, enabled });
        self.execute("calibrate", |link| {
            for (step, home) in link.steps.iter_mut().zip(enabled) {
                if home {
                    *step = 0;
                }
            }
        })
    }

    fn move_steppers(
        &mut self,
        profile: &MotionProfile,
        delta: &StepVector,
    ) -> Result<(), ArmError> {
        let target = self.gate.authorize(&self.steps, delta, profile)?;
        self.control.log(SimCommand::MoveSteppers {
            profile: *profile,
            delta: *delta,
        });
        self.execute("move_steppers", |link| link.steps = target)
    }

    fn move_joint_radians(
        &mut self,
        profile: &MotionProfile,
        target: &JointVector,
    ) -> Result<(), ArmError> {
        if target.iter().any(|a| !a.is_finite()) {
            return Err(ArmError::InvalidPose(format!("non-finite joint angles {target:?}")));
        }
        let steps = self.converter.angles_to_steps(target, false);
        let delta = step_delta(&self.steps, &steps);
        self.move_steppers(profile, &delta)
    }

    fn move_to_pose(&mut self, profile: &MotionProfile, target: &Pose) -> Result<(), ArmError> {
        let current = self.current_joint_radians();
        let joints = joints_for_pose(self.solver.as_ref(), target, &current)?;
        self.move_joint_radians(profile, &joints)
    }

    fn restore(&mut self, steps: &StepVector) -> Result<(), ArmError> {
        self.gate.admit_position(steps)?;
        self.steps = *steps;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
