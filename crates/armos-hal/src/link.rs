//! Generic `DeviceLink` trait for the stepper controller board.
//!
//! The arm controller owns exactly one link, bound at construction as a
//! `Box<dyn DeviceLink>`. Real serial backends and the in-memory
//! [`SimLink`][crate::sim::SimLink] are interchangeable behind it.
//!
//! Motion calls block until the board acknowledges completion. A missing
//! acknowledgment is reported as [`ArmError::LinkTimeout`] and never retried
//! here: the arm may or may not have moved.

use armos_types::{AXIS_COUNT, ArmError, JointVector, MotionProfile, Pose, StepVector};

/// Capability contract of a connected arm.
pub trait DeviceLink: Send + Sync {
    /// Port the link was opened on, e.g. `"/dev/ttyUSB0"`.
    fn port(&self) -> &str;

    /// Liveness probe.
    ///
    /// # Errors
    ///
    /// [`ArmError::LinkTimeout`] or [`ArmError::DeviceFault`] when the board
    /// does not answer.
    fn echo(&mut self) -> Result<(), ArmError>;

    /// Replace the direction convention used for angle conversions.
    fn set_directions(&mut self, directions: [bool; AXIS_COUNT]);

    fn directions(&self) -> [bool; AXIS_COUNT];

    /// Step counts as last tracked by the link.
    fn current_stepper_position(&self) -> StepVector;

    fn current_joint_radians(&self) -> JointVector;

    /// Forward kinematics of the current joint angles.
    fn current_pose(&self) -> Pose;

    /// Drive every enabled axis to its limit switch and zero its count.
    fn calibrate(&mut self, speed: u32, enabled: [bool; AXIS_COUNT]) -> Result<(), ArmError>;

    /// Relative stepper move.
    fn move_steppers(&mut self, profile: &MotionProfile, delta: &StepVector)
        -> Result<(), ArmError>;

    /// Absolute joint-space move.
    fn move_joint_radians(
        &mut self,
        profile: &MotionProfile,
        target: &JointVector,
    ) -> Result<(), ArmError>;

    /// Cartesian move, solved from the current joint angles.
    fn move_to_pose(&mut self, profile: &MotionProfile, target: &Pose) -> Result<(), ArmError>;

    /// Reseed the link's step bookkeeping without commanding motion.
    ///
    /// # Errors
    ///
    /// [`ArmError::AxisOutOfRange`] when `steps` lies outside the travel
    /// limits.
    fn restore(&mut self, steps: &StepVector) -> Result<(), ArmError>;
}
