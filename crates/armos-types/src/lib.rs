//! `armos-types` – shared data model for the ArmOS workspace.
//!
//! Every crate in the workspace speaks in these types: joint and step
//! vectors, per-axis configuration, Cartesian poses, the controller state,
//! ledger snapshots, and the [`ArmError`] taxonomy returned by every
//! state-changing or read operation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of independently driven axes: six arm joints plus the turntable.
pub const AXIS_COUNT: usize = 7;

/// Number of axes that take part in the arm's kinematic chain.
pub const ARM_JOINTS: usize = 6;

/// One angle (radians) per axis, in [`Axis::ALL`] order.
pub type JointVector = [f64; AXIS_COUNT];

/// One stepper pulse count per axis, in [`Axis::ALL`] order.
pub type StepVector = [i64; AXIS_COUNT];

/// Direction convention shipped with the AR3 arm.
pub const DEFAULT_DIRECTIONS: [bool; AXIS_COUNT] = [true, false, false, true, false, true, false];

// ────────────────────────────────────────────────────────────────────────────
// Axes
// ────────────────────────────────────────────────────────────────────────────

/// Identifies one of the seven driven axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    J1,
    J2,
    J3,
    J4,
    J5,
    J6,
    /// Auxiliary seventh axis (turntable or gripper). Not part of the
    /// kinematic chain.
    Turntable,
}

impl Axis {
    /// All axes in vector order.
    pub const ALL: [Axis; AXIS_COUNT] = [
        Axis::J1,
        Axis::J2,
        Axis::J3,
        Axis::J4,
        Axis::J5,
        Axis::J6,
        Axis::Turntable,
    ];

    /// Position of this axis inside a [`JointVector`] or [`StepVector`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Turntable => write!(f, "TR"),
            other => write!(f, "J{}", other.index() + 1),
        }
    }
}

/// Static description of one axis.
///
/// The step count of an axis is measured from its limit switch, so a freshly
/// calibrated axis sits at step `0`. `home_offset` is the step count at which
/// the joint angle is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Largest valid step count; the valid range is `[0, step_limit]`.
    pub step_limit: i64,
    /// Stepper pulses per radian of joint rotation.
    pub steps_per_rad: f64,
    /// `true` when an increasing angle maps to an increasing step count.
    pub forward: bool,
    /// Step count corresponding to a joint angle of zero.
    pub home_offset: i64,
}

impl AxisConfig {
    /// Build an axis from a steps-per-degree ratio, the unit AR3 data sheets
    /// use.
    pub fn from_degrees(steps_per_deg: f64, step_limit: i64, forward: bool, home_offset: i64) -> Self {
        Self {
            step_limit,
            steps_per_rad: steps_per_deg.to_degrees(),
            forward,
            home_offset,
        }
    }

    /// Factory axis table of the AR3 arm, using [`DEFAULT_DIRECTIONS`].
    pub fn ar3_defaults() -> [AxisConfig; AXIS_COUNT] {
        let d = DEFAULT_DIRECTIONS;
        [
            Self::from_degrees(44.44444, 15200, d[0], 7555),
            Self::from_degrees(55.55556, 7300, d[1], 0),
            Self::from_degrees(55.55556, 7850, d[2], 7850),
            Self::from_degrees(42.72664, 15200, d[3], 7028),
            Self::from_degrees(21.86024, 4575, d[4], 2277),
            Self::from_degrees(22.22222, 6625, d[5], 3291),
            Self::from_degrees(10.0, 10000, d[6], 0),
        ]
    }
}

/// Extract the step limits of an axis table.
pub fn step_limits(axes: &[AxisConfig; AXIS_COUNT]) -> StepVector {
    let mut limits = [0; AXIS_COUNT];
    for (limit, axis) in limits.iter_mut().zip(axes) {
        *limit = axis.step_limit;
    }
    limits
}

// ────────────────────────────────────────────────────────────────────────────
// Motion profile
// ────────────────────────────────────────────────────────────────────────────

/// Speed and acceleration envelope sent along with every motion command.
///
/// All values are percentages of the controller board's maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionProfile {
    pub speed: u32,
    pub accel_duration: u32,
    pub accel_speed: u32,
    pub decel_duration: u32,
    pub decel_speed: u32,
}

impl MotionProfile {
    /// Profile with the given speed and the board's default ramps.
    pub fn with_speed(speed: u32) -> Self {
        Self {
            speed,
            ..Self::default()
        }
    }

    /// Reject a profile the board cannot execute.
    pub fn validate(&self) -> Result<(), ArmError> {
        if self.speed == 0 || self.speed > 100 {
            return Err(ArmError::InvalidProfile(format!(
                "speed {} outside [1, 100]",
                self.speed
            )));
        }
        let ramps = [
            ("accel_duration", self.accel_duration),
            ("accel_speed", self.accel_speed),
            ("decel_duration", self.decel_duration),
            ("decel_speed", self.decel_speed),
        ];
        for (name, value) in ramps {
            if value > 100 {
                return Err(ArmError::InvalidProfile(format!(
                    "{name} {value} outside [0, 100]"
                )));
            }
        }
        Ok(())
    }
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self {
            speed: 10,
            accel_duration: 10,
            accel_speed: 10,
            decel_duration: 10,
            decel_speed: 10,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Controller state
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of the arm controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmState {
    /// Step counts are meaningless until the arm is calibrated.
    Uninitialized,
    /// Axes are being driven to their limit switches.
    Calibrating,
    /// Step counts are trustworthy; moves are accepted.
    Ready,
    /// A device-level failure occurred; recalibration is required.
    Faulted,
}

impl fmt::Display for ArmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArmState::Uninitialized => "uninitialized",
            ArmState::Calibrating => "calibrating",
            ArmState::Ready => "ready",
            ArmState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cartesian primitives
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D position in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A rotation quaternion (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Hamilton product `self * rhs`: apply `rhs` first, then `self`.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Scale to unit length. Returns `None` for a zero or non-finite
    /// quaternion, which describes no rotation at all.
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm();
        if !n.is_finite() || n < f64::EPSILON {
            return None;
        }
        Some(Self::new(self.w / n, self.x / n, self.y / n, self.z / n))
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// End-effector pose: position plus orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quaternion,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quaternion) -> Self {
        Self { position, rotation }
    }

    /// Zero offset with no rotation; a no-op relative move.
    pub fn identity() -> Self {
        Self::default()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ledger records
// ────────────────────────────────────────────────────────────────────────────

/// A commanded position as persisted by the position ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PositionSnapshot {
    Joints(JointVector),
    Pose(Pose),
}

/// One row of the position ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Insertion order; strictly increasing.
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub snapshot: PositionSnapshot,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Every failure an arm operation can report.
///
/// Variants fall in three groups: rejections that leave the controller
/// untouched (`AxisOutOfRange`, `UnreachablePose`, `InvalidPose`,
/// `InvalidProfile`, `InvalidState`), device failures that fault the
/// controller (`LinkTimeout`, `DeviceFault`), and persistence failures
/// (`LedgerWrite`, `LedgerRead`).
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArmError {
    #[error("Connection to '{port}' failed: {details}")]
    Connection { port: String, details: String },

    #[error("{axis} out of range: must be between 0 and {limit}, got {attempted}")]
    AxisOutOfRange { axis: Axis, limit: i64, attempted: i64 },

    #[error("Unreachable pose: {0}")]
    UnreachablePose(String),

    #[error("Invalid pose: {0}")]
    InvalidPose(String),

    #[error("Invalid motion profile: {0}")]
    InvalidProfile(String),

    #[error("{operation} rejected while arm is {state}")]
    InvalidState { state: ArmState, operation: String },

    #[error("Device link timed out during {operation} after {timeout_ms} ms")]
    LinkTimeout { operation: String, timeout_ms: u64 },

    #[error("Device fault during {operation}: {details}")]
    DeviceFault { operation: String, details: String },

    #[error("State-tracking desync: move committed but ledger write failed: {0}")]
    LedgerWrite(String),

    #[error("Ledger read failed: {0}")]
    LedgerRead(String),

    #[error("Controller state poisoned: {0}")]
    StatePoisoned(String),
}

impl ArmError {
    /// The session cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArmError::Connection { .. } | ArmError::StatePoisoned(_))
    }

    /// The device may have moved by an unknown amount; the controller must
    /// be recalibrated.
    pub fn faults_controller(&self) -> bool {
        matches!(self, ArmError::LinkTimeout { .. } | ArmError::DeviceFault { .. })
    }

    /// A multi-step command sequence must stop. Only a ledger write failure
    /// leaves the physical arm where the caller expects it.
    pub fn halts_sequence(&self) -> bool {
        !matches!(self, ArmError::LedgerWrite(_))
    }
}
