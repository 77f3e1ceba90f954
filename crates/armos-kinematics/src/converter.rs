//! [`StepConverter`] – joint angles ↔ stepper counts.
//!
//! Stepper pulses are the only actuation primitive the arm has, so every
//! joint-space or Cartesian move ends up here. For axis `i`:
//!
//! ```text
//! steps = home_offset + round(sign · angle · steps_per_rad)
//! angle = sign · (steps − home_offset) / steps_per_rad
//! ```
//!
//! where `sign` is `+1` when the axis is `forward` and `-1` otherwise, and
//! the `inverted` flag flips it once more.
//!
//! # Example
//!
//! ```rust
//! use armos_kinematics::converter::StepConverter;
//! use armos_types::AxisConfig;
//!
//! let conv = StepConverter::new(AxisConfig::ar3_defaults());
//! let home = conv.angles_to_steps(&[0.0; 7], false);
//! assert_eq!(home[0], 7555);
//! assert_eq!(conv.steps_to_angles(&home, false), [0.0; 7]);
//! ```

use armos_types::{AXIS_COUNT, AxisConfig, JointVector, StepVector, step_limits};

/// Bidirectional angle/step mapping over a fixed axis table.
#[derive(Debug, Clone, PartialEq)]
pub struct StepConverter {
    axes: [AxisConfig; AXIS_COUNT],
}

impl StepConverter {
    pub fn new(axes: [AxisConfig; AXIS_COUNT]) -> Self {
        Self { axes }
    }

    pub fn axes(&self) -> &[AxisConfig; AXIS_COUNT] {
        &self.axes
    }

    /// Upper step limit of every axis.
    pub fn limits(&self) -> StepVector {
        step_limits(&self.axes)
    }

    /// Current direction flag of every axis.
    pub fn directions(&self) -> [bool; AXIS_COUNT] {
        let mut dirs = [false; AXIS_COUNT];
        for (dir, axis) in dirs.iter_mut().zip(&self.axes) {
            *dir = axis.forward;
        }
        dirs
    }

    pub fn set_directions(&mut self, directions: [bool; AXIS_COUNT]) {
        for (axis, forward) in self.axes.iter_mut().zip(directions) {
            axis.forward = forward;
        }
    }

    fn sign(axis: &AxisConfig, inverted: bool) -> f64 {
        if axis.forward != inverted { 1.0 } else { -1.0 }
    }

    /// Convert joint angles to the nearest step counts.
    ///
    /// Callers must reject non-finite angles first; they have no step
    /// equivalent. Angles beyond the `i64` step range saturate, so the
    /// Limit Guard reports them as out of range.
    pub fn angles_to_steps(&self, angles: &JointVector, inverted: bool) -> StepVector {
        let mut steps = [0; AXIS_COUNT];
        for ((step, angle), axis) in steps.iter_mut().zip(angles).zip(&self.axes) {
            // `as` saturates at the i64 bounds.
            let pulses = (Self::sign(axis, inverted) * angle * axis.steps_per_rad).round() as i64;
            *step = axis.home_offset.saturating_add(pulses);
        }
        steps
    }

    /// Convert step counts to joint angles.
    pub fn steps_to_angles(&self, steps: &StepVector, inverted: bool) -> JointVector {
        let mut angles = [0.0; AXIS_COUNT];
        for ((angle, step), axis) in angles.iter_mut().zip(steps).zip(&self.axes) {
            let pulses = (step - axis.home_offset) as f64;
            // `+ 0.0` folds a negative zero into zero.
            *angle = Self::sign(axis, inverted) * pulses / axis.steps_per_rad + 0.0;
        }
        angles
    }
}

/// Relative command taking `current` to `target`.
pub fn step_delta(current: &StepVector, target: &StepVector) -> StepVector {
    let mut delta = [0; AXIS_COUNT];
    for ((d, from), to) in delta.iter_mut().zip(current).zip(target) {
        *d = to.saturating_sub(*from);
    }
    delta
}
