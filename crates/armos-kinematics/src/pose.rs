//! Pose composition for Cartesian move requests.
//!
//! A move request carries a pose and a [`MoveMode`]. In absolute mode the
//! pose is the target. In relative mode the position is added to the current
//! position in the same frame, and the rotation is applied on top of the
//! current orientation by left multiplication (`delta ∘ current`): "rotate
//! further by delta from where you are".
//!
//! Every pose leaving [`compose_target`] carries a unit quaternion, which
//! also removes drift accumulated across repeated relative moves.
//!
//! # Example
//!
//! ```rust
//! use armos_kinematics::pose::{MoveMode, compose_target};
//! use armos_types::{Pose, Quaternion, Vec3};
//!
//! let current = Pose::new(Vec3::new(300.0, 0.0, 400.0), Quaternion::identity());
//! let delta = Pose::new(Vec3::new(0.0, 0.0, -50.0), Quaternion::identity());
//!
//! let target = compose_target(&current, &delta, MoveMode::Relative).unwrap();
//! assert_eq!(target.position, Vec3::new(300.0, 0.0, 350.0));
//! ```

use armos_types::{ArmError, Pose};

/// How a requested pose relates to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveMode {
    Absolute,
    #[default]
    Relative,
}

/// Resolve a move request into the pose the arm should reach.
///
/// # Errors
///
/// Returns [`ArmError::InvalidPose`] when the request contains non-finite
/// values or a zero-length quaternion.
pub fn compose_target(current: &Pose, delta: &Pose, mode: MoveMode) -> Result<Pose, ArmError> {
    if !delta.position.is_finite() {
        return Err(ArmError::InvalidPose(format!(
            "non-finite position {:?}",
            delta.position
        )));
    }
    let raw = match mode {
        MoveMode::Absolute => *delta,
        MoveMode::Relative => Pose::new(
            current.position.add(delta.position),
            delta.rotation.mul(current.rotation),
        ),
    };
    let rotation = raw.rotation.normalized().ok_or_else(|| {
        ArmError::InvalidPose(format!("degenerate rotation {:?}", raw.rotation))
    })?;
    Ok(Pose::new(raw.position, rotation))
}

/// Fold two relative deltas into one: `a` first, then `b`.
///
/// Applying `compose(a, b)` relative to a pose reaches the same target as
/// applying `a` and then `b`.
pub fn compose(a: &Pose, b: &Pose) -> Pose {
    Pose::new(a.position.add(b.position), b.rotation.mul(a.rotation))
}
