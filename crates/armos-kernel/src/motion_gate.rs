//! [`MotionGate`] – single interception point for stepper commands.
//!
//! Before any stepper command reaches a device link it must pass through
//! [`MotionGate::authorize`], which applies two independent checks in
//! order:
//!
//! 1. **Profile check**: the speed and ramp values must be executable by the
//!    controller board ([`MotionProfile::validate`]).
//! 2. **Travel check**: the resulting position must keep every axis inside
//!    its limits ([`check_move`]).
//!
//! Both the arm controller and the simulated link use the same gate, so a
//! simulated arm rejects exactly what a real one would.
//!
//! # Example
//!
//! ```
//! use armos_kernel::MotionGate;
//! use armos_types::MotionProfile;
//!
//! let gate = MotionGate::new([15200, 7300, 7850, 15200, 4575, 6625, 10000]);
//! let profile = MotionProfile::with_speed(25);
//!
//! let target = gate
//!     .authorize(&[0; 7], &[500, 500, 500, 500, 500, 500, 0], &profile)
//!     .unwrap();
//! assert_eq!(target, [500, 500, 500, 500, 500, 500, 0]);
//!
//! // Far past J6's travel: rejected as a whole.
//! assert!(gate
//!     .authorize(&[0; 7], &[500, 500, 500, 500, 500, 500_000_000, 0], &profile)
//!     .is_err());
//! ```

use armos_types::{ArmError, MotionProfile, StepVector};

use crate::limit_guard::{check_move, check_position};

/// Gate combining motion-profile validation and the limit guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionGate {
    limits: StepVector,
}

impl MotionGate {
    pub fn new(limits: StepVector) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &StepVector {
        &self.limits
    }

    /// Validate a relative stepper command and return the resulting
    /// absolute position.
    ///
    /// # Errors
    ///
    /// - [`ArmError::InvalidProfile`] – the profile is out of range.
    /// - [`ArmError::AxisOutOfRange`] – an axis would leave its travel.
    pub fn authorize(
        &self,
        current: &StepVector,
        delta: &StepVector,
        profile: &MotionProfile,
    ) -> Result<StepVector, ArmError> {
        profile.validate()?;
        check_move(current, delta, &self.limits)
    }

    /// Validate an absolute position, e.g. one restored from the ledger.
    pub fn admit_position(&self, steps: &StepVector) -> Result<(), ArmError> {
        check_position(steps, &self.limits)
    }
}
