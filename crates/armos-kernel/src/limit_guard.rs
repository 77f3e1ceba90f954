//! Limit guard – per-axis travel limits.
//!
//! A move is accepted only when **every** axis lands inside `[0, limit]`.
//! The first axis that would leave its range rejects the whole move and no
//! axis is applied: a partially applied move would desynchronize the tracked
//! step state from the physical arm.

use armos_types::{AXIS_COUNT, ArmError, Axis, StepVector};
use tracing::debug;

/// Validate `current + delta` against `limits`.
///
/// Returns the candidate step vector when every axis stays in range.
///
/// # Errors
///
/// Returns [`ArmError::AxisOutOfRange`] naming the first offending axis.
/// Overflowing sums are reported with a saturated `attempted` value.
///
/// # Example
///
/// ```
/// use armos_kernel::limit_guard::check_move;
/// use armos_types::{ArmError, Axis};
///
/// let limits = [100; 7];
/// assert_eq!(check_move(&[10; 7], &[5; 7], &limits).unwrap(), [15; 7]);
///
/// let err = check_move(&[0; 7], &[0, 0, -1, 0, 0, 0, 0], &limits).unwrap_err();
/// assert!(matches!(err, ArmError::AxisOutOfRange { axis: Axis::J3, .. }));
/// ```
pub fn check_move(
    current: &StepVector,
    delta: &StepVector,
    limits: &StepVector,
) -> Result<StepVector, ArmError> {
    let mut candidate = [0; AXIS_COUNT];
    for (i, axis) in Axis::ALL.iter().enumerate() {
        let attempted = current[i].saturating_add(delta[i]);
        if current[i].checked_add(delta[i]).is_none() || !(0..=limits[i]).contains(&attempted) {
            debug!(%axis, attempted, limit = limits[i], "limit guard rejected move");
            return Err(ArmError::AxisOutOfRange {
                axis: *axis,
                limit: limits[i],
                attempted,
            });
        }
        candidate[i] = attempted;
    }
    Ok(candidate)
}

/// Validate an absolute step position against `limits`.
pub fn check_position(steps: &StepVector, limits: &StepVector) -> Result<(), ArmError> {
    check_move(&[0; AXIS_COUNT], steps, limits).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: StepVector = [15200, 7300, 7850, 15200, 4575, 6625, 10000];

    #[test]
    fn in_range_move_is_applied() {
        let result = check_move(&[0; AXIS_COUNT], &[500, 500, 500, 500, 500, 500, 0], &LIMITS);
        assert_eq!(result.unwrap(), [500, 500, 500, 500, 500, 500, 0]);
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert!(check_position(&LIMITS, &LIMITS).is_ok());
        assert!(check_position(&[0; AXIS_COUNT], &LIMITS).is_ok());
    }

    #[test]
    fn one_past_limit_names_exactly_that_axis() {
        for axis in Axis::ALL {
            let mut steps = LIMITS;
            steps[axis.index()] += 1;
            let err = check_position(&steps, &LIMITS).unwrap_err();
            assert_eq!(
                err,
                ArmError::AxisOutOfRange {
                    axis,
                    limit: LIMITS[axis.index()],
                    attempted: LIMITS[axis.index()] + 1,
                }
            );
        }
    }

    #[test]
    fn negative_position_names_exactly_that_axis() {
        for axis in Axis::ALL {
            let mut steps = [0; AXIS_COUNT];
            steps[axis.index()] = -1;
            let err = check_position(&steps, &LIMITS).unwrap_err();
            assert!(matches!(err, ArmError::AxisOutOfRange { axis: a, attempted: -1, .. } if a == axis));
        }
    }

    #[test]
    fn huge_delta_on_j6_is_rejected() {
        let err = check_move(
            &[0; AXIS_COUNT],
            &[500, 500, 500, 500, 500, 500_000_000, 0],
            &LIMITS,
        )
        .unwrap_err();
        assert!(matches!(err, ArmError::AxisOutOfRange { axis: Axis::J6, limit: 6625, .. }));
    }

    #[test]
    fn overflow_is_rejected_not_wrapped() {
        let current = [i64::MAX - 1, 0, 0, 0, 0, 0, 0];
        let limits = [i64::MAX; AXIS_COUNT];
        let err = check_move(&current, &[10, 0, 0, 0, 0, 0, 0], &limits).unwrap_err();
        assert!(matches!(
            err,
            ArmError::AxisOutOfRange { axis: Axis::J1, attempted: i64::MAX, .. }
        ));
    }
}
