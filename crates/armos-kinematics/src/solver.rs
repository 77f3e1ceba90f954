//! Forward and inverse kinematics over Denavit–Hartenberg link parameters.
//!
//! [`KinematicsSolver`] is the seam the controller and the simulated link are
//! written against. [`DhSolver`] implements it for any six-joint serial arm
//! described by standard DH parameters; [`DhParameters::ar3`] describes the
//! AR3.
//!
//! Inverse kinematics runs damped least squares from a seed configuration.
//! Because every iteration takes the smallest joint step that reduces the
//! pose error, the solution found is the one nearest the seed, so small pose
//! deltas never trigger a wrist flip or a large detour.

use std::f64::consts::{FRAC_PI_2, PI};

use armos_types::{ARM_JOINTS, ArmError, JointVector, Pose, Quaternion, Vec3};
use nalgebra::{Isometry3, Matrix6, Translation3, UnitQuaternion, Vector3, Vector6};
use tracing::debug;

/// Joint angles of the kinematic chain (the turntable is not part of it).
pub type ChainAngles = [f64; ARM_JOINTS];

/// Pure forward/inverse kinematics over fixed arm geometry.
pub trait KinematicsSolver: Send + Sync {
    /// End-effector pose for the given joint angles. Deterministic.
    fn forward(&self, angles: &ChainAngles) -> Pose;

    /// Joint angles reaching `target`, searched from `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::UnreachablePose`] when no configuration reaches
    /// the target, and [`ArmError::InvalidPose`] for a malformed target.
    fn inverse(&self, target: &Pose, seed: &ChainAngles) -> Result<ChainAngles, ArmError>;
}

/// Standard DH parameters, one entry per joint (millimetres, radians).
#[derive(Debug, Clone, PartialEq)]
pub struct DhParameters {
    pub theta_offsets: [f64; ARM_JOINTS],
    pub alpha: [f64; ARM_JOINTS],
    pub a: [f64; ARM_JOINTS],
    pub d: [f64; ARM_JOINTS],
}

impl DhParameters {
    /// Geometry of the AR3 six-axis arm.
    pub fn ar3() -> Self {
        Self {
            theta_offsets: [0.0, 0.0, -FRAC_PI_2, 0.0, 0.0, PI],
            alpha: [-FRAC_PI_2, 0.0, FRAC_PI_2, -FRAC_PI_2, FRAC_PI_2, 0.0],
            a: [64.2, 305.0, 0.0, 0.0, 0.0, 0.0],
            d: [169.77, 0.0, 0.0, -222.63, 0.0, -36.25],
        }
    }
}

/// Convergence settings for the inverse solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkSettings {
    pub max_iterations: usize,
    /// Position error accepted as converged (mm).
    pub position_tolerance: f64,
    /// Orientation error accepted as converged (rad).
    pub rotation_tolerance: f64,
    /// Levenberg damping factor.
    pub damping: f64,
    /// Largest change of any joint in one iteration (rad).
    pub max_step: f64,
}

impl Default for IkSettings {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            position_tolerance: 1e-6,
            rotation_tolerance: 1e-8,
            damping: 1e-3,
            max_step: 0.2,
        }
    }
}

/// Denavit–Hartenberg kinematics solver.
#[derive(Debug, Clone, PartialEq)]
pub struct DhSolver {
    params: DhParameters,
    settings: IkSettings,
}

impl DhSolver {
    pub fn new(params: DhParameters) -> Self {
        Self {
            params,
            settings: IkSettings::default(),
        }
    }

    /// Solver for the AR3 arm.
    pub fn ar3() -> Self {
        Self::new(DhParameters::ar3())
    }

    pub fn with_settings(mut self, settings: IkSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn params(&self) -> &DhParameters {
        &self.params
    }

    fn link(&self, joint: usize, angle: f64) -> Isometry3<f64> {
        let p = &self.params;
        let about_z = Isometry3::from_parts(
            Translation3::new(0.0, 0.0, p.d[joint]),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle + p.theta_offsets[joint]),
        );
        let about_x = Isometry3::from_parts(
            Translation3::new(p.a[joint], 0.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), p.alpha[joint]),
        );
        about_z * about_x
    }

    fn chain(&self, angles: &[f64]) -> Isometry3<f64> {
        angles
            .iter()
            .enumerate()
            .fold(Isometry3::identity(), |acc, (joint, &angle)| acc * self.link(joint, angle))
    }

    /// Six-vector `[position error; rotation error]` taking `current` to
    /// `goal`.
    ///
    /// The rotation error is twice the vector part of the difference
    /// quaternion (shortest arc), which stays accurate for tiny angles where
    /// `acos`-based axis-angle extraction loses precision.
    fn pose_error(goal: &Isometry3<f64>, current: &Isometry3<f64>) -> Vector6<f64> {
        let dp = goal.translation.vector - current.translation.vector;
        let diff = goal.rotation * current.rotation.inverse();
        let q = diff.quaternion();
        let sign = if q.scalar() < 0.0 { -2.0 } else { 2.0 };
        let dr = q.imag() * sign;
        Vector6::new(dp.x, dp.y, dp.z, dr.x, dr.y, dr.z)
    }

    /// Central-difference Jacobian of the pose with respect to the joints.
    fn jacobian(&self, q: &Vector6<f64>) -> Matrix6<f64> {
        const H: f64 = 1e-6;
        let mut jac = Matrix6::zeros();
        for joint in 0..ARM_JOINTS {
            let mut plus = *q;
            let mut minus = *q;
            plus[joint] += H;
            minus[joint] -= H;
            let fwd = self.chain(plus.as_slice());
            let back = self.chain(minus.as_slice());
            let column = Self::pose_error(&fwd, &back) / (2.0 * H);
            jac.set_column(joint, &column);
        }
        jac
    }

    fn converged(&self, err: &Vector6<f64>) -> bool {
        err.fixed_rows::<3>(0).norm() < self.settings.position_tolerance
            && err.fixed_rows::<3>(3).norm() < self.settings.rotation_tolerance
    }
}

fn to_isometry(pose: &Pose) -> Result<Isometry3<f64>, ArmError> {
    let q = pose
        .rotation
        .normalized()
        .ok_or_else(|| ArmError::InvalidPose(format!("degenerate rotation {:?}", pose.rotation)))?;
    if !pose.position.is_finite() {
        return Err(ArmError::InvalidPose(format!(
            "non-finite position {:?}",
            pose.position
        )));
    }
    let rotation = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q.w, q.x, q.y, q.z));
    let p = pose.position;
    Ok(Isometry3::from_parts(Translation3::new(p.x, p.y, p.z), rotation))
}

fn to_pose(iso: &Isometry3<f64>) -> Pose {
    let t = iso.translation.vector;
    // nalgebra stores quaternion coordinates as [i, j, k, w].
    let c = iso.rotation.quaternion().coords;
    Pose::new(Vec3::new(t.x, t.y, t.z), Quaternion::new(c[3], c[0], c[1], c[2]))
}

impl KinematicsSolver for DhSolver {
    fn forward(&self, angles: &ChainAngles) -> Pose {
        to_pose(&self.chain(angles))
    }

    fn inverse(&self, target: &Pose, seed: &ChainAngles) -> Result<ChainAngles, ArmError> {
        let goal = to_isometry(target)?;
        if seed.iter().any(|a| !a.is_finite()) {
            return Err(ArmError::InvalidPose(format!("non-finite seed {seed:?}")));
        }

        let mut q = Vector6::from_row_slice(seed);
        let lambda_sq = self.settings.damping * self.settings.damping;

        for iteration in 0..self.settings.max_iterations {
            let err = Self::pose_error(&goal, &self.chain(q.as_slice()));
            if self.converged(&err) {
                debug!(iteration, "inverse kinematics converged");
                let mut out = [0.0; ARM_JOINTS];
                out.copy_from_slice(q.as_slice());
                return Ok(out);
            }

            let jac = self.jacobian(&q);
            let jjt = jac * jac.transpose() + Matrix6::identity() * lambda_sq;
            let Some(solved) = jjt.lu().solve(&err) else {
                break;
            };
            let mut dq = jac.transpose() * solved;

            let largest = dq.amax();
            if largest > self.settings.max_step {
                dq *= self.settings.max_step / largest;
            }
            q += dq;
        }

        let residual = Self::pose_error(&goal, &self.chain(q.as_slice()));
        Err(ArmError::UnreachablePose(format!(
            "no joint solution within tolerance (position error {:.3} mm, rotation error {:.5} rad)",
            residual.fixed_rows::<3>(0).norm(),
            residual.fixed_rows::<3>(3).norm()
        )))
    }
}

fn chain_of(joints: &JointVector) -> ChainAngles {
    let mut chain = [0.0; ARM_JOINTS];
    chain.copy_from_slice(&joints[..ARM_JOINTS]);
    chain
}

/// End-effector pose of a full joint vector.
pub fn pose_of(solver: &dyn KinematicsSolver, joints: &JointVector) -> Pose {
    solver.forward(&chain_of(joints))
}

/// Joint target for a Cartesian goal, seeded from `current`.
///
/// The turntable keeps its current angle; only the kinematic chain moves.
pub fn joints_for_pose(
    solver: &dyn KinematicsSolver,
    target: &Pose,
    current: &JointVector,
) -> Result<JointVector, ArmError> {
    let chain = solver.inverse(target, &chain_of(current))?;
    let mut joints = *current;
    joints[..ARM_JOINTS].copy_from_slice(&chain);
    Ok(joints)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: ChainAngles = [0.1, -0.5, 0.8, 0.2, 0.5, 0.3];

    fn assert_angles_close(a: &ChainAngles, b: &ChainAngles, tol: f64) {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < tol, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn forward_is_deterministic() {
        let solver = DhSolver::ar3();
        assert_eq!(solver.forward(&SAMPLE), solver.forward(&SAMPLE));
    }

    #[test]
    fn forward_returns_unit_quaternion() {
        let solver = DhSolver::ar3();
        let pose = solver.forward(&SAMPLE);
        assert!((pose.rotation.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn forward_at_zero_matches_geometry() {
        // With every joint at zero the base link contributes its full height
        // and the wrist offsets stack along the vertical axis.
        let solver = DhSolver::ar3();
        let pose = solver.forward(&[0.0; ARM_JOINTS]);
        assert!(pose.position.is_finite());
        assert!(pose.position.norm() > 300.0);
    }

    #[test]
    fn inverse_returns_seed_when_already_there() {
        let solver = DhSolver::ar3();
        let pose = solver.forward(&SAMPLE);
        let solution = solver.inverse(&pose, &SAMPLE).unwrap();
        assert_eq!(solution, SAMPLE);
    }

    #[test]
    fn inverse_recovers_nearby_configuration() {
        let solver = DhSolver::ar3();
        let mut target_angles = SAMPLE;
        for a in target_angles.iter_mut() {
            *a += 0.03;
        }
        let target = solver.forward(&target_angles);
        let solution = solver.inverse(&target, &SAMPLE).unwrap();
        assert_angles_close(&solution, &target_angles, 1e-5);

        let reached = solver.forward(&solution);
        assert!(reached.position.sub(target.position).norm() < 1e-5);
    }

    #[test]
    fn inverse_rejects_out_of_reach_target() {
        let solver = DhSolver::ar3();
        let far = Pose::new(Vec3::new(5000.0, 0.0, 0.0), Quaternion::identity());
        let err = solver.inverse(&far, &SAMPLE).unwrap_err();
        assert!(matches!(err, ArmError::UnreachablePose(_)));
    }

    #[test]
    fn inverse_rejects_degenerate_rotation() {
        let solver = DhSolver::ar3();
        let bad = Pose::new(Vec3::new(300.0, 0.0, 300.0), Quaternion::new(0.0, 0.0, 0.0, 0.0));
        assert!(matches!(
            solver.inverse(&bad, &SAMPLE),
            Err(ArmError::InvalidPose(_))
        ));
    }
}
