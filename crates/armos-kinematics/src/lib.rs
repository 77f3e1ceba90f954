//! `armos-kinematics` – coordinate spaces of the arm.
//!
//! Pure math shared by the simulated device link and the arm controller.
//! Nothing in this crate holds state about where the arm currently is.
//!
//! # Modules
//!
//! - [`converter`] – [`StepConverter`][converter::StepConverter]: exact
//!   bidirectional mapping between joint angles and stepper counts.
//! - [`pose`] – [`compose_target`][pose::compose_target]: resolves a relative
//!   or absolute move request into one normalized target pose.
//! - [`solver`] – [`KinematicsSolver`][solver::KinematicsSolver] and the
//!   Denavit–Hartenberg implementation [`DhSolver`][solver::DhSolver].

pub mod converter;
pub mod pose;
pub mod solver;

pub use converter::{StepConverter, step_delta};
pub use pose::{MoveMode, compose, compose_target};
pub use solver::{
    ChainAngles, DhParameters, DhSolver, IkSettings, KinematicsSolver, joints_for_pose, pose_of,
};
