//! `armos-kernel` – Safety interlocks
//!
//! The kernel does not move anything; it decides whether a candidate motion
//! is allowed to reach the device.
//!
//! # Modules
//!
//! - [`limit_guard`] – [`check_move`][limit_guard::check_move] and
//!   [`check_position`][limit_guard::check_position]: all-or-nothing
//!   validation of step targets against per-axis travel limits.
//! - [`motion_gate`] – [`MotionGate`][motion_gate::MotionGate]: the single
//!   interception point every stepper command passes through, combining
//!   motion-profile validation with the limit guard.

pub mod limit_guard;
pub mod motion_gate;

pub use limit_guard::{check_move, check_position};
pub use motion_gate::MotionGate;
