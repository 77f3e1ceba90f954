//! `armos-runtime` – the arm session.
//!
//! [`ArmController`][controller::ArmController] ties the coordinate
//! converter, limit guard, pose composer, kinematics solver, device link and
//! position ledger into one single-writer state machine:
//!
//! ```text
//! Uninitialized ──calibrate──▶ Calibrating ──▶ Ready ──move──▶ Ready
//!       ▲                           │             │
//!       └──── set_directions ───────┼─────────────┘
//!                                   ▼
//!            Faulted ◀── link timeout / device fault
//!               │
//!               └── echo, then calibrate ──▶ Ready
//! ```

pub mod controller;

pub use controller::{ArmController, ArmStatus, ControllerOptions, Reseed};
