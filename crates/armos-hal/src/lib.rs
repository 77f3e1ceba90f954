//! `armos-hal` – device links for the arm's stepper controller board.
//!
//! # Modules
//!
//! - [`link`] – [`DeviceLink`][link::DeviceLink], the capability contract
//!   every backend satisfies.
//! - [`sim`] – [`SimLink`][sim::SimLink], an in-memory arm with fault
//!   injection for tests and hardware-free sessions.

pub mod link;
pub mod sim;

pub use link::DeviceLink;
pub use sim::{COMMAND_LOG_CAPACITY, SimCommand, SimControl, SimFault, SimLink, SimLinkBuilder};
