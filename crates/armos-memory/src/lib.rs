//! `armos-memory` – persistent position state.
//!
//! Remembers where the arm was last commanded so a restarted session can
//! resume without recalibrating, using a local SQLite substrate.
//!
//! # Modules
//!
//! - [`ledger`] – [`SqliteLedger`][ledger::SqliteLedger]: an append-only
//!   record of commanded positions behind the
//!   [`PositionStore`][ledger::PositionStore] trait.

pub mod ledger;

pub use ledger::{LedgerError, PositionStore, SqliteLedger};
