//! Wiring of one arm session from the resolved configuration.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use armos_hal::SimLink;
use armos_kinematics::DhSolver;
use armos_memory::{PositionStore, SqliteLedger};
use armos_runtime::{ArmController, ControllerOptions};

use crate::config::Config;

/// Ledger location that keeps positions for the current process only.
pub const IN_MEMORY: &str = ":memory:";

fn open_store(database: &str) -> Result<Box<dyn PositionStore>, String> {
    let ledger = if database == IN_MEMORY {
        SqliteLedger::open_in_memory()
    } else {
        if let Some(parent) = Path::new(database).parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create ledger directory: {}", e))?;
        }
        SqliteLedger::open(database)
    };
    let ledger =
        ledger.map_err(|e| format!("Failed to open position ledger {}: {}", database, e))?;
    Ok(Box::new(ledger))
}

/// Connect to the arm on `cfg.port` and reseed from `cfg.database`.
pub fn open(cfg: &Config) -> Result<ArmController, String> {
    let axes = cfg.axis_table()?;
    let profile = cfg.profile(cfg.speed);
    let link = SimLink::connect(&cfg.port, axes).map_err(|e| e.to_string())?;
    let store = open_store(&cfg.database)?;
    ArmController::new(
        Box::new(link),
        store,
        Arc::new(DhSolver::ar3()),
        ControllerOptions { axes, profile },
    )
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use armos_runtime::Reseed;
    use armos_types::{ArmState, MotionProfile};

    fn config_at(database: &str) -> Config {
        Config {
            database: database.to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn in_memory_session_starts_uninitialized() {
        let arm = open(&config_at(IN_MEMORY)).unwrap();
        assert_eq!(arm.state().unwrap(), ArmState::Uninitialized);
        assert_eq!(arm.reseed(), &Reseed::Empty);
    }

    #[test]
    fn file_session_creates_directory_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("positions.db");
        let cfg = config_at(db.to_str().unwrap());

        {
            let arm = open(&cfg).unwrap();
            arm.calibrate(25, [true; 7]).unwrap();
            arm.move_steppers(&MotionProfile::with_speed(25), &[100, 0, 0, 0, 0, 0, 0])
                .unwrap();
        }

        let arm = open(&cfg).unwrap();
        assert_eq!(arm.state().unwrap(), ArmState::Ready);
        assert_eq!(arm.current_stepper_position().unwrap()[0], 100);
    }

    #[test]
    fn blank_port_is_a_connection_error() {
        let mut cfg = config_at(IN_MEMORY);
        cfg.port = "  ".to_string();
        assert!(open(&cfg).is_err());
    }

    #[test]
    fn invalid_speed_is_rejected() {
        let mut cfg = config_at(IN_MEMORY);
        cfg.speed = 0;
        let err = open(&cfg).err().unwrap();
        assert!(err.contains("speed"), "{err}");
    }
}
