//! [`ArmController`] – single-writer state machine for one arm session.
//!
//! Every state-changing operation holds the write lock for the whole
//! "compute candidate → validate → commit to the link → persist" sequence,
//! so two commands can never interleave and a read query always sees a
//! consistent snapshot.
//!
//! # Write path
//!
//! 1. The request is converted to a relative [`StepVector`] (through the
//!    pose composer, the kinematics solver and the step converter as
//!    needed).
//! 2. [`MotionGate::authorize`] validates the profile and the travel of
//!    every axis. Nothing reaches the link unless every axis passes.
//! 3. The link executes the move. A timeout or device fault faults the
//!    controller: the arm may have moved by an unknown amount.
//! 4. The new position is appended to the position ledger. A failed write
//!    does not undo the move; it is reported as [`ArmError::LedgerWrite`]
//!    and resume safety stays degraded until the next successful write.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use armos_hal::SimLink;
//! use armos_kinematics::DhSolver;
//! use armos_memory::SqliteLedger;
//! use armos_runtime::{ArmController, ControllerOptions};
//! use armos_types::{ArmState, MotionProfile};
//!
//! let arm = ArmController::new(
//!     Box::new(SimLink::builder("sim0").build().unwrap()),
//!     Box::new(SqliteLedger::open_in_memory().unwrap()),
//!     Arc::new(DhSolver::ar3()),
//!     ControllerOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(arm.state().unwrap(), ArmState::Uninitialized);
//!
//! arm.calibrate(25, [true; 7]).unwrap();
//! arm.move_steppers(&MotionProfile::with_speed(25), &[500, 500, 500, 500, 500, 500, 0])
//!     .unwrap();
//! assert_eq!(arm.current_stepper_position().unwrap(), [500, 500, 500, 500, 500, 500, 0]);
//! ```

use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use armos_hal::DeviceLink;
use armos_kernel::MotionGate;
use armos_kinematics::{
    KinematicsSolver, MoveMode, StepConverter, compose_target, joints_for_pose, pose_of,
    step_delta,
};
use armos_memory::PositionStore;
use armos_types::{
    AXIS_COUNT, ArmError, ArmState, AxisConfig, JointVector, MotionProfile, Pose, PositionRecord,
    PositionSnapshot, StepVector,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// Construction settings for [`ArmController`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerOptions {
    /// Axis table; its direction flags are pushed to the link at startup.
    pub axes: [AxisConfig; AXIS_COUNT],
    /// Profile returned by [`ArmController::profile`].
    pub profile: MotionProfile,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            axes: AxisConfig::ar3_defaults(),
            profile: MotionProfile::default(),
        }
    }
}

/// How the controller's position was established at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum Reseed {
    /// The ledger is empty; the arm must be calibrated.
    Empty,
    /// Position restored from the ledger row `record_id`.
    Restored { record_id: i64 },
    /// The ledger could not be used; the arm must be calibrated.
    Failed(ArmError),
}

/// Consistent snapshot of the controller, taken under one read lock.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmStatus {
    pub port: String,
    pub state: ArmState,
    pub steps: StepVector,
    pub joints: JointVector,
    pub pose: Pose,
    pub directions: [bool; AXIS_COUNT],
    pub profile: MotionProfile,
    pub resume_degraded: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Core state
// ─────────────────────────────────────────────────────────────────────────────

struct ArmCore {
    link: Box<dyn DeviceLink>,
    state: ArmState,
    steps: StepVector,
    converter: StepConverter,
    gate: MotionGate,
    profile: MotionProfile,
    /// An echo has succeeded in this session.
    link_verified: bool,
    /// An echo has succeeded since the controller last faulted.
    echo_since_fault: bool,
    resume_degraded: bool,
}

impl ArmCore {
    fn joints(&self) -> JointVector {
        self.converter.steps_to_angles(&self.steps, false)
    }

    fn require_ready(&self, operation: &str) -> Result<(), ArmError> {
        if self.state == ArmState::Ready {
            Ok(())
        } else {
            debug!(state = %self.state, operation, "rejected: arm not ready");
            Err(ArmError::InvalidState {
                state: self.state,
                operation: operation.to_string(),
            })
        }
    }

    fn enter_fault(&mut self, err: &ArmError) {
        warn!(from = %self.state, error = %err, "arm faulted; echo and recalibrate to recover");
        self.state = ArmState::Faulted;
        self.echo_since_fault = false;
    }

    fn echo(&mut self) -> Result<(), ArmError> {
        match self.link.echo() {
            Ok(()) => {
                self.link_verified = true;
                if self.state == ArmState::Faulted {
                    self.echo_since_fault = true;
                }
                Ok(())
            }
            Err(err) => {
                if err.faults_controller() {
                    self.enter_fault(&err);
                }
                Err(err)
            }
        }
    }

    /// Probe the link once per session before the first command.
    fn ensure_link(&mut self) -> Result<(), ArmError> {
        if self.link_verified {
            return Ok(());
        }
        debug!(port = self.link.port(), "probing link before first command");
        self.echo()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ArmController
// ─────────────────────────────────────────────────────────────────────────────

/// The arm session object.
///
/// Binds one [`DeviceLink`], one [`PositionStore`] and one
/// [`KinematicsSolver`] at construction. All operations return
/// `Result<_, ArmError>`.
pub struct ArmController {
    core: RwLock<ArmCore>,
    store: Mutex<Box<dyn PositionStore>>,
    solver: Arc<dyn KinematicsSolver>,
    reseed: Reseed,
}

impl ArmController {
    /// Build a controller and reseed it from the newest ledger row.
    ///
    /// With a usable ledger row the controller starts `Ready` at that
    /// position without calibrating; otherwise it starts `Uninitialized`.
    /// See [`ArmController::reseed`] for what happened.
    ///
    /// # Errors
    ///
    /// [`ArmError::InvalidProfile`] when `options.profile` is invalid.
    pub fn new(
        mut link: Box<dyn DeviceLink>,
        store: Box<dyn PositionStore>,
        solver: Arc<dyn KinematicsSolver>,
        options: ControllerOptions,
    ) -> Result<Self, ArmError> {
        options.profile.validate()?;
        let converter = StepConverter::new(options.axes);
        let gate = MotionGate::new(converter.limits());
        link.set_directions(converter.directions());

        let (state, steps, reseed) =
            match restored_steps(store.as_ref(), &converter, &gate, solver.as_ref()) {
                Ok(None) => (ArmState::Uninitialized, link.current_stepper_position(), Reseed::Empty),
                Ok(Some((record_id, steps))) => match link.restore(&steps) {
                    Ok(()) => (ArmState::Ready, steps, Reseed::Restored { record_id }),
                    Err(err) => (
                        ArmState::Uninitialized,
                        link.current_stepper_position(),
                        Reseed::Failed(ArmError::LedgerRead(format!(
                            "record {record_id} rejected by link: {err}"
                        ))),
                    ),
                },
                Err(err) => (ArmState::Uninitialized, link.current_stepper_position(), Reseed::Failed(err)),
            };

        match &reseed {
            Reseed::Restored { record_id } => {
                info!(port = link.port(), record_id, "position restored from ledger");
            }
            Reseed::Empty => info!(port = link.port(), "no recorded position; calibration required"),
            Reseed::Failed(err) => {
                warn!(port = link.port(), error = %err, "position ledger unusable; calibration required");
            }
        }

        Ok(Self {
            core: RwLock::new(ArmCore {
                link,
                state,
                steps,
                converter,
                gate,
                profile: options.profile,
                link_verified: false,
                echo_since_fault: false,
                resume_degraded: false,
            }),
            store: Mutex::new(store),
            solver,
            reseed,
        })
    }

    /// Outcome of the startup reseed.
    pub fn reseed(&self) -> &Reseed {
        &self.reseed
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ArmCore>, ArmError> {
        self.core
            .read()
            .map_err(|e| ArmError::StatePoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ArmCore>, ArmError> {
        self.core
            .write()
            .map_err(|e| ArmError::StatePoisoned(e.to_string()))
    }

    // ── Write path ───────────────────────────────────────────────────────────

    fn persist(&self, core: &mut ArmCore) -> Result<(), ArmError> {
        let snapshot = PositionSnapshot::Joints(core.joints());
        let result = match self.store.lock() {
            Ok(mut store) => {
                let timestamp = record_time(store.as_ref(), Utc::now());
                store.record(&snapshot, timestamp).map_err(|e| e.to_string())
            }
            Err(poisoned) => Err(poisoned.to_string()),
        };
        match result {
            Ok(record) => {
                if core.resume_degraded {
                    info!(record_id = record.id, "ledger writes recovered; resume safety restored");
                }
                core.resume_degraded = false;
                Ok(())
            }
            Err(details) => {
                core.resume_degraded = true;
                warn!(%details, "state-tracking desync: move committed but ledger write failed");
                Err(ArmError::LedgerWrite(details))
            }
        }
    }

    fn commit_steps(
        &self,
        core: &mut ArmCore,
        profile: &MotionProfile,
        delta: &StepVector,
    ) -> Result<(), ArmError> {
        let target = core.gate.authorize(&core.steps, delta, profile)?;
        core.ensure_link()?;
        if let Err(err) = core.link.move_steppers(profile, delta) {
            if err.faults_controller() {
                core.enter_fault(&err);
            }
            return Err(err);
        }
        core.steps = target;
        info!(steps = ?target, "move committed");
        self.persist(core)
    }

    fn commit_joints(
        &self,
        core: &mut ArmCore,
        profile: &MotionProfile,
        target: &JointVector,
    ) -> Result<(), ArmError> {
        if target.iter().any(|a| !a.is_finite()) {
            return Err(ArmError::InvalidPose(format!("non-finite joint angles {target:?}")));
        }
        let steps = core.converter.angles_to_steps(target, false);
        let delta = step_delta(&core.steps, &steps);
        self.commit_steps(core, profile, &delta)
    }

    fn commit_pose(
        &self,
        core: &mut ArmCore,
        profile: &MotionProfile,
        target: &Pose,
    ) -> Result<(), ArmError> {
        // Seeding from the current angles keeps the nearest solution.
        let joints = joints_for_pose(self.solver.as_ref(), target, &core.joints())?;
        self.commit_joints(core, profile, &joints)
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Liveness probe. After a fault, a successful echo re-enables
    /// [`calibrate`][Self::calibrate].
    #[instrument(skip(self))]
    pub fn echo(&self) -> Result<(), ArmError> {
        let mut core = self.write()?;
        core.echo()?;
        info!(state = %core.state, "link alive");
        Ok(())
    }

    /// Home every enabled axis on its limit switch.
    ///
    /// Accepted from `Uninitialized` and `Ready`, and from `Faulted` once
    /// [`echo`][Self::echo] has succeeded after the fault. Disabled axes take
    /// the position the link reports; if that lies outside their travel the
    /// arm stays `Faulted` and those axes must be homed too.
    #[instrument(skip(self))]
    pub fn calibrate(&self, speed: u32, enabled: [bool; AXIS_COUNT]) -> Result<(), ArmError> {
        let mut core = self.write()?;
        match core.state {
            ArmState::Uninitialized | ArmState::Ready => {}
            ArmState::Faulted if core.echo_since_fault => {}
            state => {
                return Err(ArmError::InvalidState {
                    state,
                    operation: "calibrate".to_string(),
                });
            }
        }
        MotionProfile::with_speed(speed).validate()?;
        core.ensure_link()?;

        info!(from = %core.state, "calibrating");
        core.state = ArmState::Calibrating;
        if let Err(err) = core.link.calibrate(speed, enabled) {
            core.enter_fault(&err);
            return Err(err);
        }
        // Disabled axes take the link's count: after a lost acknowledgment
        // ours is stale.
        let mut steps = core.link.current_stepper_position();
        for (step, home) in steps.iter_mut().zip(enabled) {
            if home {
                *step = 0;
            }
        }
        if let Err(err) = core.gate.admit_position(&steps) {
            warn!(error = %err, "link position outside travel; home every axis to recover");
            core.state = ArmState::Faulted;
            core.echo_since_fault = true;
            return Err(err);
        }
        if steps != core.steps {
            debug!(from = ?core.steps, to = ?steps, "tracked steps resynced from link");
        }
        core.steps = steps;
        core.state = ArmState::Ready;
        core.echo_since_fault = false;
        info!(steps = ?core.steps, "calibrated");
        self.persist(&mut core)
    }

    /// Relative stepper move.
    #[instrument(skip(self))]
    pub fn move_steppers(&self, profile: &MotionProfile, delta: &StepVector) -> Result<(), ArmError> {
        let mut core = self.write()?;
        core.require_ready("move_steppers")?;
        self.commit_steps(&mut core, profile, delta)
    }

    /// Absolute joint-space move.
    #[instrument(skip(self))]
    pub fn move_joint_radians(
        &self,
        profile: &MotionProfile,
        target: &JointVector,
    ) -> Result<(), ArmError> {
        let mut core = self.write()?;
        core.require_ready("move_joint_radians")?;
        self.commit_joints(&mut core, profile, target)
    }

    /// Cartesian move to an absolute pose. The turntable keeps its angle.
    ///
    /// # Errors
    ///
    /// [`ArmError::UnreachablePose`] when the solver finds no configuration;
    /// nothing is committed in that case.
    #[instrument(skip(self))]
    pub fn move_to(&self, profile: &MotionProfile, target: &Pose) -> Result<(), ArmError> {
        let mut core = self.write()?;
        core.require_ready("move")?;
        self.commit_pose(&mut core, profile, target)
    }

    /// Cartesian move by a delta (relative) or to a pose (absolute).
    #[instrument(skip(self))]
    pub fn move_pose(
        &self,
        profile: &MotionProfile,
        delta: &Pose,
        mode: MoveMode,
    ) -> Result<(), ArmError> {
        let mut core = self.write()?;
        core.require_ready("move")?;
        let current = pose_of(self.solver.as_ref(), &core.joints());
        let target = compose_target(&current, delta, mode)?;
        debug!(?target, "composed target pose");
        self.commit_pose(&mut core, profile, &target)
    }

    /// Move every axis to zero angle.
    #[instrument(skip(self))]
    pub fn home(&self, profile: &MotionProfile) -> Result<(), ArmError> {
        let mut core = self.write()?;
        core.require_ready("home")?;
        self.commit_joints(&mut core, profile, &[0.0; AXIS_COUNT])
    }

    /// Replace the direction convention.
    ///
    /// A `Ready` arm drops to `Uninitialized`: its tracked steps no longer
    /// map to the angles they were recorded for. The change is not
    /// persisted; a restarted controller reseeds the newest ledger row with
    /// the directions in its [`ControllerOptions`].
    #[instrument(skip(self))]
    pub fn set_directions(&self, directions: [bool; AXIS_COUNT]) -> Result<(), ArmError> {
        let mut core = self.write()?;
        core.ensure_link()?;
        core.converter.set_directions(directions);
        core.link.set_directions(directions);
        if core.state == ArmState::Ready {
            info!("direction convention changed; calibration required");
            core.state = ArmState::Uninitialized;
        }
        Ok(())
    }

    /// Replace the default motion profile.
    pub fn set_profile(&self, profile: MotionProfile) -> Result<(), ArmError> {
        profile.validate()?;
        self.write()?.profile = profile;
        Ok(())
    }

    // ── Read queries ─────────────────────────────────────────────────────────

    pub fn state(&self) -> Result<ArmState, ArmError> {
        Ok(self.read()?.state)
    }

    pub fn current_stepper_position(&self) -> Result<StepVector, ArmError> {
        Ok(self.read()?.steps)
    }

    pub fn current_joint_radians(&self) -> Result<JointVector, ArmError> {
        Ok(self.read()?.joints())
    }

    /// Forward kinematics of the tracked joint angles.
    pub fn current_pose(&self) -> Result<Pose, ArmError> {
        let joints = self.read()?.joints();
        Ok(pose_of(self.solver.as_ref(), &joints))
    }

    pub fn directions(&self) -> Result<[bool; AXIS_COUNT], ArmError> {
        Ok(self.read()?.converter.directions())
    }

    pub fn profile(&self) -> Result<MotionProfile, ArmError> {
        Ok(self.read()?.profile)
    }

    /// A committed move is missing from the ledger; a restart would resume
    /// from an older position.
    pub fn resume_degraded(&self) -> Result<bool, ArmError> {
        Ok(self.read()?.resume_degraded)
    }

    pub fn status(&self) -> Result<ArmStatus, ArmError> {
        let core = self.read()?;
        let joints = core.joints();
        Ok(ArmStatus {
            port: core.link.port().to_string(),
            state: core.state,
            steps: core.steps,
            joints,
            pose: pose_of(self.solver.as_ref(), &joints),
            directions: core.converter.directions(),
            profile: core.profile,
            resume_degraded: core.resume_degraded,
        })
    }

    /// Newest ledger rows, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<PositionRecord>, ArmError> {
        let store = self
            .store
            .lock()
            .map_err(|e| ArmError::StatePoisoned(e.to_string()))?;
        store
            .history(limit)
            .map_err(|e| ArmError::LedgerRead(e.to_string()))
    }
}

/// `now`, held back to the newest row's timestamp when the wall clock has
/// stepped backwards since that row was written.
fn record_time(store: &dyn PositionStore, now: DateTime<Utc>) -> DateTime<Utc> {
    match store.most_recent() {
        Ok(Some(latest)) if latest.timestamp > now => {
            debug!(%now, latest = %latest.timestamp, "clock behind ledger; reusing latest timestamp");
            latest.timestamp
        }
        _ => now,
    }
}

/// Step position recorded by the newest ledger row, validated against the
/// travel limits.
fn restored_steps(
    store: &dyn PositionStore,
    converter: &StepConverter,
    gate: &MotionGate,
    solver: &dyn KinematicsSolver,
) -> Result<Option<(i64, StepVector)>, ArmError> {
    let Some(record) = store
        .most_recent()
        .map_err(|e| ArmError::LedgerRead(e.to_string()))?
    else {
        return Ok(None);
    };
    let rejected = |details: String| ArmError::LedgerRead(format!("record {}: {details}", record.id));

    let joints = match record.snapshot {
        PositionSnapshot::Joints(joints) => joints,
        PositionSnapshot::Pose(pose) => joints_for_pose(solver, &pose, &[0.0; AXIS_COUNT])
            .map_err(|e| rejected(e.to_string()))?,
    };
    if joints.iter().any(|a| !a.is_finite()) {
        return Err(rejected(format!("non-finite joint angles {joints:?}")));
    }
    let steps = converter.angles_to_steps(&joints, false);
    gate.admit_position(&steps)
        .map_err(|e| rejected(e.to_string()))?;
    Ok(Some((record.id, steps)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use armos_hal::{SimCommand, SimControl, SimFault, SimLink};
    use armos_kinematics::DhSolver;
    use armos_memory::{LedgerError, SqliteLedger};
    use armos_types::{Axis, DEFAULT_DIRECTIONS};

    /// Ledger whose writes can be switched off.
    struct FlakyStore {
        inner: SqliteLedger,
        failing: Arc<AtomicBool>,
    }

    impl PositionStore for FlakyStore {
        fn record(
            &mut self,
            snapshot: &PositionSnapshot,
            timestamp: DateTime<Utc>,
        ) -> Result<PositionRecord, LedgerError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LedgerError::Corrupt {
                    id: 0,
                    details: "disk I/O error".to_string(),
                });
            }
            self.inner.record(snapshot, timestamp)
        }

        fn most_recent(&self) -> Result<Option<PositionRecord>, LedgerError> {
            self.inner.most_recent()
        }

        fn history(&self, limit: usize) -> Result<Vec<PositionRecord>, LedgerError> {
            self.inner.history(limit)
        }
    }

    fn build(store: Box<dyn PositionStore>) -> (ArmController, SimControl) {
        let control = SimControl::new();
        let link = SimLink::builder("sim0").control(control.clone()).build().unwrap();
        let arm = ArmController::new(
            Box::new(link),
            store,
            Arc::new(DhSolver::ar3()),
            ControllerOptions::default(),
        )
        .unwrap();
        (arm, control)
    }

    fn fresh() -> (ArmController, SimControl) {
        build(Box::new(SqliteLedger::open_in_memory().unwrap()))
    }

    fn ready() -> (ArmController, SimControl) {
        let (arm, control) = fresh();
        arm.calibrate(25, [true; 7]).unwrap();
        (arm, control)
    }

    fn flaky() -> (ArmController, SimControl, Arc<AtomicBool>) {
        let failing = Arc::new(AtomicBool::new(false));
        let store = FlakyStore {
            inner: SqliteLedger::open_in_memory().unwrap(),
            failing: Arc::clone(&failing),
        };
        let (arm, control) = build(Box::new(store));
        (arm, control, failing)
    }

    #[test]
    fn fresh_controller_is_uninitialized() {
        let (arm, _) = fresh();
        assert_eq!(arm.state().unwrap(), ArmState::Uninitialized);
        assert_eq!(arm.reseed(), &Reseed::Empty);
    }

    #[test]
    fn moves_require_ready() {
        let (arm, control) = fresh();
        let err = arm
            .move_steppers(&MotionProfile::default(), &[1; 7])
            .unwrap_err();
        assert!(matches!(err, ArmError::InvalidState { state: ArmState::Uninitialized, .. }));
        assert!(arm.home(&MotionProfile::default()).is_err());
        assert!(control.commands().is_empty());
    }

    #[test]
    fn first_command_is_preceded_by_echo() {
        let (arm, control) = ready();
        arm.move_steppers(&MotionProfile::default(), &[1; 7]).unwrap();
        let commands = control.commands();
        assert_eq!(commands[0], SimCommand::Echo);
        assert!(matches!(commands[1], SimCommand::Calibrate { .. }));
        // Only one probe per session.
        assert_eq!(commands.iter().filter(|c| **c == SimCommand::Echo).count(), 1);
    }

    #[test]
    fn calibrate_keeps_disabled_axes() {
        let (arm, _) = ready();
        arm.move_steppers(&MotionProfile::default(), &[100, 200, 300, 400, 500, 600, 700])
            .unwrap();
        arm.calibrate(25, [true, true, true, true, true, true, false]).unwrap();
        assert_eq!(arm.current_stepper_position().unwrap(), [0, 0, 0, 0, 0, 0, 700]);
    }

    #[test]
    fn calibrate_rejects_invalid_speed_without_state_change() {
        let (arm, _) = fresh();
        let err = arm.calibrate(101, [true; 7]).unwrap_err();
        assert!(matches!(err, ArmError::InvalidProfile(_)));
        assert_eq!(arm.state().unwrap(), ArmState::Uninitialized);
    }

    #[test]
    fn rejected_move_leaves_state_and_link_untouched() {
        let (arm, control) = ready();
        let before = control.commands().len();
        let err = arm
            .move_steppers(&MotionProfile::default(), &[0, 0, 0, 0, -1, 0, 0])
            .unwrap_err();
        assert!(matches!(err, ArmError::AxisOutOfRange { axis: Axis::J5, .. }));
        assert_eq!(arm.state().unwrap(), ArmState::Ready);
        assert_eq!(arm.current_stepper_position().unwrap(), [0; 7]);
        assert_eq!(control.commands().len(), before);
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let (arm, _) = ready();
        let mut profile = MotionProfile::default();
        profile.decel_speed = 150;
        let err = arm.move_steppers(&profile, &[1; 7]).unwrap_err();
        assert!(matches!(err, ArmError::InvalidProfile(_)));
    }

    #[test]
    fn timeout_faults_until_echo_and_calibrate() {
        let (arm, control) = ready();
        control.inject(SimFault::Timeout);
        let err = arm.move_steppers(&MotionProfile::default(), &[10; 7]).unwrap_err();
        assert!(matches!(err, ArmError::LinkTimeout { .. }));
        assert_eq!(arm.state().unwrap(), ArmState::Faulted);

        // Moves and calibration are refused until an echo succeeds.
        assert!(matches!(
            arm.move_steppers(&MotionProfile::default(), &[1; 7]),
            Err(ArmError::InvalidState { state: ArmState::Faulted, .. })
        ));
        assert!(matches!(
            arm.calibrate(25, [true; 7]),
            Err(ArmError::InvalidState { state: ArmState::Faulted, .. })
        ));

        arm.echo().unwrap();
        assert_eq!(arm.state().unwrap(), ArmState::Faulted);
        arm.calibrate(25, [true; 7]).unwrap();
        assert_eq!(arm.state().unwrap(), ArmState::Ready);
        assert_eq!(arm.current_stepper_position().unwrap(), [0; 7]);
    }

    #[test]
    fn partial_calibration_after_timeout_resyncs_from_link() {
        let (arm, control) = ready();
        control.inject(SimFault::Timeout);
        let err = arm
            .move_steppers(&MotionProfile::default(), &[0, 0, 0, 0, 0, 0, 9000])
            .unwrap_err();
        assert!(matches!(err, ArmError::LinkTimeout { .. }));
        // The acknowledgment was lost, so the controller still counts zero.
        assert_eq!(arm.current_stepper_position().unwrap(), [0; 7]);

        arm.echo().unwrap();
        arm.calibrate(25, [true, true, true, true, true, true, false]).unwrap();
        assert_eq!(arm.state().unwrap(), ArmState::Ready);
        assert_eq!(arm.current_stepper_position().unwrap(), [0, 0, 0, 0, 0, 0, 9000]);

        // The ledger holds where the arm actually is.
        let conv = StepConverter::new(AxisConfig::ar3_defaults());
        let latest = &arm.history(1).unwrap()[0];
        assert_eq!(
            latest.snapshot,
            PositionSnapshot::Joints(conv.steps_to_angles(&[0, 0, 0, 0, 0, 0, 9000], false))
        );

        // Controller and link agree on the remaining turntable travel.
        let sent = control.commands().len();
        let err = arm
            .move_steppers(&MotionProfile::default(), &[0, 0, 0, 0, 0, 0, 2000])
            .unwrap_err();
        assert_eq!(
            err,
            ArmError::AxisOutOfRange {
                axis: Axis::Turntable,
                limit: 10000,
                attempted: 11000,
            }
        );
        assert_eq!(control.commands().len(), sent);
    }

    #[test]
    fn huge_joint_target_is_out_of_range() {
        let (arm, control) = ready();
        let sent = control.commands().len();
        let err = arm
            .move_joint_radians(&MotionProfile::default(), &[1e30, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .unwrap_err();
        assert!(matches!(err, ArmError::AxisOutOfRange { axis: Axis::J1, .. }));
        assert_eq!(arm.state().unwrap(), ArmState::Ready);
        assert_eq!(arm.current_stepper_position().unwrap(), [0; 7]);
        assert_eq!(control.commands().len(), sent);

        // The controller is still usable.
        assert!(arm
            .move_joint_radians(&MotionProfile::default(), &[-1e30, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .is_err());
        arm.home(&MotionProfile::default()).unwrap();
    }

    #[test]
    fn huge_ledger_angle_is_not_restored() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        ledger
            .record(&PositionSnapshot::Joints([0.0, 0.0, 0.0, 0.0, 0.0, 1e300, 0.0]), Utc::now())
            .unwrap();
        let (arm, _) = build(Box::new(ledger));
        assert_eq!(arm.state().unwrap(), ArmState::Uninitialized);
        assert!(matches!(arm.reseed(), Reseed::Failed(ArmError::LedgerRead(_))));
    }

    #[test]
    fn clock_behind_newest_row_still_records() {
        let future = Utc::now() + chrono::Duration::hours(1);
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.record(&PositionSnapshot::Joints([0.0; 7]), future).unwrap();
        let (arm, _) = build(Box::new(ledger));
        assert_eq!(arm.state().unwrap(), ArmState::Ready);

        arm.move_steppers(&MotionProfile::default(), &[1, 0, 0, 0, 0, 0, 0]).unwrap();
        assert!(!arm.resume_degraded().unwrap());
        let history = arm.history(2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp, future);
        assert_ne!(history[0].snapshot, history[1].snapshot);
    }

    #[test]
    fn device_fault_during_calibration_faults() {
        let (arm, control) = fresh();
        arm.echo().unwrap();
        control.inject(SimFault::Device("limit switch J3 not found".to_string()));
        let err = arm.calibrate(25, [true; 7]).unwrap_err();
        assert!(matches!(err, ArmError::DeviceFault { .. }));
        assert_eq!(arm.state().unwrap(), ArmState::Faulted);
    }

    #[test]
    fn failed_echo_faults() {
        let (arm, control) = fresh();
        control.inject(SimFault::Timeout);
        assert!(arm.echo().is_err());
        assert_eq!(arm.state().unwrap(), ArmState::Faulted);
    }

    #[test]
    fn ledger_write_failure_keeps_the_move_and_degrades_resume() {
        let (arm, _, failing) = flaky();
        arm.calibrate(25, [true; 7]).unwrap();

        failing.store(true, Ordering::SeqCst);
        let err = arm.move_steppers(&MotionProfile::default(), &[5; 7]).unwrap_err();
        assert!(matches!(err, ArmError::LedgerWrite(_)));
        assert!(!err.halts_sequence());
        assert_eq!(arm.current_stepper_position().unwrap(), [5; 7]);
        assert_eq!(arm.state().unwrap(), ArmState::Ready);
        assert!(arm.resume_degraded().unwrap());

        failing.store(false, Ordering::SeqCst);
        arm.move_steppers(&MotionProfile::default(), &[5; 7]).unwrap();
        assert!(!arm.resume_degraded().unwrap());
    }

    #[test]
    fn unreachable_pose_commits_nothing() {
        let (arm, control) = ready();
        arm.home(&MotionProfile::default()).unwrap();
        let before = arm.current_stepper_position().unwrap();
        let commands = control.commands().len();

        let far = Pose::new(
            armos_types::Vec3::new(5_000.0, 0.0, 0.0),
            armos_types::Quaternion::identity(),
        );
        let err = arm.move_to(&MotionProfile::default(), &far).unwrap_err();
        assert!(matches!(err, ArmError::UnreachablePose(_)));
        assert_eq!(arm.current_stepper_position().unwrap(), before);
        assert_eq!(control.commands().len(), commands);
    }

    #[test]
    fn degenerate_rotation_is_rejected() {
        let (arm, _) = ready();
        arm.home(&MotionProfile::default()).unwrap();
        let delta = Pose::new(armos_types::Vec3::zero(), armos_types::Quaternion::new(0.0, 0.0, 0.0, 0.0));
        let err = arm
            .move_pose(&MotionProfile::default(), &delta, MoveMode::Relative)
            .unwrap_err();
        assert!(matches!(err, ArmError::InvalidPose(_)));
    }

    #[test]
    fn set_directions_drops_ready_to_uninitialized() {
        let (arm, _) = ready();
        arm.set_directions([true; 7]).unwrap();
        assert_eq!(arm.state().unwrap(), ArmState::Uninitialized);
        assert_eq!(arm.directions().unwrap(), [true; 7]);
    }

    #[test]
    fn set_directions_probes_the_link_first() {
        let (arm, control) = fresh();
        arm.set_directions([true; 7]).unwrap();
        assert_eq!(control.commands(), vec![SimCommand::Echo]);

        let (arm, control) = fresh();
        control.inject(SimFault::Timeout);
        assert!(matches!(
            arm.set_directions([true; 7]),
            Err(ArmError::LinkTimeout { .. })
        ));
        assert_eq!(arm.directions().unwrap(), DEFAULT_DIRECTIONS);
        assert_eq!(arm.state().unwrap(), ArmState::Faulted);
    }

    #[test]
    fn profile_can_be_replaced_but_not_invalidated() {
        let (arm, _) = fresh();
        arm.set_profile(MotionProfile::with_speed(40)).unwrap();
        assert_eq!(arm.profile().unwrap().speed, 40);
        assert!(arm.set_profile(MotionProfile::with_speed(0)).is_err());
        assert_eq!(arm.profile().unwrap().speed, 40);
    }

    #[test]
    fn status_is_consistent() {
        let (arm, _) = ready();
        arm.home(&MotionProfile::default()).unwrap();
        let status = arm.status().unwrap();
        assert_eq!(status.state, ArmState::Ready);
        assert_eq!(status.joints, [0.0; 7]);
        assert_eq!(status.pose, DhSolver::ar3().forward(&[0.0; 6]));
        assert_eq!(status.port, "sim0");
    }

    #[test]
    fn history_lists_recorded_moves() {
        let (arm, _) = ready();
        arm.home(&MotionProfile::default()).unwrap();
        let history = arm.history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].snapshot, PositionSnapshot::Joints([0.0; 7]));
    }

    #[test]
    fn out_of_range_ledger_row_is_not_restored() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        ledger
            .record(&PositionSnapshot::Joints([100.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]), Utc::now())
            .unwrap();
        let (arm, _) = build(Box::new(ledger));
        assert_eq!(arm.state().unwrap(), ArmState::Uninitialized);
        assert!(matches!(arm.reseed(), Reseed::Failed(ArmError::LedgerRead(_))));
    }

    #[test]
    fn concurrent_readers_see_whole_moves() {
        let (arm, _) = ready();
        let arm = Arc::new(arm);
        let writer = {
            let arm = Arc::clone(&arm);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    arm.move_steppers(&MotionProfile::default(), &[1; 7]).unwrap();
                }
            })
        };
        for _ in 0..50 {
            let steps = arm.current_stepper_position().unwrap();
            // Every axis moves together, so a torn read would show up here.
            assert!(steps.iter().all(|s| *s == steps[0]));
        }
        writer.join().unwrap();
        assert_eq!(arm.current_stepper_position().unwrap(), [50; 7]);
    }
}
