//! Arm commands shared by the one-shot CLI and the REPL.
//!
//! Each command is a thin call onto one or two [`ArmController`]
//! operations; the controller persists every committed move itself.

use armos_kinematics::MoveMode;
use armos_runtime::ArmController;
use armos_types::{AXIS_COUNT, ArmError, JointVector, Pose, Quaternion, StepVector, Vec3};
use clap::{Args, Subcommand};
use colored::Colorize;
use tracing::warn;

/// Speed settings threaded through every command of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speeds {
    pub motion: u32,
    pub calibration: u32,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ArmCommand {
    /// Home every joint on its limit switch, then move to zero angles
    #[command(visible_alias = "c")]
    Calibrate,

    /// Move every axis to zero angle
    Home,

    /// Print the tracked steps, joint angles and end-effector pose
    #[command(visible_alias = "s")]
    State,

    /// Move the end effector; relative to the current pose unless --abs
    #[command(visible_alias = "m")]
    Move(MoveArgs),

    /// Move the steppers by relative step counts (J1..J6, TR)
    Steppers {
        #[arg(num_args = AXIS_COUNT, allow_negative_numbers = true, required = true)]
        deltas: Vec<i64>,
    },

    /// Move to absolute joint angles in radians (J1..J6, TR)
    Joints {
        #[arg(num_args = AXIS_COUNT, allow_negative_numbers = true, required = true)]
        angles: Vec<f64>,
    },

    /// Probe the controller board; clears a fault so the arm can recalibrate
    Echo,

    /// Show or set the direction convention (7 flags, `true`/`false`)
    Directions {
        #[arg(num_args = AXIS_COUNT, action = clap::ArgAction::Set)]
        flags: Option<Vec<bool>>,
    },

    /// List recently recorded positions
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct MoveArgs {
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub x: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub y: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub z: f64,
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    pub qw: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub qx: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub qy: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub qz: f64,
    /// Move in absolute coordinates instead of relative to the current pose
    #[arg(short, long)]
    pub abs: bool,
}

impl MoveArgs {
    pub fn pose(&self) -> Pose {
        Pose::new(
            Vec3::new(self.x, self.y, self.z),
            Quaternion::new(self.qw, self.qx, self.qy, self.qz),
        )
    }

    pub fn mode(&self) -> MoveMode {
        if self.abs {
            MoveMode::Absolute
        } else {
            MoveMode::Relative
        }
    }
}

fn to_array<T: Copy + Default, const N: usize>(values: &[T]) -> Result<[T; N], ArmError> {
    <[T; N]>::try_from(values).map_err(|_| {
        ArmError::InvalidPose(format!("expected {N} values, got {}", values.len()))
    })
}

/// Run `command` against `arm`.
///
/// A [`ArmError::LinkTimeout`] gets one echo retry so the operator learns
/// whether the board is still reachable; the arm stays faulted either way.
pub fn execute(arm: &ArmController, command: &ArmCommand, speeds: Speeds) -> Result<(), ArmError> {
    let result = dispatch(arm, command, speeds);
    if let Err(ArmError::LinkTimeout { .. }) = &result {
        match arm.echo() {
            Ok(()) => println!(
                "  {} board answers again; run {} before moving",
                "!".yellow().bold(),
                "calibrate".bold()
            ),
            Err(e) => {
                warn!(error = %e, "echo retry after timeout failed");
                println!("  {} board unreachable: {}", "!".red().bold(), e);
            }
        }
    }
    result
}

fn dispatch(arm: &ArmController, command: &ArmCommand, speeds: Speeds) -> Result<(), ArmError> {
    let mut profile = arm.profile()?;
    profile.speed = speeds.motion;

    match command {
        ArmCommand::Calibrate => {
            // The turntable has no limit switch.
            let mut enabled = [true; AXIS_COUNT];
            enabled[AXIS_COUNT - 1] = false;
            if let Err(e) = arm.calibrate(speeds.calibration, enabled) {
                if e.halts_sequence() {
                    return Err(e);
                }
                warn!(error = %e, "calibration not recorded; homing anyway");
                println!("  {} {}", "!".yellow().bold(), e);
            }
            arm.home(&profile)?;
            println!("  {} calibrated and homed", "✓".green().bold());
        }
        ArmCommand::Home => {
            arm.home(&profile)?;
            println!("  {} homed", "✓".green().bold());
        }
        ArmCommand::State => print_state(arm)?,
        ArmCommand::Move(args) => {
            arm.move_pose(&profile, &args.pose(), args.mode())?;
            println!("  {} moved", "✓".green().bold());
        }
        ArmCommand::Steppers { deltas } => {
            let deltas: StepVector = to_array(deltas)?;
            arm.move_steppers(&profile, &deltas)?;
            println!("  {} moved", "✓".green().bold());
        }
        ArmCommand::Joints { angles } => {
            let angles: JointVector = to_array(angles)?;
            arm.move_joint_radians(&profile, &angles)?;
            println!("  {} moved", "✓".green().bold());
        }
        ArmCommand::Echo => {
            arm.echo()?;
            println!("  {} board alive", "✓".green().bold());
        }
        ArmCommand::Directions { flags: None } => {
            println!("  directions: {:?}", arm.directions()?);
        }
        ArmCommand::Directions { flags: Some(flags) } => {
            let flags: [bool; AXIS_COUNT] = to_array(flags)?;
            arm.set_directions(flags)?;
            println!("  directions: {:?}", flags);
            println!("  {} recalibrate before moving", "!".yellow().bold());
        }
        ArmCommand::History { limit } => {
            for record in arm.history(*limit)? {
                let snapshot = serde_json::to_string(&record.snapshot)
                    .unwrap_or_else(|e| format!("<unprintable: {e}>"));
                let when = record.timestamp.with_timezone(&chrono::Local);
                println!(
                    "  {:>6}  {}  {}",
                    record.id.to_string().dimmed(),
                    when.format("%Y-%m-%d %H:%M:%S%.3f"),
                    snapshot
                );
            }
        }
    }
    Ok(())
}

fn print_state(arm: &ArmController) -> Result<(), ArmError> {
    let status = arm.status()?;
    println!("  port      : {}", status.port.bold());
    println!("  state     : {}", status.state.to_string().yellow());
    println!("  steps     : {:?}", status.steps);
    println!("  joints    : {:?}", status.joints);
    let pose = serde_json::to_string_pretty(&status.pose)
        .unwrap_or_else(|e| format!("<unprintable: {e}>"));
    println!("  pose      : {}", pose);
    if status.resume_degraded {
        println!(
            "  {} last move missing from the ledger; a restart would resume from an older position",
            "!".yellow().bold()
        );
    }
    Ok(())
}
