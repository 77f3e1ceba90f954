//! REPL – Read-Eval-Print Loop for the ArmOS interactive shell.
//!
//! Every arm subcommand is accepted with or without a leading slash
//! (`state`, `/move --x 10`). Shell commands:
//!   /help         – show this list
//!   /speed [N]    – show or set the motion speed for this session
//!   /quit | /exit – leave the shell

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use armos_runtime::ArmController;
use clap::Parser;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::commands::{self, ArmCommand, Speeds};

/// One REPL line parsed as an arm command.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_subcommand = true)]
struct Line {
    #[command(subcommand)]
    command: ArmCommand,
}

#[derive(Debug, PartialEq)]
enum Input {
    Help,
    Quit,
    ShowSpeed,
    SetSpeed(u32),
    Arm(ArmCommand),
    Invalid(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.strip_prefix('/').unwrap_or(line);
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["help"] => Input::Help,
        ["quit"] | ["exit"] => Input::Quit,
        ["speed"] => Input::ShowSpeed,
        ["speed", value] => match value.parse::<u32>() {
            Ok(speed) if (1..=100).contains(&speed) => Input::SetSpeed(speed),
            _ => Input::Invalid(format!("speed must be 1–100, got '{value}'")),
        },
        _ => match Line::try_parse_from(words) {
            Ok(parsed) => Input::Arm(parsed.command),
            Err(e) => Input::Invalid(e.to_string()),
        },
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(arm: &ArmController, mut speeds: Speeds, shutdown: Arc<AtomicBool>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let prompt = format!("{} ", "armos>".bold().cyan());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(cmd);

        match parse_input(cmd) {
            Input::Help => cmd_help(),
            Input::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Input::ShowSpeed => println!("  speed: {}", speeds.motion),
            Input::SetSpeed(speed) => {
                speeds.motion = speed;
                println!("  {} speed set to {}", "✓".green().bold(), speed);
            }
            Input::Arm(command) => {
                if let Err(e) = commands::execute(arm, &command, speeds) {
                    println!("  {}: {}", "Error".red().bold(), e);
                }
            }
            Input::Invalid(msg) => {
                println!("{}", msg.trim_end());
                println!("  Type {} for available commands.", "/help".bold());
            }
        }
    }
}

fn cmd_help() {
    println!();
    println!("  {}", "Arm commands".bold());
    println!("    calibrate                  – home on the limit switches, then zero angles");
    println!("    home                       – move every axis to zero angle");
    println!("    state                      – print steps, joint angles and pose");
    println!("    move [--x --y --z --qw --qx --qy --qz] [--abs]");
    println!("                               – Cartesian move, relative unless --abs");
    println!("    steppers <7 step deltas>   – relative stepper move");
    println!("    joints <7 radians>         – absolute joint move");
    println!("    echo                       – probe the controller board");
    println!("    directions [7 true|false]  – show or set the direction flags");
    println!("    history [--limit N]        – recently recorded positions");
    println!("  {}", "Shell".bold());
    println!("    /speed [N]                 – show or set the motion speed");
    println!("    /help                      – this list");
    println!("    /quit | /exit              – leave the shell");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::MoveArgs;

    #[test]
    fn shell_commands_accept_optional_slash() {
        assert_eq!(parse_input("/help"), Input::Help);
        assert_eq!(parse_input("exit"), Input::Quit);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/speed"), Input::ShowSpeed);
        assert_eq!(parse_input("/speed 40"), Input::SetSpeed(40));
    }

    #[test]
    fn speed_out_of_range_is_invalid() {
        assert!(matches!(parse_input("/speed 0"), Input::Invalid(_)));
        assert!(matches!(parse_input("/speed 101"), Input::Invalid(_)));
        assert!(matches!(parse_input("/speed fast"), Input::Invalid(_)));
    }

    #[test]
    fn arm_commands_parse_through_clap() {
        assert_eq!(parse_input("state"), Input::Arm(ArmCommand::State));
        assert_eq!(
            parse_input("/move --y -5 -a"),
            Input::Arm(ArmCommand::Move(MoveArgs {
                x: 0.0,
                y: -5.0,
                z: 0.0,
                qw: 1.0,
                qx: 0.0,
                qy: 0.0,
                qz: 0.0,
                abs: true,
            }))
        );
    }

    #[test]
    fn unknown_command_is_invalid() {
        assert!(matches!(parse_input("/fly"), Input::Invalid(_)));
    }
}
