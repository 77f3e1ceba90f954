//! Configuration Vault – reads/writes `~/.armos/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use armos_types::{AXIS_COUNT, Axis, AxisConfig, DEFAULT_DIRECTIONS, MotionProfile};
use serde::{Deserialize, Serialize};

/// Acceleration and deceleration ramps, percentages of the board maximum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ramps {
    #[serde(default = "default_ramp")]
    pub accel_duration: u32,
    #[serde(default = "default_ramp")]
    pub accel_speed: u32,
    #[serde(default = "default_ramp")]
    pub decel_duration: u32,
    #[serde(default = "default_ramp")]
    pub decel_speed: u32,
}

/// Per-axis override of the factory AR3 table. Unset fields keep the
/// factory value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisOverride {
    pub steps_per_degree: Option<f64>,
    pub step_limit: Option<i64>,
    pub home_offset: Option<i64>,
}

/// Persisted user configuration stored in `~/.armos/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Serial port of the controller board.
    #[serde(default = "default_port")]
    pub port: String,

    /// SQLite position ledger; `:memory:` keeps it for one process only.
    #[serde(default = "default_database")]
    pub database: String,

    /// Motion speed, 1–100.
    #[serde(default = "default_speed")]
    pub speed: u32,

    /// Speed used while seeking the limit switches.
    #[serde(default = "default_calibration_speed")]
    pub calibration_speed: u32,

    #[serde(default)]
    pub motion: Ramps,

    /// Direction flag of each axis, J1..J6 then the turntable.
    #[serde(default = "default_directions")]
    pub directions: [bool; AXIS_COUNT],

    /// Overrides keyed by axis name (`J1`..`J6`, `TR`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub axes: BTreeMap<String, AxisOverride>,
}

fn default_ramp() -> u32 {
    10
}
fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_database() -> String {
    config_dir_for_home(&home_dir())
        .join("positions.db")
        .to_string_lossy()
        .into_owned()
}
fn default_speed() -> u32 {
    10
}
fn default_calibration_speed() -> u32 {
    25
}
fn default_directions() -> [bool; AXIS_COUNT] {
    DEFAULT_DIRECTIONS
}

impl Default for Ramps {
    fn default() -> Self {
        Self {
            accel_duration: default_ramp(),
            accel_speed: default_ramp(),
            decel_duration: default_ramp(),
            decel_speed: default_ramp(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            database: default_database(),
            speed: default_speed(),
            calibration_speed: default_calibration_speed(),
            motion: Ramps::default(),
            directions: default_directions(),
            axes: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Motion profile at `speed` with the configured ramps.
    pub fn profile(&self, speed: u32) -> MotionProfile {
        MotionProfile {
            speed,
            accel_duration: self.motion.accel_duration,
            accel_speed: self.motion.accel_speed,
            decel_duration: self.motion.decel_duration,
            decel_speed: self.motion.decel_speed,
        }
    }

    /// Factory AR3 table with the configured directions and overrides.
    pub fn axis_table(&self) -> Result<[AxisConfig; AXIS_COUNT], String> {
        let mut axes = AxisConfig::ar3_defaults();
        for (axis, forward) in axes.iter_mut().zip(self.directions) {
            axis.forward = forward;
        }
        for (name, over) in &self.axes {
            let axis = Axis::ALL
                .iter()
                .find(|a| a.to_string().eq_ignore_ascii_case(name))
                .ok_or_else(|| format!("Unknown axis '{name}' in [axes]; expected J1..J6 or TR"))?;
            let entry = &mut axes[axis.index()];
            if let Some(spd) = over.steps_per_degree {
                if !(spd.is_finite() && spd > 0.0) {
                    return Err(format!("{axis}: steps_per_degree must be positive"));
                }
                entry.steps_per_rad = spd.to_degrees();
            }
            if let Some(limit) = over.step_limit {
                entry.step_limit = limit;
            }
            if let Some(offset) = over.home_offset {
                entry.home_offset = offset;
            }
            if entry.step_limit < 0 || !(0..=entry.step_limit).contains(&entry.home_offset) {
                return Err(format!(
                    "{axis}: home_offset {} outside [0, {}]",
                    entry.home_offset, entry.step_limit
                ));
            }
        }
        Ok(axes)
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn config_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armos")
}

/// Return the path to `~/.armos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    config_dir_for_home(home).join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `ARMOS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMOS_PORT` | `port` |
/// | `ARMOS_DB` | `database` |
/// | `ARMOS_SPEED` | `speed` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ARMOS_PORT") {
        cfg.port = v;
    }
    if let Ok(v) = std::env::var("ARMOS_DB") {
        cfg.database = v;
    }
    if let Ok(v) = std::env::var("ARMOS_SPEED")
        && let Ok(speed) = v.parse::<u32>()
    {
        cfg.speed = speed;
    }
}

/// Save the config to disk, creating `~/.armos/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_config_with_overrides() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.speed = 30;
        cfg.axes.insert(
            "J5".to_string(),
            AxisOverride {
                step_limit: Some(4600),
                ..AxisOverride::default()
            },
        );
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let cfg: Config = toml::from_str("port = \"/dev/ttyACM0\"\n").unwrap();
        assert_eq!(cfg.port, "/dev/ttyACM0");
        assert_eq!(cfg.speed, 10);
        assert_eq!(cfg.calibration_speed, 25);
        assert_eq!(cfg.directions, DEFAULT_DIRECTIONS);
        assert_eq!(cfg.motion, Ramps::default());
    }

    #[test]
    fn config_path_points_to_armos_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".armos"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn profile_uses_configured_ramps() {
        let mut cfg = Config::default();
        cfg.motion.decel_speed = 5;
        let profile = cfg.profile(40);
        assert_eq!(profile.speed, 40);
        assert_eq!(profile.decel_speed, 5);
        assert_eq!(profile.accel_speed, 10);
    }

    #[test]
    fn axis_table_applies_directions_and_overrides() {
        let mut cfg = Config::default();
        cfg.directions = [true; AXIS_COUNT];
        cfg.axes.insert(
            "tr".to_string(),
            AxisOverride {
                steps_per_degree: Some(20.0),
                step_limit: Some(20000),
                home_offset: Some(10000),
            },
        );
        let axes = cfg.axis_table().unwrap();
        assert!(axes.iter().all(|a| a.forward));
        let tr = axes[Axis::Turntable.index()];
        assert_eq!(tr.step_limit, 20000);
        assert_eq!(tr.home_offset, 10000);
        assert!((tr.steps_per_rad - 20.0_f64.to_degrees()).abs() < 1e-9);
    }

    #[test]
    fn axis_table_rejects_unknown_axis_and_bad_offset() {
        let mut cfg = Config::default();
        cfg.axes.insert("J9".to_string(), AxisOverride::default());
        assert!(cfg.axis_table().unwrap_err().contains("J9"));

        let mut cfg = Config::default();
        cfg.axes.insert(
            "J1".to_string(),
            AxisOverride {
                home_offset: Some(20000),
                ..AxisOverride::default()
            },
        );
        assert!(cfg.axis_table().is_err());
    }

    #[test]
    fn apply_env_overrides_replaces_port_database_and_speed() {
        // One test owns every ARMOS_* variable so parallel tests cannot race.
        // SAFETY: no other test touches these variables.
        unsafe {
            std::env::set_var("ARMOS_PORT", "/dev/ttyUSB7");
            std::env::set_var("ARMOS_DB", ":memory:");
            std::env::set_var("ARMOS_SPEED", "55");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.port, "/dev/ttyUSB7");
        assert_eq!(cfg.database, ":memory:");
        assert_eq!(cfg.speed, 55);

        unsafe { std::env::set_var("ARMOS_SPEED", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.speed, default_speed());

        unsafe {
            std::env::remove_var("ARMOS_PORT");
            std::env::remove_var("ARMOS_DB");
            std::env::remove_var("ARMOS_SPEED");
        }
    }
}
