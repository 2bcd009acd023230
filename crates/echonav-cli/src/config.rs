//! Configuration vault – reads/writes `~/.echonav/config.toml`.
//!
//! The file holds two sections: `[nav]`, the full supervisor tuning, and
//! `[sim]`, the scene the simulated rig starts with.  Missing keys fall back
//! to their defaults, so a file containing only the values an operator cares
//! about is valid.

use std::fs;
use std::path::{Path, PathBuf};

use echonav_runtime::SupervisorConfig;
use echonav_types::CarCorner;
use serde::{Deserialize, Serialize};

/// A static obstacle placed in front of one ranger at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstacleSpec {
    pub corner: CarCorner,
    pub distance_cm: f64,
}

/// Initial scene of the simulated rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Constant gyroscope offset (°/s), removed again by calibration.
    pub gyro_bias_dps: f64,
    pub obstacles: Vec<ObstacleSpec>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            gyro_bias_dps: 0.3,
            obstacles: vec![ObstacleSpec {
                corner: CarCorner::BackLeft,
                distance_cm: 40.0,
            }],
        }
    }
}

/// Persisted operator configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub nav: SupervisorConfig,
    pub sim: SimConfig,
}

/// Return the path to `~/.echonav/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".echonav").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    cfg.nav.validate().map_err(|e| e.to_string())?;
    Ok(Some(cfg))
}

/// Apply `ECHONAV_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ECHONAV_MAX_DIST` | `nav.cadence.max_dist_cm` |
/// | `ECHONAV_MIN_DIST` | `nav.cadence.min_dist_cm` |
/// | `ECHONAV_EXPONENT` | `nav.cadence.exponent` |
/// | `ECHONAV_POLL_MS` | `nav.poll_ms` |
/// | `ECHONAV_CENTER_TOL` | `nav.angle.center_tol_deg` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Same as [`apply_env_overrides`] with an injectable variable lookup.
pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let float = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());

    if let Some(v) = float("ECHONAV_MAX_DIST") {
        cfg.nav.cadence.max_dist_cm = v;
    }
    if let Some(v) = float("ECHONAV_MIN_DIST") {
        cfg.nav.cadence.min_dist_cm = v;
    }
    if let Some(v) = float("ECHONAV_EXPONENT") {
        cfg.nav.cadence.exponent = v;
    }
    if let Some(v) = float("ECHONAV_CENTER_TOL") {
        cfg.nav.angle.center_tol_deg = v;
    }
    if let Some(v) = lookup("ECHONAV_POLL_MS").and_then(|v| v.trim().parse::<u64>().ok()) {
        cfg.nav.poll_ms = v;
    }
}

/// Save the config to disk, creating `~/.echonav/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, Config::default());
        assert_eq!(loaded.nav.poll_ms, 50);
        assert_eq!(loaded.nav.range.corners.len(), 4);
        assert_eq!(loaded.sim.obstacles[0].corner, CarCorner::BackLeft);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[nav]\npoll_ms = 25\n\n[nav.range]\ncorners = [\"back_left\", \"back_right\"]\n\n[[sim.obstacles]]\ncorner = \"back_right\"\ndistance_cm = 12.5\n",
        )
        .unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.nav.poll_ms, 25);
        assert_eq!(
            cfg.nav.range.corners,
            vec![CarCorner::BackLeft, CarCorner::BackRight]
        );
        assert_eq!(cfg.nav.range.trials, 3);
        assert_eq!(cfg.nav.cadence.max_dist_cm, 50.0);
        assert_eq!(cfg.sim.obstacles.len(), 1);
        assert_eq!(cfg.sim.gyro_bias_dps, 0.3);
    }

    #[test]
    fn invalid_values_are_reported() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[nav.cadence]\nmin_dist_cm = 60.0\n").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("min_dist_cm"), "{err}");

        std::fs::write(&path, "nav = 3").unwrap();
        assert!(load_from(&path).unwrap_err().starts_with("Failed to parse"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn config_path_points_to_echonav_dir() {
        let p = config_path_for_home("/home/driver");
        assert!(p.to_string_lossy().contains(".echonav"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn overrides_apply_to_their_fields() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            vars(&[
                ("ECHONAV_MAX_DIST", "80"),
                ("ECHONAV_MIN_DIST", "5.5"),
                ("ECHONAV_EXPONENT", "0.75"),
                ("ECHONAV_POLL_MS", "20"),
                ("ECHONAV_CENTER_TOL", "7"),
            ]),
        );
        assert_eq!(cfg.nav.cadence.max_dist_cm, 80.0);
        assert_eq!(cfg.nav.cadence.min_dist_cm, 5.5);
        assert_eq!(cfg.nav.cadence.exponent, 0.75);
        assert_eq!(cfg.nav.poll_ms, 20);
        assert_eq!(cfg.nav.angle.center_tol_deg, 7.0);
    }

    #[test]
    fn unparsable_overrides_are_ignored() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            vars(&[("ECHONAV_MAX_DIST", "far"), ("ECHONAV_POLL_MS", "-3")]),
        );
        assert_eq!(cfg, Config::default());
    }
}
