use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::colormap::Gradient;
use crate::compositor::RenderConfig;
use crate::error::ConfigError;
use crate::grid::Rotation;
use crate::serial_link::{self, LinkOptions};

const APP_DIR: &str = "pressure-mat";
const SETTINGS_FILE: &str = "settings.json";

/// Where frames come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    #[default]
    Simulated,
    Recorded,
}

impl DataSource {
    pub fn next(self) -> DataSource {
        match self {
            DataSource::Live => DataSource::Simulated,
            DataSource::Simulated => DataSource::Recorded,
            DataSource::Recorded => DataSource::Live,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataSource::Live => "live sensor",
            DataSource::Simulated => "simulated",
            DataSource::Recorded => "recorded",
        })
    }
}

/// User selections, persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_source: DataSource,
    pub port: Option<String>,
    pub baud_rate: u32,
    /// `None` polls as fast as the source allows.
    pub frames_per_second: Option<u32>,
    pub rotation: Rotation,
    pub mirror: bool,
    pub value_min: f32,
    pub value_max: f32,
    pub gradient: Gradient,
    pub cell_aspect_ratio: f32,
    /// Heatmap canvas in pixels, `(width, height)`.
    pub canvas_size: (usize, usize),
    pub handshake_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub record_dir: Option<PathBuf>,
    pub record_filename: String,
    pub record_append_datetime: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_source: DataSource::default(),
            port: None,
            baud_rate: serial_link::DEFAULT_BAUD_RATE,
            frames_per_second: None,
            rotation: Rotation::Deg0,
            mirror: false,
            value_min: 0.0,
            value_max: 1023.0,
            gradient: Gradient::Inferno,
            cell_aspect_ratio: 1.0,
            canvas_size: (400, 400),
            handshake_timeout_ms: serial_link::DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            read_timeout_ms: serial_link::DEFAULT_READ_TIMEOUT.as_millis() as u64,
            record_dir: None,
            record_filename: "data".into(),
            record_append_datetime: true,
        }
    }
}

impl Settings {
    /// `<data dir>/pressure-mat`, falling back to the working directory.
    pub fn app_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    pub fn default_path() -> PathBuf {
        Self::app_dir().join(SETTINGS_FILE)
    }

    /// Reads settings from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Like [`Settings::load_from`], but never fails. A file that does not
    /// parse is renamed to `*.json.bad` so saving the defaults later cannot
    /// clobber it.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(settings) => settings,
            Err(ConfigError::Parse { source, .. }) => {
                let aside = path.with_extension("json.bad");
                match fs::rename(path, &aside) {
                    Ok(()) => tracing::warn!(
                        error = %source,
                        moved_to = %aside.display(),
                        "settings file is invalid, using defaults"
                    ),
                    Err(e) => tracing::warn!(
                        error = %source,
                        rename_error = %e,
                        "settings file is invalid and could not be moved aside"
                    ),
                }
                Self::default()
            }
            Err(error) => {
                tracing::warn!(%error, "could not load settings, using defaults");
                Self::default()
            }
        }
    }

    /// Writes through a temporary file so a crash never leaves half a file behind.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_owned(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    /// Drops a saved port that is no longer plugged in.
    pub fn forget_missing_port(&mut self, available: &[String]) {
        if let Some(port) = &self.port {
            if !available.iter().any(|p| p == port) {
                tracing::info!(port = %port, "saved port not present, clearing it");
                self.port = None;
            }
        }
    }

    /// Sleep between cycles, `None` for unlimited.
    pub fn frame_period(&self) -> Option<Duration> {
        match self.frames_per_second {
            Some(fps) if fps > 0 => Some(Duration::from_secs_f64(1.0 / fps as f64)),
            _ => None,
        }
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        }
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            value_min: self.value_min,
            value_max: self.value_max,
            rotation: self.rotation,
            mirror: self.mirror,
            canvas: self.canvas_size,
            gradient: self.gradient,
            cell_aspect_ratio: self.cell_aspect_ratio,
        }
    }

    pub fn record_dir(&self) -> PathBuf {
        self.record_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.data_source, DataSource::Simulated);
        assert_eq!(settings.baud_rate, 115_200);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            data_source: DataSource::Live,
            port: Some("/dev/ttyACM0".into()),
            frames_per_second: Some(30),
            rotation: Rotation::Deg270,
            mirror: true,
            gradient: Gradient::Viridis,
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "rotation": 90, "data_source": "live", "gradient": "magma" }"#)
            .unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.rotation, Rotation::Deg90);
        assert_eq!(settings.data_source, DataSource::Live);
        assert_eq!(settings.gradient, Gradient::Magma);
        assert_eq!(settings.value_max, 1023.0);
    }

    #[test]
    fn bad_rotation_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "rotation": 45 }"#).unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn invalid_file_is_kept_aside_before_defaults_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let typo = r#"{ "rotation": 90, "mirror": tru }"#;
        fs::write(&path, typo).unwrap();

        let settings = Settings::load_or_default(&path);
        assert_eq!(settings, Settings::default());
        settings.save_to(&path).unwrap();

        let aside = dir.path().join("settings.json.bad");
        assert_eq!(fs::read_to_string(&aside).unwrap(), typo);
        assert_eq!(Settings::load_from(&path).unwrap(), Settings::default());
    }

    #[test]
    fn frame_period_follows_fps() {
        let mut settings = Settings::default();
        assert_eq!(settings.frame_period(), None);
        settings.frames_per_second = Some(20);
        assert_eq!(settings.frame_period(), Some(Duration::from_secs_f64(0.05)));
        settings.frames_per_second = Some(0);
        assert_eq!(settings.frame_period(), None);
    }

    #[test]
    fn missing_port_is_forgotten() {
        let mut settings = Settings {
            port: Some("COM7".into()),
            ..Settings::default()
        };
        settings.forget_missing_port(&["COM7".into()]);
        assert_eq!(settings.port.as_deref(), Some("COM7"));
        settings.forget_missing_port(&["COM3".into()]);
        assert_eq!(settings.port, None);
    }
}
