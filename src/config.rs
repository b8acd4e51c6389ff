use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::ColorRange;
use crate::follower::LoopSettings;
use crate::ingest::CameraConfig;
use crate::lifecycle::Timeouts;
use crate::slot::{DEFAULT_COMMAND_CAPACITY, DEFAULT_FRAME_CAPACITY};
use crate::steer::SteeringBands;
use crate::transport::{SerialConfig, TransportSettings};

pub const CONFIG_ENV: &str = "LINE_FOLLOWER_CONFIG";
pub const SERIAL_PORT_ENV: &str = "LINE_FOLLOWER_SERIAL_PORT";
pub const CAMERA_PROGRAM_ENV: &str = "LINE_FOLLOWER_CAMERA_PROGRAM";
pub const DEBUG_DIR_ENV: &str = "LINE_FOLLOWER_DEBUG_DIR";

const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 100;
const DEFAULT_COMMAND_POLL_MS: u64 = 50;
const DEFAULT_FRAME_WAIT_MS: u64 = 1_000;
const DEFAULT_MAX_MISSED_FRAMES: u32 = 30;
const DEFAULT_DEBUG_EVERY: u64 = 15;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FollowerConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    serial: Option<SerialConfigFile>,
    queues: Option<QueueConfigFile>,
    timing: Option<TimingConfigFile>,
    debug: Option<DebugConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    program: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    framerate: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    lower: Option<[u8; 3]>,
    upper: Option<[u8; 3]>,
    left_fraction: Option<f64>,
    right_fraction: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SerialConfigFile {
    enabled: Option<bool>,
    port: Option<String>,
    baud_rate: Option<u32>,
    timeout_ms: Option<u64>,
    echo: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct QueueConfigFile {
    frame_capacity: Option<usize>,
    command_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TimingConfigFile {
    frame_wait_ms: Option<u64>,
    max_missed_frames: Option<u32>,
    command_poll_ms: Option<u64>,
    camera_warmup_ms: Option<u64>,
    demuxer_join_ms: Option<u64>,
    transport_join_ms: Option<u64>,
    camera_terminate_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DebugConfigFile {
    dir: Option<PathBuf>,
    every: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FollowerConfig {
    pub camera: CameraConfig,
    pub color_range: ColorRange,
    pub bands: SteeringBands,
    pub serial: SerialSettings,
    pub frame_capacity: usize,
    pub command_capacity: usize,
    pub loop_settings: LoopSettings,
    pub command_poll: Duration,
    pub timeouts: Timeouts,
    pub debug: DebugSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub enabled: bool,
    /// `None` means discover the controller port at startup.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout: Duration,
    pub echo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSettings {
    /// Snapshot directory; `None` disables debug output.
    pub dir: Option<PathBuf>,
    pub every: u64,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self::from_file(FollowerConfigFile::default())
    }
}

impl FollowerConfig {
    /// Defaults, then the file named by `LINE_FOLLOWER_CONFIG`, then env.
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var(CONFIG_ENV).ok().as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => FollowerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like `load`, but reads `path` instead of consulting `LINE_FOLLOWER_CONFIG`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FollowerConfigFile) -> Self {
        let defaults = CameraConfig::default();
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            program: camera_file.program.unwrap_or(defaults.program),
            width: camera_file.width.unwrap_or(defaults.width),
            height: camera_file.height.unwrap_or(defaults.height),
            framerate: camera_file.framerate.unwrap_or(defaults.framerate),
        };

        let detection = file.detection.unwrap_or_default();
        let dark = ColorRange::dark_line();
        let color_range = ColorRange::new(
            detection.lower.unwrap_or(dark.low),
            detection.upper.unwrap_or(dark.high),
        );
        let default_bands = SteeringBands::default();
        let bands = SteeringBands {
            left_fraction: detection
                .left_fraction
                .unwrap_or(default_bands.left_fraction),
            right_fraction: detection
                .right_fraction
                .unwrap_or(default_bands.right_fraction),
        };

        let serial_file = file.serial.unwrap_or_default();
        let serial = SerialSettings {
            enabled: serial_file.enabled.unwrap_or(true),
            port: serial_file.port.filter(|p| !p.trim().is_empty()),
            baud_rate: serial_file.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
            timeout: Duration::from_millis(
                serial_file.timeout_ms.unwrap_or(DEFAULT_SERIAL_TIMEOUT_MS),
            ),
            echo: serial_file.echo.unwrap_or(true),
        };

        let queues = file.queues.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();
        let default_loop = LoopSettings::default();
        let default_timeouts = Timeouts::default();
        let ms_or = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };

        let loop_settings = LoopSettings {
            frame_wait: Duration::from_millis(timing.frame_wait_ms.unwrap_or(DEFAULT_FRAME_WAIT_MS)),
            max_missed_frames: timing
                .max_missed_frames
                .unwrap_or(DEFAULT_MAX_MISSED_FRAMES),
            ..default_loop
        };
        let timeouts = Timeouts {
            camera_warmup: ms_or(timing.camera_warmup_ms, default_timeouts.camera_warmup),
            demuxer_join: ms_or(timing.demuxer_join_ms, default_timeouts.demuxer_join),
            transport_join: ms_or(timing.transport_join_ms, default_timeouts.transport_join),
            camera_terminate: ms_or(
                timing.camera_terminate_ms,
                default_timeouts.camera_terminate,
            ),
        };

        let debug_file = file.debug.unwrap_or_default();
        let debug = DebugSettings {
            dir: debug_file.dir,
            every: debug_file.every.unwrap_or(DEFAULT_DEBUG_EVERY),
        };

        Self {
            camera,
            color_range,
            bands,
            serial,
            frame_capacity: queues.frame_capacity.unwrap_or(DEFAULT_FRAME_CAPACITY),
            command_capacity: queues.command_capacity.unwrap_or(DEFAULT_COMMAND_CAPACITY),
            loop_settings,
            command_poll: Duration::from_millis(
                timing.command_poll_ms.unwrap_or(DEFAULT_COMMAND_POLL_MS),
            ),
            timeouts,
            debug,
        }
    }

    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var(SERIAL_PORT_ENV) {
            if !port.trim().is_empty() {
                self.serial.port = Some(port);
            }
        }
        if let Ok(program) = std::env::var(CAMERA_PROGRAM_ENV) {
            if !program.trim().is_empty() {
                self.camera.program = program;
            }
        }
        if let Ok(dir) = std::env::var(DEBUG_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.debug.dir = Some(PathBuf::from(dir));
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.program.trim().is_empty() {
            return Err(anyhow!("camera program must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 || self.camera.framerate == 0 {
            return Err(anyhow!(
                "camera width, height and framerate must be greater than zero"
            ));
        }
        if (0..3).any(|c| self.color_range.low[c] > self.color_range.high[c]) {
            return Err(anyhow!(
                "colour range lower bound {:?} exceeds upper bound {:?}",
                self.color_range.low,
                self.color_range.high
            ));
        }
        self.bands.validate()?;
        if self.frame_capacity == 0 || self.command_capacity == 0 {
            return Err(anyhow!("queue capacities must be at least 1"));
        }
        if self.serial.baud_rate == 0 {
            return Err(anyhow!("baud rate must be greater than zero"));
        }
        if self.loop_settings.frame_wait.is_zero() {
            return Err(anyhow!("frame wait must be greater than zero"));
        }
        Ok(())
    }

    /// Serial link settings for a resolved port name.
    pub fn serial_config(&self, port: &str) -> SerialConfig {
        SerialConfig {
            port: port.to_string(),
            baud_rate: self.serial.baud_rate,
            timeout: self.serial.timeout,
        }
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            command_poll: self.command_poll,
            echo: self.serial.echo,
        }
    }
}

fn read_config_file(path: &Path) -> Result<FollowerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
